use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

pub const USER_AGENT: &str = "S1-CallGenerator/1.0";

/// A parsed SIP response, reduced to the fields the generator acts on.
#[derive(Debug, Clone)]
pub struct SipResponse {
    pub code: u16,
    pub call_id: String,
    pub to_tag: Option<String>,
}

/// Identifiers for one UAC dialog. Unique within the process lifetime.
#[derive(Debug, Clone)]
pub struct DialogIds {
    pub call_id: String,
    pub local_tag: String,
}

impl DialogIds {
    pub fn generate(local_ip: &IpAddr) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self {
            call_id: format!("{}@{}", nanos, local_ip),
            local_tag: new_tag(),
        }
    }
}

pub fn new_tag() -> String {
    format!("{}", rand::random::<u64>())
}

pub fn new_branch() -> String {
    format!("z9hG4bK{}", rand::random::<u64>())
}

pub fn build_sdp(local_ip: &IpAddr, rtp_port: u16) -> String {
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!(
        "v=0\r\n\
         o=- {t} {t} IN IP4 {ip}\r\n\
         s=S1 Call Generator\r\n\
         c=IN IP4 {ip}\r\n\
         t=0 0\r\n\
         m=audio {port} RTP/AVP 0 8 101\r\n\
         a=rtpmap:0 PCMU/8000\r\n\
         a=rtpmap:8 PCMA/8000\r\n\
         a=rtpmap:101 telephone-event/8000\r\n\
         a=fmtp:101 0-16\r\n\
         a=sendrecv\r\n",
        t = t,
        ip = local_ip,
        port = rtp_port,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn build_invite(
    ani: &str,
    dnis: &str,
    local_ip: &IpAddr,
    local_port: u16,
    peer_host: &str,
    peer_port: u16,
    ids: &DialogIds,
    sdp: &str,
) -> String {
    format!(
        "INVITE sip:{dnis}@{peer_host}:{peer_port} SIP/2.0\r\n\
         Via: SIP/2.0/UDP {ip}:{port};branch={branch};rport\r\n\
         Max-Forwards: 70\r\n\
         From: <sip:{ani}@{ip}>;tag={tag}\r\n\
         To: <sip:{dnis}@{peer_host}>\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: 1 INVITE\r\n\
         Contact: <sip:{ani}@{ip}:{port}>\r\n\
         Content-Type: application/sdp\r\n\
         Content-Length: {len}\r\n\
         User-Agent: {ua}\r\n\
         \r\n\
         {sdp}",
        dnis = dnis,
        peer_host = peer_host,
        peer_port = peer_port,
        ip = local_ip,
        port = local_port,
        branch = new_branch(),
        ani = ani,
        tag = ids.local_tag,
        call_id = ids.call_id,
        len = sdp.len(),
        ua = USER_AGENT,
        sdp = sdp,
    )
}

#[allow(clippy::too_many_arguments)]
pub fn build_bye(
    ani: &str,
    dnis: &str,
    local_ip: &IpAddr,
    local_port: u16,
    peer_host: &str,
    peer_port: u16,
    ids: &DialogIds,
    remote_tag: Option<&str>,
) -> String {
    let to = match remote_tag {
        Some(tag) => format!("<sip:{}@{}>;tag={}", dnis, peer_host, tag),
        None => format!("<sip:{}@{}>", dnis, peer_host),
    };
    format!(
        "BYE sip:{dnis}@{peer_host}:{peer_port} SIP/2.0\r\n\
         Via: SIP/2.0/UDP {ip}:{port};branch={branch};rport\r\n\
         Max-Forwards: 70\r\n\
         From: <sip:{ani}@{ip}>;tag={tag}\r\n\
         To: {to}\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: 2 BYE\r\n\
         Content-Length: 0\r\n\
         \r\n",
        dnis = dnis,
        peer_host = peer_host,
        peer_port = peer_port,
        ip = local_ip,
        port = local_port,
        branch = new_branch(),
        ani = ani,
        tag = ids.local_tag,
        to = to,
        call_id = ids.call_id,
    )
}

/// Parse an incoming datagram as a SIP response. Returns `None` for anything
/// that is not a well-formed `SIP/2.0 <code>` response carrying a Call-ID.
pub fn parse_response(raw: &str) -> Option<SipResponse> {
    let mut lines = raw.split("\r\n");
    let status_line = lines.next()?;
    let mut parts = status_line.split(' ');
    if parts.next()? != "SIP/2.0" {
        return None;
    }
    let code: u16 = parts.next()?.parse().ok()?;

    let mut call_id = None;
    let mut to_tag = None;
    for line in lines {
        if let Some(rest) = line.strip_prefix("Call-ID:") {
            call_id = Some(rest.trim().to_string());
        } else if line.starts_with("To:") {
            to_tag = extract_tag(line);
        }
    }

    Some(SipResponse {
        code,
        call_id: call_id?,
        to_tag,
    })
}

/// Pull the `tag=` parameter out of a To/From header line.
fn extract_tag(line: &str) -> Option<String> {
    let start = line.find("tag=")? + 4;
    let rest = &line[start..];
    let end = rest.find([';', '>']).unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}
