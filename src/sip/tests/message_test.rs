use crate::sip::message::{
    build_bye, build_invite, build_sdp, new_branch, new_tag, parse_response, DialogIds,
};
use std::net::{IpAddr, Ipv4Addr};

const LOCAL_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

fn ids() -> DialogIds {
    DialogIds {
        call_id: "1700000000000000000@10.0.0.1".to_string(),
        local_tag: "424242".to_string(),
    }
}

#[test]
fn invite_has_required_headers_in_order() {
    let sdp = build_sdp(&LOCAL_IP, 10002);
    let invite = build_invite(
        "19543004835",
        "50764137984",
        &LOCAL_IP,
        5070,
        "192.168.1.5",
        5060,
        &ids(),
        &sdp,
    );

    assert!(invite.starts_with("INVITE sip:50764137984@192.168.1.5:5060 SIP/2.0\r\n"));
    let order = [
        "\r\nVia: ",
        "\r\nMax-Forwards: 70\r\n",
        "\r\nFrom: ",
        "\r\nTo: ",
        "\r\nCall-ID: ",
        "\r\nCSeq: 1 INVITE\r\n",
        "\r\nContact: ",
        "\r\nContent-Type: application/sdp\r\n",
        "\r\nContent-Length: ",
        "\r\nUser-Agent: ",
    ];
    let mut last = 0;
    for header in order {
        let pos = invite
            .find(header)
            .unwrap_or_else(|| panic!("missing header {:?}", header));
        assert!(pos > last, "header {:?} out of order", header);
        last = pos;
    }

    let via = invite
        .lines()
        .find(|l| l.starts_with("Via: "))
        .expect("via line");
    assert!(via.contains("branch=z9hG4bK"));
    assert!(via.contains(";rport"));
    assert!(invite.contains("From: <sip:19543004835@10.0.0.1>;tag=424242\r\n"));
    // To carries no tag on a fresh INVITE
    assert!(invite.contains("To: <sip:50764137984@192.168.1.5>\r\n"));
    assert!(invite.contains(&format!("Content-Length: {}\r\n", sdp.len())));

    let body = invite.split("\r\n\r\n").nth(1).expect("body");
    assert_eq!(body, sdp);
}

#[test]
fn sdp_offer_matches_expected_shape() {
    let sdp = build_sdp(&LOCAL_IP, 12346);
    let lines: Vec<&str> = sdp.split("\r\n").collect();
    assert_eq!(lines[0], "v=0");
    assert_eq!(lines[2], "s=S1 Call Generator");
    assert_eq!(lines[3], "c=IN IP4 10.0.0.1");
    assert_eq!(lines[4], "t=0 0");
    assert_eq!(lines[5], "m=audio 12346 RTP/AVP 0 8 101");
    assert_eq!(lines[6], "a=rtpmap:0 PCMU/8000");
    assert_eq!(lines[7], "a=rtpmap:8 PCMA/8000");
    assert_eq!(lines[8], "a=rtpmap:101 telephone-event/8000");
    assert_eq!(lines[9], "a=fmtp:101 0-16");
    assert_eq!(lines[10], "a=sendrecv");

    // both o-line timestamps are the same Unix-seconds value
    let o: Vec<&str> = lines[1].split(' ').collect();
    assert_eq!(o[0], "o=-");
    assert_eq!(o[1], o[2]);
    assert_eq!(o[3], "IN");
    assert_eq!(o[5], "10.0.0.1");
}

#[test]
fn bye_echoes_dialog_identifiers() {
    let ids = ids();
    let bye = build_bye(
        "19543004835",
        "50764137984",
        &LOCAL_IP,
        5070,
        "192.168.1.5",
        5060,
        &ids,
        Some("t1"),
    );
    assert!(bye.starts_with("BYE sip:50764137984@192.168.1.5:5060 SIP/2.0\r\n"));
    assert!(bye.contains("CSeq: 2 BYE\r\n"));
    assert!(bye.contains(&format!("Call-ID: {}\r\n", ids.call_id)));
    assert!(bye.contains("From: <sip:19543004835@10.0.0.1>;tag=424242\r\n"));
    assert!(bye.contains("To: <sip:50764137984@192.168.1.5>;tag=t1\r\n"));
    assert!(bye.contains("Content-Length: 0\r\n"));
    assert!(bye.ends_with("\r\n\r\n"));
}

#[test]
fn bye_without_remote_tag_omits_the_parameter() {
    let bye = build_bye(
        "100",
        "200",
        &LOCAL_IP,
        5070,
        "192.168.1.5",
        5060,
        &ids(),
        None,
    );
    let to = bye.lines().find(|l| l.starts_with("To: ")).expect("to line");
    assert!(!to.contains("tag="));
}

#[test]
fn parse_response_extracts_code_call_id_and_tag() {
    let raw = "SIP/2.0 200 OK\r\n\
               Via: SIP/2.0/UDP 10.0.0.1:5070;branch=z9hG4bK123;rport\r\n\
               From: <sip:100@10.0.0.1>;tag=424242\r\n\
               To: <sip:200@192.168.1.5>;tag=as58f4201b\r\n\
               Call-ID: 1700000000000000000@10.0.0.1\r\n\
               CSeq: 1 INVITE\r\n\
               Content-Length: 0\r\n\r\n";
    let response = parse_response(raw).expect("parses");
    assert_eq!(response.code, 200);
    assert_eq!(response.call_id, "1700000000000000000@10.0.0.1");
    assert_eq!(response.to_tag.as_deref(), Some("as58f4201b"));
}

#[test]
fn parse_response_provisional_without_tag() {
    let raw = "SIP/2.0 180 Ringing\r\n\
               To: <sip:200@192.168.1.5>\r\n\
               Call-ID: abc@10.0.0.1\r\n\r\n";
    let response = parse_response(raw).expect("parses");
    assert_eq!(response.code, 180);
    assert_eq!(response.to_tag, None);
}

#[test]
fn parse_response_handles_bracketed_tag_terminators() {
    let raw = "SIP/2.0 200 OK\r\n\
               To: <sip:200@192.168.1.5;tag=inner>\r\n\
               Call-ID: abc@10.0.0.1\r\n\r\n";
    let response = parse_response(raw).expect("parses");
    assert_eq!(response.to_tag.as_deref(), Some("inner"));
}

#[test]
fn parse_response_rejects_garbage() {
    assert!(parse_response("").is_none());
    assert!(parse_response("GET / HTTP/1.1\r\n\r\n").is_none());
    assert!(parse_response("SIP/2.0\r\n").is_none());
    assert!(parse_response("SIP/2.0 abc Weird\r\nCall-ID: x\r\n").is_none());
    // no Call-ID means nothing to demultiplex on
    assert!(parse_response("SIP/2.0 200 OK\r\nCSeq: 1 INVITE\r\n\r\n").is_none());
}

#[test]
fn tags_and_branches_are_decimal_tokens() {
    let tag = new_tag();
    assert!(!tag.is_empty());
    assert!(tag.chars().all(|c| c.is_ascii_digit()));

    let branch = new_branch();
    let digits = branch.strip_prefix("z9hG4bK").expect("magic cookie");
    assert!(digits.chars().all(|c| c.is_ascii_digit()));

    assert_ne!(new_tag(), new_tag());
}

#[test]
fn generated_call_ids_embed_the_local_ip() {
    let ids = DialogIds::generate(&LOCAL_IP);
    assert!(ids.call_id.ends_with("@10.0.0.1"));
    let nanos = ids.call_id.split('@').next().unwrap();
    assert!(nanos.chars().all(|c| c.is_ascii_digit()));
}
