use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(version, about = "S1 call generator")]
pub struct Cli {
    /// Configuration file
    #[clap(long, default_value = "configs/config.json")]
    pub config: String,
    /// CSV file with number pairs
    #[clap(long)]
    pub csv: Option<String>,
    /// Start only the web control surface
    #[clap(long)]
    pub web: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub peer: PeerConfig,
    pub call_params: CallParams,
    pub schedule: ScheduleConfig,
    pub autopilot: AutopilotConfig,
    pub control_surface: ControlSurfaceConfig,
    /// Local UDP port for the SIP socket
    pub sip_port: u16,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PeerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5060,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CallParams {
    pub acd_min_s: u32,
    pub acd_max_s: u32,
    pub asr_pct: f64,
    pub min_concurrent: u32,
    pub max_concurrent: u32,
    pub target_cps: f64,
    pub ramp_up_s: u32,
    pub ramp_down_s: u32,
    pub rtp_enabled: bool,
}

impl Default for CallParams {
    fn default() -> Self {
        Self {
            acd_min_s: 30,
            acd_max_s: 180,
            asr_pct: 70.0,
            min_concurrent: 0,
            max_concurrent: 100,
            target_cps: 1.0,
            ramp_up_s: 0,
            ramp_down_s: 0,
            rtp_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub weekday: HourWindow,
    pub weekend: HourWindow,
}

impl ScheduleConfig {
    pub fn window(&self, weekend: bool) -> &HourWindow {
        if weekend {
            &self.weekend
        } else {
            &self.weekday
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HourWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

impl Default for HourWindow {
    fn default() -> Self {
        Self {
            start_hour: 0,
            end_hour: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AutopilotConfig {
    pub enabled: bool,
    pub target_asr_pct: f64,
    pub adjustment_interval_s: u64,
    pub max_cps_step: f64,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            target_asr_pct: 70.0,
            adjustment_interval_s: 30,
            max_cps_step: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlSurfaceConfig {
    pub enabled: bool,
    pub bind_port: u16,
    pub basic_auth: BasicAuthConfig,
}

impl Default for ControlSurfaceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_port: 8080,
            basic_auth: BasicAuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BasicAuthConfig {
    pub user: String,
    pub pass: String,
}

impl Default for BasicAuthConfig {
    fn default() -> Self {
        Self {
            user: "admin".to_string(),
            pass: "admin".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path))?;
        let mut config: Config = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse config {}", path))?;
        config.normalize();
        Ok(config)
    }

    /// Zero-valued core parameters behave like missing ones.
    pub(crate) fn normalize(&mut self) {
        let defaults = CallParams::default();
        let p = &mut self.call_params;
        if p.acd_min_s == 0 {
            p.acd_min_s = defaults.acd_min_s;
        }
        if p.acd_max_s == 0 {
            p.acd_max_s = defaults.acd_max_s;
        }
        if p.asr_pct == 0.0 {
            p.asr_pct = defaults.asr_pct;
        }
        if p.max_concurrent == 0 {
            p.max_concurrent = defaults.max_concurrent;
        }
        if p.target_cps == 0.0 {
            p.target_cps = defaults.target_cps;
        }
        if self.sip_port == 0 {
            self.sip_port = 5070;
        }
    }
}
