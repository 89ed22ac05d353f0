use crate::synthesis::SynthesisConfig;
use anyhow::Error;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(3600);
const DEFAULT_MAX_CALL_DURATION: Duration = Duration::from_secs(300);
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_TIMEOUT_TICK: Duration = Duration::from_millis(1);

#[derive(Parser, Debug)]
#[command(version, long_version = crate::version::get_version_info())]
pub struct Cli {
    /// Path to the TOML configuration, built-in defaults are used when absent
    #[clap(long)]
    pub conf: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub http_addr: String,
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub voip_provider: VoipProviderConfig,
    pub baresip: BaresipConfig,
    pub tts: SynthesisConfig,
    pub http_rest_server: HttpServerConfig,
    pub stats: StatsConfig,
    pub voice_calls: VoiceCallsConfig,
    pub contacts: Vec<ContactConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct VoipProviderConfig {
    /// SIP account, example: sip:alice@voip.example.com
    pub account: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BaresipConfig {
    /// Address of the ctrl_tcp module
    pub addr: String,
    pub command_timeout: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct HttpServerConfig {
    /// Hold the /dial response until the call is over
    pub synchronous: bool,
    pub keepalive_interval: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct StatsConfig {
    pub interval: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct VoiceCallsConfig {
    pub max_duration: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ContactConfig {
    pub name: String,
    pub uri: String,
}

impl Default for BaresipConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4444".to_string(),
            command_timeout: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:80".to_string(),
            log_level: Some("info".to_string()),
            log_file: None,
            voip_provider: VoipProviderConfig::default(),
            baresip: BaresipConfig::default(),
            tts: SynthesisConfig::default(),
            http_rest_server: HttpServerConfig::default(),
            stats: StatsConfig::default(),
            voice_calls: VoiceCallsConfig::default(),
            contacts: Vec::new(),
        }
    }
}

/// Parse a human duration such as `10s` or `5m`, falling back to `default`.
pub fn parse_duration_or(value: Option<&str>, default: Duration) -> Duration {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => default,
        Some(v) => match humantime::parse_duration(v) {
            Ok(d) if !d.is_zero() => d,
            Ok(_) => {
                warn!("zero duration {:?} is not allowed, using {:?}", v, default);
                default
            }
            Err(e) => {
                warn!("invalid duration {:?}: {}, using {:?}", v, e, default);
                default
            }
        },
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self, Error> {
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }

    pub fn stats_interval(&self) -> Duration {
        parse_duration_or(self.stats.interval.as_deref(), DEFAULT_STATS_INTERVAL)
    }

    pub fn max_call_duration(&self) -> Duration {
        parse_duration_or(
            self.voice_calls.max_duration.as_deref(),
            DEFAULT_MAX_CALL_DURATION,
        )
    }

    /// The timeout ticker runs ten times per max call duration to bound the overrun.
    /// Tiny durations still yield a usable, non-zero period.
    pub fn timeout_tick_interval(&self) -> Duration {
        (self.max_call_duration() / 10).max(MIN_TIMEOUT_TICK)
    }

    pub fn keepalive_interval(&self) -> Duration {
        parse_duration_or(
            self.http_rest_server.keepalive_interval.as_deref(),
            DEFAULT_KEEPALIVE_INTERVAL,
        )
    }

    pub fn command_timeout(&self) -> Duration {
        parse_duration_or(
            self.baresip.command_timeout.as_deref(),
            DEFAULT_COMMAND_TIMEOUT,
        )
    }

    pub fn contact_lookup(&self) -> HashMap<String, String> {
        self.contacts
            .iter()
            .map(|c| (c.name.clone(), c.uri.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voip-client.toml");
        std::fs::write(
            &path,
            r#"
http_addr = "127.0.0.1:8080"
log_level = "debug"

[voip_provider]
account = "sip:alice@voip.example.com"
password = "s3cret"

[baresip]
addr = "127.0.0.1:5555"

[tts]
url = "http://hassio/homeassistant/api/tts_get_url"
platform = "tts.cloud"
cache_path = "/tmp/voip-client"

[http_rest_server]
synchronous = true
keepalive_interval = "2s"

[stats]
interval = "10m"

[voice_calls]
max_duration = "90s"

[[contacts]]
name = "bob"
uri = "sip:bob@voip.example.com"
"#,
        )
        .unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.http_addr, "127.0.0.1:8080");
        assert_eq!(config.voip_provider.password, "s3cret");
        assert_eq!(config.baresip.addr, "127.0.0.1:5555");
        assert_eq!(config.tts.platform, "tts.cloud");
        assert!(config.http_rest_server.synchronous);
        assert_eq!(config.keepalive_interval(), Duration::from_secs(2));
        assert_eq!(config.stats_interval(), Duration::from_secs(600));
        assert_eq!(config.max_call_duration(), Duration::from_secs(90));
        assert_eq!(config.timeout_tick_interval(), Duration::from_secs(9));
        assert_eq!(
            config.contact_lookup().get("bob").map(String::as_str),
            Some("sip:bob@voip.example.com")
        );
    }

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.http_addr, "0.0.0.0:80");
        assert_eq!(config.baresip.addr, "127.0.0.1:4444");
        assert!(!config.http_rest_server.synchronous);
        assert_eq!(config.stats_interval(), Duration::from_secs(3600));
        assert_eq!(config.max_call_duration(), Duration::from_secs(300));
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
        assert!(config.contacts.is_empty());
    }

    #[test]
    fn test_bad_durations_fall_back() {
        assert_eq!(
            parse_duration_or(Some("forever"), Duration::from_secs(1)),
            Duration::from_secs(1)
        );
        assert_eq!(
            parse_duration_or(Some("0s"), Duration::from_secs(1)),
            Duration::from_secs(1)
        );
        assert_eq!(
            parse_duration_or(Some(" 1h "), Duration::from_secs(1)),
            Duration::from_secs(3600)
        );
        assert_eq!(parse_duration_or(None, Duration::from_secs(7)), Duration::from_secs(7));
    }

    #[test]
    fn test_timeout_tick_never_zero() {
        let mut config = Config::default();
        config.voice_calls.max_duration = Some("5ns".to_string());
        assert_eq!(config.max_call_duration(), Duration::from_nanos(5));
        assert_eq!(config.timeout_tick_interval(), MIN_TIMEOUT_TICK);

        config.voice_calls.max_duration = Some("10s".to_string());
        assert_eq!(config.timeout_tick_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_file() {
        assert!(Config::load("/nonexistent/voip-client.toml").is_err());
    }
}
