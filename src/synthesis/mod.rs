use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod cache;
mod homeassistant;
pub use cache::AudioCache;
pub use homeassistant::HomeAssistantTtsClient;

#[cfg(test)]
mod tests;

const DEFAULT_URL: &str = "http://hassio/homeassistant/api/tts_get_url";
const DEFAULT_PLATFORM: &str = "tts.google_translate_en_com";
const DEFAULT_CACHE_PATH: &str = "/share/voip-client";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub url: String,
    pub platform: String,
    /// Bearer token; `HASSIO_TOKEN` is used when unset
    pub token: Option<String>,
    pub cache_path: String,
    pub timeout: Option<String>,
    /// Skip synthesis and always play this file
    pub local_testing_file: Option<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            platform: DEFAULT_PLATFORM.to_string(),
            token: None,
            cache_path: DEFAULT_CACHE_PATH.to_string(),
            timeout: None,
            local_testing_file: None,
        }
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        crate::config::parse_duration_or(self.timeout.as_deref(), DEFAULT_TIMEOUT)
    }
}

/// Converts text into a local audio file the user agent can play.
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<PathBuf>;
}
