use super::{AudioCache, SynthesisClient, SynthesisConfig};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

// baresip's aufile module only plays mono, 8kHz, 16bit wav
#[derive(Debug, Clone, Serialize)]
struct TtsOptions {
    preferred_format: &'static str,
    preferred_sample_rate: &'static str,
    preferred_sample_channels: &'static str,
    preferred_sample_bytes: &'static str,
}

impl Default for TtsOptions {
    fn default() -> Self {
        Self {
            preferred_format: "wav",
            preferred_sample_rate: "8000",
            preferred_sample_channels: "1",
            preferred_sample_bytes: "2",
        }
    }
}

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    message: &'a str,
    platform: &'a str,
    options: TtsOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TtsUrlResponse {
    pub url: String,
    #[serde(default)]
    pub path: String,
}

/// Text-to-speech through the Home Assistant `tts_get_url` REST API.
pub struct HomeAssistantTtsClient {
    http_client: HttpClient,
    config: SynthesisConfig,
    cache: AudioCache,
}

impl HomeAssistantTtsClient {
    pub fn new(config: SynthesisConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(config.timeout())
            .user_agent(crate::version::get_useragent())
            .build()?;
        let cache = AudioCache::new(&config.cache_path);
        Ok(Self {
            http_client,
            config,
            cache,
        })
    }

    fn bearer_token(&self) -> Result<String> {
        if let Some(token) = self.config.token.as_ref().filter(|t| !t.is_empty()) {
            return Ok(token.clone());
        }
        match std::env::var("HASSIO_TOKEN") {
            Ok(token) if !token.is_empty() => Ok(token),
            _ => Err(anyhow!("HASSIO_TOKEN environment variable is not set")),
        }
    }

    async fn request_tts_url(&self, text: &str) -> Result<TtsUrlResponse> {
        let token = self.bearer_token()?;
        let payload = TtsRequest {
            message: text,
            platform: &self.config.platform,
            options: TtsOptions::default(),
        };
        info!(
            url = self.config.url,
            platform = self.config.platform,
            "requesting TTS url"
        );
        let response = self
            .http_client
            .post(&self.config.url)
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("error making TTS request: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("error response from TTS service: {} {}", status, body));
        }
        let reply: TtsUrlResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("error decoding TTS response: {}", e))?;
        if reply.url.is_empty() {
            return Err(anyhow!("TTS service returned empty URL"));
        }
        Ok(reply)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        info!(url, "downloading synthesized audio");
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("audio download failed with status {}", status));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl SynthesisClient for HomeAssistantTtsClient {
    async fn synthesize(&self, text: &str) -> Result<PathBuf> {
        if let Some(file) = &self.config.local_testing_file {
            info!(file, "local testing mode, skipping TTS service");
            return Ok(PathBuf::from(file));
        }

        let key = AudioCache::generate_cache_key(text);
        if self.cache.is_cached(&key).await? {
            let path = self.cache.get_cache_path(&key);
            info!(path = %path.display(), "using cached audio file");
            return Ok(path);
        }
        self.cache.ensure_cache_dir().await?;

        let start_time = Instant::now();
        let reply = self
            .request_tts_url(text)
            .await
            .map_err(|e| anyhow!("error getting TTS URL: {}", e))?;
        let data = self
            .download(&reply.url)
            .await
            .map_err(|e| anyhow!("error downloading audio file: {}", e))?;
        let path = self.cache.store_in_cache(&key, &data).await?;
        info!(
            path = %path.display(),
            elapsed = start_time.elapsed().as_millis(),
            "synthesized audio stored"
        );
        Ok(path)
    }
}
