use super::*;
use anyhow::Result;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Default)]
struct FakeHomeAssistant {
    addr: std::sync::OnceLock<SocketAddr>,
    url_requests: AtomicUsize,
    downloads: AtomicUsize,
    last_message: std::sync::Mutex<Option<serde_json::Value>>,
}

async fn tts_get_url(
    State(fake): State<Arc<FakeHomeAssistant>>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> Response {
    fake.url_requests.fetch_add(1, Ordering::SeqCst);
    if headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        != Some("Bearer secret")
    {
        return (StatusCode::UNAUTHORIZED, "bad token").into_response();
    }
    if payload["message"] == "fail me" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "engine exploded").into_response();
    }
    *fake.last_message.lock().unwrap() = Some(payload);
    let addr = fake.addr.get().unwrap();
    Json(serde_json::json!({
        "url": format!("http://{}/api/tts_proxy/abc.wav", addr),
        "path": "/api/tts_proxy/abc.wav",
    }))
    .into_response()
}

async fn tts_proxy(State(fake): State<Arc<FakeHomeAssistant>>) -> Response {
    fake.downloads.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, b"RIFF-fake-wave".to_vec()).into_response()
}

async fn start_fake_home_assistant() -> Result<Arc<FakeHomeAssistant>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let fake = Arc::new(FakeHomeAssistant::default());
    fake.addr.set(listener.local_addr()?).ok();
    let app = Router::new()
        .route("/api/tts_get_url", post(tts_get_url))
        .route("/api/tts_proxy/abc.wav", get(tts_proxy))
        .with_state(fake.clone());
    tokio::spawn(async move { axum::serve(listener, app).await });
    Ok(fake)
}

fn config_for(fake: &FakeHomeAssistant, cache_path: &std::path::Path) -> SynthesisConfig {
    SynthesisConfig {
        url: format!("http://{}/api/tts_get_url", fake.addr.get().unwrap()),
        platform: "tts.test".to_string(),
        token: Some("secret".to_string()),
        cache_path: cache_path.to_string_lossy().to_string(),
        timeout: Some("2s".to_string()),
        local_testing_file: None,
    }
}

#[tokio::test]
async fn test_synthesize_downloads_and_caches() -> Result<()> {
    let fake = start_fake_home_assistant().await?;
    let dir = tempfile::tempdir()?;
    let client = HomeAssistantTtsClient::new(config_for(&fake, dir.path()))?;

    let path = client.synthesize("hello").await?;
    assert_eq!(
        path,
        dir.path().join(format!(
            "tts_{}.wav",
            AudioCache::generate_cache_key("hello")
        ))
    );
    assert_eq!(tokio::fs::read(&path).await?, b"RIFF-fake-wave");

    let sent = fake.last_message.lock().unwrap().clone().unwrap();
    assert_eq!(sent["message"], "hello");
    assert_eq!(sent["platform"], "tts.test");
    assert_eq!(sent["options"]["preferred_format"], "wav");
    assert_eq!(sent["options"]["preferred_sample_rate"], "8000");
    assert_eq!(sent["options"]["preferred_sample_channels"], "1");

    // second request for the same text is served from disk
    let again = client.synthesize("hello").await?;
    assert_eq!(again, path);
    assert_eq!(fake.url_requests.load(Ordering::SeqCst), 1);
    assert_eq!(fake.downloads.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_synthesize_reports_service_errors() -> Result<()> {
    let fake = start_fake_home_assistant().await?;
    let dir = tempfile::tempdir()?;
    let client = HomeAssistantTtsClient::new(config_for(&fake, dir.path()))?;
    let err = client.synthesize("fail me").await.unwrap_err();
    assert!(err.to_string().contains("error getting TTS URL"));
    assert!(!AudioCache::new(dir.path())
        .is_cached(&AudioCache::generate_cache_key("fail me"))
        .await?);

    let mut config = config_for(&fake, dir.path());
    config.token = Some("wrong".to_string());
    let client = HomeAssistantTtsClient::new(config)?;
    assert!(client.synthesize("hello").await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_local_testing_file_bypasses_service() -> Result<()> {
    let config = SynthesisConfig {
        url: "http://127.0.0.1:1/unreachable".to_string(),
        local_testing_file: Some("/usr/share/baresip/test-message.wav".to_string()),
        ..Default::default()
    };
    let client = HomeAssistantTtsClient::new(config)?;
    assert_eq!(
        client.synthesize("anything").await?,
        PathBuf::from("/usr/share/baresip/test-message.wav")
    );
    Ok(())
}

#[test]
fn test_timeout_parsing() {
    let mut config = SynthesisConfig::default();
    assert_eq!(config.timeout(), Duration::from_secs(10));
    config.timeout = Some("1500ms".to_string());
    assert_eq!(config.timeout(), Duration::from_millis(1500));
    config.timeout = Some("soon".to_string());
    assert_eq!(config.timeout(), Duration::from_secs(10));
}
