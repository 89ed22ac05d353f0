use crate::config::Config;
use crate::fsm::{worker::UaAccount, CallFsm, CallState, CallWorker, DialRequest, StateNotifier};
use crate::synthesis::{HomeAssistantTtsClient, SynthesisClient};
use crate::useragent::{BaresipClient, BaresipClientBuilder};
use anyhow::{anyhow, Result};
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub struct AppStateInner {
    pub config: Arc<Config>,
    /// Contact name to SIP address
    pub contacts: HashMap<String, String>,
    pub requests: mpsc::Sender<DialRequest>,
    pub notifier: StateNotifier,
    pub token: CancellationToken,
}

pub type AppState = Arc<AppStateInner>;

pub struct App {
    pub config: Arc<Config>,
    pub state: AppState,
    useragent: Arc<BaresipClient>,
    worker: CallWorker,
}

pub struct AppBuilder {
    config: Option<Config>,
    synthesis: Option<Arc<dyn SynthesisClient>>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            synthesis: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the Home Assistant TTS client
    pub fn synthesis(mut self, synthesis: Arc<dyn SynthesisClient>) -> Self {
        self.synthesis = Some(synthesis);
        self
    }

    pub fn build(self) -> Result<App> {
        let config = Arc::new(self.config.unwrap_or_default());
        if config.voip_provider.account.is_empty() {
            return Err(anyhow!("voip_provider.account is not configured"));
        }
        let token = CancellationToken::new();

        let (useragent, channels) = BaresipClientBuilder::new()
            .with_addr(config.baresip.addr.clone())
            .with_command_timeout(config.command_timeout())
            .with_token(token.child_token())
            .build();
        let useragent = Arc::new(useragent);

        let synthesis = match self.synthesis {
            Some(synthesis) => synthesis,
            None => Arc::new(HomeAssistantTtsClient::new(config.tts.clone())?),
        };

        let notifier = StateNotifier::new(CallState::Uninitialized);
        let fsm = CallFsm::new(
            useragent.clone(),
            synthesis,
            notifier.clone(),
            config.max_call_duration(),
        );
        let (request_tx, request_rx) = mpsc::channel(1);
        let worker = CallWorker::new(
            fsm,
            UaAccount {
                sip_uri: config.voip_provider.account.clone(),
                password: config.voip_provider.password.clone(),
            },
            channels,
            request_rx,
            config.stats_interval(),
            config.timeout_tick_interval(),
            token.child_token(),
        );

        let contacts = config.contact_lookup();
        for (name, uri) in contacts.iter() {
            info!(name, uri, "contact added");
        }

        let state = Arc::new(AppStateInner {
            config: config.clone(),
            contacts,
            requests: request_tx,
            notifier,
            token,
        });
        Ok(App {
            config,
            state,
            useragent,
            worker,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = self.config.http_addr.parse()?;
        let listener = match TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind to {}: {}", addr, e);
                return Err(anyhow!("Failed to bind to {}: {}", addr, e));
            }
        };
        self.serve(listener).await
    }

    /// Run the HTTP gateway on `listener` together with the user agent and
    /// the call worker; the first one to stop brings the others down.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let token = self.state.token.clone();
        let useragent = self.useragent.clone();
        let router = create_router(self.state.clone());
        info!(
            addr = ?listener.local_addr().ok(),
            baresip = useragent.addr(),
            synchronous = self.config.http_rest_server.synchronous,
            "http server listening, paths: /dial /state"
        );

        let result = select! {
            http_result = axum::serve(listener, router) => {
                http_result.map_err(|e| anyhow!("Server error: {}", e))
            }
            ua_result = useragent.serve() => {
                ua_result.map_err(|e| anyhow!("User agent error: {}", e))
            }
            worker_result = self.worker.run() => {
                worker_result.map(|_| ())
            }
            _ = token.cancelled() => {
                info!("Application shutting down due to cancellation");
                Ok(())
            }
        };
        if let Err(ref e) = result {
            error!("{}", e);
        }
        token.cancel();
        useragent.stop();
        result
    }
}

pub fn create_router(state: AppState) -> Router {
    crate::handler::router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
