use super::codec::NetstringCodec;
use super::{ua_channels, UaChannels, UaControl, UaSenders};
use crate::event::UaMessage;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::select;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_ADDR: &str = "127.0.0.1:4444";
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const CHANNEL_BUFFER: usize = 64;

#[derive(Debug, Serialize)]
struct CommandFrame<'a> {
    command: &'a str,
    params: &'a str,
    token: &'a str,
}

struct PendingCommand {
    frame: Bytes,
    done: oneshot::Sender<Result<()>>,
}

/// Client for the ctrl_tcp control socket of an external baresip process.
///
/// Commands are queued to [`BaresipClient::serve`], which owns the TCP
/// connection, writes them and routes every inbound frame to [`UaChannels`].
pub struct BaresipClient {
    addr: String,
    command_timeout: Duration,
    token: CancellationToken,
    command_tx: mpsc::Sender<PendingCommand>,
    command_rx: Mutex<Option<mpsc::Receiver<PendingCommand>>>,
    senders: UaSenders,
}

pub struct BaresipClientBuilder {
    addr: Option<String>,
    command_timeout: Option<Duration>,
    token: Option<CancellationToken>,
}

impl BaresipClientBuilder {
    pub fn new() -> Self {
        Self {
            addr: None,
            command_timeout: None,
            token: None,
        }
    }

    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    pub fn with_command_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = Some(command_timeout);
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn build(self) -> (BaresipClient, UaChannels) {
        let (senders, channels) = ua_channels(CHANNEL_BUFFER);
        let (command_tx, command_rx) = mpsc::channel(CHANNEL_BUFFER);
        let client = BaresipClient {
            addr: self.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            command_timeout: self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT),
            token: self.token.unwrap_or_default(),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            senders,
        };
        (client, channels)
    }
}

impl Default for BaresipClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BaresipClient {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Connect to baresip and pump frames until cancelled.
    ///
    /// Returns an error when the control socket cannot be reached or the
    /// peer closes it; losing the user agent is not recoverable here.
    pub async fn serve(&self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| anyhow!("baresip client is already serving"))?;

        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            anyhow!(
                "cannot reach the baresip control socket at {}: {}",
                self.addr,
                e
            )
        })?;
        stream.set_nodelay(true).ok();
        info!(addr = self.addr, "connected to baresip control socket");

        let (mut sink, mut stream) = Framed::new(stream, NetstringCodec::default()).split();
        self.senders.connected.send(()).await.ok();

        loop {
            select! {
                _ = self.token.cancelled() => {
                    info!("baresip client cancelled");
                    return Ok(());
                }
                pending = command_rx.recv() => {
                    let Some(pending) = pending else {
                        return Ok(());
                    };
                    let result = sink
                        .send(pending.frame)
                        .await
                        .map_err(|e| anyhow!("failed to write to baresip: {}", e));
                    let failed = result.is_err();
                    pending.done.send(result).ok();
                    if failed {
                        return Err(anyhow!("baresip control connection broken"));
                    }
                }
                frame = stream.next() => {
                    match frame {
                        Some(Ok(payload)) => self.dispatch(&payload).await,
                        Some(Err(e)) => {
                            return Err(anyhow!("baresip control connection error: {}", e));
                        }
                        None => {
                            return Err(anyhow!("baresip closed the control connection"));
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, payload: &[u8]) {
        match UaMessage::parse(payload) {
            Ok(UaMessage::Event(event)) => {
                debug!(kind = %event.kind, id = event.id, "baresip event");
                if self.senders.events.send(event).await.is_err() {
                    warn!("nobody is listening for baresip events");
                }
            }
            Ok(UaMessage::Response(response)) => {
                debug!(token = response.token, ok = response.ok, "baresip response");
                if self.senders.responses.send(response).await.is_err() {
                    warn!("nobody is listening for baresip responses");
                }
            }
            Err(e) => {
                warn!("ignoring malformed baresip message: {}", e);
            }
        }
    }
}

#[async_trait]
impl UaControl for BaresipClient {
    async fn command(&self, command: &str, params: &str, token: &str) -> Result<()> {
        let frame = serde_json::to_vec(&CommandFrame {
            command,
            params,
            token,
        })?;
        let (done_tx, done_rx) = oneshot::channel();
        let pending = PendingCommand {
            frame: Bytes::from(frame),
            done: done_tx,
        };
        debug!(command, params, token, "sending baresip command");
        let wait = async {
            self.command_tx
                .send(pending)
                .await
                .map_err(|_| anyhow!("baresip client is not running"))?;
            done_rx
                .await
                .map_err(|_| anyhow!("baresip connection dropped the command"))?
        };
        match timeout(self.command_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "baresip command {} timed out after {:?}",
                command,
                self.command_timeout
            )),
        }
    }
}
