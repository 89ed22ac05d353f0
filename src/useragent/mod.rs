use crate::event::{UaEvent, UaResponse};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub mod baresip;
pub mod codec;
pub use baresip::{BaresipClient, BaresipClientBuilder};
#[cfg(test)]
mod tests;

/// Create a new user agent: params are `<sip uri>;auth_pass=<password>`
pub const CMD_UA_NEW: &str = "uanew";
/// Dial a SIP address
pub const CMD_DIAL: &str = "dial";
/// Switch the audio source of the current call
pub const CMD_AUDIO_SOURCE: &str = "ausrc";
/// Hang up a call, params is the call id (empty means the current call)
pub const CMD_HANGUP: &str = "hangup";

/// Command side of the telephony control adapter.
///
/// `Ok` means the command was handed to the user agent; the outcome of the
/// command itself arrives later as a [`UaResponse`] carrying the same token.
#[async_trait]
pub trait UaControl: Send + Sync {
    async fn command(&self, command: &str, params: &str, token: &str) -> Result<()>;
}

/// Receiving side of the telephony control adapter, drained by the call worker.
pub struct UaChannels {
    /// Fires once the control connection is up
    pub connected: mpsc::Receiver<()>,
    pub events: mpsc::Receiver<UaEvent>,
    pub responses: mpsc::Receiver<UaResponse>,
}

/// Sender halves matching [`UaChannels`], owned by the adapter.
#[derive(Clone)]
pub struct UaSenders {
    pub connected: mpsc::Sender<()>,
    pub events: mpsc::Sender<UaEvent>,
    pub responses: mpsc::Sender<UaResponse>,
}

pub fn ua_channels(buffer_size: usize) -> (UaSenders, UaChannels) {
    let (connected_tx, connected_rx) = mpsc::channel(1);
    let (event_tx, event_rx) = mpsc::channel(buffer_size);
    let (response_tx, response_rx) = mpsc::channel(buffer_size);
    (
        UaSenders {
            connected: connected_tx,
            events: event_tx,
            responses: response_tx,
        },
        UaChannels {
            connected: connected_rx,
            events: event_rx,
            responses: response_rx,
        },
    )
}
