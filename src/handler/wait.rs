use crate::fsm::{CallState, StateSubscription};
use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

pub const KEEPALIVE_CHUNK: &[u8] = b"...call ongoing...\n";

/// Chunks written to a streaming response body
pub type BodySender = mpsc::Sender<io::Result<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The desired state was published
    Reached,
    /// Writing a keep-alive failed, the client went away
    Disconnected,
    /// The notifier stopped delivering states before `desired` was published
    Closed,
}

/// Block until `desired` is published, writing a keep-alive chunk to `out`
/// every `keepalive`.
///
/// The subscription is consumed, so it is released on every return path.
pub async fn wait_for_state(
    mut subscription: StateSubscription,
    desired: CallState,
    out: &BodySender,
    keepalive: Duration,
) -> WaitOutcome {
    let mut ticker = interval_at(Instant::now() + keepalive, keepalive);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        subscription = subscription.id(),
        %desired,
        "waiting for the call state"
    );
    loop {
        select! {
            state = subscription.recv() => match state {
                Some(state) if state == desired => {
                    info!(subscription = subscription.id(), %state, "call state reached");
                    return WaitOutcome::Reached;
                }
                Some(_) => {}
                // the notifier closes a lagging subscriber only when Idle is published
                None if desired == CallState::Idle || subscription.current() == desired => {
                    info!(subscription = subscription.id(), %desired, "call state reached while lagging");
                    return WaitOutcome::Reached;
                }
                None => return WaitOutcome::Closed,
            },
            _ = ticker.tick() => {
                if out.send(Ok(Bytes::from_static(KEEPALIVE_CHUNK))).await.is_err() {
                    warn!(
                        subscription = subscription.id(),
                        "error writing to the HTTP client, is it still connected?"
                    );
                    return WaitOutcome::Disconnected;
                }
            }
        }
    }
}
