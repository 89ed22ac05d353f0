use super::{CallFsm, CallRequest, CallState, FsmError, FsmResult};
use crate::useragent::UaChannels;
use anyhow::Result;
use std::time::Duration;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Verdict on a call request: the state the machine settled in once the
/// request was accepted, or why it was rejected.
pub type DialVerdict = FsmResult<CallState>;

/// A call request plus the channel the verdict is reported on.
///
/// The verdict is sent after every state it caused has been published.
pub struct DialRequest {
    pub request: CallRequest,
    pub reply: Option<oneshot::Sender<DialVerdict>>,
}

impl DialRequest {
    pub fn new(request: CallRequest) -> (Self, oneshot::Receiver<DialVerdict>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                request,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// Credentials used for `uanew` once the control connection is up.
#[derive(Debug, Clone)]
pub struct UaAccount {
    pub sip_uri: String,
    pub password: String,
}

/// The only task that ever touches the [`CallFsm`].
///
/// Inputs from every source are handled one at a time in arrival order, so
/// the machine needs no locking.
pub struct CallWorker {
    fsm: CallFsm,
    account: UaAccount,
    channels: UaChannels,
    requests: mpsc::Receiver<DialRequest>,
    stats_interval: Duration,
    timeout_tick: Duration,
    token: CancellationToken,
}

impl CallWorker {
    pub fn new(
        fsm: CallFsm,
        account: UaAccount,
        channels: UaChannels,
        requests: mpsc::Receiver<DialRequest>,
        stats_interval: Duration,
        timeout_tick: Duration,
        token: CancellationToken,
    ) -> Self {
        // tokio intervals reject a zero period
        let min_period = Duration::from_millis(1);
        Self {
            fsm,
            account,
            channels,
            requests,
            stats_interval: stats_interval.max(min_period),
            timeout_tick: timeout_tick.max(min_period),
            token,
        }
    }

    pub fn fsm(&self) -> &CallFsm {
        &self.fsm
    }

    pub async fn run(mut self) -> Result<CallFsm> {
        let mut stats_ticker = interval_at(Instant::now() + self.stats_interval, self.stats_interval);
        stats_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut timeout_ticker = interval_at(Instant::now() + self.timeout_tick, self.timeout_tick);
        timeout_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            stats_interval = ?self.stats_interval,
            timeout_tick = ?self.timeout_tick,
            "call worker started"
        );
        loop {
            select! {
                _ = self.token.cancelled() => {
                    info!("call worker cancelled");
                    break;
                }
                Some(()) = self.channels.connected.recv() => {
                    let account = self.account.clone();
                    let result = self
                        .fsm
                        .initialize_user_agent(&account.sip_uri, &account.password)
                        .await;
                    report("initialize_user_agent", result);
                }
                Some(event) = self.channels.events.recv() => {
                    let result = self.fsm.on_event(&event).await;
                    report(&event.kind.to_string(), result);
                }
                Some(response) = self.channels.responses.recv() => {
                    self.fsm.on_command_response(&response);
                }
                Some(dial) = self.requests.recv() => {
                    let result = self.fsm.on_new_outgoing_call_request(dial.request).await;
                    report("on_new_outgoing_call_request", result.clone());
                    if let Some(reply) = dial.reply {
                        reply.send(result.map(|_| self.fsm.state())).ok();
                    }
                }
                _ = stats_ticker.tick() => {
                    self.fsm.log_stats();
                }
                _ = timeout_ticker.tick() => {
                    let result = self.fsm.on_timeout_tick().await;
                    report("on_timeout_tick", result);
                }
            }
        }
        Ok(self.fsm)
    }
}

fn report(operation: &str, result: FsmResult<()>) {
    match result {
        Ok(()) => {}
        Err(FsmError::InvalidState(state)) => {
            warn!(operation, %state, "input rejected in the current state");
        }
        Err(e @ FsmError::CallIdMismatch { .. }) => {
            error!(operation, "inconsistent call correlation, input ignored: {}", e);
        }
        Err(FsmError::Command(e)) => {
            warn!(operation, "user agent command failed: {}", e);
        }
    }
}
