//! Call lifecycle state machine.
//!
//! ```text
//! Uninitialized -> WaitingRegistration -> Idle <-> WaitEstablishment <-> WaitCompletion -> Idle
//! ```
//!
//! A [`CallFsm`] is owned by exactly one [`worker::CallWorker`], which feeds it
//! user agent events, dial requests and timer ticks one at a time. Every
//! transition is published through the [`StateNotifier`].
use crate::event::{UaEvent, UaEventKind, UaResponse};
use crate::synthesis::SynthesisClient;
use crate::useragent::{UaControl, CMD_AUDIO_SOURCE, CMD_DIAL, CMD_HANGUP, CMD_UA_NEW};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

pub mod notifier;
pub mod worker;
pub use notifier::{StateNotifier, StateSubscription, SUBSCRIBER_BUFFER};
pub use worker::{CallWorker, DialRequest, DialVerdict};


pub const UA_REGISTER_TOKEN: &str = "ua_register";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CallState {
    /// The control connection to the user agent is not confirmed yet
    Uninitialized,
    WaitingRegistration,
    /// Ready to accept a new call request
    Idle,
    WaitEstablishment,
    /// Call connected, the message is being played
    WaitCompletion,
}

impl CallState {
    pub fn is_in_call(&self) -> bool {
        matches!(self, CallState::WaitEstablishment | CallState::WaitCompletion)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Uninitialized => "Uninitialized",
            CallState::WaitingRegistration => "WaitingRegistration",
            CallState::Idle => "Idle",
            CallState::WaitEstablishment => "WaitEstablishment",
            CallState::WaitCompletion => "WaitCompletion",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FsmError {
    #[error("operation not allowed in state {0}")]
    InvalidState(CallState),
    #[error("event for call {received:?} while tracking call {expected:?}")]
    CallIdMismatch { expected: String, received: String },
    #[error("user agent command failed: {0}")]
    Command(String),
}

pub type FsmResult<T> = std::result::Result<T, FsmError>;

/// A validated request to call `address` and play `text` once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub address: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CallStats {
    pub dial_attempts: u64,
    pub dial_failures: u64,
    pub synthesis_failures: u64,
    pub calls_established: u64,
    pub calls_completed: u64,
    pub calls_timed_out: u64,
    pub rejected_requests: u64,
}

pub struct CallFsm {
    ua: Arc<dyn UaControl>,
    tts: Arc<dyn SynthesisClient>,
    notifier: StateNotifier,
    max_call_duration: Duration,

    state: CallState,
    registered: bool,
    dial_seq: u64,
    pending_audio: Option<PathBuf>,
    call_id: Option<String>,
    call_started_at: Option<Instant>,
    stats: CallStats,
}

impl CallFsm {
    pub fn new(
        ua: Arc<dyn UaControl>,
        tts: Arc<dyn SynthesisClient>,
        notifier: StateNotifier,
        max_call_duration: Duration,
    ) -> Self {
        Self {
            ua,
            tts,
            notifier,
            max_call_duration,
            state: CallState::Uninitialized,
            registered: false,
            dial_seq: 0,
            pending_audio: None,
            call_id: None,
            call_started_at: None,
            stats: CallStats::default(),
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn dial_seq(&self) -> u64 {
        self.dial_seq
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn pending_audio(&self) -> Option<&Path> {
        self.pending_audio.as_deref()
    }

    pub fn call_started_at(&self) -> Option<Instant> {
        self.call_started_at
    }

    pub fn stats(&self) -> &CallStats {
        &self.stats
    }

    pub fn notifier(&self) -> &StateNotifier {
        &self.notifier
    }

    /// Single mutation point of `state`. Call scoped fields are reset
    /// before the new state is published.
    fn transition_to(&mut self, next: CallState) {
        info!(from = %self.state, to = %next, "state transition");
        self.state = next;
        match next {
            CallState::Uninitialized | CallState::WaitingRegistration | CallState::Idle => {
                self.pending_audio = None;
                self.call_id = None;
                self.call_started_at = None;
            }
            CallState::WaitEstablishment => {
                debug_assert!(self.pending_audio.is_some());
                debug_assert!(self.call_started_at.is_some());
            }
            CallState::WaitCompletion => {}
        }
        self.notifier.publish(next);
    }

    async fn send_command(&self, command: &str, params: &str, token: &str) -> FsmResult<()> {
        self.ua
            .command(command, params, token)
            .await
            .map_err(|e| FsmError::Command(e.to_string()))
    }

    fn require_state(&self, allowed: &[CallState], operation: &str) -> FsmResult<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        warn!(state = %self.state, operation, "operation not valid in the current state");
        Err(FsmError::InvalidState(self.state))
    }

    /// An event must refer to the tracked call, adopting its id if none is tracked yet.
    fn correlate(&mut self, event: &UaEvent) -> FsmResult<()> {
        match &self.call_id {
            Some(current) if *current != event.id => {
                error!(
                    expected = current,
                    received = event.id,
                    kind = %event.kind,
                    "event for a different call id, this is a bug"
                );
                Err(FsmError::CallIdMismatch {
                    expected: current.clone(),
                    received: event.id.clone(),
                })
            }
            Some(_) => Ok(()),
            None => {
                if !event.id.is_empty() {
                    self.call_id = Some(event.id.clone());
                }
                Ok(())
            }
        }
    }

    async fn hangup(&mut self) -> FsmResult<()> {
        let token = format!("hangup_cmd_{}", self.dial_seq);
        let call_id = self.call_id.clone().unwrap_or_default();
        self.send_command(CMD_HANGUP, &call_id, &token).await
    }

    pub async fn initialize_user_agent(&mut self, sip_uri: &str, password: &str) -> FsmResult<()> {
        info!(sip_uri, "initializing user agent");
        self.require_state(&[CallState::Uninitialized], "initialize_user_agent")?;

        let params = format!("{};auth_pass={}", sip_uri, password);
        if let Err(e) = self.send_command(CMD_UA_NEW, &params, UA_REGISTER_TOKEN).await {
            warn!(sip_uri, "failed to create the SIP user agent: {}", e);
            return Err(e);
        }
        self.transition_to(CallState::WaitingRegistration);
        Ok(())
    }

    pub fn on_register_ok(&mut self, event: &UaEvent) -> FsmResult<()> {
        info!(
            account = event.account_aor,
            "SIP REGISTER succeeded, calls can now be placed"
        );
        self.registered = true;
        if self.state == CallState::WaitingRegistration {
            self.transition_to(CallState::Idle);
        }
        Ok(())
    }

    pub fn on_register_fail(&mut self, event: &UaEvent) -> FsmResult<()> {
        warn!(
            account = event.account_aor,
            "SIP REGISTER failed, check the voip_provider account and password"
        );
        self.registered = false;
        self.transition_to(CallState::WaitingRegistration);
        Ok(())
    }

    /// Accept a call request. Synthesis and dial failures are absorbed here:
    /// the machine returns to `Idle` and `Ok` is returned.
    pub async fn on_new_outgoing_call_request(&mut self, request: CallRequest) -> FsmResult<()> {
        info!(address = request.address, "new outgoing call request");
        if self.state != CallState::Idle {
            warn!(
                state = %self.state,
                "dropping call request, wait for the previous call to close"
            );
            self.stats.rejected_requests += 1;
            return Err(FsmError::InvalidState(self.state));
        }

        match self.tts.synthesize(&request.text).await {
            Ok(path) => self.pending_audio = Some(path),
            Err(e) => {
                warn!("text to speech failed: {}", e);
                self.stats.synthesis_failures += 1;
                self.transition_to(CallState::Idle);
                return Ok(());
            }
        }

        self.dial_seq += 1;
        self.stats.dial_attempts += 1;
        self.call_started_at = Some(Instant::now());
        let token = self.dial_token();
        if let Err(e) = self.send_command(CMD_DIAL, &request.address, &token).await {
            warn!(address = request.address, "dial failed: {}", e);
            self.stats.dial_failures += 1;
            self.transition_to(CallState::Idle);
            return Ok(());
        }
        self.transition_to(CallState::WaitEstablishment);
        Ok(())
    }

    pub fn on_call_outgoing(&mut self, event: &UaEvent) -> FsmResult<()> {
        info!(call_id = event.id, peer = event.peer_uri, "outgoing call started");
        if !self.state.is_in_call() {
            warn!(state = %self.state, call_id = event.id, "outgoing call event without a call request");
            return Err(FsmError::InvalidState(self.state));
        }
        self.call_id = Some(event.id.clone());
        Ok(())
    }

    pub async fn on_call_established(&mut self, event: &UaEvent) -> FsmResult<()> {
        info!(call_id = event.id, peer = event.peer_uri, "call established");
        self.require_state(&[CallState::WaitEstablishment], "on_call_established")?;
        self.correlate(event)?;

        let audio = self
            .pending_audio
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let token = format!("ausrc_cmd_{}", self.dial_seq);
        if let Err(e) = self
            .send_command(CMD_AUDIO_SOURCE, &format!("aufile,{}", audio), &token)
            .await
        {
            warn!(audio, "failed to set the audio source, the call goes on silent: {}", e);
        }
        self.stats.calls_established += 1;
        self.call_started_at = Some(Instant::now());
        self.transition_to(CallState::WaitCompletion);
        Ok(())
    }

    /// The message was played: hang up and wait for the close event.
    pub async fn on_end_of_file(&mut self, event: &UaEvent) -> FsmResult<()> {
        info!(call_id = event.id, "audio playback finished");
        self.require_state(&[CallState::WaitCompletion], "on_end_of_file")?;
        self.correlate(event)?;
        if let Err(e) = self.hangup().await {
            warn!("failed to hang up after playback: {}", e);
            return Err(e);
        }
        Ok(())
    }

    pub fn on_call_closed(&mut self, event: &UaEvent) -> FsmResult<()> {
        info!(call_id = event.id, param = event.param, "call closed");
        if !self.state.is_in_call() {
            warn!(state = %self.state, "call closed without an active call, this is a bug");
            return Err(FsmError::InvalidState(self.state));
        }
        self.correlate(event)?;
        self.stats.calls_completed += 1;
        self.transition_to(CallState::Idle);
        Ok(())
    }

    /// Force the call down once it has been running longer than the max duration.
    pub async fn on_timeout_tick(&mut self) -> FsmResult<()> {
        if !self.state.is_in_call() {
            return Ok(());
        }
        let Some(started_at) = self.call_started_at else {
            return Ok(());
        };
        let elapsed = started_at.elapsed();
        if elapsed <= self.max_call_duration {
            return Ok(());
        }
        warn!(
            state = %self.state,
            call_id = self.call_id.as_deref().unwrap_or_default(),
            elapsed = ?elapsed,
            max = ?self.max_call_duration,
            "call exceeded the max duration, hanging up"
        );
        if let Err(e) = self.hangup().await {
            warn!("timeout hangup command failed: {}", e);
        }
        self.stats.calls_timed_out += 1;
        self.transition_to(CallState::Idle);
        Ok(())
    }

    fn dial_token(&self) -> String {
        format!("dial_cmd_{}", self.dial_seq)
    }

    /// Acknowledgements are logged. A refused dial for the call being
    /// established ends the attempt, since no call event will follow.
    pub fn on_command_response(&mut self, response: &UaResponse) {
        if response.ok {
            info!(token = response.token, data = response.data, "command succeeded");
            return;
        }
        warn!(token = response.token, data = response.data, "command failed");
        if self.state == CallState::WaitEstablishment && response.token == self.dial_token() {
            warn!(
                token = response.token,
                "dial refused by the user agent, giving up on this call"
            );
            self.stats.dial_failures += 1;
            self.transition_to(CallState::Idle);
        }
    }

    /// Route an event to its handler; kinds the machine does not track are ignored.
    pub async fn on_event(&mut self, event: &UaEvent) -> FsmResult<()> {
        match event.kind {
            UaEventKind::RegisterOk => self.on_register_ok(event),
            UaEventKind::RegisterFail => self.on_register_fail(event),
            UaEventKind::CallOutgoing => self.on_call_outgoing(event),
            UaEventKind::CallEstablished => self.on_call_established(event).await,
            UaEventKind::CallClosed => self.on_call_closed(event),
            UaEventKind::EndOfFile => self.on_end_of_file(event).await,
            UaEventKind::Other(ref kind) => {
                tracing::debug!(kind, id = event.id, "ignoring event");
                Ok(())
            }
        }
    }

    pub fn log_stats(&self) {
        info!(
            state = %self.state,
            registered = self.registered,
            dial_attempts = self.stats.dial_attempts,
            dial_failures = self.stats.dial_failures,
            synthesis_failures = self.stats.synthesis_failures,
            calls_established = self.stats.calls_established,
            calls_completed = self.stats.calls_completed,
            calls_timed_out = self.stats.calls_timed_out,
            rejected_requests = self.stats.rejected_requests,
            "call statistics"
        );
    }
}
