use super::wait::{wait_for_state, WaitOutcome};
use super::{DialPayload, GatewayError};
use crate::app::AppState;
use crate::fsm::{CallRequest, CallState, DialRequest, FsmError};
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

static SIP_ADDRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^sip:[^@]+@[^@]+\.[^@]+$").expect("SIP address pattern"));

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

pub const ASYNC_ACCEPTED: &str =
    "Payload is valid. Initiating TTS generation and outgoing call in asynchronous way.";

pub const SYNC_COMPLETED: &str = "Payload was valid and the request has been handled synchronously.\n\
TTS and call have been attempted. Check the logs to understand if the TTS/call were successful or not.\n\
Processing has been completed and the service is ready to accept new requests.";

/// Turn a payload into a call request, resolving contact names to addresses.
pub fn validate(
    payload: DialPayload,
    contacts: &HashMap<String, String>,
) -> Result<CallRequest, GatewayError> {
    let invalid = |reason: &str| Err(GatewayError::InvalidPayload(reason.to_string()));

    match (
        payload.called_number.is_empty(),
        payload.called_contact.is_empty(),
    ) {
        (true, true) => return invalid("called_number or called_contact is required"),
        (false, false) => {
            return invalid("only one between called_number and called_contact can be provided")
        }
        _ => {}
    }
    if payload.message_tts.trim().is_empty() {
        return invalid("message_tts is required");
    }

    let address = if !payload.called_number.is_empty() {
        if !SIP_ADDRESS.is_match(&payload.called_number) {
            return invalid("called_number must be in the format sip:<number>@<domain>");
        }
        payload.called_number
    } else {
        match contacts.get(&payload.called_contact) {
            Some(uri) => {
                info!(
                    contact = payload.called_contact,
                    uri, "using the contact address"
                );
                uri.clone()
            }
            None => {
                return Err(GatewayError::InvalidPayload(format!(
                    "unknown contact: {}",
                    payload.called_contact
                )))
            }
        }
    };

    Ok(CallRequest {
        address,
        text: payload.message_tts,
    })
}

pub async fn dial_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let payload: DialPayload = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::InvalidPayload(format!("invalid JSON payload: {}", e)))?;
    let request_id = Uuid::new_v4().to_string();
    info!(
        request_id,
        called_number = payload.called_number,
        called_contact = payload.called_contact,
        message_tts = payload.message_tts,
        "received dial request"
    );
    let request = validate(payload, &state.contacts)?;

    let synchronous = state.config.http_rest_server.synchronous;
    // subscribe first: the Idle that ends this call must not be missed
    let subscription = synchronous.then(|| state.notifier.subscribe());

    let (dial, reply) = DialRequest::new(request);
    state
        .requests
        .send(dial)
        .await
        .map_err(|_| GatewayError::Unavailable)?;
    let settled = match reply.await {
        Ok(Ok(settled)) => settled,
        Ok(Err(FsmError::InvalidState(current))) => return Err(GatewayError::Busy(current)),
        Ok(Err(e)) => return Err(GatewayError::Internal(e.to_string())),
        Err(_) => return Err(GatewayError::Unavailable),
    };

    let Some(mut subscription) = subscription else {
        info!(request_id, "replying immediately (asynchronous mode)");
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, TEXT_PLAIN)],
            ASYNC_ACCEPTED,
        )
            .into_response());
    };

    // the buffer may still hold the Idle that ended an earlier call
    let mut stale = 0;
    while subscription.try_recv().is_some() {
        stale += 1;
    }
    // a call that ended while draining is only visible in the current state
    if settled == CallState::Idle || state.notifier.current() == CallState::Idle {
        info!(request_id, stale, "call attempt already over (synchronous mode)");
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, TEXT_PLAIN)],
            SYNC_COMPLETED,
        )
            .into_response());
    }

    info!(
        request_id,
        stale,
        %settled,
        "streaming the reply until the call is over (synchronous mode)"
    );
    let keepalive = state.config.keepalive_interval();
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        match wait_for_state(subscription, CallState::Idle, &tx, keepalive).await {
            WaitOutcome::Reached => {
                if tx.send(Ok(Bytes::from_static(SYNC_COMPLETED.as_bytes()))).await.is_ok() {
                    info!(request_id, "delayed reply completed");
                }
            }
            outcome => {
                warn!(request_id, ?outcome, "stopped waiting for the call to complete");
            }
        }
    });

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, TEXT_PLAIN)],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

pub async fn state_handler(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "state": state.notifier.current(),
    }))
    .into_response()
}
