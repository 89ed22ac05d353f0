use crate::app::AppState;
use crate::fsm::CallState;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub mod dial;
pub mod wait;

/// Body of `POST /dial`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DialPayload {
    /// SIP address to call, example: sip:+390123456@voip.example.com
    pub called_number: String,
    /// Name of a configured contact, alternative to `called_number`
    pub called_contact: String,
    pub message_tts: String,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    InvalidPayload(String),
    #[error("a call is already in progress (state {0}), retry once it is over")]
    Busy(CallState),
    #[error("the call worker is not running")]
    Unavailable,
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            GatewayError::Busy(_) => StatusCode::CONFLICT,
            GatewayError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        info!(status = status.as_u16(), "rejecting dial request: {}", self);
        (status, self.to_string()).into_response()
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dial", post(dial::dial_handler))
        .route("/state", get(dial::state_handler))
}
