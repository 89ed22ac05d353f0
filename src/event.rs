use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of an unsolicited user agent event, taken from the baresip `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UaEventKind {
    RegisterOk,
    RegisterFail,
    CallOutgoing,
    CallEstablished,
    CallClosed,
    EndOfFile,
    /// Any event type the call state machine does not react to
    Other(String),
}

impl UaEventKind {
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "REGISTER_OK" => UaEventKind::RegisterOk,
            "REGISTER_FAIL" => UaEventKind::RegisterFail,
            "CALL_OUTGOING" => UaEventKind::CallOutgoing,
            "CALL_ESTABLISHED" => UaEventKind::CallEstablished,
            "CALL_CLOSED" => UaEventKind::CallClosed,
            "END_OF_FILE" => UaEventKind::EndOfFile,
            other => UaEventKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for UaEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UaEventKind::RegisterOk => write!(f, "REGISTER_OK"),
            UaEventKind::RegisterFail => write!(f, "REGISTER_FAIL"),
            UaEventKind::CallOutgoing => write!(f, "CALL_OUTGOING"),
            UaEventKind::CallEstablished => write!(f, "CALL_ESTABLISHED"),
            UaEventKind::CallClosed => write!(f, "CALL_CLOSED"),
            UaEventKind::EndOfFile => write!(f, "END_OF_FILE"),
            UaEventKind::Other(kind) => write!(f, "{}", kind),
        }
    }
}

/// UaEvent is an unsolicited message emitted by the user agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UaEvent {
    pub kind: UaEventKind,
    pub class: String,
    /// Account the event refers to, set on registration events
    pub account_aor: String,
    pub peer_uri: String,
    /// Call id assigned by the user agent
    pub id: String,
    pub param: String,
}

impl UaEvent {
    pub fn new(kind: UaEventKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            class: String::new(),
            account_aor: String::new(),
            peer_uri: String::new(),
            id: id.into(),
            param: String::new(),
        }
    }

    pub fn with_account(mut self, account_aor: impl Into<String>) -> Self {
        self.account_aor = account_aor.into();
        self
    }

    pub fn with_peer(mut self, peer_uri: impl Into<String>) -> Self {
        self.peer_uri = peer_uri.into();
        self
    }
}

/// Acknowledgement of a command, matched to it by token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UaResponse {
    pub ok: bool,
    pub data: String,
    pub token: String,
}

/// Wire shape shared by baresip events and responses.
#[derive(Debug, Default, Deserialize)]
struct RawMessage {
    #[serde(default)]
    event: bool,
    #[serde(default)]
    response: bool,
    #[serde(default)]
    class: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default, rename = "accountaor")]
    account_aor: String,
    #[serde(default, rename = "peeruri")]
    peer_uri: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    param: String,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    data: String,
    #[serde(default)]
    token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UaMessage {
    Event(UaEvent),
    Response(UaResponse),
}

impl UaMessage {
    pub fn parse(payload: &[u8]) -> anyhow::Result<Self> {
        let raw: RawMessage = serde_json::from_slice(payload)?;
        if raw.response {
            return Ok(UaMessage::Response(UaResponse {
                ok: raw.ok,
                data: raw.data,
                token: raw.token,
            }));
        }
        if raw.event {
            return Ok(UaMessage::Event(UaEvent {
                kind: UaEventKind::from_type(&raw.kind),
                class: raw.class,
                account_aor: raw.account_aor,
                peer_uri: raw.peer_uri,
                id: raw.id,
                param: raw.param,
            }));
        }
        Err(anyhow::anyhow!(
            "message is neither an event nor a response: {}",
            String::from_utf8_lossy(payload)
        ))
    }
}
