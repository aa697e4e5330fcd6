//! Wire codec (component A): frames a WebSocket text frame as a CDP JSON
//! envelope. Binary frames carry no framing of their own — they are
//! forwarded or accumulated verbatim by the recording side channel
//! (`src/recording.rs`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Ceiling on a single inbound WebSocket frame (text or binary). Large
/// enough to pass a full-page `DOM.getDocument` snapshot or a multi-second
/// recording chunk without flagging a legitimate frame as oversized.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// WebSocket close code for a malformed-frame / protocol violation (RFC 6455 §7.4.1).
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// WebSocket close code for a client that has exceeded resource limits (e.g. backpressure).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// WebSocket close code for an unexpected server-side failure.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// WebSocket close code for a normal, intentional close.
pub const CLOSE_NORMAL: u16 = 1000;

/// A parsed CDP envelope, as sent by a client or by the extension.
///
/// CDP carries no type discriminant field; whether an envelope is a
/// command, a response, or an event is determined entirely by which of
/// `id`/`method` are present (see [`Envelope::classify`]).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// What an [`Envelope`] represents on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// `id` + `method` (+ `params`): a command awaiting a response.
    Command,
    /// `id`, no `method`: a response (`result` or `error`) to a prior command.
    Response,
    /// `method`, no `id`: a notification/event.
    Event,
}

impl Envelope {
    /// Parse and validate a text frame, enforcing the wire codec's size and
    /// shape rules. This is the only entry point frames from a socket
    /// should go through — constructing an [`Envelope`] directly (e.g. via
    /// [`Envelope::command`]) is for values the relay itself produces.
    pub fn parse(text: &str) -> Result<Self> {
        if text.len() > MAX_FRAME_BYTES {
            return Err(Error::protocol("frame exceeds maximum size"));
        }
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| Error::protocol(format!("invalid JSON: {e}")))?;
        envelope.classify()?;
        Ok(envelope)
    }

    /// Classifies the envelope, rejecting the one invalid shape the wire
    /// codec defines: `id` and `method` both present with no `params` key.
    pub fn classify(&self) -> Result<Kind> {
        match (self.id, self.method.is_some()) {
            (Some(_), true) if self.params.is_none() => Err(Error::protocol(
                "envelope carries both id and method but no params",
            )),
            (Some(_), true) => Ok(Kind::Command),
            (Some(_), false) => Ok(Kind::Response),
            (None, true) => Ok(Kind::Event),
            (None, false) => Err(Error::protocol("envelope carries neither id nor method")),
        }
    }

    /// Build a command envelope (used when the relay forwards a client's
    /// request to the extension under a rewritten id).
    pub fn command(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: Some(id),
            method: Some(method.into()),
            params: Some(params),
            ..Default::default()
        }
    }

    /// Build a successful response envelope.
    pub fn result(id: u64, result: Value) -> Self {
        Self {
            id: Some(id),
            result: Some(result),
            ..Default::default()
        }
    }

    /// Build an error response envelope.
    pub fn error(id: u64, error: Value) -> Self {
        Self {
            id: Some(id),
            error: Some(error),
            ..Default::default()
        }
    }

    /// Build an event/notification envelope.
    pub fn event(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: Some(method.into()),
            params: Some(params),
            ..Default::default()
        }
    }

    /// Attach (or clear) a `sessionId` tag, returning `self` for chaining.
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    /// Serialize back to the wire text form.
    pub fn to_text(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_command_response_event() {
        let command = Envelope::parse(r#"{"id":1,"method":"Page.enable","params":{}}"#).unwrap();
        assert_eq!(command.classify().unwrap(), Kind::Command);

        let response = Envelope::parse(r#"{"id":1,"result":{}}"#).unwrap();
        assert_eq!(response.classify().unwrap(), Kind::Response);

        let event = Envelope::parse(r#"{"method":"Page.loadEventFired","params":{}}"#).unwrap();
        assert_eq!(event.classify().unwrap(), Kind::Event);
    }

    #[test]
    fn rejects_id_and_method_without_params() {
        let err = Envelope::parse(r#"{"id":1,"method":"Page.enable"}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    /// A real command with no arguments, such as `Browser.getVersion`, must
    /// still carry `"params":{}` — the wire codec has no special case for
    /// "methods that happen to take no arguments".
    #[test]
    fn rejects_real_zero_arg_method_without_explicit_params() {
        let err = Envelope::parse(r#"{"id":1,"method":"Browser.getVersion"}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(Envelope::parse(r#"{"id":1,"method":"Browser.getVersion","params":{}}"#).is_ok());
    }

    #[test]
    fn rejects_envelope_with_neither_id_nor_method() {
        let err = Envelope::parse(r#"{"sessionId":"s1"}"#).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn rejects_invalid_json() {
        let err = Envelope::parse("not json").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn rejects_oversized_frame() {
        let huge = format!(r#"{{"id":1,"result":"{}"}}"#, "x".repeat(MAX_FRAME_BYTES));
        let err = Envelope::parse(&huge).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn round_trips_session_id() {
        let env = Envelope::event("Target.targetInfoChanged", json!({"targetInfo": {}}))
            .with_session(Some("s1".to_string()));
        let text = env.to_text().unwrap();
        let parsed = Envelope::parse(&text).unwrap();
        assert_eq!(parsed.session_id.as_deref(), Some("s1"));
    }
}
