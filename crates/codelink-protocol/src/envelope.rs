//! Wire envelope shared by the agent and webview channels.
//!
//! Both channels carry JSON-RPC-style envelopes `{method, id?, params |
//! result | error}` as newline-delimited JSON (agent) or in-process
//! queues (webview). A message with a method and an id is a request
//! awaiting exactly one response; a message with an id and a result or
//! error resolves that request; a message with a method and no id is a
//! fire-and-forget notification.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque identifier pairing a request with its eventual response.
///
/// The wire allows either a JSON string or number. Ids minted by this
/// process are always UUID strings; ids received from a peer are kept
/// verbatim so the response echoes exactly what the peer sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrelationId {
    Number(u64),
    Text(String),
}

impl CorrelationId {
    /// Mint a fresh id, unique per channel for the lifetime of the call.
    pub fn mint() -> Self {
        CorrelationId::Text(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrelationId::Number(n) => write!(f, "{n}"),
            CorrelationId::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        CorrelationId::Text(value.to_string())
    }
}

/// Error member of a response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One message on either channel. Absent members are not serialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// `None` means the member is absent. An explicit `"result": null`
    /// (the ack shape for methods with nothing to return) decodes as
    /// `Some(Value::Null)` and still classifies as a response.
    #[serde(
        default,
        deserialize_with = "result_member",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

fn result_member<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Structural classification of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Carries a method and an id; expects exactly one response.
    Request,
    /// Carries a method and no id; expects nothing back.
    Notification,
    /// Carries an id and a result or error; resolves a pending request.
    Response,
    /// None of the above. Dropped at the channel boundary.
    Malformed,
}

impl Envelope {
    pub fn request(method: impl Into<String>, id: CorrelationId, params: Option<Value>) -> Self {
        Envelope {
            method: Some(method.into()),
            id: Some(id),
            params,
            ..Default::default()
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Envelope {
            method: Some(method.into()),
            params,
            ..Default::default()
        }
    }

    pub fn response(id: CorrelationId, result: Value) -> Self {
        Envelope {
            id: Some(id),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn error_response(id: CorrelationId, error: ResponseError) -> Self {
        Envelope {
            id: Some(id),
            error: Some(error),
            ..Default::default()
        }
    }

    /// Classify by member presence. Result/error presence takes
    /// precedence so a confused peer echoing the method on a response
    /// still resolves the pending call instead of looking like a request.
    pub fn kind(&self) -> EnvelopeKind {
        if self.result.is_some() || self.error.is_some() {
            return match self.id {
                Some(_) => EnvelopeKind::Response,
                None => EnvelopeKind::Malformed,
            };
        }
        match (&self.method, &self.id) {
            (Some(_), Some(_)) => EnvelopeKind::Request,
            (Some(_), None) => EnvelopeKind::Notification,
            (None, _) => EnvelopeKind::Malformed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classification() {
        let req = Envelope::request("login", CorrelationId::from("1"), None);
        assert_eq!(req.kind(), EnvelopeKind::Request);

        let note = Envelope::notification("agent/readyForLogin", None);
        assert_eq!(note.kind(), EnvelopeKind::Notification);

        let resp = Envelope::response(CorrelationId::from("1"), json!({"ok": true}));
        assert_eq!(resp.kind(), EnvelopeKind::Response);

        let err = Envelope::error_response(
            CorrelationId::Number(7),
            ResponseError {
                code: -32603,
                message: "boom".into(),
                data: None,
            },
        );
        assert_eq!(err.kind(), EnvelopeKind::Response);

        assert_eq!(Envelope::default().kind(), EnvelopeKind::Malformed);
        // response members without an id have nothing to resolve
        let orphan = Envelope {
            result: Some(json!(1)),
            ..Default::default()
        };
        assert_eq!(orphan.kind(), EnvelopeKind::Malformed);
    }

    #[test]
    fn test_absent_members_not_serialized() {
        let note = Envelope::notification("webview/editor/didChangeSelection", None);
        let json = serde_json::to_string(&note).unwrap();
        assert_eq!(json, "{\"method\":\"webview/editor/didChangeSelection\"}");
    }

    #[test]
    fn test_correlation_id_accepts_string_or_number() {
        let e: Envelope = serde_json::from_str("{\"id\":42,\"result\":{}}").unwrap();
        assert_eq!(e.id, Some(CorrelationId::Number(42)));
        assert_eq!(e.kind(), EnvelopeKind::Response);

        let e: Envelope = serde_json::from_str("{\"id\":\"abc\",\"result\":{}}").unwrap();
        assert_eq!(e.id, Some(CorrelationId::from("abc")));
        assert_eq!(e.kind(), EnvelopeKind::Response);
    }

    #[test]
    fn test_explicit_null_result_is_a_response() {
        // ack-style results carry `"result": null`; present-but-null is
        // not the same as absent
        let e: Envelope = serde_json::from_str("{\"id\":42,\"result\":null}").unwrap();
        assert_eq!(e.result, Some(Value::Null));
        assert_eq!(e.kind(), EnvelopeKind::Response);

        let absent: Envelope = serde_json::from_str("{\"id\":42}").unwrap();
        assert_eq!(absent.result, None);
        assert_eq!(absent.kind(), EnvelopeKind::Malformed);

        // serialization keeps the null member
        let json = serde_json::to_string(&Envelope::response(
            CorrelationId::Number(42),
            Value::Null,
        ))
        .unwrap();
        assert_eq!(json, "{\"id\":42,\"result\":null}");
    }

    #[test]
    fn test_minted_ids_are_distinct() {
        let a = CorrelationId::mint();
        let b = CorrelationId::mint();
        assert_ne!(a, b);
    }
}
