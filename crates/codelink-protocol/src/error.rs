//! Bridge error taxonomy.
//!
//! Transport-level failures (malformed messages, closed channels,
//! timeouts) are handled locally by the channel or bridge and never
//! thrown across a channel boundary. Session-level failures (login
//! errors, fatal agent errors) are surfaced to callers as typed values
//! so the UI can render a retry path instead of crashing.

use std::time::Duration;

use thiserror::Error;

use crate::envelope::ResponseError;

/// Wire error codes. The -327xx range mirrors JSON-RPC; the -320xx
/// range is bridge-specific.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub const NOT_READY: i64 = -32001;
    pub const CHANNEL_CLOSED: i64 = -32002;
    pub const TIMEOUT: i64 = -32003;
    pub const LOGIN_FAILED: i64 = -32004;
    pub const MALFORMED_LOGIN_RESPONSE: i64 = -32005;
    pub const FATAL: i64 = -32006;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// Decode failure. Non-fatal; the offending message is dropped,
    /// except a response, which still resolves its pending call.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A domain request was attempted outside the `Ready` state. Raised
    /// synchronously, before anything touches the transport.
    #[error("session not ready (state: {state})")]
    NotReady { state: &'static str },

    /// The transport is gone. Every pending call fails with this.
    #[error("channel closed")]
    ChannelClosed,

    /// No response arrived within the per-request deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Explicit error string from the agent's login handler.
    #[error("login failed: {0}")]
    LoginFailed(String),

    /// The login response violated its own invariants
    /// (`loginResponse.teamId` must match exactly one `teams[].id`).
    #[error("malformed login response: {0}")]
    MalformedLoginResponse(String),

    /// Unrecoverable agent-side failure. The host is expected to offer
    /// a restart.
    #[error("fatal agent error: {0}")]
    Fatal(String),
}

impl RpcError {
    /// Encode as a wire error for a response envelope.
    pub fn to_wire(&self) -> ResponseError {
        let code = match self {
            RpcError::MalformedMessage(_) => codes::INVALID_REQUEST,
            RpcError::NotReady { .. } => codes::NOT_READY,
            RpcError::ChannelClosed => codes::CHANNEL_CLOSED,
            RpcError::Timeout(_) => codes::TIMEOUT,
            RpcError::LoginFailed(_) => codes::LOGIN_FAILED,
            RpcError::MalformedLoginResponse(_) => codes::MALFORMED_LOGIN_RESPONSE,
            RpcError::Fatal(_) => codes::FATAL,
        };
        ResponseError {
            code,
            message: self.to_string(),
            data: None,
        }
    }

    /// Decode a wire error received in a response envelope. Codes this
    /// process does not mint (agent-internal errors) map to `Fatal`.
    pub fn from_wire(error: &ResponseError) -> RpcError {
        match error.code {
            codes::NOT_READY => RpcError::NotReady { state: "unknown" },
            codes::CHANNEL_CLOSED => RpcError::ChannelClosed,
            codes::LOGIN_FAILED => RpcError::LoginFailed(error.message.clone()),
            codes::MALFORMED_LOGIN_RESPONSE => {
                RpcError::MalformedLoginResponse(error.message.clone())
            }
            codes::PARSE_ERROR | codes::INVALID_REQUEST => {
                RpcError::MalformedMessage(error.message.clone())
            }
            _ => RpcError::Fatal(error.message.clone()),
        }
    }
}
