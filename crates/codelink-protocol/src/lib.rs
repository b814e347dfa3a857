//! Canonical protocol types for Codelink agent communication.
//!
//! This crate defines everything both sides of the bridge agree on:
//! the JSON-RPC-style wire envelope, the method contract registry, the
//! agent and webview method namespaces, the error taxonomy, and the
//! session state machine that gates which methods may be sent.
//!
//! The runtime (channels, pending-call tables, the bridge actor) lives
//! in the `codelink` crate; nothing here does I/O.

pub mod agent;
pub mod envelope;
pub mod error;
pub mod methods;
pub mod session;
pub mod webview;

pub use envelope::{CorrelationId, Envelope, EnvelopeKind, ResponseError};
pub use error::RpcError;
pub use methods::{
    MethodDescriptor, MethodKind, MethodRegistry, MethodScope, RpcNotification, RpcRequest,
};
pub use session::{ReadySession, SessionState};
