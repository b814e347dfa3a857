//! Codelink host-side bridge runtime.
//!
//! Connects three actors: the editor host (this process), an agent
//! child process speaking newline-delimited JSON over stdio, and a
//! sandboxed webview panel reached through in-process queues. The
//! [`Bridge`] owns the session state machine and routes every message;
//! the transport channels own framing and request/response correlation.
//!
//! Protocol types (envelopes, method contracts, the session machine)
//! live in `codelink-protocol`; this crate is the part that does I/O.

pub mod bridge;
pub mod config;
pub mod pending;
pub mod transport;

pub use codelink_protocol as protocol;

pub use bridge::{Bridge, BridgeBuilder, HostHandler, SessionSnapshot};
pub use config::BridgeConfig;
pub use transport::{AgentChannel, Inbound, WebviewChannel};
