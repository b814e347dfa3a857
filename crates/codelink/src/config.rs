//! Bridge configuration.

use std::time::Duration;

use codelink_protocol::agent::{ClientInfo, TraceLevel, VersionInfo};

/// Static configuration the bridge carries for the lifetime of the
/// host. Credentials are not part of this; they arrive per login call.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// API endpoint handed to the agent at login.
    pub server_url: String,
    /// Extension and IDE identity reported to the agent.
    pub client_info: ClientInfo,
    /// Agent-side trace verbosity.
    pub trace_level: TraceLevel,
    /// Ask the agent for debug behavior (verbose errors, no batching).
    pub debug: bool,
    /// Deadline for an individual agent request.
    pub request_timeout: Duration,
    /// Deadline for the login round trip, which can be much slower than
    /// an ordinary request (the agent opens its own server connections).
    pub login_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            server_url: "https://api.codestream.com".to_string(),
            client_info: ClientInfo {
                extension: VersionInfo {
                    name: "codelink".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                ide: VersionInfo {
                    name: "unknown".to_string(),
                    version: "0.0.0".to_string(),
                },
            },
            trace_level: TraceLevel::default(),
            debug: false,
            request_timeout: Duration::from_secs(30),
            login_timeout: Duration::from_secs(120),
        }
    }
}
