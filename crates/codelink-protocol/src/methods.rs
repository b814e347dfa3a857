//! Method contract registry.
//!
//! Every method name carried on either channel is registered here with
//! its kind (request vs notification), scope (which session states may
//! send it), and whether an agent notification under that name is
//! fanned out to the webview. Handlers are wired to names explicitly at
//! bridge construction; nothing is discovered at runtime.
//!
//! Registration is total for outbound traffic: encoding a message for
//! an unregistered name is a programmer error and panics. Inbound
//! lookups are fallible so unknown peer traffic is logged and dropped
//! rather than crashing the channel.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::RpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Expects exactly one correlated response.
    Request,
    /// Fire-and-forget.
    Notification,
}

/// Which part of the session lifecycle a method belongs to. The bridge
/// gates outbound agent traffic on this: `Login` methods are legal only
/// in `AwaitingLogin`, `Domain` methods only in `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodScope {
    /// Agent lifecycle signals (ready-for-login, initialized, fatal).
    Lifecycle,
    /// The login entrypoints.
    Login,
    /// Business methods riding the agent channel.
    Domain,
    /// Webview-channel methods handled by the host.
    Host,
}

#[derive(Debug, Clone, Copy)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub kind: MethodKind,
    pub scope: MethodScope,
    /// Agent notifications with this flag are re-emitted verbatim on
    /// the webview channel.
    pub ui_relevant: bool,
}

/// Registry of every method name the bridge will encode or route.
#[derive(Debug)]
pub struct MethodRegistry {
    by_name: HashMap<&'static str, MethodDescriptor>,
}

impl MethodRegistry {
    /// The canonical namespace: agent lifecycle, login, the domain
    /// subset this crate types, and the webview/host surface.
    pub fn builtin() -> Self {
        let mut registry = MethodRegistry {
            by_name: HashMap::new(),
        };
        for descriptor in BUILTIN_METHODS {
            registry.register(*descriptor);
        }
        registry
    }

    /// Register an additional method. Registering the same name twice
    /// is a programmer error.
    pub fn register(&mut self, descriptor: MethodDescriptor) {
        let previous = self.by_name.insert(descriptor.name, descriptor);
        assert!(
            previous.is_none(),
            "method '{}' registered twice",
            descriptor.name
        );
    }

    /// Fallible lookup for inbound traffic.
    pub fn get(&self, name: &str) -> Option<&MethodDescriptor> {
        self.by_name.get(name)
    }

    /// Fail-fast lookup for outbound traffic. Panics on an
    /// unregistered name: sending a method that was never registered is
    /// a bug in the caller, not a runtime condition.
    pub fn descriptor(&self, name: &str) -> &MethodDescriptor {
        self.by_name
            .get(name)
            .unwrap_or_else(|| panic!("method '{name}' is not registered"))
    }

    pub fn expects_response(&self, name: &str) -> bool {
        self.descriptor(name).kind == MethodKind::Request
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

const BUILTIN_METHODS: &[MethodDescriptor] = &[
    // -- Agent lifecycle notifications (agent -> host) --
    MethodDescriptor {
        name: "agent/readyForLogin",
        kind: MethodKind::Notification,
        scope: MethodScope::Lifecycle,
        ui_relevant: false,
    },
    MethodDescriptor {
        name: "agent/initialized",
        kind: MethodKind::Notification,
        scope: MethodScope::Lifecycle,
        ui_relevant: false,
    },
    MethodDescriptor {
        name: "agent/fatal",
        kind: MethodKind::Notification,
        scope: MethodScope::Lifecycle,
        ui_relevant: false,
    },
    // -- Login --
    MethodDescriptor {
        name: "login",
        kind: MethodKind::Request,
        scope: MethodScope::Login,
        ui_relevant: false,
    },
    // -- Domain requests (host/webview -> agent) --
    MethodDescriptor {
        name: "bootstrap",
        kind: MethodKind::Request,
        scope: MethodScope::Domain,
        ui_relevant: false,
    },
    MethodDescriptor {
        name: "logout",
        kind: MethodKind::Request,
        scope: MethodScope::Domain,
        ui_relevant: false,
    },
    MethodDescriptor {
        name: "document/markers",
        kind: MethodKind::Request,
        scope: MethodScope::Domain,
        ui_relevant: false,
    },
    // -- Agent notifications fanned out to the webview --
    MethodDescriptor {
        name: "document/didChangeMarkers",
        kind: MethodKind::Notification,
        scope: MethodScope::Domain,
        ui_relevant: true,
    },
    // -- Editor state notifications (host -> webview) --
    MethodDescriptor {
        name: "webview/editor/didChangeSelection",
        kind: MethodKind::Notification,
        scope: MethodScope::Host,
        ui_relevant: false,
    },
    MethodDescriptor {
        name: "webview/editor/didChangeVisibleRanges",
        kind: MethodKind::Notification,
        scope: MethodScope::Host,
        ui_relevant: false,
    },
    MethodDescriptor {
        name: "webview/editor/didChangeActive",
        kind: MethodKind::Notification,
        scope: MethodScope::Host,
        ui_relevant: false,
    },
    MethodDescriptor {
        name: "webview/codemark/new",
        kind: MethodKind::Notification,
        scope: MethodScope::Host,
        ui_relevant: false,
    },
    // -- UI-originated host requests (webview -> host) --
    MethodDescriptor {
        name: "host/editor/revealRange",
        kind: MethodKind::Request,
        scope: MethodScope::Host,
        ui_relevant: false,
    },
    MethodDescriptor {
        name: "host/scratch/read",
        kind: MethodKind::Request,
        scope: MethodScope::Host,
        ui_relevant: false,
    },
    MethodDescriptor {
        name: "host/scratch/write",
        kind: MethodKind::Request,
        scope: MethodScope::Host,
        ui_relevant: false,
    },
];

/// A request contract: the method name plus the payload and result
/// shapes, paired at the type level.
pub trait RpcRequest: Serialize {
    const METHOD: &'static str;
    type Result: DeserializeOwned;
}

/// A notification contract: method name plus payload shape.
pub trait RpcNotification: Serialize {
    const METHOD: &'static str;
}

/// Decode a request/notification payload. Absent params decode as null
/// so payload-less notifications map onto unit-like structs.
pub fn decode_params<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, RpcError> {
    let params = envelope.params.clone().unwrap_or(Value::Null);
    serde_json::from_value(params).map_err(|e| {
        let method = envelope.method.as_deref().unwrap_or("<none>");
        RpcError::MalformedMessage(format!("params for '{method}': {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_is_total_for_known_names() {
        let registry = MethodRegistry::builtin();
        assert!(registry.expects_response("login"));
        assert!(registry.expects_response("document/markers"));
        assert!(!registry.expects_response("agent/readyForLogin"));
        assert!(registry.descriptor("document/didChangeMarkers").ui_relevant);
        assert_eq!(registry.descriptor("login").scope, MethodScope::Login);
        assert_eq!(
            registry.descriptor("host/scratch/read").scope,
            MethodScope::Host
        );
    }

    #[test]
    fn test_unknown_inbound_name_is_fallible() {
        let registry = MethodRegistry::builtin();
        assert!(registry.get("no/such/method").is_none());
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn test_unknown_outbound_name_panics() {
        MethodRegistry::builtin().descriptor("no/such/method");
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_registration_panics() {
        let mut registry = MethodRegistry::builtin();
        registry.register(MethodDescriptor {
            name: "login",
            kind: MethodKind::Request,
            scope: MethodScope::Login,
            ui_relevant: false,
        });
    }
}
