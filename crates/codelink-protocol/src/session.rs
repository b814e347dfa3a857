//! Session state machine.
//!
//! One session exists per agent connection, owned exclusively by the
//! bridge. The machine tracks agent readiness, authentication, and
//! negotiated capabilities, and decides which outbound methods are
//! legal at any moment. The key rule: domain requests are legal only in
//! `Ready`, and login is legal only in `AwaitingLogin`; everything else
//! is rejected locally, before a byte touches the transport.
//!
//! Transition methods return whether the event applied. Events arriving
//! in a state where they do not apply are ignored by the machine (the
//! bridge logs them); process exit applies from any state.

use crate::agent::{CapabilitySet, UserLoggedIn};
use crate::error::RpcError;
use crate::methods::MethodScope;

/// Capabilities and identity carried by `Ready`. Structurally
/// non-optional: holding a `ReadySession` proves a completed login, so
/// no "throw if absent" accessors exist anywhere downstream.
#[derive(Debug, Clone)]
pub struct ReadySession {
    pub capabilities: CapabilitySet,
    pub user: UserLoggedIn,
}

#[derive(Debug, Clone, Default)]
pub enum SessionState {
    /// No agent process.
    #[default]
    Disconnected,
    /// Process spawned, agent not yet accepting logins.
    Starting,
    /// Agent is up and waiting for credentials.
    AwaitingLogin,
    /// A login request is in flight.
    Authenticating,
    /// Logged in; domain methods are legal.
    Ready(ReadySession),
    /// Process exited or the transport failed. Respawn required.
    Failed { reason: String },
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Starting => "starting",
            SessionState::AwaitingLogin => "awaitingLogin",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready(_) => "ready",
            SessionState::Failed { .. } => "failed",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready(_))
    }

    pub fn ready(&self) -> Option<&ReadySession> {
        match self {
            SessionState::Ready(ready) => Some(ready),
            _ => None,
        }
    }

    /// Process spawned (first start or respawn after failure). The
    /// session is replaced wholesale: no capabilities or identity
    /// survive a restart.
    pub fn on_process_spawned(&mut self) -> bool {
        match self {
            SessionState::Disconnected | SessionState::Failed { .. } => {
                *self = SessionState::Starting;
                true
            }
            _ => false,
        }
    }

    /// Agent signaled it can accept a login.
    pub fn on_ready_for_login(&mut self) -> bool {
        match self {
            SessionState::Starting => {
                *self = SessionState::AwaitingLogin;
                true
            }
            _ => false,
        }
    }

    /// A login request is about to be sent. Fails synchronously outside
    /// `AwaitingLogin` so callers get `NotReady` without a transport
    /// write.
    pub fn on_login_sent(&mut self) -> Result<(), RpcError> {
        match self {
            SessionState::AwaitingLogin => {
                *self = SessionState::Authenticating;
                Ok(())
            }
            other => Err(RpcError::NotReady {
                state: other.name(),
            }),
        }
    }

    /// Login resolved successfully; store capabilities and identity.
    pub fn on_login_success(&mut self, capabilities: CapabilitySet, user: UserLoggedIn) -> bool {
        match self {
            SessionState::Authenticating => {
                *self = SessionState::Ready(ReadySession { capabilities, user });
                true
            }
            _ => false,
        }
    }

    /// Login resolved with an error; back to waiting for credentials.
    pub fn on_login_failure(&mut self) -> bool {
        match self {
            SessionState::Authenticating => {
                *self = SessionState::AwaitingLogin;
                true
            }
            _ => false,
        }
    }

    /// Server-initialized confirmation. Refreshes capabilities in place
    /// when reissued; ignored outside `Ready`.
    pub fn on_server_initialized(&mut self, capabilities: Option<CapabilitySet>) -> bool {
        match self {
            SessionState::Ready(ready) => {
                if let Some(capabilities) = capabilities {
                    ready.capabilities = capabilities;
                }
                true
            }
            _ => false,
        }
    }

    /// Process exit or fatal transport error. Applies from any state.
    pub fn on_process_exit(&mut self, reason: String) {
        *self = SessionState::Failed { reason };
    }

    /// Gate an outbound agent-channel send by method scope.
    pub fn check_send(&self, scope: MethodScope) -> Result<(), RpcError> {
        match (self, scope) {
            (SessionState::Ready(_), MethodScope::Domain) => Ok(()),
            (SessionState::AwaitingLogin, MethodScope::Login) => Ok(()),
            (other, _) => Err(RpcError::NotReady {
                state: other.name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{CsTeam, CsUser, LoginState};
    use std::collections::BTreeMap;

    fn user() -> UserLoggedIn {
        UserLoggedIn {
            user: CsUser {
                id: "u1".into(),
                username: "ada".into(),
                email: "e".into(),
            },
            team: CsTeam {
                id: "t1".into(),
                name: "Acme".into(),
            },
            state: LoginState {
                user_id: "u1".into(),
                team_id: "t1".into(),
                email: "e".into(),
            },
            teams_count: 1,
        }
    }

    fn capabilities(name: &str) -> CapabilitySet {
        CapabilitySet(BTreeMap::from([(
            name.to_string(),
            serde_json::Value::Bool(true),
        )]))
    }

    #[test]
    fn test_happy_path_to_ready() {
        let mut state = SessionState::default();
        assert!(state.on_process_spawned());
        assert_eq!(state.name(), "starting");
        assert!(state.on_ready_for_login());
        assert_eq!(state.name(), "awaitingLogin");
        state.on_login_sent().unwrap();
        assert_eq!(state.name(), "authenticating");
        assert!(state.on_login_success(capabilities("postCodemark"), user()));
        let ready = state.ready().unwrap();
        assert!(ready.capabilities.enabled("postCodemark"));
        assert_eq!(ready.user.team.name, "Acme");
    }

    #[test]
    fn test_login_failure_returns_to_awaiting() {
        let mut state = SessionState::Authenticating;
        assert!(state.on_login_failure());
        assert_eq!(state.name(), "awaitingLogin");
        assert!(state.ready().is_none());
    }

    #[test]
    fn test_login_gated_outside_awaiting() {
        for mut state in [
            SessionState::Disconnected,
            SessionState::Starting,
            SessionState::Authenticating,
            SessionState::Failed { reason: "x".into() },
        ] {
            let error = state.on_login_sent().unwrap_err();
            assert!(matches!(error, RpcError::NotReady { .. }));
        }
    }

    #[test]
    fn test_domain_sends_legal_only_in_ready() {
        let ready = SessionState::Ready(ReadySession {
            capabilities: CapabilitySet::default(),
            user: user(),
        });
        assert!(ready.check_send(MethodScope::Domain).is_ok());
        assert!(ready.check_send(MethodScope::Login).is_err());

        let starting = SessionState::Starting;
        assert_eq!(
            starting.check_send(MethodScope::Domain).unwrap_err(),
            RpcError::NotReady { state: "starting" }
        );

        let awaiting = SessionState::AwaitingLogin;
        assert!(awaiting.check_send(MethodScope::Login).is_ok());
        assert!(awaiting.check_send(MethodScope::Domain).is_err());
    }

    #[test]
    fn test_server_initialized_refreshes_capabilities() {
        let mut state = SessionState::Ready(ReadySession {
            capabilities: capabilities("old"),
            user: user(),
        });
        assert!(state.on_server_initialized(Some(capabilities("new"))));
        let ready = state.ready().unwrap();
        assert!(ready.capabilities.enabled("new"));
        assert!(!ready.capabilities.enabled("old"));

        // reissue without capabilities keeps the current set
        assert!(state.on_server_initialized(None));
        assert!(state.ready().unwrap().capabilities.enabled("new"));

        let mut starting = SessionState::Starting;
        assert!(!starting.on_server_initialized(Some(capabilities("x"))));
    }

    #[test]
    fn test_process_exit_applies_from_any_state() {
        let mut state = SessionState::Ready(ReadySession {
            capabilities: capabilities("postCodemark"),
            user: user(),
        });
        state.on_process_exit("exited with code 1".into());
        assert_eq!(state.name(), "failed");
        assert!(state.ready().is_none());
    }

    #[test]
    fn test_respawn_replaces_failed_session() {
        let mut state = SessionState::Failed { reason: "x".into() };
        assert!(state.on_process_spawned());
        assert_eq!(state.name(), "starting");
        // a running session ignores spawn events
        let mut ready = SessionState::Ready(ReadySession {
            capabilities: CapabilitySet::default(),
            user: user(),
        });
        assert!(!ready.on_process_spawned());
    }

    #[test]
    fn test_ready_for_login_ignored_outside_starting() {
        let mut state = SessionState::AwaitingLogin;
        assert!(!state.on_ready_for_login());
        assert_eq!(state.name(), "awaitingLogin");
    }
}
