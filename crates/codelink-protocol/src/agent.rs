//! Agent channel method payloads.
//!
//! These types define the JSON shapes exchanged with the agent process
//! over its stdio channel: the login entrypoints, the login result with
//! its team invariant, capability negotiation, and the document-marker
//! subset of the domain namespace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;
use crate::methods::{RpcNotification, RpcRequest};

// ============================================================================
// Login
// ============================================================================

/// Agent-side trace verbosity, forwarded with every login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Silent,
    #[default]
    Errors,
    Verbose,
    Debug,
}

/// Name/version pair identifying the extension build or the hosting IDE.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    pub extension: VersionInfo,
    pub ide: VersionInfo,
}

/// The two login initiation forms. Both feed the same state-machine
/// edge and produce the same result shape; the bridge does not
/// distinguish them after submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoginCredentials {
    Password { email: String, secret: String },
    #[serde(rename_all = "camelCase")]
    Token { signup_token: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(flatten)]
    pub credentials: LoginCredentials,
    pub server_url: String,
    pub client_info: ClientInfo,
    pub trace_level: TraceLevel,
    pub debug_flag: bool,
}

impl RpcRequest for LoginRequest {
    const METHOD: &'static str = "login";
    type Result = LoginResult;
}

/// Agent-declared feature map, consumed only to decide which optional
/// methods are legal to send. Values are not interpreted further.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet(pub BTreeMap<String, Value>);

impl CapabilitySet {
    /// A capability counts as enabled unless its value is `false` or
    /// `null`; object values are per-feature config and count as on.
    pub fn enabled(&self, name: &str) -> bool {
        match self.0.get(name) {
            None | Some(Value::Bool(false)) | Some(Value::Null) => false,
            Some(_) => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilitySet>,
    pub result: LoginResultDetails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResultDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<LoginState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_response: Option<LoginResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginState {
    pub user_id: String,
    pub team_id: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: CsUser,
    pub team_id: String,
    pub teams: Vec<CsTeam>,
}

impl LoginResponse {
    /// The team the user logged in to. `team_id` must match exactly one
    /// entry of `teams`; anything else is a malformed response and
    /// fails the login rather than silently picking a team.
    pub fn team(&self) -> Result<&CsTeam, RpcError> {
        let mut matches = self.teams.iter().filter(|t| t.id == self.team_id);
        match (matches.next(), matches.next()) {
            (Some(team), None) => Ok(team),
            (None, _) => Err(RpcError::MalformedLoginResponse(format!(
                "teamId '{}' is not present in teams",
                self.team_id
            ))),
            (Some(_), Some(_)) => Err(RpcError::MalformedLoginResponse(format!(
                "teamId '{}' matches more than one team",
                self.team_id
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsUser {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsTeam {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

/// The validated post-login value. Only constructible from a login
/// result that passed the team invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLoggedIn {
    pub user: CsUser,
    pub team: CsTeam,
    pub state: LoginState,
    pub teams_count: usize,
}

impl LoginResult {
    /// Validate and split into the logged-in user and the negotiated
    /// capabilities. An agent error string wins over any payload.
    pub fn into_outcome(self) -> Result<(UserLoggedIn, CapabilitySet), RpcError> {
        if let Some(error) = self.result.error {
            return Err(RpcError::LoginFailed(error));
        }
        let state = self
            .result
            .state
            .ok_or_else(|| RpcError::MalformedLoginResponse("missing state".into()))?;
        let response = self
            .result
            .login_response
            .ok_or_else(|| RpcError::MalformedLoginResponse("missing loginResponse".into()))?;
        let team = response.team()?.clone();
        let user = UserLoggedIn {
            user: response.user,
            team,
            state,
            teams_count: response.teams.len(),
        };
        Ok((user, self.capabilities.unwrap_or_default()))
    }
}

// ============================================================================
// Domain: document markers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocumentId {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMarkersRequest {
    pub text_document: TextDocumentId,
}

impl RpcRequest for DocumentMarkersRequest {
    const METHOD: &'static str = "document/markers";
    type Result = DocumentMarkersResult;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMarkersResult {
    pub markers: Vec<DocumentMarker>,
    #[serde(default)]
    pub markers_not_located: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMarker {
    #[serde(default)]
    pub codemark: Value,
    pub range: Range,
    pub summary: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapRequest {}

impl RpcRequest for BootstrapRequest {
    const METHOD: &'static str = "bootstrap";
    type Result = Value;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogoutRequest {}

impl RpcRequest for LogoutRequest {
    const METHOD: &'static str = "logout";
    type Result = Value;
}

// ============================================================================
// Lifecycle notifications (agent -> host)
// ============================================================================

/// The agent has started and can accept a login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReadyForLogin {}

impl RpcNotification for ReadyForLogin {
    const METHOD: &'static str = "agent/readyForLogin";
}

/// Server-initialized confirmation; may reissue capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentInitialized {
    #[serde(default)]
    pub capabilities: Option<CapabilitySet>,
}

impl RpcNotification for AgentInitialized {
    const METHOD: &'static str = "agent/initialized";
}

/// Unrecoverable agent-side failure during initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentFatal {
    pub message: String,
}

impl RpcNotification for AgentFatal {
    const METHOD: &'static str = "agent/fatal";
}

/// Markers changed for a document; fanned out to the webview.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidChangeMarkers {
    pub text_document: TextDocumentId,
}

impl RpcNotification for DidChangeMarkers {
    const METHOD: &'static str = "document/didChangeMarkers";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client_info() -> ClientInfo {
        ClientInfo {
            extension: VersionInfo {
                name: "codelink".into(),
                version: "0.1.0".into(),
            },
            ide: VersionInfo {
                name: "TestIDE".into(),
                version: "2026.1".into(),
            },
        }
    }

    #[test]
    fn test_password_login_wire_shape() {
        let request = LoginRequest {
            credentials: LoginCredentials::Password {
                email: "e@acme.com".into(),
                secret: "hunter2".into(),
            },
            server_url: "https://api.example.com".into(),
            client_info: client_info(),
            trace_level: TraceLevel::Verbose,
            debug_flag: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["email"], "e@acme.com");
        assert_eq!(json["secret"], "hunter2");
        assert_eq!(json["serverUrl"], "https://api.example.com");
        assert_eq!(json["traceLevel"], "verbose");
        assert_eq!(json["debugFlag"], true);
        assert!(json.get("signupToken").is_none());
    }

    #[test]
    fn test_token_login_wire_shape() {
        let request = LoginRequest {
            credentials: LoginCredentials::Token {
                signup_token: "tok-123".into(),
            },
            server_url: "https://api.example.com".into(),
            client_info: client_info(),
            trace_level: TraceLevel::default(),
            debug_flag: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["signupToken"], "tok-123");
        assert!(json.get("email").is_none());
    }

    #[test]
    fn test_credentials_untagged_round_trip() {
        let token: LoginCredentials =
            serde_json::from_value(json!({"signupToken": "tok"})).unwrap();
        assert_eq!(
            token,
            LoginCredentials::Token {
                signup_token: "tok".into()
            }
        );
        let password: LoginCredentials =
            serde_json::from_value(json!({"email": "e", "secret": "s"})).unwrap();
        assert!(matches!(password, LoginCredentials::Password { .. }));
    }

    fn login_result(team_id: &str, teams: Vec<CsTeam>) -> LoginResult {
        LoginResult {
            capabilities: Some(CapabilitySet(BTreeMap::from([(
                "postCodemark".to_string(),
                json!(true),
            )]))),
            result: LoginResultDetails {
                error: None,
                state: Some(LoginState {
                    user_id: "u1".into(),
                    team_id: team_id.into(),
                    email: "e".into(),
                }),
                login_response: Some(LoginResponse {
                    user: CsUser {
                        id: "u1".into(),
                        username: "ada".into(),
                        email: "e".into(),
                    },
                    team_id: team_id.into(),
                    teams,
                }),
            },
        }
    }

    #[test]
    fn test_login_outcome_success_resolves_team() {
        let result = login_result(
            "t1",
            vec![CsTeam {
                id: "t1".into(),
                name: "Acme".into(),
            }],
        );
        let (user, capabilities) = result.into_outcome().unwrap();
        assert_eq!(user.team.name, "Acme");
        assert_eq!(user.teams_count, 1);
        assert!(capabilities.enabled("postCodemark"));
    }

    #[test]
    fn test_login_outcome_error_string_wins() {
        let result = LoginResult {
            capabilities: None,
            result: LoginResultDetails {
                error: Some("invalid-credentials".into()),
                ..Default::default()
            },
        };
        assert_eq!(
            result.into_outcome().unwrap_err(),
            RpcError::LoginFailed("invalid-credentials".into())
        );
    }

    #[test]
    fn test_login_outcome_team_mismatch_is_malformed() {
        let result = login_result(
            "t2",
            vec![CsTeam {
                id: "t1".into(),
                name: "Acme".into(),
            }],
        );
        assert!(matches!(
            result.into_outcome(),
            Err(RpcError::MalformedLoginResponse(_))
        ));
    }

    #[test]
    fn test_login_outcome_duplicate_team_is_malformed() {
        let dup = CsTeam {
            id: "t1".into(),
            name: "Acme".into(),
        };
        let result = login_result("t1", vec![dup.clone(), dup]);
        assert!(matches!(
            result.into_outcome(),
            Err(RpcError::MalformedLoginResponse(_))
        ));
    }

    #[test]
    fn test_cs_types_use_underscore_id() {
        let user: CsUser =
            serde_json::from_value(json!({"_id": "u1", "username": "ada", "email": "e"})).unwrap();
        assert_eq!(user.id, "u1");
        let team: CsTeam = serde_json::from_value(json!({"_id": "t1", "name": "Acme"})).unwrap();
        assert_eq!(team.id, "t1");
    }

    #[test]
    fn test_capability_values() {
        let capabilities = CapabilitySet(BTreeMap::from([
            ("on".to_string(), json!(true)),
            ("off".to_string(), json!(false)),
            ("cleared".to_string(), json!(null)),
            ("configured".to_string(), json!({"limit": 10})),
        ]));
        assert!(capabilities.enabled("on"));
        assert!(capabilities.enabled("configured"));
        assert!(!capabilities.enabled("off"));
        assert!(!capabilities.enabled("cleared"));
        assert!(!capabilities.enabled("absent"));
    }
}
