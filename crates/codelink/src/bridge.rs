//! The bridge: session owner and message router.
//!
//! A single actor task owns the session state machine and both channel
//! handles. Everything reaches it as a command or an inbound envelope,
//! so state transitions are serialized by construction. Long awaits
//! (login, domain forwards) never block the loop: they run in spawned
//! subtasks, and anything that must re-enter the state machine (a login
//! settling) comes back as a command. A process exit arriving while a
//! login is in flight therefore wins: by the time the login settles the
//! session is `Failed` and the settle is rejected.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use codelink_protocol::agent::{
    AgentFatal, AgentInitialized, CapabilitySet, LoginCredentials, LoginRequest, LoginResult,
    ReadyForLogin, UserLoggedIn,
};
use codelink_protocol::error::codes;
use codelink_protocol::methods::{MethodKind, MethodScope, decode_params};
use codelink_protocol::{
    Envelope, MethodRegistry, ResponseError, RpcError, RpcNotification, RpcRequest, SessionState,
};
use log::{debug, info, warn};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::BridgeConfig;
use crate::transport::{AgentChannel, Inbound, WebviewChannel};

const COMMAND_BUFFER: usize = 64;

/// Host-side implementation of one webview method. Registered by name
/// at construction; the bridge dispatches `host/*` traffic here.
#[async_trait]
pub trait HostHandler: Send + Sync {
    async fn handle(&self, params: Option<Value>) -> Result<Value, RpcError>;
}

/// Point-in-time view of the session, published on a watch channel.
/// `capabilities` and `user` are populated exactly when `state` is
/// `"ready"`.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: &'static str,
    pub capabilities: Option<CapabilitySet>,
    pub user: Option<UserLoggedIn>,
    pub failure: Option<String>,
}

impl SessionSnapshot {
    fn of(session: &SessionState) -> Self {
        let ready = session.ready();
        SessionSnapshot {
            state: session.name(),
            capabilities: ready.map(|r| r.capabilities.clone()),
            user: ready.map(|r| r.user.clone()),
            failure: match session {
                SessionState::Failed { reason } => Some(reason.clone()),
                _ => None,
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == "ready"
    }
}

enum BridgeCommand {
    AgentStarted {
        channel: AgentChannel,
        inbound: mpsc::Receiver<Inbound>,
    },
    AgentExited {
        code: Option<i32>,
    },
    WebviewAttached {
        channel: WebviewChannel,
        inbound: mpsc::Receiver<Inbound>,
    },
    WebviewDetached,
    Login {
        request: LoginRequest,
        reply: oneshot::Sender<Result<UserLoggedIn, RpcError>>,
    },
    /// A spawned login subtask finished; re-enter the state machine.
    LoginSettled {
        outcome: Result<LoginResult, RpcError>,
        reply: oneshot::Sender<Result<UserLoggedIn, RpcError>>,
    },
    DomainRequest {
        method: String,
        params: Option<Value>,
        reply: oneshot::Sender<Result<Value, RpcError>>,
    },
    NotifyWebview {
        method: String,
        params: Option<Value>,
    },
}

// ============================================================================
// Builder
// ============================================================================

pub struct BridgeBuilder {
    config: BridgeConfig,
    registry: MethodRegistry,
    handlers: HashMap<&'static str, Arc<dyn HostHandler>>,
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        BridgeBuilder {
            config,
            registry: MethodRegistry::builtin(),
            handlers: HashMap::new(),
        }
    }

    /// Replace the method registry (to add embedder-specific methods).
    pub fn registry(mut self, registry: MethodRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Wire a host handler to a method name. Checked against the
    /// registry at build time: the name must be registered with `Host`
    /// scope.
    pub fn handler(mut self, method: &'static str, handler: Arc<dyn HostHandler>) -> Self {
        self.handlers.insert(method, handler);
        self
    }

    /// Spawn the bridge actor and return its handle.
    pub fn build(self) -> Bridge {
        let registry = Arc::new(self.registry);
        for method in self.handlers.keys() {
            let descriptor = registry.descriptor(method);
            assert_eq!(
                descriptor.scope,
                MethodScope::Host,
                "handler wired to non-host method '{method}'"
            );
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) =
            watch::channel(SessionSnapshot::of(&SessionState::Disconnected));

        let actor = BridgeLoop {
            config: self.config.clone(),
            registry: Arc::clone(&registry),
            handlers: Arc::new(self.handlers),
            session: SessionState::Disconnected,
            agent: None,
            agent_rx: None,
            webview: None,
            webview_rx: None,
            snapshot_tx,
            cmd_rx,
            cmd_tx: cmd_tx.clone(),
        };
        tokio::spawn(actor.run());

        Bridge {
            cmd_tx,
            snapshot_rx,
            registry,
            config: Arc::new(self.config),
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable handle to the bridge actor.
#[derive(Clone)]
pub struct Bridge {
    cmd_tx: mpsc::Sender<BridgeCommand>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    registry: Arc<MethodRegistry>,
    config: Arc<BridgeConfig>,
}

impl Bridge {
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder::new(config)
    }

    /// Attach a freshly spawned agent process's pipes. Moves the
    /// session to `Starting` (replacing a failed session wholesale).
    pub async fn agent_started<R, W>(&self, stdout: R, stdin: W)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (channel, inbound) = AgentChannel::new(
            stdout,
            stdin,
            Arc::clone(&self.registry),
            self.config.request_timeout,
        );
        let _ = self
            .cmd_tx
            .send(BridgeCommand::AgentStarted { channel, inbound })
            .await;
    }

    /// The process supervisor observed the agent exit.
    pub async fn agent_exited(&self, code: Option<i32>) {
        let _ = self.cmd_tx.send(BridgeCommand::AgentExited { code }).await;
    }

    /// Attach a webview panel through its queue pair.
    pub async fn webview_attached(
        &self,
        to_webview: mpsc::Sender<Envelope>,
        from_webview: mpsc::Receiver<Envelope>,
    ) {
        let (channel, inbound) = WebviewChannel::attach(
            to_webview,
            from_webview,
            Arc::clone(&self.registry),
            self.config.request_timeout,
        );
        let _ = self
            .cmd_tx
            .send(BridgeCommand::WebviewAttached { channel, inbound })
            .await;
    }

    /// Detach the panel. The agent session is unaffected.
    pub async fn webview_detached(&self) {
        let _ = self.cmd_tx.send(BridgeCommand::WebviewDetached).await;
    }

    /// Log in. Legal only in `AwaitingLogin`; rejected with `NotReady`
    /// otherwise, before anything touches the transport.
    pub async fn login(&self, credentials: LoginCredentials) -> Result<UserLoggedIn, RpcError> {
        let request = LoginRequest {
            credentials,
            server_url: self.config.server_url.clone(),
            client_info: self.config.client_info.clone(),
            trace_level: self.config.trace_level,
            debug_flag: self.config.debug,
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(BridgeCommand::Login {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RpcError::ChannelClosed)?;
        reply_rx.await.map_err(|_| RpcError::ChannelClosed)?
    }

    /// Send a domain request to the agent. Legal only in `Ready`.
    ///
    /// An unregistered or notification-kind name is a programmer error
    /// and panics here, in the calling task, never inside the actor.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let descriptor = self.registry.descriptor(method);
        assert_eq!(
            descriptor.kind,
            MethodKind::Request,
            "'{method}' is not a request"
        );
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(BridgeCommand::DomainRequest {
                method: method.to_string(),
                params,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RpcError::ChannelClosed)?;
        reply_rx.await.map_err(|_| RpcError::ChannelClosed)?
    }

    /// Typed domain request using the method's contract.
    pub async fn call<R: RpcRequest>(&self, request: &R) -> Result<R::Result, RpcError> {
        let params = serde_json::to_value(request)
            .map_err(|e| RpcError::MalformedMessage(format!("params for '{}': {e}", R::METHOD)))?;
        let raw = self.request(R::METHOD, Some(params)).await?;
        serde_json::from_value(raw)
            .map_err(|e| RpcError::MalformedMessage(format!("result for '{}': {e}", R::METHOD)))
    }

    /// Push an editor-state notification to the panel. Dropped quietly
    /// when no panel is attached.
    pub async fn notify_webview<N: RpcNotification>(&self, notification: &N) -> Result<(), RpcError> {
        let params = serde_json::to_value(notification)
            .map_err(|e| RpcError::MalformedMessage(format!("params for '{}': {e}", N::METHOD)))?;
        self.cmd_tx
            .send(BridgeCommand::NotifyWebview {
                method: N::METHOD.to_string(),
                params: Some(params),
            })
            .await
            .map_err(|_| RpcError::ChannelClosed)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot_rx.borrow().is_ready()
    }

    pub fn capabilities(&self) -> Option<CapabilitySet> {
        self.snapshot_rx.borrow().capabilities.clone()
    }

    /// Watch session snapshots; fires on every transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }
}

// ============================================================================
// Actor
// ============================================================================

struct BridgeLoop {
    config: BridgeConfig,
    registry: Arc<MethodRegistry>,
    handlers: Arc<HashMap<&'static str, Arc<dyn HostHandler>>>,
    session: SessionState,
    agent: Option<AgentChannel>,
    agent_rx: Option<mpsc::Receiver<Inbound>>,
    webview: Option<WebviewChannel>,
    webview_rx: Option<mpsc::Receiver<Inbound>>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    cmd_rx: mpsc::Receiver<BridgeCommand>,
    cmd_tx: mpsc::Sender<BridgeCommand>,
}

/// Await the next inbound item, or park forever while no channel is
/// attached so the select arm never busy-loops on `None`.
async fn recv_inbound(rx: &mut Option<mpsc::Receiver<Inbound>>) -> Inbound {
    match rx {
        Some(rx) => rx.recv().await.unwrap_or(Inbound::Closed),
        None => std::future::pending().await,
    }
}

impl BridgeLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // every handle dropped; shut down
                    None => break,
                },
                inbound = recv_inbound(&mut self.agent_rx) => {
                    self.on_agent_inbound(inbound).await;
                }
                inbound = recv_inbound(&mut self.webview_rx) => {
                    self.on_webview_inbound(inbound).await;
                }
            }
        }
        if let Some(agent) = self.agent.take() {
            agent.close().await;
        }
        if let Some(webview) = self.webview.take() {
            webview.close().await;
        }
        debug!("bridge loop stopped");
    }

    async fn handle_command(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::AgentStarted { channel, inbound } => {
                if let Some(old) = self.agent.take() {
                    old.close().await;
                }
                if !self.session.on_process_spawned() {
                    // spawn over a live session is a restart
                    self.session.on_process_exit("agent restarted".to_string());
                    self.session.on_process_spawned();
                }
                info!("agent channel attached, session starting");
                self.agent = Some(channel);
                self.agent_rx = Some(inbound);
                self.publish();
            }
            BridgeCommand::AgentExited { code } => {
                let reason = match code {
                    Some(code) => format!("agent process exited with code {code}"),
                    None => "agent process exited".to_string(),
                };
                self.fail_session(reason).await;
            }
            BridgeCommand::WebviewAttached { channel, inbound } => {
                if let Some(old) = self.webview.take() {
                    old.close().await;
                }
                info!("webview attached");
                self.webview = Some(channel);
                self.webview_rx = Some(inbound);
            }
            BridgeCommand::WebviewDetached => {
                if let Some(webview) = self.webview.take() {
                    webview.close().await;
                }
                self.webview_rx = None;
                info!("webview detached");
            }
            BridgeCommand::Login { request, reply } => {
                self.start_login(request, reply);
            }
            BridgeCommand::LoginSettled { outcome, reply } => {
                self.settle_login(outcome, reply);
            }
            BridgeCommand::DomainRequest {
                method,
                params,
                reply,
            } => {
                let gate = self.gate_domain(&method);
                match gate {
                    Err(error) => {
                        let _ = reply.send(Err(error));
                    }
                    Ok(agent) => {
                        tokio::spawn(async move {
                            let _ = reply.send(agent.request(&method, params).await);
                        });
                    }
                }
            }
            BridgeCommand::NotifyWebview { method, params } => match self.webview.clone() {
                Some(webview) => {
                    tokio::spawn(async move {
                        if let Err(error) = webview.notify(&method, params).await {
                            debug!("webview notify '{method}' failed: {error}");
                        }
                    });
                }
                None => debug!("no webview attached, dropping '{method}'"),
            },
        }
    }

    /// Gate a domain request on the session state. Rejection happens
    /// here, synchronously, with no transport write. Callers validate
    /// names before they reach the loop, so lookup failures here are
    /// errors, never panics: the loop must survive any input.
    fn gate_domain(&self, method: &str) -> Result<AgentChannel, RpcError> {
        let Some(descriptor) = self.registry.get(method).copied() else {
            return Err(RpcError::MalformedMessage(format!(
                "method '{method}' is not registered"
            )));
        };
        if descriptor.kind != MethodKind::Request {
            return Err(RpcError::MalformedMessage(format!(
                "'{method}' is not a request"
            )));
        }
        self.session.check_send(descriptor.scope)?;
        self.agent.clone().ok_or(RpcError::ChannelClosed)
    }

    fn start_login(
        &mut self,
        request: LoginRequest,
        reply: oneshot::Sender<Result<UserLoggedIn, RpcError>>,
    ) {
        if let Err(error) = self.session.on_login_sent() {
            let _ = reply.send(Err(error));
            return;
        }
        self.publish();

        let Some(agent) = self.agent.clone() else {
            // AwaitingLogin without a channel should be impossible;
            // recover by failing the attempt
            self.session.on_login_failure();
            self.publish();
            let _ = reply.send(Err(RpcError::ChannelClosed));
            return;
        };

        let cmd_tx = self.cmd_tx.clone();
        let login_timeout = self.config.login_timeout;
        tokio::spawn(async move {
            let outcome = agent.call_with_timeout(&request, login_timeout).await;
            // if the loop is gone the reply drops and the caller sees
            // ChannelClosed
            let _ = cmd_tx
                .send(BridgeCommand::LoginSettled { outcome, reply })
                .await;
        });
    }

    fn settle_login(
        &mut self,
        outcome: Result<LoginResult, RpcError>,
        reply: oneshot::Sender<Result<UserLoggedIn, RpcError>>,
    ) {
        if !matches!(self.session, SessionState::Authenticating) {
            // a process exit overtook this login; the exit wins
            let error = outcome
                .err()
                .unwrap_or(RpcError::ChannelClosed);
            let _ = reply.send(Err(error));
            return;
        }
        match outcome.and_then(|result| result.into_outcome()) {
            Ok((user, capabilities)) => {
                info!(
                    "login succeeded for {} (team {})",
                    user.user.email, user.team.name
                );
                self.session.on_login_success(capabilities, user.clone());
                self.publish();
                let _ = reply.send(Ok(user));
            }
            Err(error) => {
                warn!("login failed: {error}");
                self.session.on_login_failure();
                self.publish();
                let _ = reply.send(Err(error));
            }
        }
    }

    async fn on_agent_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Closed => {
                self.agent_rx = None;
                self.fail_session("agent channel closed".to_string()).await;
            }
            Inbound::Notification(envelope) => self.on_agent_notification(envelope).await,
            Inbound::Request(envelope) => {
                // the agent initiating requests is outside this
                // namespace; answer so the agent never hangs
                let method = envelope.method.clone().unwrap_or_default();
                debug!("rejecting agent-initiated request '{method}'");
                if let (Some(agent), Some(id)) = (self.agent.clone(), envelope.id) {
                    tokio::spawn(async move {
                        let error = ResponseError {
                            code: codes::METHOD_NOT_FOUND,
                            message: format!("unsupported method '{method}'"),
                            data: None,
                        };
                        let _ = agent.respond(id, Err(error)).await;
                    });
                }
            }
        }
    }

    async fn on_agent_notification(&mut self, envelope: Envelope) {
        let Some(method) = envelope.method.clone() else {
            return;
        };
        let Some(descriptor) = self.registry.get(&method).copied() else {
            debug!("dropping unregistered agent notification '{method}'");
            return;
        };
        match method.as_str() {
            ReadyForLogin::METHOD => {
                if self.session.on_ready_for_login() {
                    info!("agent ready for login");
                    self.publish();
                } else {
                    debug!("readyForLogin ignored in state {}", self.session.name());
                }
            }
            AgentInitialized::METHOD => match decode_params::<AgentInitialized>(&envelope) {
                Ok(initialized) => {
                    if self.session.on_server_initialized(initialized.capabilities) {
                        debug!("agent confirmed server initialization");
                        self.publish();
                    }
                }
                Err(error) => warn!("dropping malformed agent/initialized: {error}"),
            },
            AgentFatal::METHOD => {
                let message = decode_params::<AgentFatal>(&envelope)
                    .map(|fatal| fatal.message)
                    .unwrap_or_else(|_| "agent reported a fatal error".to_string());
                self.fail_session(message).await;
            }
            _ if descriptor.ui_relevant => match self.webview.clone() {
                Some(webview) => {
                    let method = method.clone();
                    tokio::spawn(async move {
                        if let Err(error) = webview.forward(envelope).await {
                            debug!("forward of '{method}' failed: {error}");
                        }
                    });
                }
                None => debug!("no webview attached, dropping '{method}'"),
            },
            _ => debug!("unhandled agent notification '{method}'"),
        }
    }

    async fn on_webview_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Closed => {
                // the agent session is deliberately untouched
                if let Some(webview) = self.webview.take() {
                    webview.close().await;
                }
                self.webview_rx = None;
                debug!("webview channel closed");
            }
            Inbound::Notification(envelope) => {
                let Some(method) = envelope.method.clone() else {
                    return;
                };
                let handler = self.handlers.get(method.as_str()).map(Arc::clone);
                match handler {
                    Some(handler) => {
                        tokio::spawn(async move {
                            if let Err(error) = handler.handle(envelope.params).await {
                                debug!("handler for '{method}' failed: {error}");
                            }
                        });
                    }
                    None => debug!("dropping unhandled webview notification '{method}'"),
                }
            }
            Inbound::Request(envelope) => self.on_webview_request(envelope),
        }
    }

    fn on_webview_request(&mut self, envelope: Envelope) {
        let Some(webview) = self.webview.clone() else {
            return;
        };
        let (Some(method), Some(id)) = (envelope.method.clone(), envelope.id.clone()) else {
            return;
        };
        let Some(descriptor) = self.registry.get(&method).copied() else {
            debug!("rejecting unknown webview request '{method}'");
            tokio::spawn(async move {
                let error = ResponseError {
                    code: codes::METHOD_NOT_FOUND,
                    message: format!("unknown method '{method}'"),
                    data: None,
                };
                let _ = webview.respond(id, Err(error)).await;
            });
            return;
        };

        match descriptor.scope {
            MethodScope::Host => {
                let handler = self.handlers.get(method.as_str()).map(Arc::clone);
                match handler {
                    Some(handler) => {
                        tokio::spawn(async move {
                            let outcome = handler
                                .handle(envelope.params)
                                .await
                                .map_err(|error| error.to_wire());
                            let _ = webview.respond(id, outcome).await;
                        });
                    }
                    None => {
                        warn!("no handler registered for '{method}'");
                        tokio::spawn(async move {
                            let error = ResponseError {
                                code: codes::INTERNAL_ERROR,
                                message: format!("no handler for '{method}'"),
                                data: None,
                            };
                            let _ = webview.respond(id, Err(error)).await;
                        });
                    }
                }
            }
            MethodScope::Login => {
                // the panel's login rides the same state-machine edge
                // as a host-initiated one
                match decode_params::<LoginRequest>(&envelope) {
                    Ok(request) => {
                        let (reply_tx, reply_rx) = oneshot::channel();
                        self.start_login(request, reply_tx);
                        tokio::spawn(async move {
                            let outcome = match reply_rx.await {
                                Ok(Ok(user)) => serde_json::to_value(user).map_err(|e| {
                                    RpcError::MalformedMessage(e.to_string()).to_wire()
                                }),
                                Ok(Err(error)) => Err(error.to_wire()),
                                Err(_) => Err(RpcError::ChannelClosed.to_wire()),
                            };
                            let _ = webview.respond(id, outcome).await;
                        });
                    }
                    Err(error) => {
                        warn!("malformed login from webview: {error}");
                        tokio::spawn(async move {
                            let _ = webview.respond(id, Err(error.to_wire())).await;
                        });
                    }
                }
            }
            MethodScope::Domain => {
                if descriptor.kind != MethodKind::Request {
                    debug!("dropping domain notification '{method}' from webview");
                    return;
                }
                let gate = self.gate_domain(&method);
                match gate {
                    Err(error) => {
                        // local rejection; nothing reaches the agent
                        tokio::spawn(async move {
                            let _ = webview.respond(id, Err(error.to_wire())).await;
                        });
                    }
                    Ok(agent) => {
                        tokio::spawn(async move {
                            // a fresh id is minted inside the agent
                            // request; the panel's id never crosses
                            // channels and is echoed back here
                            let outcome = agent
                                .request(&method, envelope.params)
                                .await
                                .map_err(|error| error.to_wire());
                            let _ = webview.respond(id, outcome).await;
                        });
                    }
                }
            }
            MethodScope::Lifecycle => {
                debug!("dropping lifecycle method '{method}' from webview");
            }
        }
    }

    /// Agent-side failure: close the channel (draining pending calls),
    /// mark the session failed, publish.
    async fn fail_session(&mut self, reason: String) {
        if let Some(agent) = self.agent.take() {
            agent.close().await;
        }
        self.agent_rx = None;
        warn!("agent session failed: {reason}");
        self.session.on_process_exit(reason);
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx
            .send_replace(SessionSnapshot::of(&self.session));
    }
}
