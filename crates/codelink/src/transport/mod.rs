//! Transport channels.
//!
//! Two channels, one shape: the agent channel frames envelopes as
//! newline-delimited JSON over the child's stdio, the webview channel
//! moves already-parsed envelopes over in-process queues. Both share
//! the same core: an outbound queue, a pending-call table, and routing
//! of inbound envelopes by structural kind. Responses resolve pending
//! calls inside the channel; requests and notifications surface to the
//! bridge as [`Inbound`] items.

pub mod agent;
pub mod webview;

pub use agent::AgentChannel;
pub use webview::WebviewChannel;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use codelink_protocol::methods::MethodKind;
use codelink_protocol::{
    CorrelationId, Envelope, EnvelopeKind, MethodRegistry, ResponseError, RpcError, RpcRequest,
};
use log::{debug, warn};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::pending::PendingCalls;

pub(crate) const OUTBOUND_BUFFER: usize = 64;
pub(crate) const INBOUND_BUFFER: usize = 256;

/// Inbound traffic a channel surfaces to the bridge. Responses never
/// appear here; they resolve the channel's pending-call table directly.
#[derive(Debug)]
pub enum Inbound {
    Request(Envelope),
    Notification(Envelope),
    /// Terminal: the underlying transport is gone and the channel has
    /// drained its pending calls.
    Closed,
}

/// State shared by both channel flavors. Cheap to clone; every clone
/// talks to the same writer task and pending table.
#[derive(Clone)]
pub(crate) struct ChannelCore {
    pub(crate) outbound: mpsc::Sender<Envelope>,
    pub(crate) pending: Arc<PendingCalls>,
    pub(crate) closed: Arc<AtomicBool>,
    pub(crate) registry: Arc<MethodRegistry>,
    pub(crate) request_timeout: Duration,
}

impl ChannelCore {
    pub(crate) fn new(
        outbound: mpsc::Sender<Envelope>,
        registry: Arc<MethodRegistry>,
        request_timeout: Duration,
    ) -> Self {
        ChannelCore {
            outbound,
            pending: Arc::new(PendingCalls::new()),
            closed: Arc::new(AtomicBool::new(false)),
            registry,
            request_timeout,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the channel closed and fail every pending call. Idempotent.
    pub(crate) async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let drained = self.pending.drain(RpcError::ChannelClosed).await;
            if drained > 0 {
                debug!("failed {drained} pending calls on channel close");
            }
        }
    }

    /// Send a request and await its correlated response. The waiter is
    /// registered before the envelope reaches the writer, so even an
    /// instant response finds it.
    pub(crate) async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let descriptor = self.registry.descriptor(method);
        assert_eq!(
            descriptor.kind,
            MethodKind::Request,
            "'{method}' is a notification, not a request"
        );
        if self.is_closed() {
            return Err(RpcError::ChannelClosed);
        }

        let id = CorrelationId::mint();
        let rx = self.pending.register(id.clone()).await;
        // a close racing the check above may already have drained the
        // table; re-check so the waiter cannot sit out the drain and
        // die by timeout instead of ChannelClosed
        if self.is_closed() {
            self.pending.forget(&id).await;
            return Err(RpcError::ChannelClosed);
        }
        let envelope = Envelope::request(method, id.clone(), params);
        if self.outbound.send(envelope).await.is_err() {
            self.pending.forget(&id).await;
            return Err(RpcError::ChannelClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // waiter dropped by drain without an outcome
            Ok(Err(_)) => Err(RpcError::ChannelClosed),
            Err(_) => {
                // a response arriving after this finds no waiter and is
                // discarded by the reader
                self.pending.forget(&id).await;
                Err(RpcError::Timeout(timeout))
            }
        }
    }

    /// Typed request using the method's contract.
    pub(crate) async fn call<R: RpcRequest>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Result, RpcError> {
        let params = serde_json::to_value(request)
            .map_err(|e| RpcError::MalformedMessage(format!("params for '{}': {e}", R::METHOD)))?;
        let raw = self.request(R::METHOD, Some(params), timeout).await?;
        serde_json::from_value(raw)
            .map_err(|e| RpcError::MalformedMessage(format!("result for '{}': {e}", R::METHOD)))
    }

    pub(crate) async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let descriptor = self.registry.descriptor(method);
        assert_eq!(
            descriptor.kind,
            MethodKind::Notification,
            "'{method}' is a request, not a notification"
        );
        self.send_raw(Envelope::notification(method, params)).await
    }

    /// Answer a peer request, echoing the peer's id verbatim.
    pub(crate) async fn respond(
        &self,
        id: CorrelationId,
        outcome: Result<Value, ResponseError>,
    ) -> Result<(), RpcError> {
        let envelope = match outcome {
            Ok(result) => Envelope::response(id, result),
            Err(error) => Envelope::error_response(id, error),
        };
        self.send_raw(envelope).await
    }

    pub(crate) async fn send_raw(&self, envelope: Envelope) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::ChannelClosed);
        }
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| RpcError::ChannelClosed)
    }

    /// Route one inbound envelope: responses resolve the pending table,
    /// requests and notifications go to the bridge. Returns false once
    /// the bridge side is gone and reading should stop.
    pub(crate) async fn route(&self, envelope: Envelope, inbound: &mpsc::Sender<Inbound>) -> bool {
        match envelope.kind() {
            EnvelopeKind::Response => {
                let Some(id) = envelope.id else { return true };
                let outcome = match envelope.error {
                    Some(error) => Err(RpcError::from_wire(&error)),
                    None => Ok(envelope.result.unwrap_or(Value::Null)),
                };
                if !self.pending.resolve(&id, outcome).await {
                    debug!("discarding response for unknown or expired id {id}");
                }
                true
            }
            EnvelopeKind::Request => inbound.send(Inbound::Request(envelope)).await.is_ok(),
            EnvelopeKind::Notification => {
                inbound.send(Inbound::Notification(envelope)).await.is_ok()
            }
            EnvelopeKind::Malformed => {
                warn!("dropping structurally malformed message");
                true
            }
        }
    }
}
