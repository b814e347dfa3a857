//! Webview channel: envelopes over in-process queues.
//!
//! The panel lives in a sandbox the host reaches through a pair of
//! `mpsc` queues of already-parsed envelopes; framing is the glue
//! code's problem. Everything else matches the agent channel: an own
//! pending-call table, the same routing, the same drain-on-close
//! semantics. The webview can come and go without touching the agent
//! session.

use std::sync::Arc;
use std::time::Duration;

use codelink_protocol::methods::MethodKind;
use codelink_protocol::{CorrelationId, Envelope, MethodRegistry, ResponseError, RpcError};
use log::debug;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{ChannelCore, INBOUND_BUFFER, Inbound};

#[derive(Clone)]
pub struct WebviewChannel {
    core: ChannelCore,
}

impl WebviewChannel {
    /// Attach a panel. `to_webview` carries host-originated envelopes
    /// out, `from_webview` carries panel-originated envelopes in.
    pub fn attach(
        to_webview: mpsc::Sender<Envelope>,
        from_webview: mpsc::Receiver<Envelope>,
        registry: Arc<MethodRegistry>,
        request_timeout: Duration,
    ) -> (Self, mpsc::Receiver<Inbound>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let core = ChannelCore::new(to_webview, registry, request_timeout);

        tokio::spawn(pump_task(from_webview, inbound_tx, core.clone()));

        (WebviewChannel { core }, inbound_rx)
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Fail all pending calls and refuse further sends.
    pub async fn close(&self) {
        self.core.close().await;
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.core
            .request(method, params, self.core.request_timeout)
            .await
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        self.core.notify(method, params).await
    }

    pub async fn respond(
        &self,
        id: CorrelationId,
        outcome: Result<Value, ResponseError>,
    ) -> Result<(), RpcError> {
        self.core.respond(id, outcome).await
    }

    /// Re-emit an agent notification on this channel verbatim. The
    /// envelope is forwarded untouched, so the panel sees exactly the
    /// method and params the agent produced.
    pub async fn forward(&self, envelope: Envelope) -> Result<(), RpcError> {
        debug_assert!(
            envelope.id.is_none(),
            "only notifications are forwarded verbatim"
        );
        self.core.send_raw(envelope).await
    }

    pub fn expects_response(&self, method: &str) -> bool {
        self.core.registry.descriptor(method).kind == MethodKind::Request
    }
}

async fn pump_task(
    mut from_webview: mpsc::Receiver<Envelope>,
    inbound: mpsc::Sender<Inbound>,
    core: ChannelCore,
) {
    while let Some(envelope) = from_webview.recv().await {
        if !core.route(envelope, &inbound).await {
            break;
        }
    }
    debug!("webview queue closed");
    core.close().await;
    let _ = inbound.send(Inbound::Closed).await;
}
