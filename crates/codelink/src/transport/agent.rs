//! Agent channel: newline-delimited JSON over the child's stdio.
//!
//! One writer task serializes envelopes to the child's stdin, one
//! reader task parses lines from its stdout and routes them. EOF or an
//! I/O error on either pipe closes the channel, drains its pending
//! calls with `ChannelClosed`, and surfaces `Inbound::Closed` to the
//! bridge. Malformed lines are logged and dropped; one bad message
//! never kills the stream.

use std::sync::Arc;
use std::time::Duration;

use codelink_protocol::methods::MethodKind;
use codelink_protocol::{CorrelationId, Envelope, MethodRegistry, ResponseError, RpcError, RpcRequest};
use log::{debug, warn};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::{ChannelCore, INBOUND_BUFFER, Inbound, OUTBOUND_BUFFER};

#[derive(Clone)]
pub struct AgentChannel {
    core: ChannelCore,
}

impl AgentChannel {
    /// Attach to a spawned agent's pipes. Returns the channel handle
    /// and the inbound stream the bridge consumes.
    pub fn new<R, W>(
        stdout: R,
        stdin: W,
        registry: Arc<MethodRegistry>,
        request_timeout: Duration,
    ) -> (Self, mpsc::Receiver<Inbound>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let core = ChannelCore::new(outbound_tx, registry, request_timeout);

        tokio::spawn(writer_task(stdin, outbound_rx, core.clone()));
        tokio::spawn(reader_task(stdout, inbound_tx, core.clone()));

        (AgentChannel { core }, inbound_rx)
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

    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        self.core.request(method, params, timeout).await
    }

    pub async fn call<R: RpcRequest>(&self, request: &R) -> Result<R::Result, RpcError> {
        self.core.call(request, self.core.request_timeout).await
    }

    pub async fn call_with_timeout<R: RpcRequest>(
        &self,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Result, RpcError> {
        self.core.call(request, timeout).await
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

    pub fn expects_response(&self, method: &str) -> bool {
        self.core.registry.descriptor(method).kind == MethodKind::Request
    }
}

async fn writer_task<W: AsyncWrite + Unpin>(
    mut stdin: W,
    mut outbound: mpsc::Receiver<Envelope>,
    core: ChannelCore,
) {
    while let Some(envelope) = outbound.recv().await {
        let mut line = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to serialize outbound message: {e}");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = stdin.write_all(&line).await {
            warn!("agent stdin write failed: {e}");
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!("agent stdin flush failed: {e}");
            break;
        }
    }
    core.close().await;
}

async fn reader_task<R: AsyncRead + Unpin>(
    stdout: R,
    inbound: mpsc::Sender<Inbound>,
    core: ChannelCore,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let envelope: Envelope = match serde_json::from_str(&line) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("dropping malformed agent message: {e}");
                        continue;
                    }
                };
                if !core.route(envelope, &inbound).await {
                    break;
                }
            }
            Ok(None) => {
                debug!("agent stdout reached EOF");
                break;
            }
            Err(e) => {
                warn!("agent stdout read failed: {e}");
                break;
            }
        }
    }
    core.close().await;
    let _ = inbound.send(Inbound::Closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

    fn channel() -> (
        AgentChannel,
        mpsc::Receiver<Inbound>,
        BufReader<ReadHalf<DuplexStream>>,
        WriteHalf<DuplexStream>,
    ) {
        let (host_io, peer_io) = tokio::io::duplex(64 * 1024);
        let (host_read, host_write) = tokio::io::split(host_io);
        let (peer_read, peer_write) = tokio::io::split(peer_io);
        let (channel, inbound) = AgentChannel::new(
            host_read,
            host_write,
            Arc::new(MethodRegistry::builtin()),
            Duration::from_secs(2),
        );
        (channel, inbound, BufReader::new(peer_read), peer_write)
    }

    async fn read_envelope(reader: &mut BufReader<ReadHalf<DuplexStream>>) -> Envelope {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        serde_json::from_str(&line).unwrap()
    }

    async fn write_envelope(writer: &mut WriteHalf<DuplexStream>, envelope: &Envelope) {
        let mut line = serde_json::to_vec(envelope).unwrap();
        line.push(b'\n');
        writer.write_all(&line).await.unwrap();
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let (channel, _inbound, mut reader, mut writer) = channel();

        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.request("bootstrap", Some(json!({}))).await }
        });

        let request = read_envelope(&mut reader).await;
        assert_eq!(request.method.as_deref(), Some("bootstrap"));
        let id = request.id.unwrap();
        write_envelope(&mut writer, &Envelope::response(id, json!({"ok": true}))).await;

        assert_eq!(pending.await.unwrap().unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_out_of_order_responses_correlate() {
        let (channel, _inbound, mut reader, mut writer) = channel();

        let first = tokio::spawn({
            let channel = channel.clone();
            async move { channel.request("bootstrap", None).await }
        });
        let request_a = read_envelope(&mut reader).await;

        let second = tokio::spawn({
            let channel = channel.clone();
            async move {
                channel
                    .request("document/markers", Some(json!({"textDocument": {"uri": "u"}})))
                    .await
            }
        });
        let request_b = read_envelope(&mut reader).await;

        // answer in reverse arrival order
        write_envelope(
            &mut writer,
            &Envelope::response(request_b.id.unwrap(), json!({"for": "document/markers"})),
        )
        .await;
        write_envelope(
            &mut writer,
            &Envelope::response(request_a.id.unwrap(), json!({"for": "bootstrap"})),
        )
        .await;

        assert_eq!(first.await.unwrap().unwrap(), json!({"for": "bootstrap"}));
        assert_eq!(
            second.await.unwrap().unwrap(),
            json!({"for": "document/markers"})
        );
    }

    #[tokio::test]
    async fn test_null_result_resolves_pending_call() {
        let (channel, _inbound, mut reader, mut writer) = channel();

        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.request("logout", None).await }
        });
        let request = read_envelope(&mut reader).await;

        // ack shape straight off the wire, not via the envelope builder
        let line = format!("{{\"id\":\"{}\",\"result\":null}}\n", request.id.unwrap());
        writer.write_all(line.as_bytes()).await.unwrap();

        assert_eq!(pending.await.unwrap().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_kill_stream() {
        let (channel, _inbound, mut reader, mut writer) = channel();

        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.request("bootstrap", None).await }
        });
        let request = read_envelope(&mut reader).await;

        writer.write_all(b"this is not json\n").await.unwrap();
        write_envelope(&mut writer, &Envelope::response(request.id.unwrap(), json!(1))).await;

        assert_eq!(pending.await.unwrap().unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_peer_eof_drains_pending_with_channel_closed() {
        let (channel, mut inbound, mut reader, writer) = channel();

        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.request("bootstrap", None).await }
        });
        let _ = read_envelope(&mut reader).await;

        drop(writer);
        drop(reader);

        assert_eq!(pending.await.unwrap().unwrap_err(), RpcError::ChannelClosed);
        assert!(matches!(inbound.recv().await, Some(Inbound::Closed)));
        assert!(channel.is_closed());
        // further sends fail synchronously
        assert_eq!(
            channel.request("bootstrap", None).await.unwrap_err(),
            RpcError::ChannelClosed
        );
    }

    #[tokio::test]
    async fn test_explicit_close_fails_pending_with_channel_closed() {
        let (channel, _inbound, mut reader, _writer) = channel();

        let pending = tokio::spawn({
            let channel = channel.clone();
            async move {
                channel
                    .request_with_timeout("bootstrap", None, Duration::from_millis(50))
                    .await
            }
        });
        let _ = read_envelope(&mut reader).await;

        channel.close().await;
        // the waiter resolves through the drain, not its timeout
        assert_eq!(pending.await.unwrap().unwrap_err(), RpcError::ChannelClosed);

        // and a call racing or following the close never times out
        assert_eq!(
            channel
                .request_with_timeout("bootstrap", None, Duration::from_millis(50))
                .await
                .unwrap_err(),
            RpcError::ChannelClosed
        );
    }

    #[tokio::test]
    async fn test_timeout_discards_late_response() {
        let (channel, _inbound, mut reader, mut writer) = channel();

        let outcome = channel
            .request_with_timeout("bootstrap", None, Duration::from_millis(20))
            .await;
        assert!(matches!(outcome, Err(RpcError::Timeout(_))));

        // the late response finds no waiter and the channel stays usable
        let request = read_envelope(&mut reader).await;
        write_envelope(&mut writer, &Envelope::response(request.id.unwrap(), json!(1))).await;

        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.request("bootstrap", None).await }
        });
        let request = read_envelope(&mut reader).await;
        write_envelope(&mut writer, &Envelope::response(request.id.unwrap(), json!(2))).await;
        assert_eq!(pending.await.unwrap().unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_wire_error_decodes_to_typed_error() {
        let (channel, _inbound, mut reader, mut writer) = channel();

        let pending = tokio::spawn({
            let channel = channel.clone();
            async move { channel.request("login", None).await }
        });
        let request = read_envelope(&mut reader).await;
        write_envelope(
            &mut writer,
            &Envelope::error_response(
                request.id.unwrap(),
                RpcError::LoginFailed("invalid-credentials".into()).to_wire(),
            ),
        )
        .await;

        assert!(matches!(
            pending.await.unwrap().unwrap_err(),
            RpcError::LoginFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_notifications_surface_inbound() {
        let (_channel, mut inbound, _reader, mut writer) = channel();

        write_envelope(&mut writer, &Envelope::notification("agent/readyForLogin", None)).await;
        match inbound.recv().await.unwrap() {
            Inbound::Notification(envelope) => {
                assert_eq!(envelope.method.as_deref(), Some("agent/readyForLogin"));
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }
}
