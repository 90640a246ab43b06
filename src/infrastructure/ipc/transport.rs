//! IPC Transports
//!
//! - StreamTransport: 任意 AsyncRead/AsyncWrite 上的长度前缀管道（stdio、子进程管道）
//! - PortTransport: 进程内消息端口，成对创建

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::framing::FrameCodec;
use crate::application::ports::{Listener, Transport, TransportError};
use crate::domain::ipc::IpcMessage;

/// 入站消息监听器集合
///
/// 每条入站消息按到达顺序分发给所有已注册的监听器
struct ListenerSet {
    next_id: AtomicU64,
    listeners: DashMap<u64, mpsc::UnboundedSender<IpcMessage>>,
    closed: CancellationToken,
}

impl ListenerSet {
    fn new(closed: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            listeners: DashMap::new(),
            closed,
        })
    }

    fn register(self: &Arc<Self>) -> Listener {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.listeners.insert(id, tx);
        if self.closed.is_cancelled() {
            // 已断开：丢弃发送端，recv 立即返回 None
            self.listeners.remove(&id);
        }

        let set = Arc::downgrade(self);
        Listener::new(rx, move || {
            if let Some(set) = set.upgrade() {
                set.listeners.remove(&id);
            }
        })
    }

    fn dispatch(&self, message: IpcMessage) {
        for entry in self.listeners.iter() {
            let _ = entry.value().send(message.clone());
        }
    }

    fn close(&self) {
        self.closed.cancel();
        self.listeners.clear();
    }
}

// ============================================================================
// Stream Transport
// ============================================================================

/// 长度前缀字节流通道
pub struct StreamTransport {
    name: String,
    codec: FrameCodec,
    outbound: mpsc::UnboundedSender<Bytes>,
    listeners: Arc<ListenerSet>,
}

impl StreamTransport {
    /// 在读写两端上启动通道，读写循环各自运行在独立任务中
    pub fn spawn<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        max_message_size: usize,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let name = name.into();
        let codec = FrameCodec::new(max_message_size);
        let listeners = ListenerSet::new(CancellationToken::new());
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::read_loop(
            name.clone(),
            reader,
            codec,
            listeners.clone(),
        ));
        tokio::spawn(Self::write_loop(
            name.clone(),
            writer,
            codec,
            outbound_rx,
            listeners.clone(),
        ));

        tracing::debug!(transport = %name, max_message_size, "Stream transport started");

        Arc::new(Self {
            name,
            codec,
            outbound,
            listeners,
        })
    }

    async fn read_loop<R>(name: String, reader: R, codec: FrameCodec, listeners: Arc<ListenerSet>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut frames = FramedRead::new(reader, codec);

        loop {
            tokio::select! {
                _ = listeners.closed.cancelled() => break,
                item = frames.next() => match item {
                    None => {
                        tracing::info!(transport = %name, "Peer closed the stream");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(transport = %name, error = %e, "Stream read failed");
                        break;
                    }
                    Some(Ok(frame)) => match serde_json::from_slice::<IpcMessage>(&frame) {
                        Ok(message) => listeners.dispatch(message),
                        Err(e) => {
                            // 分帧与载荷无关，丢弃这一条即可
                            tracing::warn!(
                                transport = %name,
                                size = frame.len(),
                                error = %e,
                                "Dropping undecodable message"
                            );
                        }
                    },
                },
            }
        }

        listeners.close();
    }

    async fn write_loop<W>(
        name: String,
        writer: W,
        codec: FrameCodec,
        mut outbound: mpsc::UnboundedReceiver<Bytes>,
        listeners: Arc<ListenerSet>,
    ) where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut sink = FramedWrite::new(writer, codec);

        loop {
            tokio::select! {
                _ = listeners.closed.cancelled() => break,
                item = outbound.recv() => match item {
                    None => break,
                    Some(bytes) => {
                        if let Err(e) = sink.send(bytes).await {
                            tracing::warn!(transport = %name, error = %e, "Stream write failed");
                            break;
                        }
                    }
                },
            }
        }

        listeners.close();
    }
}

impl Transport for StreamTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: &IpcMessage) -> Result<(), TransportError> {
        if self.listeners.closed.is_cancelled() {
            return Err(TransportError::Disconnected(self.name.clone()));
        }

        let bytes =
            serde_json::to_vec(message).map_err(|e| TransportError::Serialization(e.to_string()))?;
        if self.codec.check_size(bytes.len()).is_err() {
            return Err(TransportError::MessageTooLarge {
                size: bytes.len(),
                max: self.codec.max_message_size(),
            });
        }

        self.outbound
            .send(Bytes::from(bytes))
            .map_err(|_| TransportError::Disconnected(self.name.clone()))
    }

    fn listen(&self) -> Listener {
        self.listeners.register()
    }

    fn closed(&self) -> CancellationToken {
        self.listeners.closed.clone()
    }

    fn close(&self) {
        self.listeners.close();
    }
}

// ============================================================================
// Port Transport
// ============================================================================

/// 进程内消息端口
///
/// 消息以值的形式直接投递给对端，不做分帧也不限制大小；任一端关闭则两端同时断开
pub struct PortTransport {
    name: String,
    local: Arc<ListenerSet>,
    peer: Arc<ListenerSet>,
}

impl PortTransport {
    pub fn pair(
        name_a: impl Into<String>,
        name_b: impl Into<String>,
    ) -> (Arc<PortTransport>, Arc<PortTransport>) {
        let closed = CancellationToken::new();
        let set_a = ListenerSet::new(closed.clone());
        let set_b = ListenerSet::new(closed);

        let a = Arc::new(PortTransport {
            name: name_a.into(),
            local: set_a.clone(),
            peer: set_b.clone(),
        });
        let b = Arc::new(PortTransport {
            name: name_b.into(),
            local: set_b,
            peer: set_a,
        });
        (a, b)
    }
}

impl Transport for PortTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: &IpcMessage) -> Result<(), TransportError> {
        if self.local.closed.is_cancelled() {
            return Err(TransportError::Disconnected(self.name.clone()));
        }
        self.peer.dispatch(message.clone());
        Ok(())
    }

    fn listen(&self) -> Listener {
        self.local.register()
    }

    fn closed(&self) -> CancellationToken {
        self.local.closed.clone()
    }

    fn close(&self) {
        self.local.close();
        self.peer.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[tokio::test]
    async fn test_stream_transport_delivers_in_order() {
        let (mut peer, local) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(local);
        let transport = StreamTransport::spawn("test", reader, writer, 1024);
        let mut listener = transport.listen();

        let first = serde_json::to_vec(&IpcMessage::ping("a")).unwrap();
        let second = serde_json::to_vec(&IpcMessage::abort("b")).unwrap();
        let mut bytes = frame(&first);
        bytes.extend_from_slice(&frame(&second));
        peer.write_all(&bytes).await.unwrap();

        assert_eq!(listener.recv().await.unwrap(), IpcMessage::ping("a"));
        assert_eq!(listener.recv().await.unwrap(), IpcMessage::abort("b"));
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_dropped_without_desync() {
        let (mut peer, local) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(local);
        let transport = StreamTransport::spawn("test", reader, writer, 1024);
        let mut listener = transport.listen();

        let good = serde_json::to_vec(&IpcMessage::ping("ok")).unwrap();
        let mut bytes = frame(b"{not json");
        bytes.extend_from_slice(&frame(&good));
        peer.write_all(&bytes).await.unwrap();

        assert_eq!(listener.recv().await.unwrap(), IpcMessage::ping("ok"));
    }

    #[tokio::test]
    async fn test_oversized_inbound_frame_closes_transport() {
        let (mut peer, local) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(local);
        let transport = StreamTransport::spawn("test", reader, writer, 1024);
        let mut listener = transport.listen();

        let mut bytes = (u32::MAX - 8).to_le_bytes().to_vec();
        bytes.extend_from_slice(b"abcd");
        peer.write_all(&bytes).await.unwrap();

        transport.closed().cancelled().await;
        assert!(listener.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_writes_framed_json() {
        let (mut peer, local) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(local);
        let transport = StreamTransport::spawn("test", reader, writer, 1024);

        transport.send(&IpcMessage::pong("x")).unwrap();

        let mut prefix = [0u8; 4];
        peer.read_exact(&mut prefix).await.unwrap();
        let mut payload = vec![0u8; u32::from_le_bytes(prefix) as usize];
        peer.read_exact(&mut payload).await.unwrap();
        let message: IpcMessage = serde_json::from_slice(&payload).unwrap();
        assert_eq!(message, IpcMessage::pong("x"));
    }

    #[tokio::test]
    async fn test_oversized_send_fails_and_writes_nothing() {
        let (mut peer, local) = tokio::io::duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(local);
        let transport = StreamTransport::spawn("test", reader, writer, 64);

        let big = IpcMessage::resolve("x", json!("a".repeat(200)));
        let err = transport.send(&big).unwrap_err();
        assert!(matches!(err, TransportError::MessageTooLarge { max: 64, .. }));

        // 之后的小消息是流上的第一帧
        transport.send(&IpcMessage::pong("y")).unwrap();
        let mut prefix = [0u8; 4];
        peer.read_exact(&mut prefix).await.unwrap();
        let mut payload = vec![0u8; u32::from_le_bytes(prefix) as usize];
        peer.read_exact(&mut payload).await.unwrap();
        let message: IpcMessage = serde_json::from_slice(&payload).unwrap();
        assert_eq!(message, IpcMessage::pong("y"));
    }

    #[tokio::test]
    async fn test_peer_eof_closes_transport() {
        let (peer, local) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(local);
        let transport = StreamTransport::spawn("test", reader, writer, 1024);
        let mut listener = transport.listen();

        drop(peer);

        transport.closed().cancelled().await;
        assert!(listener.recv().await.is_none());
        assert!(matches!(
            transport.send(&IpcMessage::ping("z")),
            Err(TransportError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn test_port_pair_delivers_to_peer_only() {
        let (a, b) = PortTransport::pair("a", "b");
        let mut on_a = a.listen();
        let mut on_b = b.listen();

        a.send(&IpcMessage::ping("1")).unwrap();
        assert_eq!(on_b.recv().await.unwrap(), IpcMessage::ping("1"));

        b.send(&IpcMessage::pong("1")).unwrap();
        assert_eq!(on_a.recv().await.unwrap(), IpcMessage::pong("1"));
    }

    #[tokio::test]
    async fn test_port_close_disconnects_both_ends() {
        let (a, b) = PortTransport::pair("a", "b");
        let mut on_b = b.listen();

        a.close();

        assert!(b.closed().is_cancelled());
        assert!(on_b.recv().await.is_none());
        assert!(b.send(&IpcMessage::ping("1")).is_err());
        assert!(b.listen().recv().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_listener_is_unregistered() {
        let (a, b) = PortTransport::pair("a", "b");
        let listener = b.listen();
        assert_eq!(b.local.listeners.len(), 1);
        drop(listener);
        assert_eq!(b.local.listeners.len(), 0);
        a.send(&IpcMessage::ping("1")).unwrap();
    }
}
