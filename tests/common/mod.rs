//! In-process fake bridge and HTTP CONNECT proxy for integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use eventbus_client::{
    ClientOptions, Connector, Envelope, EnvelopeType, FrameStream, JsonCodec, Codec,
    PhaseReporter, ReplyAddress, WebSocketConnector,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, copy_bidirectional};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// How long tests wait for something the bridge should observe.
pub const WAIT: Duration = Duration::from_secs(5);

/// Installs a test subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind((IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

/// Body that makes `Envelope::send(address, body)` encode to exactly `total` bytes.
pub fn body_of_encoded_size(address: &str, total: usize) -> String {
    let overhead = JsonCodec
        .encode(&Envelope::send(address, json!("")))
        .expect("encode")
        .len();
    "x".repeat(total - overhead)
}

/// Body that makes a request envelope to `address`, reply address included,
/// encode to exactly `total` bytes.
pub fn request_body_of_encoded_size(address: &str, total: usize) -> String {
    let overhead = JsonCodec
        .encode(&Envelope::send(address, json!("")).with_reply_address(ReplyAddress::generate()))
        .expect("encode")
        .len();
    "x".repeat(total - overhead)
}

// ============================================================================
// FakeBridge
// ============================================================================

/// Frame the bridge received.
#[derive(Debug, Clone)]
pub struct Received {
    pub envelope: Envelope,
    pub size: usize,
}

#[derive(Debug, Clone)]
enum Outbound {
    Frame(String),
    Kill,
}

/// Minimal bridge.
///
/// | Inbound | Answer |
/// |---------|--------|
/// | `ping` | `pong` |
/// | `send` to `echo` with reply address | `rec` with the same body and headers |
/// | `send` to `fail` with reply address | `err` (code 500) |
/// | `send`/`publish` to an address the session registered | `rec` to that address |
/// | anything else | nothing |
pub struct FakeBridge {
    addr: SocketAddr,
    received: mpsc::UnboundedReceiver<Received>,
    outbound: broadcast::Sender<Outbound>,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeBridge {
    pub async fn start() -> Self {
        let listener = TcpListener::bind((IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .expect("bind bridge");
        let addr = listener.local_addr().expect("addr");
        let (received_tx, received) = mpsc::unbounded_channel();
        let (outbound, _) = broadcast::channel(64);
        let accepted = Arc::new(AtomicUsize::new(0));

        let task = {
            let outbound = outbound.clone();
            let accepted = Arc::clone(&accepted);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, received_tx.clone(), outbound.subscribe()));
                }
            })
        };

        Self {
            addr,
            received,
            outbound,
            accepted,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Client options pointing at this bridge, keepalive off.
    pub fn options(&self) -> ClientOptions {
        ClientOptions::new()
            .with_host("127.0.0.1")
            .with_port(self.port())
            .with_ping_interval(Duration::ZERO)
    }

    /// Number of TCP connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Next received frame, skipping keepalives.
    pub async fn next(&mut self) -> Received {
        loop {
            let received = timeout(WAIT, self.received.recv())
                .await
                .expect("bridge frame in time")
                .expect("bridge running");
            if received.envelope.kind != EnvelopeType::Ping {
                return received;
            }
        }
    }

    /// Next received frame of `kind`.
    pub async fn next_of(&mut self, kind: EnvelopeType) -> Received {
        loop {
            let received = self.next().await;
            if received.envelope.kind == kind {
                return received;
            }
        }
    }

    /// Frame received without waiting, if any.
    pub fn try_next(&mut self) -> Option<Received> {
        self.received.try_recv().ok()
    }

    /// Sends `value` to every open session.
    pub fn push(&self, value: Value) {
        let _ = self.outbound.send(Outbound::Frame(value.to_string()));
    }

    /// Drops every open session without a close handshake.
    pub fn kill_connections(&self) {
        let _ = self.outbound.send(Outbound::Kill);
    }
}

impl Drop for FakeBridge {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    received: mpsc::UnboundedSender<Received>,
    mut outbound: broadcast::Receiver<Outbound>,
) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    let mut registered = FxHashSet::default();

    loop {
        tokio::select! {
            frame = ws.next() => {
                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(_)) => continue,
                    _ => break,
                };
                let Ok(envelope) = serde_json::from_str::<Envelope>(text.as_str()) else {
                    continue;
                };

                match envelope.kind {
                    EnvelopeType::Register => {
                        registered.insert(envelope.address.clone());
                    }
                    EnvelopeType::Unregister => {
                        registered.remove(&envelope.address);
                    }
                    _ => {}
                }

                if let Some(answer) = answer(&envelope, &registered)
                    && ws.send(WsMessage::Text(answer.to_string().into())).await.is_err()
                {
                    break;
                }

                let _ = received.send(Received { size: text.len(), envelope });
            }

            outbound = outbound.recv() => match outbound {
                Ok(Outbound::Frame(text)) => {
                    if ws.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(Outbound::Kill) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            }
        }
    }
}

fn answer(envelope: &Envelope, registered: &FxHashSet<String>) -> Option<Value> {
    match envelope.kind {
        EnvelopeType::Ping => Some(json!({"type": "pong"})),
        EnvelopeType::Send if envelope.reply_address.is_some() => {
            let reply_address = envelope.reply_address.as_ref()?.as_str();
            match envelope.address.as_str() {
                "echo" => Some(json!({
                    "type": "rec",
                    "address": reply_address,
                    "body": envelope.body,
                    "headers": envelope.headers,
                })),
                "fail" => Some(json!({
                    "type": "err",
                    "address": reply_address,
                    "failureCode": 500,
                    "failureType": "RECIPIENT_FAILURE",
                    "message": "failed on purpose",
                })),
                _ => None,
            }
        }
        EnvelopeType::Send | EnvelopeType::Publish if registered.contains(&envelope.address) => {
            Some(json!({
                "type": "rec",
                "address": envelope.address,
                "body": envelope.body,
            }))
        }
        _ => None,
    }
}

// ============================================================================
// FakeProxy
// ============================================================================

/// HTTP CONNECT proxy that records the requested authorities.
pub struct FakeProxy {
    addr: SocketAddr,
    targets: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeProxy {
    pub async fn start() -> Self {
        let listener = TcpListener::bind((IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .expect("bind proxy");
        let addr = listener.local_addr().expect("addr");
        let targets = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let targets = Arc::clone(&targets);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(tunnel(stream, Arc::clone(&targets)));
                }
            })
        };

        Self {
            addr,
            targets,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Authorities requested so far.
    pub fn targets(&self) -> Vec<String> {
        self.targets.lock().clone()
    }
}

impl Drop for FakeProxy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn tunnel(mut client: TcpStream, targets: Arc<Mutex<Vec<String>>>) {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        match client.read_u8().await {
            Ok(byte) => head.push(byte),
            Err(_) => return,
        }
    }

    let head = String::from_utf8_lossy(&head);
    let Some(authority) = head
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("CONNECT "))
        .and_then(|rest| rest.split_whitespace().next())
        .map(str::to_string)
    else {
        let _ = client.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        return;
    };
    targets.lock().push(authority.clone());

    let Ok(mut upstream) = TcpStream::connect(authority.as_str()).await else {
        let _ = client.write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n").await;
        return;
    };

    if client
        .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
        .await
        .is_err()
    {
        return;
    }
    let _ = copy_bidirectional(&mut client, &mut upstream).await;
}

// ============================================================================
// CountingConnector
// ============================================================================

/// [`WebSocketConnector`] that counts attempts.
#[derive(Clone, Default)]
pub struct CountingConnector {
    attempts: Arc<AtomicUsize>,
}

impl CountingConnector {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for CountingConnector {
    async fn connect(
        &self,
        options: &ClientOptions,
        report: PhaseReporter<'_>,
    ) -> eventbus_client::Result<FrameStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        WebSocketConnector.connect(options, report).await
    }
}
