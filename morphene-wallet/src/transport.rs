//! HTTP and WebSocket carriers for JSON-RPC requests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Once},
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::{
    rpc::{JsonRpcRequest, JsonRpcResponse},
    RpcError,
};

/// Something that can deliver one request to one node and bring back the
/// matching response.
#[async_trait]
pub trait Transport: Send + Sync {
    fn url(&self) -> &str;

    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError>;
}

/// Builds the transport for a node URL.
pub trait Connector: Send + Sync {
    fn connect(&self, url: &str) -> Result<Arc<dyn Transport>, RpcError>;
}

/// Picks HTTP(S) or WebSocket by URL scheme.
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    pub timeout: Duration,
}

impl Connector for DefaultConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn Transport>, RpcError> {
        let parsed = Url::parse(url).map_err(|e| RpcError::transport(url, e))?;
        match parsed.scheme() {
            "http" | "https" => Ok(Arc::new(HttpTransport::new(url, self.timeout)?)),
            "ws" | "wss" => Ok(Arc::new(WsTransport::new(url))),
            other => Err(RpcError::transport(url, format!("unsupported scheme {other:?}"))),
        }
    }
}

/// One POST per request.
#[derive(Debug)]
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::transport(url, format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            url: url.to_string(),
            client,
            timeout,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RpcError::Timeout {
                        url: self.url.clone(),
                        after: self.timeout,
                    }
                } else {
                    RpcError::transport(&self.url, e)
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| RpcError::transport(&self.url, e))?;
        // Nodes report JSON-RPC errors with non-2xx codes too; only give up
        // on the body when it is not a response at all.
        match serde_json::from_str::<JsonRpcResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Err(RpcError::transport(&self.url, format!("HTTP error: {status}"))),
            Err(e) => Err(RpcError::transport(&self.url, format!("invalid response: {e}"))),
        }
    }
}

/// Callers waiting for a reply, by request id.
#[derive(Default)]
struct Waiters {
    by_id: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
    /// Set by the reader when the socket goes away
    closed: bool,
}

type Pending = Arc<Mutex<Waiters>>;

/// A live socket: a writer fed through a channel and a reader task that
/// hands each reply to whoever waits on its id.
#[derive(Clone)]
struct WsConnection {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
}

impl WsConnection {
    fn is_open(&self) -> bool {
        !self.outgoing.is_closed() && self.pending.lock().map(|w| !w.closed).unwrap_or(false)
    }
}

/// Removes the waiter when a request finishes or is abandoned mid-flight.
struct PendingGuard {
    pending: Pending,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.by_id.remove(&self.id);
        }
    }
}

/// wss:// goes through rustls 0.23, which needs a process-wide crypto
/// provider before the first handshake.
fn install_crypto_provider() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        // Err means another provider is already installed, which is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// A persistent WebSocket shared by concurrent calls.
///
/// Replies may arrive in any order; they are matched to requests by id.
/// After the socket drops, the next call reconnects.
pub struct WsTransport {
    url: String,
    connection: Mutex<Option<WsConnection>>,
    /// Held while dialing so concurrent callers share one new socket
    connecting: tokio::sync::Mutex<()>,
}

impl WsTransport {
    pub fn new(url: &str) -> Self {
        install_crypto_provider();
        Self {
            url: url.to_string(),
            connection: Mutex::new(None),
            connecting: tokio::sync::Mutex::new(()),
        }
    }

    fn live(&self) -> Option<WsConnection> {
        let connection = self.connection.lock().ok()?;
        connection.as_ref().filter(|c| c.is_open()).cloned()
    }

    /// The current socket, dialing a new one if it is gone. The dial
    /// happens outside `connection`, so calls on a live socket never wait
    /// behind it.
    async fn connection(&self) -> Result<WsConnection, RpcError> {
        if let Some(live) = self.live() {
            return Ok(live);
        }
        let _dialing = self.connecting.lock().await;
        if let Some(live) = self.live() {
            return Ok(live);
        }
        let fresh = self.open().await?;
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| RpcError::transport(&self.url, "connection slot poisoned"))?;
        *connection = Some(fresh.clone());
        Ok(fresh)
    }

    async fn open(&self) -> Result<WsConnection, RpcError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| RpcError::transport(&self.url, e))?;
        debug!("Connected to {}", self.url);

        let (mut sink, mut source) = stream.split();
        let (outgoing, mut queue) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::new(Mutex::new(Waiters::default()));

        let url = self.url.clone();
        let writer_url = url.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = queue.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!("Write to {} failed: {}", writer_url, e);
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("Connection to {} dropped: {}", url, e);
                        break;
                    }
                };
                let response: JsonRpcResponse = match serde_json::from_str(&text) {
                    Ok(response) => response,
                    Err(e) => {
                        warn!("Unparseable message from {}: {}", url, e);
                        continue;
                    }
                };
                let waiter = response
                    .id
                    .and_then(|id| reader_pending.lock().ok().and_then(|mut p| p.by_id.remove(&id)));
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(response);
                    }
                    None => debug!("Dropping reply from {} with no waiter: id {:?}", url, response.id),
                }
            }
            // Fail every waiter and stop the writer so the next call reconnects.
            writer.abort();
            if let Ok(mut pending) = reader_pending.lock() {
                pending.closed = true;
                pending.by_id.clear();
            }
        });

        Ok(WsConnection { outgoing, pending })
    }
}

#[async_trait]
impl Transport for WsTransport {
    fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        let body = serde_json::to_string(request).map_err(|e| RpcError::transport(&self.url, e))?;

        let live = self.connection().await?;
        let (tx, reply) = oneshot::channel();
        {
            let mut waiters = live
                .pending
                .lock()
                .map_err(|_| RpcError::transport(&self.url, "waiter table poisoned"))?;
            if waiters.closed {
                return Err(RpcError::transport(&self.url, "connection closed"));
            }
            waiters.by_id.insert(request.id, tx);
        }
        let _guard = PendingGuard {
            pending: live.pending.clone(),
            id: request.id,
        };
        if live.outgoing.send(Message::Text(body)).is_err() {
            return Err(RpcError::transport(&self.url, "connection closed"));
        }

        reply
            .await
            .map_err(|_| RpcError::transport(&self.url, "connection closed before reply"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Accepts one socket, reads `batch` requests, then answers them in
    /// reverse order.
    async fn reversing_server(batch: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            let mut requests = Vec::new();
            while requests.len() < batch {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        requests.push(serde_json::from_str::<serde_json::Value>(&text).unwrap())
                    }
                    Some(Ok(_)) => continue,
                    _ => return,
                }
            }
            for request in requests.into_iter().rev() {
                let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": request["params"]});
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_ws_replies_matched_by_id() {
        let url = reversing_server(3).await;
        let transport = WsTransport::new(&url);

        let requests: Vec<JsonRpcRequest> = (1..=3)
            .map(|id| JsonRpcRequest::new(id, "echo", json!([id * 10])))
            .collect();
        let (a, b, c) = tokio::join!(
            transport.send(&requests[0]),
            transport.send(&requests[1]),
            transport.send(&requests[2]),
        );
        assert_eq!(a.unwrap().result, Some(json!([10])));
        assert_eq!(b.unwrap().result, Some(json!([20])));
        assert_eq!(c.unwrap().result, Some(json!([30])));
    }

    #[tokio::test]
    async fn test_ws_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = WsTransport::new(&format!("ws://{addr}"));
        let err = transport
            .send(&JsonRpcRequest::new(1, "echo", json!([])))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_ws_reconnects_after_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // First socket: close without answering. Second: answer normally.
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            let _ = ws.next().await;
            let _ = ws.close(None).await;
            drop(ws);

            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let request: serde_json::Value = serde_json::from_str(&text).unwrap();
                let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": "second"});
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
        });

        let transport = WsTransport::new(&format!("ws://{addr}"));
        let first = transport.send(&JsonRpcRequest::new(1, "m", json!([]))).await;
        assert!(matches!(first, Err(RpcError::Transport { .. })));

        // The reader task may need a moment to notice the close.
        let mut second = Err(RpcError::NoHealthyNodes);
        for id in 2..20 {
            second = transport.send(&JsonRpcRequest::new(id, "m", json!([]))).await;
            if second.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(second.unwrap().result, Some(json!("second")));
    }

    #[tokio::test]
    async fn test_ws_concurrent_first_calls_share_one_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut ws = accept_async(socket).await.unwrap();
                    while let Some(Ok(Message::Text(text))) = ws.next().await {
                        let request: serde_json::Value = serde_json::from_str(&text).unwrap();
                        let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": request["id"]});
                        if ws.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        let transport = Arc::new(WsTransport::new(&format!("ws://{addr}")));
        let calls: Vec<_> = (1..=5u64)
            .map(|id| {
                let transport = transport.clone();
                tokio::spawn(async move { transport.send(&JsonRpcRequest::new(id, "m", json!([]))).await })
            })
            .collect();
        for (id, call) in (1..=5u64).zip(calls) {
            assert_eq!(call.await.unwrap().unwrap().result, Some(json!(id)));
        }
        assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    /// Accepts TCP connections and answers with plaintext, so any TLS
    /// handshake against it fails.
    async fn plaintext_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                use tokio::io::AsyncWriteExt;
                let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_wss_handshake_failure_is_transport_error() {
        let addr = plaintext_server().await;
        let transport = WsTransport::new(&format!("wss://{addr}"));
        let err = transport
            .send(&JsonRpcRequest::new(1, "echo", json!([])))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_https_handshake_failure_is_transport_error() {
        let addr = plaintext_server().await;
        let transport = HttpTransport::new(&format!("https://{addr}"), Duration::from_secs(2)).unwrap();
        let err = transport
            .send(&JsonRpcRequest::new(1, "echo", json!([])))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Transport { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_connector_picks_by_scheme() {
        let connector = DefaultConnector {
            timeout: Duration::from_secs(1),
        };
        assert_eq!(connector.connect("wss://node.example").unwrap().url(), "wss://node.example");
        assert_eq!(connector.connect("https://node.example").unwrap().url(), "https://node.example");
        assert!(connector.connect("ftp://node.example").is_err());
        assert!(connector.connect("nonsense").is_err());
    }
}
