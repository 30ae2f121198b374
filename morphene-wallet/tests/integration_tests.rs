//! Integration tests for morphene-wallet
//!
//! These exercise the crate the way a front-end would:
//! - Wallet lifecycle against real files
//! - Failover between nodes through the public RPC client
//! - Broadcast pre-flight checks
//! - A local WebSocket node answering out of order

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use assert_matches::assert_matches;
use async_trait::async_trait;
use morphene_wallet::{
    config::RpcConfig,
    rpc::{JsonRpcRequest, JsonRpcResponse},
    storage::KdfAlgorithm,
    BroadcastError, Broadcaster, Connector, KdfParams, NodePool, RejectReason, RpcCall, RpcClient, RpcError,
    SignedMessage, Transport, WalletError, WalletStore,
};
use mph_crypto_keys::{KeyMaterial, PrivateKey, Role, DEFAULT_PREFIX};
use mph_transaction_core::{operations::Transfer, ChainParams, RefBlock, TimePointSec, TransactionSigner};
use serde_json::{json, Value};
use tempfile::TempDir;

const TEST_PASSWORD: &str = "correct-horse";

const TEST_KDF: KdfParams = KdfParams {
    algorithm: KdfAlgorithm::Argon2id,
    memory_kib: 256,
    iterations: 1,
    parallelism: 1,
};

fn test_key(role: Role) -> KeyMaterial {
    KeyMaterial::from_private(role, PrivateKey::from_bytes(&[0x11; 32]).unwrap())
}

/// A node that fails the first `failures` requests, then answers `answer`.
struct FlakyNode {
    url: String,
    failures: AtomicU32,
    calls: AtomicU32,
    answer: Value,
}

impl FlakyNode {
    fn new(url: &str, failures: u32, answer: Value) -> Arc<Self> {
        Arc::new(Self {
            url: url.to_string(),
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            answer,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FlakyNode {
    fn url(&self) -> &str {
        &self.url
    }

    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RpcError::Transport {
                url: self.url.clone(),
                message: "connection reset".to_string(),
            });
        }
        Ok(JsonRpcResponse {
            id: Some(request.id),
            result: Some(self.answer.clone()),
            error: None,
        })
    }
}

struct FlakyConnector(HashMap<String, Arc<FlakyNode>>);

impl Connector for FlakyConnector {
    fn connect(&self, url: &str) -> Result<Arc<dyn Transport>, RpcError> {
        match self.0.get(url) {
            Some(node) => Ok(node.clone()),
            None => Err(RpcError::Transport {
                url: url.to_string(),
                message: "unknown node".to_string(),
            }),
        }
    }
}

fn rpc_settings(max_retries: u32) -> RpcConfig {
    RpcConfig {
        timeout_secs: 2,
        max_retries,
        backoff_base_ms: 1,
        backoff_max_ms: 5,
    }
}

fn flaky_client(nodes: &[Arc<FlakyNode>], max_retries: u32) -> RpcClient {
    let pool = Arc::new(NodePool::new(
        nodes.iter().map(|n| n.url.clone()),
        3,
        Duration::from_secs(60),
    ));
    let connector = FlakyConnector(nodes.iter().map(|n| (n.url.clone(), n.clone())).collect());
    RpcClient::with_connector(pool, rpc_settings(max_retries), Arc::new(connector))
}

// ============================================================================
// Wallet Lifecycle Tests
// ============================================================================

mod wallet_lifecycle {
    use super::*;

    #[test]
    fn test_unlock_returns_stored_roles() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wallet.json");

        let mut store = WalletStore::create(&path, TEST_PASSWORD, TEST_KDF).unwrap();
        store.add_key(test_key(Role::Active)).unwrap();
        store.lock();

        assert_eq!(store.unlock(TEST_PASSWORD).unwrap(), BTreeSet::from([Role::Active]));
        store.lock();
        assert_matches!(store.unlock("battery-staple"), Err(WalletError::WrongPassword));
        assert!(store.is_locked());
    }

    #[test]
    fn test_full_wallet_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wallet.json");

        // 1. Create and fill
        let mut store = WalletStore::create(&path, TEST_PASSWORD, TEST_KDF).unwrap();
        let wif = test_key(Role::Active).private_key().unwrap().to_wif();
        store.add_key(KeyMaterial::from_wif(Role::Active, &wif).unwrap()).unwrap();
        store.add_key(test_key(Role::Posting)).unwrap();
        drop(store);

        // 2. Reopen from disk
        let mut store = WalletStore::open(&path).unwrap();
        assert_matches!(store.get_key(Role::Active), Err(WalletError::Locked));
        store.unlock(TEST_PASSWORD).unwrap();
        assert_eq!(store.get_key(Role::Active).unwrap(), &test_key(Role::Active));

        // 3. Remove and change the password
        store.remove_key(Role::Posting).unwrap();
        store.change_password(TEST_PASSWORD, "new-password").unwrap();
        drop(store);

        // 4. Only the new password opens what is left
        let mut store = WalletStore::open(&path).unwrap();
        assert_matches!(store.unlock(TEST_PASSWORD), Err(WalletError::WrongPassword));
        assert_eq!(store.unlock("new-password").unwrap(), BTreeSet::from([Role::Active]));
    }

    #[test]
    fn test_tampered_file_is_corrupted() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wallet.json");
        let mut store = WalletStore::create(&path, TEST_PASSWORD, TEST_KDF).unwrap();
        store.add_key(test_key(Role::Memo)).unwrap();
        drop(store);

        let mut file: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let ciphertext = file["ciphertext"].as_str().unwrap().to_string();
        let flipped = if ciphertext.starts_with('0') { "1" } else { "0" };
        file["ciphertext"] = Value::String(format!("{flipped}{}", &ciphertext[1..]));
        std::fs::write(&path, file.to_string()).unwrap();

        let mut store = WalletStore::open(&path).unwrap();
        assert_matches!(store.unlock(TEST_PASSWORD), Err(WalletError::Corrupted(_)));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wallet.json");
        WalletStore::create(&path, TEST_PASSWORD, TEST_KDF).unwrap();

        let mut file: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        file["version"] = json!(99);
        std::fs::write(&path, file.to_string()).unwrap();

        assert_matches!(
            WalletStore::open(&path),
            Err(WalletError::UnsupportedVersion { found: 99, .. })
        );
    }
}

// ============================================================================
// Failover Tests
// ============================================================================

mod failover {
    use super::*;

    #[tokio::test]
    async fn test_routes_to_healthy_node_within_retry_bound() {
        let a = FlakyNode::new("https://a.example", 2, json!("from a"));
        let b = FlakyNode::new("https://b.example", 2, json!("from b"));
        let c = FlakyNode::new("https://c.example", 0, json!("from c"));
        let max_retries = 3;
        let client = flaky_client(&[a.clone(), b.clone(), c.clone()], max_retries);

        let result = client.call(RpcCall::condenser("get_config", vec![])).await.unwrap();
        assert_eq!(result, json!("from c"));
        assert!(a.calls() + b.calls() + c.calls() <= max_retries + 1);

        // A and B are now behind C, so the next call goes straight there.
        let result = client.call(RpcCall::condenser("get_config", vec![])).await.unwrap();
        assert_eq!(result, json!("from c"));
        assert_eq!(c.calls(), 2);
    }

    #[tokio::test]
    async fn test_tight_retry_bound_exhausts_then_recovers() {
        let a = FlakyNode::new("https://a.example", 2, json!("from a"));
        let b = FlakyNode::new("https://b.example", 2, json!("from b"));
        let c = FlakyNode::new("https://c.example", 0, json!("from c"));
        let client = flaky_client(&[a.clone(), b.clone(), c.clone()], 1);

        // Two attempts allowed: A then B, both down.
        let err = client.call(RpcCall::condenser("get_config", vec![])).await.unwrap_err();
        assert_matches!(err, RpcError::Transport { ref url, .. } if url == "https://b.example");
        assert_eq!(c.calls(), 0);

        let result = client.call(RpcCall::condenser("get_config", vec![])).await.unwrap();
        assert_eq!(result, json!("from c"));
        assert_eq!(a.calls() + b.calls() + c.calls(), 3);
    }

    #[tokio::test]
    async fn test_all_nodes_demoted() {
        let a = FlakyNode::new("https://a.example", u32::MAX, Value::Null);
        let client = flaky_client(&[a.clone()], 10);

        // Threshold 3: after three failures the only node is cooling down.
        let err = client.call(RpcCall::condenser("get_config", vec![])).await.unwrap_err();
        assert_matches!(err, RpcError::NoHealthyNodes);
        assert_eq!(a.calls(), 3);
    }
}

// ============================================================================
// Broadcast Tests
// ============================================================================

mod broadcast {
    use super::*;

    fn signed_transfer(expiration: TimePointSec) -> mph_transaction_core::Transaction {
        let signer = TransactionSigner::new(ChainParams::default());
        let transfer = Transfer {
            from: "alice".into(),
            to: "bob".into(),
            amount: signer.chain().core_asset(1_000).unwrap(),
            memo: "rent".into(),
        };
        let tx = signer
            .build(vec![transfer.into()], expiration, RefBlock { num: 1, prefix: 2 })
            .unwrap();
        signer.sign(tx, &test_key(Role::Active)).unwrap()
    }

    #[tokio::test]
    async fn test_expired_transaction_never_reaches_a_node() {
        let node = FlakyNode::new("https://a.example", 0, Value::Null);
        let broadcaster = Broadcaster::new(Arc::new(flaky_client(&[node.clone()], 3)));

        let tx = signed_transfer(TimePointSec::from_unix(1_500_000_000));
        let err = broadcaster.broadcast(&tx).await.unwrap_err();
        assert_matches!(err, BroadcastError::Rejected(RejectReason::Expired));
        assert_eq!(node.calls(), 0);
    }

    #[tokio::test]
    async fn test_async_broadcast_returns_id() {
        let node = FlakyNode::new("https://a.example", 1, Value::Null);
        let broadcaster = Broadcaster::new(Arc::new(flaky_client(&[node.clone()], 3)));

        let tx = signed_transfer(TimePointSec::now().saturating_add(60));
        let receipt = broadcaster.broadcast(&tx).await.unwrap();
        assert_eq!(receipt.tx_id, tx.id());
        assert_eq!(receipt.block_num, None);
        // One transport failure, then accepted.
        assert_eq!(node.calls(), 2);
    }
}

// ============================================================================
// Signed Message Tests
// ============================================================================

mod signed_message {
    use super::*;
    use morphene_wallet::MessageMeta;

    #[test]
    fn test_message_signed_with_wallet_memo_key() {
        let mut store = WalletStore::in_memory(TEST_PASSWORD, TEST_KDF).unwrap();
        store.add_key(test_key(Role::Memo)).unwrap();

        let memo = store.get_key(Role::Memo).unwrap();
        let meta = MessageMeta {
            account: "alice".to_string(),
            memokey: *memo.public_key(),
            block: 42,
            timestamp: TimePointSec::from_unix(1_700_000_000).to_string(),
        };
        let text = SignedMessage::sign("I am alice", meta.clone(), memo, DEFAULT_PREFIX).unwrap();
        let verified = SignedMessage::verify(&text, DEFAULT_PREFIX).unwrap();
        assert_eq!(verified.meta, meta);
        assert_eq!(verified.message, "I am alice");
    }
}

// ============================================================================
// WebSocket Tests
// ============================================================================

mod websocket {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    /// Reads `batch` requests on one socket, then answers newest first.
    async fn out_of_order_node(batch: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(socket).await.unwrap();
            let mut pending = Vec::new();
            while pending.len() < batch {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => pending.push(serde_json::from_str::<Value>(&text).unwrap()),
                    Some(Ok(_)) => continue,
                    _ => return,
                }
            }
            while let Some(request) = pending.pop() {
                let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": request["params"][0]});
                ws.send(Message::Text(reply.to_string())).await.unwrap();
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_socket() {
        let url = out_of_order_node(3).await;
        let pool = Arc::new(NodePool::new([url], 3, Duration::from_secs(60)));
        let client = RpcClient::new(pool, rpc_settings(0));

        let (first, second, third) = tokio::join!(
            client.call(RpcCall::condenser("get_block", vec![json!(1)])),
            client.call(RpcCall::condenser("get_block", vec![json!(2)])),
            client.call(RpcCall::condenser("get_block", vec![json!(3)])),
        );
        assert_eq!(first.unwrap(), json!(1));
        assert_eq!(second.unwrap(), json!(2));
        assert_eq!(third.unwrap(), json!(3));
    }
}
