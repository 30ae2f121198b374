//! Resilient JSON-RPC client
//!
//! Sends each call to the best node in the [`NodePool`] and, on a
//! connection-level failure, moves on to the next node with backoff:
//! - transport errors and timeouts are retried up to `max_retries` times
//! - a server-reported error is the chain's answer and is returned at once
//! - request ids are unique per client, so replies can be matched by id

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use mph_crypto_keys::PublicKey;
use mph_transaction_core::{ChainJson, ChainParams, RefBlock, TimePointSec, Transaction};
use rand::Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, trace, warn};

use crate::{
    config::RpcConfig,
    node_pool::{NodeEndpoint, NodePool},
    transport::{Connector, DefaultConnector, Transport},
    RpcError,
};

/// A method and its parameters, before an id is assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub method: String,
    pub params: Value,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Shape a call to `api.method` the way appbase nodes accept it.
    ///
    /// A leading object argument is sent as named parameters of
    /// `api.method`, no arguments as `api.method` with `[]`, and anything
    /// else through the generic `call` method as `[api, method, args]`.
    /// An empty `api` means `database_api`; `"database"` and
    /// `"database_api"` name the same api.
    pub fn api_call(api: &str, method: &str, mut args: Vec<Value>) -> Self {
        let api = api_name(api);
        if args.first().is_some_and(Value::is_object) {
            return Self::new(format!("{api}.{method}"), args.swap_remove(0));
        }
        if args.is_empty() {
            Self::new(format!("{api}.{method}"), json!([]))
        } else {
            Self::new("call", json!([api, method, args]))
        }
    }

    /// Like [`RpcCall::api_call`], but a leading list of objects becomes
    /// one `api.method` call per object, in order.
    pub fn api_calls(api: &str, method: &str, args: Vec<Value>) -> Vec<Self> {
        match args.first() {
            Some(Value::Array(batch)) if batch.first().is_some_and(Value::is_object) => {
                let api = api_name(api);
                batch
                    .iter()
                    .map(|params| Self::new(format!("{api}.{method}"), params.clone()))
                    .collect()
            }
            _ => vec![Self::api_call(api, method, args)],
        }
    }

    /// A positional call to `condenser_api.method`.
    pub fn condenser(method: &str, args: Vec<Value>) -> Self {
        Self::new(format!("condenser_api.{method}"), Value::Array(args))
    }
}

fn api_name(api: &str) -> String {
    match api.trim_end_matches("_api") {
        "" => "database_api".to_string(),
        name => format!("{name}_api"),
    }
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorBody>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// The result, or the server's error. A missing result reads as `null`.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Exponential backoff with up to 10% jitter, capped at `max_ms`.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let capped_delay = base_ms.saturating_mul(exponential_base).min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Where one call stands.
#[derive(Debug)]
enum CallState {
    Idle,
    AwaitingResponse { attempt: u32 },
    Retrying { attempt: u32, error: RpcError },
    /// A node answered, with a result or an error of its own.
    Completed(Result<Value, RpcError>),
    Exhausted(RpcError),
}

/// Fields of `get_dynamic_global_properties` the client relies on.
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicGlobalProperties {
    pub head_block_number: u32,
    pub head_block_id: String,
    pub time: String,
    #[serde(default)]
    pub last_irreversible_block_num: u32,
}

impl DynamicGlobalProperties {
    pub fn head_time(&self) -> Result<TimePointSec, RpcError> {
        self.time
            .parse()
            .map_err(|e| RpcError::decode("get_dynamic_global_properties", e))
    }

    pub fn reference_block(&self) -> Result<RefBlock, RpcError> {
        RefBlock::from_head(self.head_block_number, &self.head_block_id)
            .map_err(|e| RpcError::decode("get_dynamic_global_properties", e))
    }
}

/// Fields of `get_version`.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeVersion {
    pub blockchain_version: String,
    #[serde(default)]
    pub steem_revision: Option<String>,
    #[serde(default)]
    pub chain_id: Option<String>,
}

/// JSON-RPC client that fails over between the nodes of a pool.
pub struct RpcClient {
    pool: Arc<NodePool>,
    connector: Arc<dyn Connector>,
    transports: Mutex<HashMap<String, Arc<dyn Transport>>>,
    next_id: AtomicU64,
    settings: RpcConfig,
    chain: ChainParams,
}

impl RpcClient {
    pub fn new(pool: Arc<NodePool>, settings: RpcConfig) -> Self {
        let connector = Arc::new(DefaultConnector {
            timeout: settings.timeout(),
        });
        Self::with_connector(pool, settings, connector)
    }

    pub fn with_connector(pool: Arc<NodePool>, settings: RpcConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            pool,
            connector,
            transports: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            settings,
            chain: ChainParams::default(),
        }
    }

    /// Network the typed helpers encode for and check against.
    pub fn with_chain(mut self, chain: ChainParams) -> Self {
        self.chain = chain;
        self
    }

    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    pub fn chain(&self) -> &ChainParams {
        &self.chain
    }

    fn transport(&self, url: &str) -> Result<Arc<dyn Transport>, RpcError> {
        let mut transports = self
            .transports
            .lock()
            .map_err(|_| RpcError::transport(url, "transport cache poisoned"))?;
        if let Some(transport) = transports.get(url) {
            return Ok(transport.clone());
        }
        let transport = self.connector.connect(url)?;
        transports.insert(url.to_string(), transport.clone());
        Ok(transport)
    }

    /// One attempt against one node.
    async fn attempt(&self, endpoint: &NodeEndpoint, request: &JsonRpcRequest) -> Result<JsonRpcResponse, RpcError> {
        let transport = self.transport(endpoint.url())?;
        let timeout = self.settings.timeout();
        let start = Instant::now();
        let response = tokio::time::timeout(timeout, transport.send(request))
            .await
            .map_err(|_| RpcError::Timeout {
                url: endpoint.url().to_string(),
                after: timeout,
            })??;

        if response.id.is_some_and(|id| id != request.id) {
            return Err(RpcError::transport(
                endpoint.url(),
                format!("reply id {:?} does not match request id {}", response.id, request.id),
            ));
        }
        self.pool.report_success(endpoint, start.elapsed());
        Ok(response)
    }

    /// Issue `call`, failing over between nodes on connection errors.
    pub async fn call(&self, call: RpcCall) -> Result<Value, RpcError> {
        let request = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), call.method, call.params);
        let mut tried = HashSet::new();
        let mut state = CallState::Idle;

        loop {
            trace!("Request {} {}: {:?}", request.id, request.method, state);
            state = match state {
                CallState::Idle => CallState::AwaitingResponse { attempt: 0 },

                CallState::AwaitingResponse { attempt } => match self.pool.select_excluding(&tried) {
                    Err(e) => CallState::Exhausted(e),
                    Ok(endpoint) => {
                        tried.insert(endpoint.url().to_string());
                        debug!(
                            "Request {} {} -> {} (attempt {})",
                            request.id,
                            request.method,
                            endpoint.url(),
                            attempt + 1
                        );

                        match self.attempt(&endpoint, &request).await {
                            Ok(response) => CallState::Completed(response.into_result()),
                            Err(error) if error.is_retryable() => {
                                self.pool.report_failure(&endpoint);
                                warn!("Node {} failed: {}", endpoint.url(), error);
                                if attempt < self.settings.max_retries {
                                    CallState::Retrying { attempt, error }
                                } else {
                                    CallState::Exhausted(error)
                                }
                            }
                            Err(error) => CallState::Completed(Err(error)),
                        }
                    }
                },

                CallState::Retrying { attempt, error } => {
                    let delay = backoff_delay(attempt + 1, self.settings.backoff_base_ms, self.settings.backoff_max_ms);
                    debug!("Retrying request {} in {:?} after: {}", request.id, delay, error);
                    tokio::time::sleep(delay).await;
                    CallState::AwaitingResponse { attempt: attempt + 1 }
                }

                CallState::Completed(result) => return result,

                CallState::Exhausted(error) => {
                    warn!(
                        "Request {} {} failed on {} node(s): {}",
                        request.id,
                        request.method,
                        tried.len(),
                        error
                    );
                    return Err(error);
                }
            };
        }
    }

    /// Issue `calls` in order, stopping at the first failure.
    pub async fn call_all(&self, calls: Vec<RpcCall>) -> Result<Vec<Value>, RpcError> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.call(call).await?);
        }
        Ok(results)
    }

    /// [`Self::call`] with the result deserialized.
    pub async fn call_as<T: DeserializeOwned>(&self, call: RpcCall) -> Result<T, RpcError> {
        let method = call.method.clone();
        let value = self.call(call).await?;
        serde_json::from_value(value).map_err(|e| RpcError::decode(&method, e))
    }

    pub async fn get_dynamic_global_properties(&self) -> Result<DynamicGlobalProperties, RpcError> {
        self.call_as(RpcCall::condenser("get_dynamic_global_properties", vec![]))
            .await
    }

    /// Reference the current head block.
    pub async fn reference_block(&self) -> Result<RefBlock, RpcError> {
        self.get_dynamic_global_properties().await?.reference_block()
    }

    pub async fn get_version(&self) -> Result<NodeVersion, RpcError> {
        self.call_as(RpcCall::condenser("get_version", vec![])).await
    }

    /// Make sure the node serves the chain we sign for.
    pub async fn verify_chain_id(&self) -> Result<(), RpcError> {
        let expected = self.chain.chain_id.to_string();
        match self.get_version().await?.chain_id {
            Some(actual) if actual.eq_ignore_ascii_case(&expected) => Ok(()),
            Some(actual) => Err(RpcError::ChainMismatch { expected, actual }),
            None => {
                debug!("Node does not report a chain id; skipping check");
                Ok(())
            }
        }
    }

    fn tx_json(&self, tx: &Transaction) -> Value {
        tx.to_chain_json(&self.chain.address_prefix)
    }

    fn parse_keys(&self, method: &str, value: Value) -> Result<BTreeSet<PublicKey>, RpcError> {
        let keys: Vec<String> = serde_json::from_value(value).map_err(|e| RpcError::decode(method, e))?;
        keys.iter()
            .map(|key| {
                PublicKey::from_str_with_prefix(key, &self.chain.address_prefix).map_err(|e| RpcError::decode(method, e))
            })
            .collect()
    }

    /// The node's serialization of `tx`, for comparing against our own.
    pub async fn get_transaction_hex(&self, tx: &Transaction) -> Result<String, RpcError> {
        self.call_as(RpcCall::condenser("get_transaction_hex", vec![self.tx_json(tx)]))
            .await
    }

    /// Every key that could sign `tx` given the accounts it touches.
    pub async fn get_potential_signatures(&self, tx: &Transaction) -> Result<BTreeSet<PublicKey>, RpcError> {
        let value = self
            .call(RpcCall::condenser("get_potential_signatures", vec![self.tx_json(tx)]))
            .await?;
        self.parse_keys("get_potential_signatures", value)
    }

    /// The subset of `available` the chain needs to authorize `tx`.
    pub async fn get_required_signatures(
        &self,
        tx: &Transaction,
        available: &BTreeSet<PublicKey>,
    ) -> Result<BTreeSet<PublicKey>, RpcError> {
        let available: Vec<Value> = available
            .iter()
            .map(|key| Value::String(key.to_string_with_prefix(&self.chain.address_prefix)))
            .collect();
        let value = self
            .call(RpcCall::condenser(
                "get_required_signatures",
                vec![self.tx_json(tx), Value::Array(available)],
            ))
            .await?;
        self.parse_keys("get_required_signatures", value)
    }

    /// Whether the signatures on `tx` satisfy its authorities.
    pub async fn verify_authority(&self, tx: &Transaction) -> Result<bool, RpcError> {
        self.call_as(RpcCall::condenser("verify_authority", vec![self.tx_json(tx)]))
            .await
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("pool", &self.pool)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
