//! Submitting signed transactions.

use std::sync::Arc;

use mph_transaction_core::{ChainJson, TimePointSec, Transaction, TransactionId};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    config::TransactionConfig,
    rpc::{RpcCall, RpcClient},
    BroadcastError, RejectReason, RpcError,
};

/// How far to take a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BroadcastMode {
    /// Return once a node has accepted it into its pending pool.
    #[default]
    Async,
    /// Wait until it is included in a block.
    Blocking,
    /// Run the local checks, send nothing.
    DryRun,
}

impl BroadcastMode {
    pub fn from_config(config: &TransactionConfig) -> Self {
        if config.no_broadcast {
            BroadcastMode::DryRun
        } else if config.blocking {
            BroadcastMode::Blocking
        } else {
            BroadcastMode::Async
        }
    }
}

/// What the chain told us about a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_id: TransactionId,
    /// Only known for blocking broadcasts
    pub block_num: Option<u32>,
    pub trx_num: Option<u32>,
}

#[derive(Deserialize)]
struct SynchronousResult {
    block_num: u32,
    trx_num: u32,
    #[serde(default)]
    expired: bool,
}

/// Sort a node's refusal into a cause callers can branch on.
///
/// Nodes describe failures in free text and, on newer versions, an
/// exception name under `data.name`; both are searched.
pub fn classify_rejection(message: &str, data: Option<&Value>) -> RejectReason {
    let mut text = message.to_lowercase();
    if let Some(data) = data {
        for key in ["name", "message"] {
            if let Some(extra) = data.get(key).and_then(Value::as_str) {
                text.push(' ');
                text.push_str(&extra.to_lowercase());
            }
        }
    }
    let has = |needle: &str| text.contains(needle);

    if has("duplicate transaction") || has("duplicate_transaction") || has("by_trx_id") {
        RejectReason::DuplicateTransaction
    } else if has("now < trx.expiration") || has("expired") || has("expiration_exception") {
        RejectReason::Expired
    } else if has("missing required")
        || has("tx_missing_")
        || has("irrelevant signature")
        || has("tx_irrelevant_sig")
        || has("duplicate signature")
        || has("tx_duplicate_sig")
    {
        RejectReason::InsufficientAuthority
    } else if has("insufficient") || has("sufficient funds") || has("balance") {
        RejectReason::InsufficientFunds
    } else {
        RejectReason::Unknown(message.to_string())
    }
}

/// Sends signed transactions through an [`RpcClient`].
#[derive(Debug, Clone)]
pub struct Broadcaster {
    rpc: Arc<RpcClient>,
    mode: BroadcastMode,
}

impl Broadcaster {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self {
            rpc,
            mode: BroadcastMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: BroadcastMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> BroadcastMode {
        self.mode
    }

    pub async fn broadcast(&self, tx: &Transaction) -> Result<Receipt, BroadcastError> {
        self.broadcast_at(tx, TimePointSec::now()).await
    }

    /// Broadcast, judging expiration against `now`.
    ///
    /// Unsigned and already expired transactions are refused here without
    /// contacting a node.
    pub async fn broadcast_at(&self, tx: &Transaction, now: TimePointSec) -> Result<Receipt, BroadcastError> {
        if !tx.is_signed() {
            return Err(BroadcastError::NotSigned);
        }
        let tx_id = tx.id();
        if tx.is_expired_at(now) {
            warn!("Not broadcasting {}: expired at {} (now {})", tx_id, tx.expiration, now);
            return Err(BroadcastError::Rejected(RejectReason::Expired));
        }

        let body = tx.to_chain_json(&self.rpc.chain().address_prefix);
        let receipt = match self.mode {
            BroadcastMode::DryRun => {
                info!("Dry run: transaction {} not broadcast", tx_id);
                Receipt {
                    tx_id,
                    block_num: None,
                    trx_num: None,
                }
            }
            BroadcastMode::Async => {
                self.submit(RpcCall::condenser("broadcast_transaction", vec![body]))
                    .await?;
                info!("Broadcast transaction {}", tx_id);
                Receipt {
                    tx_id,
                    block_num: None,
                    trx_num: None,
                }
            }
            BroadcastMode::Blocking => {
                let value = self
                    .submit(RpcCall::condenser("broadcast_transaction_synchronous", vec![body]))
                    .await?;
                let result: SynchronousResult = serde_json::from_value(value)
                    .map_err(|e| RpcError::decode("broadcast_transaction_synchronous", e))?;
                if result.expired {
                    return Err(BroadcastError::Rejected(RejectReason::Expired));
                }
                info!(
                    "Transaction {} included in block {} at index {}",
                    tx_id, result.block_num, result.trx_num
                );
                Receipt {
                    tx_id,
                    block_num: Some(result.block_num),
                    trx_num: Some(result.trx_num),
                }
            }
        };
        Ok(receipt)
    }

    /// Any answer from the chain other than a result is a rejection.
    async fn submit(&self, call: RpcCall) -> Result<Value, BroadcastError> {
        match self.rpc.call(call).await {
            Ok(value) => Ok(value),
            Err(RpcError::Rpc { message, data, .. }) => {
                let reason = classify_rejection(&message, data.as_ref());
                warn!("Transaction rejected: {}", message);
                Err(BroadcastError::Rejected(reason))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_messages() {
        let cases = [
            (
                "missing required active authority: Missing Active Authority alice",
                None,
                RejectReason::InsufficientAuthority,
            ),
            (
                "Assert Exception",
                Some(json!({"name": "tx_missing_posting_auth"})),
                RejectReason::InsufficientAuthority,
            ),
            (
                "irrelevant signature included: Unnecessary signature(s) detected",
                None,
                RejectReason::InsufficientAuthority,
            ),
            (
                "Duplicate transaction check failed",
                None,
                RejectReason::DuplicateTransaction,
            ),
            (
                "Assert Exception:now < trx.expiration: ",
                None,
                RejectReason::Expired,
            ),
            (
                "Account alice does not have sufficient funds for transfer.",
                None,
                RejectReason::InsufficientFunds,
            ),
            (
                "Assert Exception:_db.get_balance( o.from, o.amount.symbol ) >= o.amount: Insufficient balance",
                None,
                RejectReason::InsufficientFunds,
            ),
        ];
        for (message, data, expected) in cases {
            assert_eq!(classify_rejection(message, data.as_ref()), expected, "{message}");
        }
    }

    #[test]
    fn test_unknown_keeps_message() {
        assert_eq!(
            classify_rejection("Bandwidth limit exceeded", None),
            RejectReason::Unknown("Bandwidth limit exceeded".to_string())
        );
    }

    #[test]
    fn test_mode_from_config() {
        let mut config = TransactionConfig::default();
        assert_eq!(BroadcastMode::from_config(&config), BroadcastMode::Async);
        config.blocking = true;
        assert_eq!(BroadcastMode::from_config(&config), BroadcastMode::Blocking);
        config.no_broadcast = true;
        assert_eq!(BroadcastMode::from_config(&config), BroadcastMode::DryRun);
    }
}
