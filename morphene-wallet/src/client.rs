//! One connection to one network, with everything needed to submit
//! transactions on it.

use std::sync::Arc;

use mph_crypto_keys::KeyMaterial;
use mph_transaction_core::{Operation, Transaction, TransactionSigner};
use tracing::debug;

use crate::{
    broadcast::{BroadcastMode, Broadcaster, Receipt},
    config::{ClientConfig, TransactionConfig},
    node_pool::NodePool,
    rpc::RpcClient,
    transport::Connector,
    BroadcastError, ConfigError,
};

/// Builds transactions against the current head block, signs them and
/// hands them to a [`Broadcaster`].
///
/// Each `Client` owns its own node pool and connections; several clients
/// for different networks can live in one process.
#[derive(Debug, Clone)]
pub struct Client {
    signer: TransactionSigner,
    rpc: Arc<RpcClient>,
    broadcaster: Broadcaster,
    transaction: TransactionConfig,
}

impl Client {
    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let pool = Arc::new(NodePool::from_config(&config.nodes));
        Self::from_rpc(config, RpcClient::new(pool, config.rpc.clone()))
    }

    /// Like [`Self::from_config`], opening connections through `connector`.
    pub fn with_connector(config: &ClientConfig, connector: Arc<dyn Connector>) -> Result<Self, ConfigError> {
        let pool = Arc::new(NodePool::from_config(&config.nodes));
        Self::from_rpc(config, RpcClient::with_connector(pool, config.rpc.clone(), connector))
    }

    fn from_rpc(config: &ClientConfig, rpc: RpcClient) -> Result<Self, ConfigError> {
        config.validate().map_err(ConfigError::Validation)?;
        let chain = config.chain_params()?;
        let rpc = Arc::new(rpc.with_chain(chain.clone()));
        Ok(Self {
            signer: TransactionSigner::new(chain),
            broadcaster: Broadcaster::new(rpc.clone()).with_mode(BroadcastMode::from_config(&config.transaction)),
            rpc,
            transaction: config.transaction.clone(),
        })
    }

    pub fn signer(&self) -> &TransactionSigner {
        &self.signer
    }

    pub fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// An unsigned transaction referencing the head block, expiring
    /// `expiration_secs` after the head block time.
    pub async fn prepare(&self, operations: Vec<Operation>) -> Result<Transaction, BroadcastError> {
        let props = self.rpc.get_dynamic_global_properties().await?;
        let ref_block = props.reference_block()?;
        let expiration = TransactionSigner::expiration_after(props.head_time()?, self.transaction.expiration_secs)?;
        debug!(
            "Preparing transaction at head block {} expiring {}",
            props.head_block_number, expiration
        );
        Ok(self.signer.build(operations, expiration, ref_block)?)
    }

    /// Prepare, sign with every key in `keys`, and broadcast.
    pub async fn sign_and_broadcast<'a>(
        &self,
        operations: Vec<Operation>,
        keys: impl IntoIterator<Item = &'a KeyMaterial>,
    ) -> Result<Receipt, BroadcastError> {
        let tx = self.prepare(operations).await?;
        let tx = self.signer.sign_with(tx, keys)?;
        self.broadcaster.broadcast(&tx).await
    }
}
