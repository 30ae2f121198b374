//! Morphene client core.
//!
//! This crate holds the parts of a Morphene wallet that sit between the
//! keys and the network:
//!
//! - [`WalletStore`]: role keys for an account, encrypted at rest with an
//!   Argon2id derived key and ChaCha20-Poly1305
//! - [`NodePool`] and [`RpcClient`]: JSON-RPC over HTTP or WebSocket,
//!   failing over between nodes on connection errors
//! - [`Broadcaster`]: local pre-flight checks and submission of signed
//!   transactions, with node rejections sorted into [`RejectReason`]s
//! - [`SignedMessage`]: memo-key signed text messages
//!
//! [`Client`] ties a configuration, a signer and a broadcaster together
//! for one network.

pub mod broadcast;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod node_pool;
pub mod rpc;
mod secmem;
pub mod storage;
pub mod store;
pub mod transport;

pub use broadcast::{classify_rejection, BroadcastMode, Broadcaster, Receipt};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{BroadcastError, ConfigError, MessageError, RejectReason, RpcError, WalletError};
pub use message::{MessageMeta, SignedMessage};
pub use node_pool::{NodeEndpoint, NodePool};
pub use rpc::{RpcCall, RpcClient};
pub use storage::{KdfParams, WalletFile};
pub use store::WalletStore;
pub use transport::{Connector, DefaultConnector, HttpTransport, Transport, WsTransport};
