//! Bitcoin wallet daemon core.
//!
//! btcwalletd sits between untrusted frontends and a trusted btcd full
//! node. It owns a set of named accounts (each an encrypted key store with
//! an associated unspent-output set), serves the wallet-scoped JSON-RPC
//! methods locally, and transparently forwards everything else to the
//! node, correlating the asynchronous replies back to the originating
//! frontend. Account notifications (balances, lock-state transitions) are
//! fanned out to all connected frontends.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use btcwalletd::node::NodeLink;
//! use btcwalletd::rpc::FrontendChannel;
//! use btcwalletd::storage::MemoryStorage;
//! use btcwalletd::{Config, WalletDaemon};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::testnet();
//!     let (node, _node_outbound) = NodeLink::new();
//!     let daemon = WalletDaemon::new(config, Arc::new(node), MemoryStorage::new()).await?;
//!
//!     let (frontend, mut replies) = FrontendChannel::new();
//!     daemon
//!         .process_request(&frontend, br#"{"method":"listaccounts","id":1}"#, false)
//!         .await;
//!     let reply = replies.recv().await.expect("reply");
//!     println!("{}", String::from_utf8_lossy(&reply));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod node;
pub mod rpc;
pub mod storage;
pub mod types;
pub mod wallet;

// Re-export main types for convenience
pub use config::Config;
pub use daemon::WalletDaemon;
pub use error::{
    BuildError, KeyStoreError, NodeError, Result, StorageError, StorageResult, WalletdError,
};
pub use rpc::{FrontendChannel, Notifier, RpcError};
pub use types::BlockStamp;

// Re-export commonly used bitcoin types
pub use bitcoin::{Address, Amount, Network, OutPoint, Txid};

/// Current version of the btcwalletd library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
