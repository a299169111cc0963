//! Persistence abstraction for account state.
//!
//! The daemon treats persistence as opaque save-on-dirty: after any
//! state-changing operation the affected records are written back before
//! the operation reports success (or, under the default best-effort
//! policy, the failure is logged and the in-memory state stands).

pub mod disk;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::wallet::keystore::KeyStoreRecord;
use crate::wallet::utxo::UtxoStoreRecord;

/// Everything persisted for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub name: String,
    pub keystore: KeyStoreRecord,
    pub utxos: UtxoStoreRecord,
}

/// Storage backend for account state.
#[async_trait]
pub trait WalletStorage: Send + Sync + 'static {
    /// Write the key-store half of an account.
    async fn save_keystore(&mut self, account: &str, record: &KeyStoreRecord)
        -> StorageResult<()>;

    /// Write the unspent-output half of an account.
    async fn save_utxos(&mut self, account: &str, record: &UtxoStoreRecord)
        -> StorageResult<()>;

    /// Load every persisted account.
    async fn load_accounts(&self) -> StorageResult<Vec<AccountRecord>>;
}

pub use disk::DiskStorage;
pub use memory::MemoryStorage;
