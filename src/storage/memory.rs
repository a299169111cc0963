//! In-memory storage backend, for tests and ephemeral wallets.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::wallet::keystore::KeyStoreRecord;
use crate::wallet::utxo::UtxoStoreRecord;

use super::{AccountRecord, WalletStorage};

/// Keeps account records in process memory. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    keystores: BTreeMap<String, KeyStoreRecord>,
    utxos: BTreeMap<String, UtxoStoreRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts with a persisted key store.
    pub fn account_count(&self) -> usize {
        self.keystores.len()
    }
}

#[async_trait]
impl WalletStorage for MemoryStorage {
    async fn save_keystore(
        &mut self,
        account: &str,
        record: &KeyStoreRecord,
    ) -> StorageResult<()> {
        self.keystores.insert(account.to_string(), record.clone());
        Ok(())
    }

    async fn save_utxos(
        &mut self,
        account: &str,
        record: &UtxoStoreRecord,
    ) -> StorageResult<()> {
        self.utxos.insert(account.to_string(), record.clone());
        Ok(())
    }

    async fn load_accounts(&self) -> StorageResult<Vec<AccountRecord>> {
        Ok(self
            .keystores
            .iter()
            .map(|(name, keystore)| AccountRecord {
                name: name.clone(),
                keystore: keystore.clone(),
                utxos: self
                    .utxos
                    .get(name)
                    .cloned()
                    .unwrap_or(UtxoStoreRecord {
                        utxos: Vec::new(),
                    }),
            })
            .collect())
    }
}
