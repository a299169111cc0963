//! Disk storage backend: one JSON record per account.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::wallet::keystore::KeyStoreRecord;
use crate::wallet::utxo::UtxoStoreRecord;

use super::{AccountRecord, WalletStorage};

const ACCOUNT_FILE_SUFFIX: &str = ".account.json";

/// Persists each account as `<data_dir>/<name>.account.json`. The default
/// account's empty name maps to a fixed file name.
#[derive(Debug)]
pub struct DiskStorage {
    data_dir: PathBuf,
}

impl DiskStorage {
    /// Open (creating if needed) the data directory.
    pub async fn new(data_dir: impl Into<PathBuf>) -> StorageResult<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;
        Ok(Self {
            data_dir,
        })
    }

    fn account_path(&self, account: &str) -> PathBuf {
        let stem = if account.is_empty() {
            "_default".to_string()
        } else {
            // Keep file names flat and predictable for odd account names.
            account
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
                .collect()
        };
        self.data_dir.join(format!("{stem}{ACCOUNT_FILE_SUFFIX}"))
    }

    async fn read_record(path: &Path) -> StorageResult<AccountRecord> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content).map_err(|e| {
            StorageError::Corruption(format!("{}: {e}", path.display()))
        })
    }

    async fn write_record(&self, record: &AccountRecord) -> StorageResult<()> {
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        tokio::fs::write(self.account_path(&record.name), json).await?;
        Ok(())
    }

    /// Read one account's record, or a fresh one if nothing is on disk yet.
    async fn load_or_default(
        &self,
        account: &str,
        keystore: Option<&KeyStoreRecord>,
    ) -> StorageResult<AccountRecord> {
        let path = self.account_path(account);
        match tokio::fs::try_exists(&path).await? {
            true => Self::read_record(&path).await,
            false => {
                let keystore = keystore.cloned().ok_or_else(|| {
                    StorageError::Corruption(format!(
                        "utxo store saved before key store for account {account:?}"
                    ))
                })?;
                Ok(AccountRecord {
                    name: account.to_string(),
                    keystore,
                    utxos: UtxoStoreRecord {
                        utxos: Vec::new(),
                    },
                })
            }
        }
    }
}

#[async_trait]
impl WalletStorage for DiskStorage {
    async fn save_keystore(
        &mut self,
        account: &str,
        record: &KeyStoreRecord,
    ) -> StorageResult<()> {
        let mut full = self.load_or_default(account, Some(record)).await?;
        full.keystore = record.clone();
        self.write_record(&full).await
    }

    async fn save_utxos(
        &mut self,
        account: &str,
        record: &UtxoStoreRecord,
    ) -> StorageResult<()> {
        let mut full = self.load_or_default(account, None).await?;
        full.utxos = record.clone();
        self.write_record(&full).await
    }

    async fn load_accounts(&self) -> StorageResult<Vec<AccountRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_account_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(ACCOUNT_FILE_SUFFIX));
            if is_account_file {
                records.push(Self::read_record(&path).await?);
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockStamp;
    use crate::wallet::keystore::KeyStore;
    use crate::wallet::utxo::UtxoStore;
    use bitcoin::Network;
    use tempfile::TempDir;

    fn keystore_record(description: &str) -> KeyStoreRecord {
        KeyStore::create(
            Network::Regtest,
            description,
            "pass",
            BlockStamp::at_height(1),
            1,
        )
        .unwrap()
        .to_record()
    }

    #[tokio::test]
    async fn saved_accounts_are_loaded_back() {
        let dir = TempDir::new().unwrap();
        let mut storage = DiskStorage::new(dir.path()).await.unwrap();

        storage.save_keystore("", &keystore_record("default")).await.unwrap();
        storage
            .save_keystore("savings", &keystore_record("savings"))
            .await
            .unwrap();
        storage
            .save_utxos("savings", &UtxoStore::new().to_record())
            .await
            .unwrap();

        let records = storage.load_accounts().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "");
        assert_eq!(records[0].keystore.description, "default");
        assert_eq!(records[1].name, "savings");
    }

    #[tokio::test]
    async fn utxo_save_preserves_the_keystore_half() {
        let dir = TempDir::new().unwrap();
        let mut storage = DiskStorage::new(dir.path()).await.unwrap();

        let keystore = keystore_record("default");
        storage.save_keystore("", &keystore).await.unwrap();
        storage.save_utxos("", &UtxoStore::new().to_record()).await.unwrap();

        let records = storage.load_accounts().await.unwrap();
        assert_eq!(records[0].keystore.entries.len(), keystore.entries.len());
    }

    #[tokio::test]
    async fn empty_data_dir_loads_no_accounts() {
        let dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(dir.path()).await.unwrap();
        assert!(storage.load_accounts().await.unwrap().is_empty());
    }
}
