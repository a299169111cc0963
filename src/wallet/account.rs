//! Accounts and the account registry.
//!
//! An account pairs an encrypted key store with its unspent-output set.
//! The registry maps account names to accounts; the empty-string name is
//! the default account. Accounts are created and persisted, never removed.

use std::collections::BTreeMap;
use std::sync::Arc;

use bitcoin::{Amount, OutPoint};
use serde_json::json;
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};

use crate::error::StorageResult;
use crate::node::NodeLink;
use crate::rpc::id::route_id;
use crate::storage::WalletStorage;
use crate::wallet::keystore::KeyStore;
use crate::wallet::utxo::UtxoStore;

/// A named wallet: key store, unspent outputs, and the correlation number
/// the node streams this account's transaction notifications under.
///
/// Lock ordering: when both guards are needed, take `keystore` before
/// `utxos`; take the storage guard only while an account guard is held or
/// after both are released, never the other way around.
pub struct Account {
    name: String,
    notif_seq: u64,
    keystore: Mutex<KeyStore>,
    utxos: Mutex<UtxoStore>,
}

impl Account {
    pub fn new(name: impl Into<String>, keystore: KeyStore, utxos: UtxoStore, notif_seq: u64) -> Self {
        Self {
            name: name.into(),
            notif_seq,
            keystore: Mutex::new(keystore),
            utxos: Mutex::new(utxos),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Correlation number reserved for this account's transaction
    /// notification stream from the node.
    pub fn notif_seq(&self) -> u64 {
        self.notif_seq
    }

    pub fn keystore(&self) -> &Mutex<KeyStore> {
        &self.keystore
    }

    pub fn utxos(&self) -> &Mutex<UtxoStore> {
        &self.utxos
    }

    /// Balance at the requested confirmation depth.
    pub async fn balance(&self, min_confirmations: u32, best_height: u32) -> Amount {
        self.utxos.lock().await.balance(min_confirmations, best_height)
    }

    /// Persist whichever halves of the account have diverged from disk.
    pub async fn write_dirty<S: WalletStorage>(
        &self,
        storage: &Mutex<S>,
    ) -> StorageResult<()> {
        {
            let mut keystore = self.keystore.lock().await;
            if keystore.is_dirty() {
                let record = keystore.to_record();
                storage.lock().await.save_keystore(&self.name, &record).await?;
                keystore.clear_dirty();
            }
        }
        {
            let mut utxos = self.utxos.lock().await;
            if utxos.is_dirty() {
                let record = utxos.to_record();
                storage.lock().await.save_utxos(&self.name, &record).await?;
                utxos.clear_dirty();
            }
        }
        Ok(())
    }

    /// Ask the node to report future transactions paying any currently
    /// active address, under this account's notification stream.
    pub async fn track(&self, node: &NodeLink) {
        let addresses: Vec<String> = self
            .keystore
            .lock()
            .await
            .active_addresses()
            .iter()
            .map(|a| a.to_string())
            .collect();
        if !addresses.is_empty() {
            self.request_new_tx_notifications(node, &addresses);
        }
    }

    /// Ask the node to report future transactions paying `addresses`.
    pub fn request_new_tx_notifications(&self, node: &NodeLink, addresses: &[String]) {
        let msg = json!({
            "jsonrpc": "1.0",
            "method": "notifynewtxs",
            "params": [addresses],
            "id": route_id(self.notif_seq, None),
        });
        if let Ok(bytes) = serde_json::to_vec(&msg) {
            node.send(bytes);
        }
    }

    /// Ask the node to report when `outpoint` is spent.
    pub fn request_spent_notification(&self, node: &NodeLink, outpoint: &OutPoint) {
        let msg = json!({
            "jsonrpc": "1.0",
            "method": "notifyspent",
            "params": [{ "hash": outpoint.txid.to_string(), "index": outpoint.vout }],
            "id": route_id(self.notif_seq, None),
        });
        if let Ok(bytes) = serde_json::to_vec(&msg) {
            node.send(bytes);
        }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("name", &self.name)
            .field("notif_seq", &self.notif_seq)
            .finish()
    }
}

/// Name-keyed collection of accounts.
#[derive(Debug, Default)]
pub struct AccountRegistry {
    accounts: RwLock<BTreeMap<String, Arc<Account>>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Account>> {
        self.accounts.read().await.get(name).cloned()
    }

    /// Every account, in registry (name) order.
    pub async fn all(&self) -> Vec<Arc<Account>> {
        self.accounts.read().await.values().cloned().collect()
    }

    pub async fn insert(&self, account: Arc<Account>) {
        self.accounts
            .write()
            .await
            .insert(account.name().to_string(), account);
    }

    /// Exclusive access for check-then-insert during account creation.
    pub async fn write_guard(
        &self,
    ) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<Account>>> {
        self.accounts.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockStamp;
    use bitcoin::Network;

    fn test_account(name: &str) -> Account {
        let keystore = KeyStore::create(
            Network::Regtest,
            "test",
            "pass",
            BlockStamp::at_height(1),
            2,
        )
        .unwrap();
        Account::new(name, keystore, UtxoStore::new(), 7)
    }

    #[tokio::test]
    async fn registry_iterates_in_name_order() {
        let registry = AccountRegistry::new();
        registry.insert(Arc::new(test_account("b"))).await;
        registry.insert(Arc::new(test_account(""))).await;
        registry.insert(Arc::new(test_account("a"))).await;

        let names: Vec<String> = registry
            .all()
            .await
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["", "a", "b"]);
        assert!(registry.get("a").await.is_some());
        assert!(registry.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn tracking_registers_active_addresses_with_the_node() {
        let (node, mut rx) = NodeLink::new();
        node.set_connected(true);

        let account = test_account("watched");
        account.track(&node).await;
        // No addresses handed out yet, so nothing to register.
        assert!(rx.try_recv().is_err());

        account
            .keystore()
            .lock()
            .await
            .next_unused_address()
            .unwrap();
        account.track(&node).await;

        let msg: serde_json::Value =
            serde_json::from_slice(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg["method"], "notifynewtxs");
        assert_eq!(msg["id"], "btcwallet(7)");
        assert_eq!(msg["params"][0].as_array().unwrap().len(), 1);
    }
}
