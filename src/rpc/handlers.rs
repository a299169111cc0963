//! Local handlers for the wallet-scoped RPC methods.
//!
//! Each handler validates its parameters, performs the operation against
//! the registry, and sends exactly one reply to the originating frontend
//! (the notification-only extensions send none). Persistence failures
//! follow the configured policy: logged and swallowed by default.

use std::sync::Arc;

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Amount, Network};
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::daemon::WalletDaemon;
use crate::error::KeyStoreError;
use crate::storage::WalletStorage;
use crate::types::BlockStamp;
use crate::wallet::account::Account;
use crate::wallet::keystore::KeyStore;
use crate::wallet::utxo::UtxoStore;

use super::id::route_id;
use super::message::{params, FrontendChannel, Request, RpcError};
use super::notify::Target;

pub(super) fn parse_address(s: &str, network: Network) -> Result<Address, RpcError> {
    s.parse::<Address<NetworkUnchecked>>()
        .ok()
        .and_then(|a| a.require_network(network).ok())
        .ok_or_else(|| RpcError::invalid_parameter("invalid address"))
}

impl<S: WalletStorage> WalletDaemon<S> {
    pub(super) async fn account_or_reply(
        &self,
        frontend: &FrontendChannel,
        id: &Value,
        name: &str,
    ) -> Option<Arc<Account>> {
        match self.shared.accounts.get(name).await {
            Some(account) => Some(account),
            None => {
                frontend.reply_error(id, RpcError::invalid_account_name());
                None
            }
        }
    }

    /// Reply with the WIF private key for a single address, scanning
    /// accounts in registry order.
    pub(super) async fn dump_priv_key(&self, frontend: &FrontendChannel, req: &Request) {
        let addr_str = match params::string(&req.params, 0, "address") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let address = match parse_address(&addr_str, self.shared.config.network) {
            Ok(a) => a,
            Err(e) => return frontend.reply_error(&req.id, e),
        };

        for account in self.shared.accounts.all().await {
            match account.keystore().lock().await.wif_for_address(&address) {
                // Not this account; try the next.
                Err(KeyStoreError::AddressNotFound) => continue,
                Err(KeyStoreError::Locked) => {
                    return frontend.reply_error(&req.id, RpcError::unlock_needed())
                }
                Err(e) => return frontend.reply_error(&req.id, RpcError::wallet(e.to_string())),
                Ok(wif) => return frontend.reply_success(&req.id, json!(wif)),
            }
        }

        frontend.reply_error(
            &req.id,
            RpcError::wallet("address does not refer to a key"),
        );
    }

    /// Reply with every WIF private key across all accounts. Any locked
    /// account fails the whole dump; no partial results.
    pub(super) async fn dump_wallet(&self, frontend: &FrontendChannel, req: &Request) {
        let mut keys: Vec<String> = Vec::new();
        for account in self.shared.accounts.all().await {
            match account.keystore().lock().await.dump_wifs() {
                Ok(wifs) => keys.extend(wifs),
                Err(KeyStoreError::Locked) => {
                    return frontend.reply_error(&req.id, RpcError::unlock_needed())
                }
                Err(e) => return frontend.reply_error(&req.id, RpcError::wallet(e.to_string())),
            }
        }
        keys.sort();
        frontend.reply_success(&req.id, json!(keys));
    }

    /// Reply with all active payment addresses for an account.
    pub(super) async fn get_addresses_by_account(
        &self,
        frontend: &FrontendChannel,
        req: &Request,
    ) {
        let name = match params::opt_string(&req.params, 0, "") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let Some(account) = self.account_or_reply(frontend, &req.id, &name).await else {
            return;
        };

        let addresses: Vec<String> = account
            .keystore()
            .lock()
            .await
            .active_addresses()
            .iter()
            .map(|a| a.to_string())
            .collect();
        frontend.reply_success(&req.id, json!(addresses));
    }

    /// Reply with an account's balance at the requested confirmation depth.
    pub(super) async fn get_balance(&self, frontend: &FrontendChannel, req: &Request) {
        let name = match params::opt_string(&req.params, 0, "") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let minconf = match params::min_confirmations(&req.params, 1) {
            Ok(m) => m,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let Some(account) = self.account_or_reply(frontend, &req.id, &name).await else {
            return;
        };

        let balance = account.balance(minconf, self.best_height()).await;
        frontend.reply_success(&req.id, json!(balance.to_btc()));
    }

    /// Notify the invoking frontend of every account's confirmed and
    /// unconfirmed balance. Produces no RPC reply.
    pub(super) async fn get_balances(&self, frontend: &FrontendChannel, _req: &Request) {
        self.notify_account_balances(&Target::Frontend(frontend)).await;
    }

    /// Allocate the next unused address for an account.
    pub(super) async fn get_new_address(&self, frontend: &FrontendChannel, req: &Request) {
        let name = match params::opt_string(&req.params, 0, "") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let Some(account) = self.account_or_reply(frontend, &req.id, &name).await else {
            return;
        };

        let address = match account.keystore().lock().await.next_unused_address() {
            Ok(a) => a,
            Err(e) => return frontend.reply_error(&req.id, RpcError::internal(e.to_string())),
        };

        if let Some(e) = self.sync_account(&account).await {
            return frontend.reply_error(&req.id, e);
        }

        // Watch for future transactions paying the new address.
        account.request_new_tx_notifications(&self.shared.node, &[address.to_string()]);
        frontend.reply_success(&req.id, json!(address.to_string()));
    }

    /// Decode a WIF private key and add it to the named account.
    pub(super) async fn import_priv_key(&self, frontend: &FrontendChannel, req: &Request) {
        let wif = match params::string(&req.params, 0, "privkey") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        // The label names the receiving account.
        let label = match params::opt_string(&req.params, 1, "") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let rescan = match params::opt_bool(&req.params, 2, true) {
            Ok(b) => b,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        // Height zero is the worst-case guess when the caller does not say
        // when the address first appeared.
        let height = match params::opt_number(&req.params, 3, 0.0) {
            Ok(h) if h >= 0.0 => h as u32,
            Ok(_) => {
                return frontend
                    .reply_error(&req.id, RpcError::invalid_params("height cannot be negative"))
            }
            Err(e) => return frontend.reply_error(&req.id, e),
        };

        let Some(account) = self.account_or_reply(frontend, &req.id, &label).await else {
            return;
        };

        let stamp = BlockStamp::at_height(height);
        let address = match account.keystore().lock().await.import_wif(&wif, stamp) {
            Ok(a) => a,
            Err(KeyStoreError::Locked) => {
                return frontend.reply_error(&req.id, RpcError::unlock_needed())
            }
            Err(e) => return frontend.reply_error(&req.id, RpcError::wallet(e.to_string())),
        };

        if let Some(e) = self.sync_account(&account).await {
            return frontend.reply_error(&req.id, e);
        }

        if rescan {
            self.request_rescan(&account, height, &address).await;
        }
        frontend.reply_success(&req.id, Value::Null);
    }

    /// Ask the node to rescan the chain from `height` for transactions
    /// involving `address`.
    async fn request_rescan(&self, account: &Account, height: u32, address: &Address) {
        let n = self.shared.ids.next();
        let msg = json!({
            "jsonrpc": "1.0",
            "method": "rescan",
            "params": [height, [address.to_string()]],
            "id": route_id(n, None),
        });
        let Ok(bytes) = serde_json::to_vec(&msg) else {
            return;
        };

        let name = account.name().to_string();
        let handler = Box::new(move |outcome: Result<Value, RpcError>| {
            let name = name.clone();
            let fut: super::correlation::HandlerFuture = Box::pin(async move {
                match outcome {
                    Ok(_) => tracing::debug!(account = %name, "rescan finished"),
                    Err(e) => tracing::warn!(account = %name, error = %e, "rescan failed"),
                }
                true
            });
            fut
        });
        self.shared.correlations.lock().await.insert_handler(n, handler);
        self.shared.node.send(bytes);
    }

    /// Reply with a map of every account name to its balance.
    pub(super) async fn list_accounts(&self, frontend: &FrontendChannel, req: &Request) {
        let minconf = match params::min_confirmations(&req.params, 0) {
            Ok(m) => m,
            Err(e) => return frontend.reply_error(&req.id, e),
        };

        let best = self.best_height();
        let mut pairs = serde_json::Map::new();
        for account in self.shared.accounts.all().await {
            let balance = account.balance(minconf, best).await;
            pairs.insert(account.name().to_string(), json!(balance.to_btc()));
        }
        frontend.reply_success(&req.id, Value::Object(pairs));
    }

    /// Set the process-wide transaction fee.
    pub(super) async fn set_tx_fee(&self, frontend: &FrontendChannel, req: &Request) {
        let raw = match params::number(&req.params, 0, "amount") {
            Ok(n) => n,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        if raw < 0.0 {
            return frontend
                .reply_error(&req.id, RpcError::invalid_params("amount cannot be negative"));
        }
        let amount = match Amount::from_btc(raw) {
            Ok(a) => a,
            Err(_) => {
                return frontend.reply_error(&req.id, RpcError::invalid_params("invalid amount"))
            }
        };

        self.shared.fee.set(amount).await;
        frontend.reply_success(&req.id, json!(true));
    }

    /// Create a new account with a freshly encrypted wallet.
    pub(super) async fn create_encrypted_wallet(
        &self,
        frontend: &FrontendChannel,
        req: &Request,
    ) {
        let name = match params::string(&req.params, 0, "account") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let description = match params::string(&req.params, 1, "description") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let passphrase = match params::string(&req.params, 2, "passphrase") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };

        // Hold the registry guard across the existence check and insert so
        // concurrent creations of the same name cannot race.
        let account = {
            let mut registry = self.shared.accounts.write_guard().await;
            if registry.contains_key(&name) {
                return frontend.reply_error(&req.id, RpcError::invalid_account_name());
            }

            // The new wallet is stamped with the node's current best block.
            let stamp = match self.shared.node.best_block() {
                Ok(bs) => bs,
                Err(e) => {
                    return frontend.reply_error(&req.id, RpcError::internal(e.to_string()))
                }
            };

            let keystore = match KeyStore::create(
                self.shared.config.network,
                &description,
                &passphrase,
                stamp,
                self.shared.config.key_pool_size,
            ) {
                Ok(ks) => ks,
                Err(e) => {
                    tracing::error!(error = %e, "cannot create wallet");
                    return frontend.reply_error(&req.id, RpcError::internal(e.to_string()));
                }
            };

            let account = Arc::new(Account::new(
                name.clone(),
                keystore,
                UtxoStore::new(),
                self.shared.ids.next(),
            ));
            registry.insert(name.clone(), Arc::clone(&account));
            account
        };

        account.track(&self.shared.node).await;

        if let Some(e) = self.sync_account(&account).await {
            return frontend.reply_error(&req.id, e);
        }

        self.notify_account_balances(&Target::All).await;
        frontend.reply_success(&req.id, Value::Null);
    }

    /// Reply with an account's lock state: `true` when no key material is
    /// in memory.
    pub(super) async fn wallet_is_locked(&self, frontend: &FrontendChannel, req: &Request) {
        let name = match params::opt_string(&req.params, 0, "") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let Some(account) = self.account_or_reply(frontend, &req.id, &name).await else {
            return;
        };

        let locked = account.keystore().lock().await.is_locked();
        frontend.reply_success(&req.id, json!(locked));
    }

    /// Lock the default account. Only the default account participates in
    /// the lock state machine; per-account locking would hang off the same
    /// helpers with a name parameter.
    pub(super) async fn wallet_lock(&self, frontend: &FrontendChannel, req: &Request) {
        let Some(account) = self.account_or_reply(frontend, &req.id, "").await else {
            return;
        };

        if account.keystore().lock().await.lock().is_err() {
            return frontend.reply_error(&req.id, RpcError::wrong_enc_state());
        }
        frontend.reply_success(&req.id, Value::Null);
        self.shared.notifier.lock_state_changed(account.name(), true);
    }

    /// Unlock the default account, scheduling an auto-lock after the
    /// requested timeout.
    pub(super) async fn wallet_passphrase(&self, frontend: &FrontendChannel, req: &Request) {
        let passphrase = match params::string(&req.params, 0, "passphrase") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let timeout = match params::number(&req.params, 1, "timeout") {
            Ok(t) if t >= 0.0 => Duration::from_secs_f64(t),
            Ok(_) => {
                return frontend
                    .reply_error(&req.id, RpcError::invalid_params("timeout cannot be negative"))
            }
            Err(e) => return frontend.reply_error(&req.id, e),
        };

        let Some(account) = self.account_or_reply(frontend, &req.id, "").await else {
            return;
        };

        let generation = {
            let mut keystore = account.keystore().lock().await;
            match keystore.unlock(&passphrase) {
                Ok(()) => keystore.unlock_generation(),
                Err(KeyStoreError::IncorrectPassphrase) => {
                    return frontend.reply_error(&req.id, RpcError::passphrase_incorrect())
                }
                Err(e) => return frontend.reply_error(&req.id, RpcError::wallet(e.to_string())),
            }
        };

        frontend.reply_success(&req.id, Value::Null);
        self.shared.notifier.lock_state_changed(account.name(), false);
        self.schedule_auto_lock(account, generation, timeout);
    }

    /// Lock the account after `timeout`, unless it was explicitly relocked
    /// or unlocked again in the meantime. The timer outlives the frontend
    /// that started it.
    fn schedule_auto_lock(&self, account: Arc<Account>, generation: u64, timeout: Duration) {
        let daemon = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            let locked = {
                let mut keystore = account.keystore().lock().await;
                // A newer unlock supersedes this timer; an explicit
                // walletlock already wiped the key material.
                if keystore.unlock_generation() != generation || keystore.is_locked() {
                    false
                } else {
                    keystore.lock().is_ok()
                }
            };
            if locked {
                tracing::debug!(account = %account.name(), "auto-locked wallet");
                daemon
                    .shared
                    .notifier
                    .lock_state_changed(account.name(), true);
            }
        });
    }
}
