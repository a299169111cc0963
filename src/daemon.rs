//! The wallet daemon core: shared state and cross-cutting operations.
//!
//! `WalletDaemon` owns the account registry, the correlation table, the
//! fee setting, the unmined pool, and the handles to the node link and the
//! notification fan-out. The dispatch layer and the local handlers are
//! implemented as further `impl` blocks in [`crate::rpc`].

use std::sync::Arc;

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Amount, Txid};
use serde_json::json;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::Result;
use crate::node::NodeLink;
use crate::rpc::correlation::CorrelationMap;
use crate::rpc::id::{route_id, IdAllocator};
use crate::rpc::message::RpcError;
use crate::rpc::notify::{Notifier, Target};
use crate::storage::WalletStorage;
use crate::types::BlockStamp;
use crate::wallet::account::{Account, AccountRegistry};
use crate::wallet::fee::FeeSetting;
use crate::wallet::keystore::KeyStore;
use crate::wallet::unmined::UnminedTxPool;
use crate::wallet::utxo::UtxoStore;

/// The daemon core. Cheap to clone; all clones share state.
pub struct WalletDaemon<S: WalletStorage> {
    pub(crate) shared: Arc<Shared<S>>,
}

impl<S: WalletStorage> Clone for WalletDaemon<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub(crate) struct Shared<S: WalletStorage> {
    pub(crate) config: Config,
    pub(crate) accounts: AccountRegistry,
    pub(crate) correlations: Mutex<CorrelationMap>,
    pub(crate) ids: IdAllocator,
    pub(crate) fee: FeeSetting,
    pub(crate) unmined: Mutex<UnminedTxPool>,
    pub(crate) node: Arc<NodeLink>,
    pub(crate) notifier: Notifier,
    pub(crate) storage: Mutex<S>,
}

impl<S: WalletStorage> WalletDaemon<S> {
    /// Build the daemon, loading any persisted accounts from `storage`.
    pub async fn new(config: Config, node: Arc<NodeLink>, storage: S) -> Result<Self> {
        config.validate()?;
        let ids = IdAllocator::new();
        let accounts = AccountRegistry::new();

        for record in storage.load_accounts().await? {
            let keystore = KeyStore::from_record(&record.keystore)?;
            let utxos = UtxoStore::from_record(&record.utxos, config.network)?;
            let account =
                Arc::new(Account::new(record.name.clone(), keystore, utxos, ids.next()));
            tracing::info!(account = %record.name, "loaded account");
            accounts.insert(account).await;
        }

        let notifier = Notifier::new(config.notification_buffer);
        let fee = FeeSetting::new(config.default_fee);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                accounts,
                correlations: Mutex::new(CorrelationMap::new()),
                ids,
                fee,
                unmined: Mutex::new(UnminedTxPool::new()),
                node,
                notifier,
                storage: Mutex::new(storage),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn node(&self) -> &Arc<NodeLink> {
        &self.shared.node
    }

    pub fn notifier(&self) -> &Notifier {
        &self.shared.notifier
    }

    pub fn accounts(&self) -> &AccountRegistry {
        &self.shared.accounts
    }

    /// Best height for confirmation counting; zero while the node's chain
    /// state is unknown.
    pub(crate) fn best_height(&self) -> u32 {
        self.shared.node.best_height()
    }

    /// Whether a broadcast transaction is retained for rebroadcast.
    pub async fn unmined_contains(&self, txid: &Txid) -> bool {
        self.shared.unmined.lock().await.contains(txid)
    }

    /// Send confirmed and unconfirmed balance notifications for every
    /// account to `target`.
    pub async fn notify_account_balances(&self, target: &Target<'_>) {
        let best = self.best_height();
        for account in self.shared.accounts.all().await {
            let confirmed = account.balance(1, best).await;
            let total = account.balance(0, best).await;
            let unconfirmed = total.checked_sub(confirmed).unwrap_or(Amount::ZERO);
            self.shared
                .notifier
                .balance(target, account.name(), confirmed.to_btc());
            self.shared.notifier.balance_unconfirmed(
                target,
                account.name(),
                unconfirmed.to_btc(),
            );
        }
    }

    /// Persist an account's dirty state, applying the configured
    /// persistence-failure policy. Returns the error to surface to the
    /// frontend, if any.
    pub(crate) async fn sync_account(&self, account: &Account) -> Option<RpcError> {
        match account.write_dirty(&self.shared.storage).await {
            Ok(()) => None,
            Err(e) => {
                tracing::error!(account = %account.name(), error = %e, "cannot sync dirty account");
                if self.shared.config.fail_on_persist_error {
                    Some(RpcError::internal(format!("cannot persist account: {e}")))
                } else {
                    None
                }
            }
        }
    }

    /// Ask the node for its current best block, updating the link's cached
    /// chain state when the reply arrives.
    pub async fn request_best_block(&self) {
        let n = self.shared.ids.next();
        let msg = json!({
            "jsonrpc": "1.0",
            "method": "getbestblock",
            "params": [],
            "id": route_id(n, None),
        });
        let Ok(bytes) = serde_json::to_vec(&msg) else {
            return;
        };

        let node = Arc::clone(&self.shared.node);
        let handler = Box::new(move |outcome: std::result::Result<serde_json::Value, RpcError>| {
            let node = Arc::clone(&node);
            let fut: crate::rpc::correlation::HandlerFuture = Box::pin(async move {
                match outcome {
                    Ok(result) => match parse_best_block(&result) {
                        Some(stamp) => {
                            tracing::debug!(height = stamp.height, "best block updated");
                            node.set_best_block(stamp);
                        }
                        None => tracing::warn!("malformed getbestblock reply"),
                    },
                    Err(e) => tracing::warn!(error = %e, "getbestblock failed"),
                }
                true
            });
            fut
        });

        self.shared.correlations.lock().await.insert_handler(n, handler);
        self.shared.node.send(bytes);
    }

    /// Resend every unmined transaction to the node. Called after the node
    /// link is re-established, since btcd forgets our broadcasts across
    /// restarts.
    pub async fn rebroadcast_unmined(&self) {
        let raw = self.shared.unmined.lock().await.raw_transactions();
        for (txid, tx) in raw {
            let n = self.shared.ids.next();
            let msg = json!({
                "jsonrpc": "1.0",
                "method": "sendrawtransaction",
                "params": [serialize_hex(&tx)],
                "id": route_id(n, None),
            });
            let Ok(bytes) = serde_json::to_vec(&msg) else {
                continue;
            };

            let handler = Box::new(
                move |outcome: std::result::Result<serde_json::Value, RpcError>| {
                    let fut: crate::rpc::correlation::HandlerFuture = Box::pin(async move {
                        match outcome {
                            Ok(_) => tracing::debug!(%txid, "rebroadcast accepted"),
                            Err(e) => {
                                tracing::warn!(%txid, error = %e, "rebroadcast rejected")
                            }
                        }
                        true
                    });
                    fut
                },
            );
            self.shared.correlations.lock().await.insert_handler(n, handler);
            self.shared.node.send(bytes);
            tracing::debug!(%txid, "rebroadcasting unmined transaction");
        }
    }
}

fn parse_best_block(result: &serde_json::Value) -> Option<BlockStamp> {
    let height = result.get("height")?.as_u64()?;
    let hash = result.get("hash")?.as_str()?.parse().ok()?;
    Some(BlockStamp {
        height: height as u32,
        hash,
    })
}
