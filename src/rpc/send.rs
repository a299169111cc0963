//! The send pipeline: build a transaction locally, defer the broadcast to
//! the node, and finish the bookkeeping once the node accepts it.

use std::sync::Arc;

use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Amount, Txid};
use serde_json::{json, Value};

use crate::daemon::WalletDaemon;
use crate::error::{BuildError, KeyStoreError};
use crate::storage::WalletStorage;
use crate::wallet::account::Account;
use crate::wallet::builder::{build_payment, CreatedTransaction};
use crate::wallet::unmined::UnminedTx;

use super::handlers::parse_address;
use super::id::route_id;
use super::message::{params, FrontendChannel, Request, RpcError};
use super::notify::Target;

/// Everything the broadcast reply handler needs to finish a send.
#[derive(Clone)]
struct SendContext {
    frontend: FrontendChannel,
    id: Value,
    account: Arc<Account>,
    created: CreatedTransaction,
    comment: Option<String>,
    comment_to: Option<String>,
}

impl<S: WalletStorage> WalletDaemon<S> {
    /// Spend an account's outputs to a single payment address.
    pub(super) async fn send_from(&self, frontend: &FrontendChannel, req: &Request) {
        let from = match params::opt_string(&req.params, 0, "") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let to = match params::string(&req.params, 1, "toaddress") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let amount = match params::number(&req.params, 2, "amount") {
            Ok(a) => a,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        if amount < 0.0 {
            return frontend
                .reply_error(&req.id, RpcError::invalid_parameter("amount must be positive"));
        }
        let minconf = match params::min_confirmations(&req.params, 3) {
            Ok(m) => m,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let comment = params::opt_string(&req.params, 4, "").ok().filter(|s| !s.is_empty());
        let comment_to = params::opt_string(&req.params, 5, "").ok().filter(|s| !s.is_empty());

        let Some(account) = self.account_or_reply(frontend, &req.id, &from).await else {
            return;
        };
        let Some(pairs) = self.recipients(frontend, &req.id, &[(to, amount)]) else {
            return;
        };

        self.send_pairs(frontend, &req.id, account, pairs, minconf, comment, comment_to)
            .await;
    }

    /// Spend an account's outputs to any number of payment addresses.
    pub(super) async fn send_many(&self, frontend: &FrontendChannel, req: &Request) {
        let from = match params::opt_string(&req.params, 0, "") {
            Ok(s) => s,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let Some(Value::Object(amounts)) = req.params.get(1) else {
            return frontend
                .reply_error(&req.id, RpcError::invalid_params("amounts must be an object"));
        };
        let minconf = match params::min_confirmations(&req.params, 2) {
            Ok(m) => m,
            Err(e) => return frontend.reply_error(&req.id, e),
        };
        let comment = params::opt_string(&req.params, 3, "").ok().filter(|s| !s.is_empty());

        let mut raw_pairs = Vec::with_capacity(amounts.len());
        for (address, amount) in amounts {
            let Some(amount) = amount.as_f64() else {
                return frontend
                    .reply_error(&req.id, RpcError::invalid_params("amounts must be numbers"));
            };
            if amount < 0.0 {
                return frontend.reply_error(
                    &req.id,
                    RpcError::invalid_parameter("amount must be positive"),
                );
            }
            raw_pairs.push((address.clone(), amount));
        }

        let Some(account) = self.account_or_reply(frontend, &req.id, &from).await else {
            return;
        };
        let Some(pairs) = self.recipients(frontend, &req.id, &raw_pairs) else {
            return;
        };

        self.send_pairs(frontend, &req.id, account, pairs, minconf, comment, None)
            .await;
    }

    fn recipients(
        &self,
        frontend: &FrontendChannel,
        id: &Value,
        raw: &[(String, f64)],
    ) -> Option<Vec<(bitcoin::Address, Amount)>> {
        let mut pairs = Vec::with_capacity(raw.len());
        for (addr_str, amount) in raw {
            let address = match parse_address(addr_str, self.shared.config.network) {
                Ok(a) => a,
                Err(e) => {
                    frontend.reply_error(id, e);
                    return None;
                }
            };
            let amount = match Amount::from_btc(*amount) {
                Ok(a) => a,
                Err(_) => {
                    frontend.reply_error(id, RpcError::invalid_parameter("invalid amount"));
                    return None;
                }
            };
            pairs.push((address, amount));
        }
        Some(pairs)
    }

    /// Shared tail of `sendfrom` and `sendmany`: build, defer the
    /// broadcast, and install the post-accept handler.
    async fn send_pairs(
        &self,
        frontend: &FrontendChannel,
        id: &Value,
        account: Arc<Account>,
        pairs: Vec<(bitcoin::Address, Amount)>,
        minconf: u32,
        comment: Option<String>,
        comment_to: Option<String>,
    ) {
        let fee = self.shared.fee.get().await;
        let best = self.best_height();

        let created = {
            let mut keystore = account.keystore().lock().await;
            let utxos = account.utxos().lock().await;
            build_payment(&mut keystore, &utxos, &pairs, fee, minconf, best)
        };
        let created = match created {
            Ok(c) => c,
            Err(BuildError::NonPositiveAmount) => {
                return frontend
                    .reply_error(id, RpcError::invalid_parameter("amount must be positive"))
            }
            Err(BuildError::KeyStore(KeyStoreError::Locked)) => {
                return frontend.reply_error(id, RpcError::unlock_needed())
            }
            Err(e) => return frontend.reply_error(id, RpcError::internal(e.to_string())),
        };

        // A freshly allocated change address must be persisted and watched
        // before the transaction referencing it goes out.
        if let Some(change_address) = &created.change_address {
            if let Some(e) = self.sync_account(&account).await {
                return frontend.reply_error(id, e);
            }
            account
                .request_new_tx_notifications(&self.shared.node, &[change_address.to_string()]);
        }

        let n = self.shared.ids.next();
        let msg = json!({
            "jsonrpc": "1.0",
            "method": "sendrawtransaction",
            "params": [serialize_hex(&created.tx)],
            "id": route_id(n, None),
        });
        let bytes = match serde_json::to_vec(&msg) {
            Ok(b) => b,
            Err(e) => return frontend.reply_error(id, RpcError::internal(e.to_string())),
        };

        let daemon = self.clone();
        let ctx = SendContext {
            frontend: frontend.clone(),
            id: id.clone(),
            account,
            created,
            comment,
            comment_to,
        };
        let handler = Box::new(move |outcome: Result<Value, RpcError>| {
            let daemon = daemon.clone();
            let ctx = ctx.clone();
            let fut: super::correlation::HandlerFuture =
                Box::pin(async move { daemon.handle_send_raw_tx_reply(ctx, outcome).await });
            fut
        });

        self.shared.correlations.lock().await.insert_handler(n, handler);
        self.shared.node.send(bytes);
    }

    /// Post-accept bookkeeping, run against the node's reply to the
    /// broadcast. The utxo mutation and the pool insertion both land
    /// before the balance notifications go out, so a frontend reacting to
    /// a notification observes the new state.
    async fn handle_send_raw_tx_reply(
        &self,
        ctx: SendContext,
        outcome: Result<Value, RpcError>,
    ) -> bool {
        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                ctx.frontend.reply_error(&ctx.id, e);
                return true;
            }
        };
        let txid: Txid = match result.as_str().and_then(|s| s.parse().ok()) {
            Some(txid) => txid,
            None => {
                ctx.frontend
                    .reply_error(&ctx.id, RpcError::internal("unexpected sendrawtransaction reply"));
                return true;
            }
        };

        let modified = {
            let mut utxos = ctx.account.utxos().lock().await;
            let mut modified = utxos.remove(&ctx.created.inputs);
            if let Some(change) = &ctx.created.change {
                utxos.push(change.clone());
                modified = true;
            }
            if modified {
                utxos.mark_dirty();
            }
            modified
        };

        if let Some(change) = &ctx.created.change {
            ctx.account
                .request_spent_notification(&self.shared.node, &change.outpoint);
        }

        // The node will not re-relay for us across its own restarts, so the
        // transaction is retained until a block contains it.
        self.shared.unmined.lock().await.insert(
            txid,
            UnminedTx {
                created: ctx.created,
                comment: ctx.comment,
                comment_to: ctx.comment_to,
            },
        );

        if let Some(e) = self.sync_account(&ctx.account).await {
            ctx.frontend.reply_error(&ctx.id, e);
            return true;
        }

        if modified {
            let best = self.best_height();
            let confirmed = ctx.account.balance(1, best).await;
            let total = ctx.account.balance(0, best).await;
            let unconfirmed = total.checked_sub(confirmed).unwrap_or(Amount::ZERO);
            self.shared
                .notifier
                .balance(&Target::All, ctx.account.name(), confirmed.to_btc());
            self.shared.notifier.balance_unconfirmed(
                &Target::All,
                ctx.account.name(),
                unconfirmed.to_btc(),
            );
        }

        tracing::debug!(%txid, "successfully sent transaction");
        ctx.frontend.reply_success(&ctx.id, json!(txid.to_string()));
        true
    }
}
