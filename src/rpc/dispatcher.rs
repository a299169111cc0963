//! Request dispatch: local handling versus deferral to the node, and the
//! demultiplexer for node replies.

use serde_json::Value;

use crate::daemon::WalletDaemon;
use crate::storage::WalletStorage;

use super::correlation::Correlation;
use super::id::{parse_route_id, route_id};
use super::message::{FrontendChannel, Request, RpcError};

impl<S: WalletStorage> WalletDaemon<S> {
    /// Process one request from a frontend. `is_channel` marks long-lived
    /// bidirectional links, which alone may invoke the extension methods.
    ///
    /// Wallet-scoped methods are handled locally; everything else is
    /// deferred to the node so the daemon presents a superset of the
    /// node's RPC surface.
    pub async fn process_request(&self, frontend: &FrontendChannel, msg: &[u8], is_channel: bool) {
        let req: Request = match serde_json::from_slice(msg) {
            Ok(req) => req,
            Err(_) => {
                frontend.reply_error(&Value::Null, RpcError::invalid_request());
                return;
            }
        };
        if req.method.is_empty() {
            frontend.reply_error(&req.id, RpcError::invalid_request());
            return;
        }

        match req.method.as_str() {
            // Standard bitcoind methods handled by the wallet.
            "dumpprivkey" => self.dump_priv_key(frontend, &req).await,
            "dumpwallet" => self.dump_wallet(frontend, &req).await,
            "getaddressesbyaccount" => self.get_addresses_by_account(frontend, &req).await,
            "getbalance" => self.get_balance(frontend, &req).await,
            "getnewaddress" => self.get_new_address(frontend, &req).await,
            "importprivkey" => self.import_priv_key(frontend, &req).await,
            "listaccounts" => self.list_accounts(frontend, &req).await,
            "sendfrom" => self.send_from(frontend, &req).await,
            "sendmany" => self.send_many(frontend, &req).await,
            "settxfee" => self.set_tx_fee(frontend, &req).await,
            "walletlock" => self.wallet_lock(frontend, &req).await,
            "walletpassphrase" => self.wallet_passphrase(frontend, &req).await,

            // Extensions not exclusive to channel frontends.
            "createencryptedwallet" => self.create_encrypted_wallet(frontend, &req).await,

            // Extensions exclusive to channel frontends. On an ordinary
            // frontend these fall through to the node like any unknown
            // method.
            "getbalances" if is_channel => self.get_balances(frontend, &req).await,
            "walletislocked" if is_channel => self.wallet_is_locked(frontend, &req).await,

            _ => self.defer_to_node(frontend, msg).await,
        }
    }

    /// Forward a request the wallet does not handle to the node, rewriting
    /// its identifier so the reply can be routed back to `frontend`.
    pub async fn defer_to_node(&self, frontend: &FrontendChannel, msg: &[u8]) {
        // Only the identifier changes; every other field is forwarded
        // verbatim through the generic envelope.
        let mut envelope: Value = match serde_json::from_slice(msg) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "cannot deserialize deferred request");
                return;
            }
        };
        let Some(obj) = envelope.as_object_mut() else {
            tracing::error!("deferred request is not a JSON object");
            return;
        };

        let n = self.shared.ids.next();
        let original_id = obj.get("id").cloned().unwrap_or(Value::Null);
        obj.insert(
            "id".to_string(),
            Value::String(route_id(n, Some(&original_id))),
        );

        let bytes = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "cannot marshal deferred request");
                return;
            }
        };

        self.shared
            .correlations
            .lock()
            .await
            .insert_route(n, frontend.clone(), original_id);
        self.shared.node.send(bytes);
    }

    /// Demultiplex one reply from the node: run the installed handler, or
    /// restore the original identifier and forward to the recorded
    /// frontend. The record is consumed on first use.
    pub async fn handle_node_message(&self, msg: &[u8]) {
        let mut reply: Value = match serde_json::from_slice(msg) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "discarding unparseable node message");
                return;
            }
        };

        let Some((n, _)) = reply
            .get("id")
            .and_then(Value::as_str)
            .and_then(parse_route_id)
        else {
            tracing::trace!("node message without a routed id");
            return;
        };

        let record = self.shared.correlations.lock().await.take(n);
        match record {
            Some(Correlation::RouteTo {
                frontend,
                original_id,
            }) => {
                if let Some(obj) = reply.as_object_mut() {
                    obj.insert("id".to_string(), original_id);
                }
                if let Ok(bytes) = serde_json::to_vec(&reply) {
                    // A send failure means the frontend went away; the
                    // record is already gone, so nothing leaks.
                    frontend.send(bytes);
                }
            }
            Some(Correlation::Handler(mut handler)) => {
                let outcome = split_reply(&reply);
                let done = handler(outcome).await;
                if !done {
                    self.shared
                        .correlations
                        .lock()
                        .await
                        .reinstall(n, Correlation::Handler(handler));
                }
            }
            None => {
                // Notification streams and stale replies land here.
                tracing::trace!(n, "no correlation record for node message");
            }
        }
    }
}

/// Split a node reply envelope into the handler outcome.
fn split_reply(reply: &Value) -> Result<Value, RpcError> {
    let error = reply.get("error").cloned().unwrap_or(Value::Null);
    if !error.is_null() {
        return Err(serde_json::from_value(error)
            .unwrap_or_else(|_| RpcError::internal("malformed error from btcd")));
    }
    Ok(reply.get("result").cloned().unwrap_or(Value::Null))
}
