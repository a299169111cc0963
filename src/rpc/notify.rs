//! Account notification fan-out.
//!
//! Notifications are replies whose identifier is a distinguished string
//! literal per kind. Per-frontend variants target one reply channel; the
//! broadcast variants go out on a master channel that every connected
//! frontend forwards to its own link. Notifications never fail: send and
//! serialization errors are silently dropped.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use super::message::{FrontendChannel, Reply};

/// Identifier of wallet lock-state notifications.
pub const NTFN_LOCK_STATE: &str = "btcwallet:newwalletlockstate";
/// Identifier of confirmed-balance notifications.
pub const NTFN_BALANCE: &str = "btcwallet:accountbalance";
/// Identifier of unconfirmed-balance notifications.
pub const NTFN_BALANCE_UNCONFIRMED: &str = "btcwallet:accountbalanceunconfirmed";

const DEFAULT_BROADCAST_CAPACITY: usize = 512;

/// Envelope wrapping any account-scoped notification payload.
#[derive(Debug, Clone, Serialize)]
pub struct AccountNtfn<T: Serialize> {
    pub account: String,
    pub notification: T,
}

/// Where a notification goes: one frontend, or every connected frontend.
pub enum Target<'a> {
    Frontend(&'a FrontendChannel),
    All,
}

/// Formats notifications and fans them out.
///
/// Built on a broadcast channel: subscribers that lag past the buffer miss
/// events, and sending with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct Notifier {
    master: broadcast::Sender<Vec<u8>>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (master, _) = broadcast::channel(capacity);
        Self {
            master,
        }
    }

    /// Subscribe to the master channel. Every connected frontend holds one
    /// receiver and pumps it to its own link.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.master.subscribe()
    }

    /// Tell all frontends the wallet for `account` was just locked or
    /// unlocked.
    pub fn lock_state_changed(&self, account: &str, locked: bool) {
        self.emit(Target::All, NTFN_LOCK_STATE, account, locked);
    }

    /// Send a confirmed-balance notification.
    pub fn balance(&self, target: &Target<'_>, account: &str, balance: f64) {
        self.emit_to(target, NTFN_BALANCE, account, balance);
    }

    /// Send an unconfirmed-balance (total minus confirmed) notification.
    pub fn balance_unconfirmed(&self, target: &Target<'_>, account: &str, balance: f64) {
        self.emit_to(target, NTFN_BALANCE_UNCONFIRMED, account, balance);
    }

    fn emit<T: Serialize>(&self, target: Target<'_>, id: &str, account: &str, payload: T) {
        self.emit_to(&target, id, account, payload);
    }

    fn emit_to<T: Serialize>(&self, target: &Target<'_>, id: &str, account: &str, payload: T) {
        let ntfn = AccountNtfn {
            account: account.to_string(),
            notification: payload,
        };
        let result = match serde_json::to_value(&ntfn) {
            Ok(v) => v,
            Err(_) => return,
        };
        let reply = Reply {
            result,
            error: None,
            id: Value::String(id.to_string()),
        };
        let Ok(bytes) = serde_json::to_vec(&reply) else {
            return;
        };
        match target {
            Target::Frontend(frontend) => {
                frontend.send(bytes);
            }
            Target::All => {
                let _ = self.master.send(bytes);
            }
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn lock_state_reaches_every_subscriber() {
        let notifier = Notifier::new(16);
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();

        notifier.lock_state_changed("", true);

        for rx in [&mut rx1, &mut rx2] {
            let bytes = rx.recv().await.unwrap();
            let v: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(v["id"], json!(NTFN_LOCK_STATE));
            assert_eq!(v["result"]["account"], json!(""));
            assert_eq!(v["result"]["notification"], json!(true));
        }
    }

    #[tokio::test]
    async fn balance_notification_targets_one_frontend() {
        let notifier = Notifier::new(16);
        let mut master_rx = notifier.subscribe();
        let (frontend, mut rx) = FrontendChannel::new();

        notifier.balance(&Target::Frontend(&frontend), "savings", 1.5);

        let bytes = rx.recv().await.unwrap();
        let v: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(v["id"], json!(NTFN_BALANCE));
        assert_eq!(v["result"]["account"], json!("savings"));
        assert_eq!(v["result"]["notification"], json!(1.5));
        assert!(master_rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_without_subscribers_is_silent() {
        let notifier = Notifier::new(16);
        notifier.lock_state_changed("", false);
        notifier.balance(&Target::All, "", 0.0);
    }
}
