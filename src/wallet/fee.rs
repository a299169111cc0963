//! Process-wide miner-fee setting.

use bitcoin::Amount;
use tokio::sync::Mutex;

/// The fee added to self-built transactions. Read on every send, written
/// only by the `settxfee` handler.
///
/// TODO: price fees per kilobyte of transaction weight instead of a flat
/// amount per transaction.
#[derive(Debug)]
pub struct FeeSetting {
    amount: Mutex<Amount>,
}

impl FeeSetting {
    pub fn new(initial: Amount) -> Self {
        Self {
            amount: Mutex::new(initial),
        }
    }

    pub async fn get(&self) -> Amount {
        *self.amount.lock().await
    }

    pub async fn set(&self, amount: Amount) {
        *self.amount.lock().await = amount;
    }
}
