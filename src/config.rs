//! Daemon configuration.

use std::path::PathBuf;

use bitcoin::{Amount, Network};

use crate::error::WalletdError;

const DEFAULT_KEY_POOL_SIZE: usize = 100;
const DEFAULT_NOTIFICATION_BUFFER: usize = 512;

/// Configuration selected once at startup and fixed for the life of the
/// process. The active network governs address encoding everywhere.
#[derive(Debug, Clone)]
pub struct Config {
    /// Active network.
    pub network: Network,

    /// Directory account records are persisted under.
    pub data_dir: PathBuf,

    /// Number of keys pre-generated for each new wallet.
    pub key_pool_size: usize,

    /// Initial miner fee added to self-built transactions.
    pub default_fee: Amount,

    /// When set, a failed persist turns the operation into an `internal`
    /// error instead of being logged and swallowed.
    pub fail_on_persist_error: bool,

    /// Buffer depth of the notification broadcast channel.
    pub notification_buffer: usize,
}

impl Config {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            data_dir: PathBuf::from("./btcwalletd-data"),
            key_pool_size: DEFAULT_KEY_POOL_SIZE,
            default_fee: Amount::ZERO,
            fail_on_persist_error: false,
            notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
        }
    }

    pub fn mainnet() -> Self {
        Self::new(Network::Bitcoin)
    }

    pub fn testnet() -> Self {
        Self::new(Network::Testnet)
    }

    pub fn regtest() -> Self {
        Self::new(Network::Regtest)
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_key_pool_size(mut self, size: usize) -> Self {
        self.key_pool_size = size;
        self
    }

    pub fn with_default_fee(mut self, fee: Amount) -> Self {
        self.default_fee = fee;
        self
    }

    pub fn with_fail_on_persist_error(mut self, fail: bool) -> Self {
        self.fail_on_persist_error = fail;
        self
    }

    pub fn validate(&self) -> Result<(), WalletdError> {
        if self.key_pool_size == 0 {
            return Err(WalletdError::Config(
                "key pool size must be at least 1".to_string(),
            ));
        }
        if self.notification_buffer == 0 {
            return Err(WalletdError::Config(
                "notification buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::regtest()
            .with_key_pool_size(5)
            .with_default_fee(Amount::from_sat(10))
            .with_fail_on_persist_error(true);

        assert_eq!(config.network, Network::Regtest);
        assert_eq!(config.key_pool_size, 5);
        assert_eq!(config.default_fee, Amount::from_sat(10));
        assert!(config.fail_on_persist_error);
        config.validate().unwrap();
    }

    #[test]
    fn zero_key_pool_is_rejected() {
        assert!(Config::regtest().with_key_pool_size(0).validate().is_err());
    }
}
