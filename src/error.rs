//! Error types for the wallet daemon.

use std::io;
use thiserror::Error;

use bitcoin::Amount;

/// Main error type for the wallet daemon.
#[derive(Debug, Error)]
pub enum WalletdError {
    #[error("Key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the encrypted key store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// The operation requires the decryption key, but the store is locked.
    #[error("wallet is locked")]
    Locked,

    /// The store holds no key for the requested address.
    #[error("address not found")]
    AddressNotFound,

    /// The supplied passphrase did not decrypt the store.
    #[error("incorrect passphrase")]
    IncorrectPassphrase,

    /// Every pre-generated key has been handed out.
    #[error("address pool exhausted")]
    AddressPoolExhausted,

    /// A key failed to decode or re-encrypt.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Key derivation or cipher failure.
    #[error("crypto failure: {0}")]
    Crypto(String),
}

/// Errors from the node link.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// An operation needed the node synchronously and it is not there.
    #[error("btcd disconnected")]
    Disconnected,
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),
}

/// Errors from building a payment transaction.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A recipient amount was zero (negative amounts never reach the builder).
    #[error("amount must be positive")]
    NonPositiveAmount,

    /// No combination of eligible unspent outputs covers the target.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: Amount, need: Amount },

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    /// Sighash computation failed for an input.
    #[error("signing failed: {0}")]
    Signing(String),
}

/// Type alias for Result with WalletdError.
pub type Result<T> = std::result::Result<T, WalletdError>;

/// Type alias for storage operation results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
