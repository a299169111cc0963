//! Wallet state: accounts, key stores, unspent outputs, transaction
//! building, the unmined pool, and the fee setting.

pub mod account;
pub mod builder;
pub mod fee;
pub mod keystore;
pub mod unmined;
pub mod utxo;

pub use account::{Account, AccountRegistry};
pub use builder::{build_payment, CreatedTransaction};
pub use fee::FeeSetting;
pub use keystore::KeyStore;
pub use unmined::{UnminedTx, UnminedTxPool};
pub use utxo::{Utxo, UtxoStore};
