//! Unspent-output tracking for an account.

use bitcoin::{Address, Amount, OutPoint, Txid};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// A spendable output owned by exactly one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub amount: Amount,
    pub address: Address,
    /// Height of the block containing the output; `None` while unconfirmed.
    pub height: Option<u32>,
}

impl Utxo {
    /// Confirmation count against the current best height. Unconfirmed
    /// outputs and outputs above the best height (a stale view during
    /// reorg) count zero.
    pub fn confirmations(&self, best_height: u32) -> u32 {
        match self.height {
            Some(h) if h <= best_height => best_height - h + 1,
            _ => 0,
        }
    }
}

/// Ordered set of unspent outputs plus a divergence-from-disk flag.
#[derive(Debug, Default)]
pub struct UtxoStore {
    utxos: Vec<Utxo>,
    dirty: bool,
}

impl UtxoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance at the requested confirmation depth. A depth of zero
    /// includes unconfirmed outputs.
    pub fn balance(&self, min_confirmations: u32, best_height: u32) -> Amount {
        self.utxos
            .iter()
            .filter(|u| u.confirmations(best_height) >= min_confirmations)
            .fold(Amount::ZERO, |acc, u| acc + u.amount)
    }

    /// Append an output.
    pub fn push(&mut self, utxo: Utxo) {
        self.utxos.push(utxo);
    }

    /// Remove every output spent by `inputs`, by outpoint. Returns whether
    /// anything was removed.
    pub fn remove(&mut self, inputs: &[Utxo]) -> bool {
        let before = self.utxos.len();
        self.utxos
            .retain(|u| !inputs.iter().any(|spent| spent.outpoint == u.outpoint));
        before != self.utxos.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.iter()
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.iter().any(|u| &u.outpoint == outpoint)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn to_record(&self) -> UtxoStoreRecord {
        UtxoStoreRecord {
            utxos: self
                .utxos
                .iter()
                .map(|u| UtxoRecord {
                    txid: u.outpoint.txid,
                    vout: u.outpoint.vout,
                    amount: u.amount.to_sat(),
                    address: u.address.to_string(),
                    height: u.height,
                })
                .collect(),
        }
    }

    pub fn from_record(
        record: &UtxoStoreRecord,
        network: bitcoin::Network,
    ) -> Result<Self, StorageError> {
        let mut utxos = Vec::with_capacity(record.utxos.len());
        for r in &record.utxos {
            let address = r
                .address
                .parse::<Address<bitcoin::address::NetworkUnchecked>>()
                .map_err(|e| StorageError::Corruption(format!("utxo address: {e}")))?
                .require_network(network)
                .map_err(|e| StorageError::Corruption(format!("utxo address: {e}")))?;
            utxos.push(Utxo {
                outpoint: OutPoint {
                    txid: r.txid,
                    vout: r.vout,
                },
                amount: Amount::from_sat(r.amount),
                address,
                height: r.height,
            });
        }
        Ok(Self {
            utxos,
            dirty: false,
        })
    }
}

/// Serializable form of a [`UtxoStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoStoreRecord {
    pub utxos: Vec<UtxoRecord>,
}

/// Serializable form of one unspent output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub txid: Txid,
    pub vout: u32,
    pub amount: u64,
    pub address: String,
    pub height: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::Network;

    fn test_utxo(n: u8, sats: u64, height: Option<u32>) -> Utxo {
        let secp = bitcoin::secp256k1::Secp256k1::new();
        let secret = bitcoin::secp256k1::SecretKey::from_slice(&[n.max(1); 32]).unwrap();
        let pubkey = bitcoin::PrivateKey::new(secret, Network::Regtest).public_key(&secp);
        Utxo {
            outpoint: OutPoint {
                txid: Txid::from_byte_array([n; 32]),
                vout: 0,
            },
            amount: Amount::from_sat(sats),
            address: Address::p2pkh(pubkey.pubkey_hash(), Network::Regtest),
            height,
        }
    }

    #[test]
    fn confirmations_count_from_inclusion_height() {
        assert_eq!(test_utxo(1, 10, Some(100)).confirmations(100), 1);
        assert_eq!(test_utxo(1, 10, Some(95)).confirmations(100), 6);
        assert_eq!(test_utxo(1, 10, None).confirmations(100), 0);
        assert_eq!(test_utxo(1, 10, Some(101)).confirmations(100), 0);
    }

    #[test]
    fn balance_honors_confirmation_depth() {
        let mut store = UtxoStore::new();
        store.push(test_utxo(1, 50, Some(90)));
        store.push(test_utxo(2, 30, Some(100)));
        store.push(test_utxo(3, 20, None));

        assert_eq!(store.balance(0, 100), Amount::from_sat(100));
        assert_eq!(store.balance(1, 100), Amount::from_sat(80));
        assert_eq!(store.balance(6, 100), Amount::from_sat(50));
        assert_eq!(store.balance(20, 100), Amount::ZERO);
    }

    #[test]
    fn remove_matches_by_outpoint() {
        let mut store = UtxoStore::new();
        let a = test_utxo(1, 50, Some(90));
        let b = test_utxo(2, 30, Some(100));
        store.push(a.clone());
        store.push(b.clone());

        assert!(store.remove(std::slice::from_ref(&a)));
        assert!(!store.contains(&a.outpoint));
        assert!(store.contains(&b.outpoint));
        assert!(!store.remove(&[a]));
    }

    #[test]
    fn record_round_trip() {
        let mut store = UtxoStore::new();
        store.push(test_utxo(1, 50, Some(90)));
        store.push(test_utxo(2, 30, None));

        let restored = UtxoStore::from_record(&store.to_record(), Network::Regtest).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(
            restored.iter().cloned().collect::<Vec<_>>(),
            store.iter().cloned().collect::<Vec<_>>()
        );
        assert!(!restored.is_dirty());
    }
}
