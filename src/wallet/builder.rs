//! Payment-transaction construction for the send pipeline.
//!
//! Given the recipients and the current fee, selects eligible unspent
//! outputs in store order, builds and signs a transaction paying each
//! recipient, and routes any residual value to a freshly allocated account
//! address as change.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder as ScriptBuilder, PushBytesBuf};
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Address, Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

use crate::error::BuildError;
use crate::wallet::keystore::KeyStore;
use crate::wallet::utxo::{Utxo, UtxoStore};

/// The product of building a send operation, retained until the node
/// accepts or rejects the broadcast.
#[derive(Debug, Clone)]
pub struct CreatedTransaction {
    /// The fully signed transaction.
    pub tx: Transaction,
    /// Outputs consumed as inputs, to be removed from the account's store
    /// once the node accepts the broadcast.
    pub inputs: Vec<Utxo>,
    /// Change output to append to the store, if any.
    pub change: Option<Utxo>,
    /// Address the change was routed to, if any.
    pub change_address: Option<Address>,
}

/// Build and sign a transaction paying `recipients`, spending outputs with
/// at least `min_confirmations` confirmations against `best_height`.
pub fn build_payment(
    keystore: &mut KeyStore,
    utxos: &UtxoStore,
    recipients: &[(Address, Amount)],
    fee: Amount,
    min_confirmations: u32,
    best_height: u32,
) -> Result<CreatedTransaction, BuildError> {
    if keystore.is_locked() {
        return Err(BuildError::KeyStore(crate::error::KeyStoreError::Locked));
    }

    let mut target = fee;
    for (_, amount) in recipients {
        if *amount == Amount::ZERO {
            return Err(BuildError::NonPositiveAmount);
        }
        target += *amount;
    }

    // Select eligible outputs in store order until the target is covered.
    let mut selected: Vec<Utxo> = Vec::new();
    let mut in_total = Amount::ZERO;
    for utxo in utxos.iter() {
        if utxo.confirmations(best_height) < min_confirmations {
            continue;
        }
        selected.push(utxo.clone());
        in_total += utxo.amount;
        if in_total >= target {
            break;
        }
    }
    if in_total < target {
        return Err(BuildError::InsufficientFunds {
            have: in_total,
            need: target,
        });
    }

    let mut output: Vec<TxOut> = recipients
        .iter()
        .map(|(address, amount)| TxOut {
            value: *amount,
            script_pubkey: address.script_pubkey(),
        })
        .collect();

    let change_amount = in_total - target;
    let change_address = if change_amount > Amount::ZERO {
        let address = keystore.next_unused_address()?;
        output.push(TxOut {
            value: change_amount,
            script_pubkey: address.script_pubkey(),
        });
        Some(address)
    } else {
        None
    };
    let change_vout = (output.len() - 1) as u32;

    let input: Vec<TxIn> = selected
        .iter()
        .map(|utxo| TxIn {
            previous_output: utxo.outpoint,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        })
        .collect();

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    };

    let script_sigs = sign_inputs(keystore, &tx, &selected)?;
    for (txin, script_sig) in tx.input.iter_mut().zip(script_sigs) {
        txin.script_sig = script_sig;
    }

    let txid = tx.compute_txid();
    let change = change_address.as_ref().map(|address| Utxo {
        outpoint: OutPoint {
            txid,
            vout: change_vout,
        },
        amount: change_amount,
        address: address.clone(),
        height: None,
    });

    Ok(CreatedTransaction {
        tx,
        inputs: selected,
        change,
        change_address,
    })
}

/// Produce a legacy P2PKH signature script for every input.
fn sign_inputs(
    keystore: &KeyStore,
    tx: &Transaction,
    spent: &[Utxo],
) -> Result<Vec<ScriptBuf>, BuildError> {
    let secp = Secp256k1::new();
    let cache = SighashCache::new(tx);
    let mut script_sigs = Vec::with_capacity(spent.len());

    for (index, utxo) in spent.iter().enumerate() {
        let (secret, pubkey) = keystore.keys_for_address(&utxo.address)?;
        let sighash = cache
            .legacy_signature_hash(
                index,
                &utxo.address.script_pubkey(),
                EcdsaSighashType::All.to_u32(),
            )
            .map_err(|e| BuildError::Signing(e.to_string()))?;
        let message = Message::from_digest(sighash.to_byte_array());
        let signature = secp.sign_ecdsa(&message, &secret);

        let mut sig_bytes = signature.serialize_der().to_vec();
        sig_bytes.push(EcdsaSighashType::All.to_u32() as u8);
        let sig_push = PushBytesBuf::try_from(sig_bytes)
            .map_err(|e| BuildError::Signing(e.to_string()))?;

        script_sigs.push(
            ScriptBuilder::new()
                .push_slice(sig_push)
                .push_key(&pubkey)
                .into_script(),
        );
    }

    Ok(script_sigs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeyStoreError;
    use crate::types::BlockStamp;
    use bitcoin::{Network, Txid};

    const BEST: u32 = 100;

    fn funded_account(amounts_and_heights: &[(u64, Option<u32>)]) -> (KeyStore, UtxoStore) {
        let mut keystore = KeyStore::create(
            Network::Regtest,
            "test",
            "pass",
            BlockStamp::at_height(1),
            10,
        )
        .unwrap();
        keystore.unlock("pass").unwrap();

        let mut utxos = UtxoStore::new();
        for (i, (sats, height)) in amounts_and_heights.iter().enumerate() {
            let address = keystore.next_unused_address().unwrap();
            utxos.push(Utxo {
                outpoint: OutPoint {
                    txid: Txid::from_byte_array([i as u8 + 1; 32]),
                    vout: 0,
                },
                amount: Amount::from_sat(*sats),
                address,
                height: *height,
            });
        }
        (keystore, utxos)
    }

    fn recipient(keystore: &mut KeyStore) -> Address {
        keystore.next_unused_address().unwrap()
    }

    #[test]
    fn pays_recipient_and_routes_change() {
        let (mut keystore, utxos) = funded_account(&[(60, Some(90)), (60, Some(95))]);
        let to = recipient(&mut keystore);

        let created = build_payment(
            &mut keystore,
            &utxos,
            &[(to.clone(), Amount::from_sat(100))],
            Amount::from_sat(10),
            1,
            BEST,
        )
        .unwrap();

        assert_eq!(created.inputs.len(), 2);
        assert_eq!(created.tx.output.len(), 2);
        assert_eq!(created.tx.output[0].value, Amount::from_sat(100));
        assert_eq!(created.tx.output[0].script_pubkey, to.script_pubkey());

        let change = created.change.expect("change output");
        assert_eq!(change.amount, Amount::from_sat(10));
        assert_eq!(change.height, None);
        assert_eq!(change.outpoint.txid, created.tx.compute_txid());
        assert_eq!(created.tx.output[1].value, Amount::from_sat(10));

        // Consumed value fully accounted for: recipients + fee + change.
        let consumed: Amount = created
            .inputs
            .iter()
            .fold(Amount::ZERO, |acc, u| acc + u.amount);
        assert_eq!(consumed, Amount::from_sat(100 + 10 + 10));

        // Every input carries a signature script.
        assert!(created.tx.input.iter().all(|i| !i.script_sig.is_empty()));
    }

    #[test]
    fn exact_cover_produces_no_change() {
        let (mut keystore, utxos) = funded_account(&[(110, Some(90))]);
        let to = recipient(&mut keystore);

        let created = build_payment(
            &mut keystore,
            &utxos,
            &[(to, Amount::from_sat(100))],
            Amount::from_sat(10),
            1,
            BEST,
        )
        .unwrap();

        assert!(created.change.is_none());
        assert!(created.change_address.is_none());
        assert_eq!(created.tx.output.len(), 1);
    }

    #[test]
    fn unconfirmed_outputs_respect_minconf() {
        let (mut keystore, utxos) = funded_account(&[(100, None)]);
        let to = recipient(&mut keystore);

        let err = build_payment(
            &mut keystore,
            &utxos,
            &[(to.clone(), Amount::from_sat(50))],
            Amount::ZERO,
            1,
            BEST,
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::InsufficientFunds { .. }));

        // The same spend succeeds when unconfirmed outputs are eligible.
        build_payment(
            &mut keystore,
            &utxos,
            &[(to, Amount::from_sat(50))],
            Amount::ZERO,
            0,
            BEST,
        )
        .unwrap();
    }

    #[test]
    fn zero_amount_is_rejected() {
        let (mut keystore, utxos) = funded_account(&[(100, Some(90))]);
        let to = recipient(&mut keystore);

        let err = build_payment(&mut keystore, &utxos, &[(to, Amount::ZERO)], Amount::ZERO, 1, BEST)
            .unwrap_err();
        assert!(matches!(err, BuildError::NonPositiveAmount));
    }

    #[test]
    fn locked_store_cannot_build() {
        let (mut keystore, utxos) = funded_account(&[(100, Some(90))]);
        let to = recipient(&mut keystore);
        keystore.lock().unwrap();

        let err = build_payment(
            &mut keystore,
            &utxos,
            &[(to, Amount::from_sat(10))],
            Amount::ZERO,
            1,
            BEST,
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::KeyStore(KeyStoreError::Locked)));
    }
}
