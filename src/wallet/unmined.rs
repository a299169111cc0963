//! Locally broadcast transactions awaiting block inclusion.
//!
//! The node cannot be trusted to keep relaying a transaction across its own
//! restarts, so the daemon retains everything it has broadcast until the
//! transaction is observed in a block, and resends the pool after the node
//! link is re-established. Removal on block inclusion happens in the chain
//! observer, not here.

use std::collections::HashMap;

use bitcoin::{Transaction, Txid};

use super::builder::CreatedTransaction;

/// A broadcast transaction the node has accepted but no block contains yet.
#[derive(Debug, Clone)]
pub struct UnminedTx {
    pub created: CreatedTransaction,
    /// Sender-side comment supplied with the request, if any.
    pub comment: Option<String>,
    /// Recipient-side comment supplied with the request, if any.
    pub comment_to: Option<String>,
}

/// Pool of unmined transactions keyed by transaction id.
#[derive(Debug, Default)]
pub struct UnminedTxPool {
    entries: HashMap<Txid, UnminedTx>,
}

impl UnminedTxPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, txid: Txid, entry: UnminedTx) {
        self.entries.insert(txid, entry);
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the raw transactions, for rebroadcast after a node
    /// reconnect.
    pub fn raw_transactions(&self) -> Vec<(Txid, Transaction)> {
        self.entries
            .iter()
            .map(|(txid, entry)| (*txid, entry.created.tx.clone()))
            .collect()
    }
}
