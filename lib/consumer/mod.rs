//! Signer-side handling of scanner output.
//!
//! Heights can be delivered more than once (a failed status removal, a restart between emit
//! and cursor write), so every consumer must tolerate repeats.

use crate::storage::{LocalStatus, StorageError, TxOutStore};
use crate::thorclient::types::{Keygens, TxOut, TxOutItem};

/// Records each `TxOut` in the local ledger and filters out items it has already seen.
pub struct TxOutRecorder<S> {
    store: S,
}

impl<S: TxOutStore> TxOutRecorder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the items of `tx_out` that were not recorded before and marks them as seen.
    /// Fresh items are appended to the height's ledger entry, so `TxOut`s from different
    /// pubkeys at one height accumulate. A `TxOut` made only of known items writes nothing.
    pub fn record(&self, tx_out: &TxOut) -> Result<Vec<TxOutItem>, StorageError> {
        let mut fresh: Vec<TxOutItem> = Vec::new();
        for item in &tx_out.tx_array {
            if fresh.contains(item) || self.store.has_txout_item(item, tx_out.height)? {
                continue;
            }
            fresh.push(item.clone());
        }
        if fresh.is_empty() {
            return Ok(fresh);
        }

        let mut merged = match self.store.get_txout(tx_out.height)? {
            Some(existing) => existing.tx_out,
            None => TxOut {
                height: tx_out.height,
                tx_array: Vec::new(),
            },
        };
        for item in &fresh {
            if !merged.tx_array.contains(item) {
                merged.tx_array.push(item.clone());
            }
        }
        self.store
            .set_txout_status(&merged, LocalStatus::Processing)?;
        for item in &fresh {
            self.store.set_txout_item(item, tx_out.height)?;
        }
        Ok(fresh)
    }

    /// Ledger entries not yet signed.
    pub fn pending(&self) -> Result<Vec<TxOut>, StorageError> {
        self.store.get_txouts_for_retry(false)
    }

    /// Drains `txouts` until every sender is gone.
    pub async fn run(self, txouts: flume::Receiver<TxOut>) {
        while let Ok(tx_out) = txouts.recv_async().await {
            match self.record(&tx_out) {
                Ok(fresh) if fresh.is_empty() => tracing::debug!(
                    event = "txout_duplicate",
                    height = tx_out.height,
                    "all tx out items already recorded"
                ),
                Ok(fresh) => {
                    for item in &fresh {
                        tracing::info!(
                            event = "txout_recorded",
                            height = tx_out.height,
                            chain = %item.chain,
                            to = %item.to,
                            asset = %item.coin.asset,
                            amount = item.coin.amount,
                            "recorded tx out item for signing"
                        );
                    }
                }
                Err(err) => tracing::error!(
                    event = "txout_record_failed",
                    height = tx_out.height,
                    error = %err,
                    "failed to record tx out"
                ),
            }
        }
        tracing::info!(event = "txout_consumer_stopped", "tx out channel closed");
    }
}

/// Logs every keygen ceremony until every sender is gone.
pub async fn log_keygens(keygens: flume::Receiver<Keygens>) {
    while let Ok(batch) = keygens.recv_async().await {
        for members in &batch.keygens {
            tracing::info!(
                event = "keygen_received",
                height = batch.height,
                members = members.len(),
                "keygen ceremony scheduled"
            );
        }
    }
    tracing::info!(event = "keygen_consumer_stopped", "keygen channel closed");
}
