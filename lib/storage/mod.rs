pub mod rocks;
pub mod types;

use std::sync::Arc;

use thiserror::Error;

use crate::thorclient::types::{TxOut, TxOutItem};

pub use rocks::RocksScannerStorage;
pub use types::{BlockScanStatus, LocalStatus, TxOutLocalItem};

/// Cursor key.
pub const SCAN_POS_KEY: &str = "scan-pos";
pub const BLOCK_STATUS_PREFIX: &str = "block-status-";
pub const TXOUT_PREFIX: &str = "txout-";
pub const TXOUT_ITEM_PREFIX: &str = "txoutitem-";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to open storage at {path}: {source}")]
    Open {
        path: String,
        source: rocksdb::Error,
    },
    #[error("storage operation on {key} failed: {source}")]
    Rocks {
        key: String,
        source: rocksdb::Error,
    },
    #[error("failed to encode or decode {key}: {source}")]
    Json {
        key: String,
        source: serde_json::Error,
    },
    #[error("invalid value stored under {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("storage is closed")]
    Closed,
}

/// Durable scan cursor and per-height status ledger.
///
/// Implementations must tolerate concurrent use from the scanner, the retry loop and the
/// block processor.
pub trait ScannerStorage: Send + Sync {
    /// Returns the last persisted cursor, or the configured start height if none was written.
    fn get_scan_pos(&self) -> Result<i64, StorageError>;

    /// Persists the cursor; the write is durable once this returns.
    fn set_scan_pos(&self, height: i64) -> Result<(), StorageError>;

    fn set_block_scanner_status(
        &self,
        height: i64,
        status: BlockScanStatus,
    ) -> Result<(), StorageError>;

    /// Deleting an absent record is not an error.
    fn remove_block_status(&self, height: i64) -> Result<(), StorageError>;

    /// Lists recorded heights in store iteration order (lexicographic by key, not numeric).
    fn get_blocks_for_retry(&self, failed_only: bool) -> Result<Vec<i64>, StorageError>;

    fn close(&self) -> Result<(), StorageError>;
}

/// Local ledger of `TxOut` work handed to the signer.
pub trait TxOutStore: Send + Sync {
    /// Ledger entry stored for `height`, if any.
    fn get_txout(&self, height: i64) -> Result<Option<TxOutLocalItem>, StorageError>;

    /// Replaces the ledger entry for `tx_out.height`.
    fn set_txout_status(&self, tx_out: &TxOut, status: LocalStatus) -> Result<(), StorageError>;

    fn remove_txout(&self, tx_out: &TxOut) -> Result<(), StorageError>;

    fn get_txouts_for_retry(&self, failed_only: bool) -> Result<Vec<TxOut>, StorageError>;

    fn set_txout_item(&self, item: &TxOutItem, height: i64) -> Result<(), StorageError>;

    fn has_txout_item(&self, item: &TxOutItem, height: i64) -> Result<bool, StorageError>;
}

impl<T> ScannerStorage for Arc<T>
where
    T: ScannerStorage + ?Sized,
{
    fn get_scan_pos(&self) -> Result<i64, StorageError> {
        (**self).get_scan_pos()
    }

    fn set_scan_pos(&self, height: i64) -> Result<(), StorageError> {
        (**self).set_scan_pos(height)
    }

    fn set_block_scanner_status(
        &self,
        height: i64,
        status: BlockScanStatus,
    ) -> Result<(), StorageError> {
        (**self).set_block_scanner_status(height, status)
    }

    fn remove_block_status(&self, height: i64) -> Result<(), StorageError> {
        (**self).remove_block_status(height)
    }

    fn get_blocks_for_retry(&self, failed_only: bool) -> Result<Vec<i64>, StorageError> {
        (**self).get_blocks_for_retry(failed_only)
    }

    fn close(&self) -> Result<(), StorageError> {
        (**self).close()
    }
}

impl<T> TxOutStore for Arc<T>
where
    T: TxOutStore + ?Sized,
{
    fn get_txout(&self, height: i64) -> Result<Option<TxOutLocalItem>, StorageError> {
        (**self).get_txout(height)
    }

    fn set_txout_status(&self, tx_out: &TxOut, status: LocalStatus) -> Result<(), StorageError> {
        (**self).set_txout_status(tx_out, status)
    }

    fn remove_txout(&self, tx_out: &TxOut) -> Result<(), StorageError> {
        (**self).remove_txout(tx_out)
    }

    fn get_txouts_for_retry(&self, failed_only: bool) -> Result<Vec<TxOut>, StorageError> {
        (**self).get_txouts_for_retry(failed_only)
    }

    fn set_txout_item(&self, item: &TxOutItem, height: i64) -> Result<(), StorageError> {
        (**self).set_txout_item(item, height)
    }

    fn has_txout_item(&self, item: &TxOutItem, height: i64) -> Result<bool, StorageError> {
        (**self).has_txout_item(item, height)
    }
}

pub fn block_status_key(height: i64) -> String {
    format!("{BLOCK_STATUS_PREFIX}{height}")
}

pub fn txout_key(height: i64) -> String {
    format!("{TXOUT_PREFIX}{height}")
}
