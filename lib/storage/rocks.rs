use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use rocksdb::{Direction, IteratorMode, Options, WriteOptions, DB};
use sha2::{Digest, Sha256};

use super::types::{BlockScanStatus, LocalStatus, TxOutLocalItem};
use super::{
    block_status_key, txout_key, ScannerStorage, StorageError, TxOutStore, BLOCK_STATUS_PREFIX,
    SCAN_POS_KEY, TXOUT_ITEM_PREFIX, TXOUT_PREFIX,
};
use crate::config::DEFAULT_SIGNER_DB_FOLDER;
use crate::thorclient::types::{TxOut, TxOutItem};

const PRESENCE_MARKER: [u8; 1] = [0x01];

/// Scanner and signer ledger backed by an embedded RocksDB instance.
pub struct RocksScannerStorage {
    db: RwLock<Option<DB>>,
    path: PathBuf,
    start_height: i64,
}

impl RocksScannerStorage {
    /// Opens (or creates) the store at `path`; an empty path falls back to `signer_data`.
    pub fn open(path: impl AsRef<Path>, start_height: i64) -> Result<Self, StorageError> {
        let path = if path.as_ref().as_os_str().is_empty() {
            PathBuf::from(DEFAULT_SIGNER_DB_FOLDER)
        } else {
            path.as_ref().to_path_buf()
        };

        let mut options = Options::default();
        options.create_if_missing(true);
        let db = DB::open(&options, &path).map_err(|source| StorageError::Open {
            path: path.display().to_string(),
            source,
        })?;

        tracing::info!(
            event = "scanner_storage_opened",
            path = %path.display(),
            start_height,
            "opened scanner storage"
        );

        Ok(Self {
            db: RwLock::new(Some(db)),
            path,
            start_height,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_db<T>(
        &self,
        op: impl FnOnce(&DB) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = self.db.read().unwrap_or_else(PoisonError::into_inner);
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        op(db)
    }

    fn put(&self, key: &str, value: &[u8], sync: bool) -> Result<(), StorageError> {
        self.with_db(|db| {
            let mut write_options = WriteOptions::default();
            write_options.set_sync(sync);
            db.put_opt(key.as_bytes(), value, &write_options)
                .map_err(|source| rocks_err(key, source))
        })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.with_db(|db| db.get(key.as_bytes()).map_err(|source| rocks_err(key, source)))
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.with_db(|db| db.delete(key.as_bytes()).map_err(|source| rocks_err(key, source)))
    }

    /// Collects every entry whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        self.with_db(|db| {
            let mut entries = Vec::new();
            let iter = db.iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward));
            for entry in iter {
                let (key, value) = entry.map_err(|source| rocks_err(prefix, source))?;
                if !key.starts_with(prefix.as_bytes()) {
                    break;
                }
                let key = String::from_utf8(key.into_vec()).map_err(|err| {
                    StorageError::InvalidValue {
                        key: prefix.to_string(),
                        reason: format!("non utf-8 key: {err}"),
                    }
                })?;
                entries.push((key, value.into_vec()));
            }
            Ok(entries)
        })
    }
}

impl ScannerStorage for RocksScannerStorage {
    fn get_scan_pos(&self) -> Result<i64, StorageError> {
        match self.get(SCAN_POS_KEY)? {
            None => Ok(self.start_height),
            Some(buf) => {
                Cursor::new(buf.as_slice())
                    .read_i64::<BigEndian>()
                    .map_err(|err| StorageError::InvalidValue {
                        key: SCAN_POS_KEY.to_string(),
                        reason: format!("expected 8 byte height: {err}"),
                    })
            }
        }
    }

    fn set_scan_pos(&self, height: i64) -> Result<(), StorageError> {
        let mut buf = Vec::with_capacity(8);
        buf.write_i64::<BigEndian>(height)
            .map_err(|err| StorageError::InvalidValue {
                key: SCAN_POS_KEY.to_string(),
                reason: err.to_string(),
            })?;
        self.put(SCAN_POS_KEY, &buf, true)
    }

    fn set_block_scanner_status(
        &self,
        height: i64,
        status: BlockScanStatus,
    ) -> Result<(), StorageError> {
        self.put(&block_status_key(height), &[status.as_byte()], false)
    }

    fn remove_block_status(&self, height: i64) -> Result<(), StorageError> {
        self.delete(&block_status_key(height))
    }

    fn get_blocks_for_retry(&self, failed_only: bool) -> Result<Vec<i64>, StorageError> {
        let mut heights = Vec::new();
        for (key, value) in self.scan_prefix(BLOCK_STATUS_PREFIX)? {
            let status = match value.as_slice() {
                [code] => BlockScanStatus::try_from(*code).map_err(|code| {
                    StorageError::InvalidValue {
                        key: key.clone(),
                        reason: format!("unknown block status code {code}"),
                    }
                })?,
                _ => {
                    return Err(StorageError::InvalidValue {
                        key,
                        reason: format!("expected 1 status byte, found {}", value.len()),
                    })
                }
            };
            if failed_only && status != BlockScanStatus::Failed {
                continue;
            }
            let height = key[BLOCK_STATUS_PREFIX.len()..]
                .parse::<i64>()
                .map_err(|err| StorageError::InvalidValue {
                    key: key.clone(),
                    reason: format!("unparseable height: {err}"),
                })?;
            heights.push(height);
        }
        Ok(heights)
    }

    fn close(&self) -> Result<(), StorageError> {
        let mut guard = self.db.write().unwrap_or_else(PoisonError::into_inner);
        match guard.take() {
            Some(db) => {
                drop(db);
                tracing::info!(
                    event = "scanner_storage_closed",
                    path = %self.path.display(),
                    "closed scanner storage"
                );
                Ok(())
            }
            None => Err(StorageError::Closed),
        }
    }
}

impl TxOutStore for RocksScannerStorage {
    fn get_txout(&self, height: i64) -> Result<Option<TxOutLocalItem>, StorageError> {
        let key = txout_key(height);
        match self.get(&key)? {
            Some(buf) if !buf.is_empty() => serde_json::from_slice(&buf)
                .map(Some)
                .map_err(|source| StorageError::Json { key, source }),
            _ => Ok(None),
        }
    }

    fn set_txout_status(&self, tx_out: &TxOut, status: LocalStatus) -> Result<(), StorageError> {
        let key = txout_key(tx_out.height);
        let item = TxOutLocalItem {
            tx_out: tx_out.clone(),
            status,
        };
        let buf = serde_json::to_vec(&item).map_err(|source| StorageError::Json {
            key: key.clone(),
            source,
        })?;
        self.put(&key, &buf, false)
    }

    fn remove_txout(&self, tx_out: &TxOut) -> Result<(), StorageError> {
        self.delete(&txout_key(tx_out.height))
    }

    fn get_txouts_for_retry(&self, failed_only: bool) -> Result<Vec<TxOut>, StorageError> {
        let mut results = Vec::new();
        for (key, value) in self.scan_prefix(TXOUT_PREFIX)? {
            if value.is_empty() {
                continue;
            }
            let item: TxOutLocalItem = serde_json::from_slice(&value)
                .map_err(|source| StorageError::Json { key, source })?;
            if !failed_only || item.status == LocalStatus::Failed {
                results.push(item.tx_out);
            }
        }
        Ok(results)
    }

    fn set_txout_item(&self, item: &TxOutItem, height: i64) -> Result<(), StorageError> {
        let key = txout_item_key(item, height)?;
        self.put(&key, &PRESENCE_MARKER, false)
    }

    fn has_txout_item(&self, item: &TxOutItem, height: i64) -> Result<bool, StorageError> {
        let key = txout_item_key(item, height)?;
        Ok(self.get(&key)?.is_some())
    }
}

/// `txoutitem-<height>-<sha256 of the item's JSON>`
pub fn txout_item_key(item: &TxOutItem, height: i64) -> Result<String, StorageError> {
    let encoded = serde_json::to_vec(item).map_err(|source| StorageError::Json {
        key: format!("{TXOUT_ITEM_PREFIX}{height}"),
        source,
    })?;
    let digest = Sha256::digest(&encoded);
    Ok(format!("{TXOUT_ITEM_PREFIX}{height}-{}", hex::encode(digest)))
}

fn rocks_err(key: &str, source: rocksdb::Error) -> StorageError {
    StorageError::Rocks {
        key: key.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thorclient::types::Coin;
    use tempfile::TempDir;

    fn open_storage(start_height: i64) -> (TempDir, RocksScannerStorage) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let storage =
            RocksScannerStorage::open(dir.path().join("signer_data"), start_height).expect("open");
        (dir, storage)
    }

    fn sample_item(memo: &str) -> TxOutItem {
        TxOutItem {
            chain: "BNB".to_string(),
            to: "tbnb1yycn4mh6ffwpjf584t8lpp7c27ghu03gpvqkfj".to_string(),
            vault_pubkey: "thorpub1vault".to_string(),
            coin: Coin {
                asset: "BNB.BNB".to_string(),
                amount: 194_765_912,
            },
            memo: memo.to_string(),
            max_gas: Vec::new(),
            in_hash: "9999A5A08D8FCF942E1AAAA01AB1E521B699BA3A009FA0591C011DC1FFDC5E68".to_string(),
            out_hash: String::new(),
        }
    }

    #[test]
    fn scan_pos_defaults_to_start_height_and_survives_reopen() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("signer_data");
        {
            let storage = RocksScannerStorage::open(&path, 100).expect("open");
            assert_eq!(storage.get_scan_pos().expect("scan pos"), 100);
            storage.set_scan_pos(1718).expect("set scan pos");
            assert_eq!(storage.get_scan_pos().expect("scan pos"), 1718);
            storage.close().expect("close");
        }

        let reopened = RocksScannerStorage::open(&path, 100).expect("reopen");
        assert_eq!(reopened.get_scan_pos().expect("scan pos"), 1718);
    }

    #[test]
    fn block_status_round_trips_through_retry_enumeration() {
        let (_dir, storage) = open_storage(0);

        storage
            .set_block_scanner_status(1718, BlockScanStatus::Processing)
            .expect("set status");
        assert_eq!(storage.get_blocks_for_retry(false).expect("retry"), vec![1718]);
        assert!(storage.get_blocks_for_retry(true).expect("retry").is_empty());

        storage.remove_block_status(1718).expect("remove");
        assert!(storage.get_blocks_for_retry(false).expect("retry").is_empty());
    }

    #[test]
    fn remove_and_set_failed_are_idempotent() {
        let (_dir, storage) = open_storage(0);

        storage.remove_block_status(5).expect("remove absent");
        storage.remove_block_status(5).expect("remove absent twice");

        storage
            .set_block_scanner_status(5, BlockScanStatus::Failed)
            .expect("set failed");
        storage
            .set_block_scanner_status(5, BlockScanStatus::Failed)
            .expect("set failed twice");
        assert_eq!(storage.get_blocks_for_retry(true).expect("retry"), vec![5]);
        assert_eq!(storage.get_blocks_for_retry(false).expect("retry"), vec![5]);
        assert_eq!(
            storage.get(&block_status_key(5)).expect("raw get"),
            Some(vec![1u8])
        );
    }

    #[test]
    fn failed_only_filters_other_statuses() {
        let (_dir, storage) = open_storage(0);
        storage
            .set_block_scanner_status(7, BlockScanStatus::NotStarted)
            .expect("set");
        storage
            .set_block_scanner_status(8, BlockScanStatus::Failed)
            .expect("set");
        storage
            .set_block_scanner_status(9, BlockScanStatus::Processing)
            .expect("set");

        assert_eq!(storage.get_blocks_for_retry(true).expect("retry"), vec![8]);
        let mut all = storage.get_blocks_for_retry(false).expect("retry");
        all.sort_unstable();
        assert_eq!(all, vec![7, 8, 9]);
    }

    #[test]
    fn retry_enumeration_follows_key_order_and_ignores_other_prefixes() {
        let (_dir, storage) = open_storage(0);
        storage
            .set_block_scanner_status(9, BlockScanStatus::Failed)
            .expect("set");
        storage
            .set_block_scanner_status(10, BlockScanStatus::Failed)
            .expect("set");
        storage.set_scan_pos(10).expect("set scan pos");
        storage
            .set_txout_status(
                &TxOut {
                    height: 10,
                    tx_array: Vec::new(),
                },
                LocalStatus::Failed,
            )
            .expect("set txout");

        assert_eq!(storage.get_blocks_for_retry(true).expect("retry"), vec![10, 9]);
    }

    #[test]
    fn malformed_status_value_is_reported() {
        let (_dir, storage) = open_storage(0);
        storage
            .put(&block_status_key(3), &[9], false)
            .expect("raw put");

        let err = storage.get_blocks_for_retry(false).expect_err("bad code");
        assert!(err.to_string().contains("block-status-3"));
    }

    #[test]
    fn txout_ledger_tracks_status_and_retry() {
        let (_dir, storage) = open_storage(0);
        let processing = TxOut {
            height: 1718,
            tx_array: vec![sample_item("OUTBOUND:1")],
        };
        let failed = TxOut {
            height: 1719,
            tx_array: vec![sample_item("OUTBOUND:2")],
        };

        storage
            .set_txout_status(&processing, LocalStatus::Processing)
            .expect("set");
        storage
            .set_txout_status(&failed, LocalStatus::Failed)
            .expect("set");

        assert_eq!(
            storage.get_txouts_for_retry(true).expect("retry"),
            vec![failed.clone()]
        );
        assert_eq!(storage.get_txouts_for_retry(false).expect("retry").len(), 2);

        assert_eq!(
            storage.get_txout(1719).expect("get"),
            Some(TxOutLocalItem {
                tx_out: failed.clone(),
                status: LocalStatus::Failed,
            })
        );

        storage.remove_txout(&failed).expect("remove");
        assert_eq!(storage.get_txout(1719).expect("get"), None);
        assert_eq!(
            storage.get_txouts_for_retry(false).expect("retry"),
            vec![processing]
        );
    }

    #[test]
    fn txout_item_markers_are_keyed_by_height_and_content() {
        let (_dir, storage) = open_storage(0);
        let item = sample_item("OUTBOUND:1");

        assert!(!storage.has_txout_item(&item, 1718).expect("has"));
        storage.set_txout_item(&item, 1718).expect("set marker");
        assert!(storage.has_txout_item(&item, 1718).expect("has"));
        assert!(!storage.has_txout_item(&item, 1719).expect("has"));
        assert!(!storage
            .has_txout_item(&sample_item("OUTBOUND:2"), 1718)
            .expect("has"));

        let key = txout_item_key(&item, 1718).expect("key");
        assert!(key.starts_with("txoutitem-1718-"));
        assert_eq!(key.len(), "txoutitem-1718-".len() + 64);
        assert_eq!(storage.get(&key).expect("raw get"), Some(vec![0x01]));
        assert!(storage.get_txouts_for_retry(false).expect("retry").is_empty());
    }

    #[test]
    fn calls_after_close_fail_with_closed() {
        let (_dir, storage) = open_storage(0);
        storage.close().expect("close");

        assert!(matches!(storage.get_scan_pos(), Err(StorageError::Closed)));
        assert!(matches!(
            storage.set_block_scanner_status(1, BlockScanStatus::Failed),
            Err(StorageError::Closed)
        ));
        assert!(matches!(storage.close(), Err(StorageError::Closed)));
        assert_eq!(StorageError::Closed.to_string(), "storage is closed");
    }
}
