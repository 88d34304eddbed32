use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use prometheus_client::registry::Registry;

use super::source::{BlockSource, ChainHeightSource};
use crate::server::monitoring::ScannerMetrics;
use crate::storage::{block_status_key, BlockScanStatus, ScannerStorage, StorageError};
use crate::thorclient::types::{Coin, Keygens, TxOut, TxOutItem};
use crate::thorclient::ThorClientError;

pub(super) fn test_metrics() -> ScannerMetrics {
    ScannerMetrics::register(&mut Registry::default(), "test")
}

pub(super) fn server_error(path: &str) -> ThorClientError {
    ThorClientError::UnexpectedStatus {
        url: format!("http://localhost{path}"),
        status: 500,
    }
}

pub(super) fn bnb_txout(height: i64) -> TxOut {
    TxOut {
        height,
        tx_array: vec![TxOutItem {
            chain: "BNB".to_string(),
            to: "tbnb186nvjtqk4kkea3f8a30xh4vqtkrlu2rm9xgly3".to_string(),
            vault_pubkey: "thorpub1addwnpepqflvfv08t6qt95lmttd6wpf3ss8wx63e9vf6fvyuj2yy6nnyna576rfzjks"
                .to_string(),
            coin: Coin {
                asset: "BNB.BNB".to_string(),
                amount: 194_765_912,
            },
            memo: String::new(),
            max_gas: Vec::new(),
            in_hash: "E9A0A3F5C6D4E0B3D9BD10A6C5F0EE43D6F5A7EA1B03C8E18ACDF7E8E5C7B9A1".to_string(),
            out_hash: String::new(),
        }],
    }
}

pub(super) fn sample_keygens(height: i64) -> Keygens {
    Keygens {
        height,
        keygens: vec![vec!["pkA".to_string(), "pkB".to_string()]],
    }
}

type Plans<T> = Mutex<HashMap<(i64, String), VecDeque<Result<T, ThorClientError>>>>;

/// Scripted THORNode lookups.
///
/// Heights without a script answer with an empty `TxOut`/`Keygens` so scanner tests can run
/// over arbitrary ranges.
#[derive(Default)]
pub(super) struct MockChainClient {
    keysign_plans: Plans<TxOut>,
    keygen_plans: Plans<Keygens>,
    keysign_calls: Mutex<HashMap<(i64, String), u32>>,
    keygen_calls: Mutex<HashMap<(i64, String), u32>>,
    call_log: Mutex<Vec<String>>,
    hang_keysign: AtomicBool,
    tip: AtomicI64,
    tip_failures: AtomicU32,
    tip_calls: AtomicU32,
}

impl MockChainClient {
    pub(super) fn with_tip(tip: i64) -> Self {
        let client = Self::default();
        client.set_tip(tip);
        client
    }

    pub(super) fn plan_keysign(
        &self,
        height: i64,
        pub_key: &str,
        outcome: Result<TxOut, ThorClientError>,
    ) {
        self.keysign_plans
            .lock()
            .expect("keysign plans mutex poisoned")
            .entry((height, pub_key.to_string()))
            .or_default()
            .push_back(outcome);
    }

    pub(super) fn plan_keygens(
        &self,
        height: i64,
        pub_key: &str,
        outcome: Result<Keygens, ThorClientError>,
    ) {
        self.keygen_plans
            .lock()
            .expect("keygen plans mutex poisoned")
            .entry((height, pub_key.to_string()))
            .or_default()
            .push_back(outcome);
    }

    pub(super) fn hang_keysign(&self) {
        self.hang_keysign.store(true, Ordering::SeqCst);
    }

    pub(super) fn set_tip(&self, tip: i64) {
        self.tip.store(tip, Ordering::SeqCst);
    }

    /// The next `count` tip lookups fail.
    pub(super) fn fail_tip(&self, count: u32) {
        self.tip_failures.store(count, Ordering::SeqCst);
    }

    pub(super) fn tip_calls(&self) -> u32 {
        self.tip_calls.load(Ordering::SeqCst)
    }

    pub(super) fn keysign_calls(&self, height: i64, pub_key: &str) -> u32 {
        *self
            .keysign_calls
            .lock()
            .expect("keysign calls mutex poisoned")
            .get(&(height, pub_key.to_string()))
            .unwrap_or(&0)
    }

    pub(super) fn keygen_calls(&self, height: i64, pub_key: &str) -> u32 {
        *self
            .keygen_calls
            .lock()
            .expect("keygen calls mutex poisoned")
            .get(&(height, pub_key.to_string()))
            .unwrap_or(&0)
    }

    /// Every lookup in call order, as `keysign:<height>:<pk>` / `keygen:<height>:<pk>`.
    pub(super) fn call_log(&self) -> Vec<String> {
        self.call_log.lock().expect("call log mutex poisoned").clone()
    }

    fn record(&self, kind: &str, height: i64, pub_key: &str) {
        let counts = if kind == "keysign" {
            &self.keysign_calls
        } else {
            &self.keygen_calls
        };
        *counts
            .lock()
            .expect("call count mutex poisoned")
            .entry((height, pub_key.to_string()))
            .or_insert(0) += 1;
        self.call_log
            .lock()
            .expect("call log mutex poisoned")
            .push(format!("{kind}:{height}:{pub_key}"));
    }
}

impl BlockSource for MockChainClient {
    fn get_keysign<'a>(
        &'a self,
        height: i64,
        pub_key: &'a str,
    ) -> BoxFuture<'a, Result<TxOut, ThorClientError>> {
        Box::pin(async move {
            self.record("keysign", height, pub_key);
            if self.hang_keysign.load(Ordering::SeqCst) {
                futures::future::pending::<()>().await;
            }
            let scripted = self
                .keysign_plans
                .lock()
                .expect("keysign plans mutex poisoned")
                .get_mut(&(height, pub_key.to_string()))
                .and_then(VecDeque::pop_front);
            scripted.unwrap_or_else(|| {
                Ok(TxOut {
                    height,
                    tx_array: Vec::new(),
                })
            })
        })
    }

    fn get_keygens<'a>(
        &'a self,
        height: i64,
        pub_key: &'a str,
    ) -> BoxFuture<'a, Result<Keygens, ThorClientError>> {
        Box::pin(async move {
            self.record("keygen", height, pub_key);
            let scripted = self
                .keygen_plans
                .lock()
                .expect("keygen plans mutex poisoned")
                .get_mut(&(height, pub_key.to_string()))
                .and_then(VecDeque::pop_front);
            scripted.unwrap_or_else(|| {
                Ok(Keygens {
                    height,
                    keygens: Vec::new(),
                })
            })
        })
    }
}

impl ChainHeightSource for MockChainClient {
    fn get_statechain_height(&self) -> BoxFuture<'_, Result<i64, ThorClientError>> {
        Box::pin(async move {
            self.tip_calls.fetch_add(1, Ordering::SeqCst);
            let failures = self.tip_failures.load(Ordering::SeqCst);
            if failures > 0 {
                self.tip_failures.store(failures - 1, Ordering::SeqCst);
                return Err(server_error("/thorchain/lastblock/"));
            }
            Ok(self.tip.load(Ordering::SeqCst))
        })
    }
}

/// In-memory `ScannerStorage` with switchable failures.
pub(super) struct MockScannerStorage {
    start_height: i64,
    scan_pos: Mutex<Option<i64>>,
    statuses: Mutex<BTreeMap<String, (i64, BlockScanStatus)>>,
    pub(super) fail_get_scan_pos: AtomicBool,
    pub(super) fail_set_scan_pos: AtomicBool,
    pub(super) fail_set_status: AtomicBool,
    pub(super) fail_remove_status: AtomicBool,
    pub(super) fail_retry_listing: AtomicBool,
}

impl MockScannerStorage {
    pub(super) fn new(start_height: i64) -> Self {
        Self {
            start_height,
            scan_pos: Mutex::new(None),
            statuses: Mutex::new(BTreeMap::new()),
            fail_get_scan_pos: AtomicBool::new(false),
            fail_set_scan_pos: AtomicBool::new(false),
            fail_set_status: AtomicBool::new(false),
            fail_remove_status: AtomicBool::new(false),
            fail_retry_listing: AtomicBool::new(false),
        }
    }

    pub(super) fn status_of(&self, height: i64) -> Option<BlockScanStatus> {
        self.statuses
            .lock()
            .expect("statuses mutex poisoned")
            .get(&block_status_key(height))
            .map(|(_, status)| *status)
    }

    pub(super) fn seed_status(&self, height: i64, status: BlockScanStatus) {
        self.statuses
            .lock()
            .expect("statuses mutex poisoned")
            .insert(block_status_key(height), (height, status));
    }

    pub(super) fn stored_scan_pos(&self) -> Option<i64> {
        *self.scan_pos.lock().expect("scan pos mutex poisoned")
    }

    fn injected(flag: &AtomicBool, key: String) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StorageError::InvalidValue {
                key,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl ScannerStorage for MockScannerStorage {
    fn get_scan_pos(&self) -> Result<i64, StorageError> {
        Self::injected(&self.fail_get_scan_pos, "scan-pos".to_string())?;
        Ok(self
            .stored_scan_pos()
            .unwrap_or(self.start_height))
    }

    fn set_scan_pos(&self, height: i64) -> Result<(), StorageError> {
        Self::injected(&self.fail_set_scan_pos, "scan-pos".to_string())?;
        *self.scan_pos.lock().expect("scan pos mutex poisoned") = Some(height);
        Ok(())
    }

    fn set_block_scanner_status(
        &self,
        height: i64,
        status: BlockScanStatus,
    ) -> Result<(), StorageError> {
        Self::injected(&self.fail_set_status, block_status_key(height))?;
        self.seed_status(height, status);
        Ok(())
    }

    fn remove_block_status(&self, height: i64) -> Result<(), StorageError> {
        Self::injected(&self.fail_remove_status, block_status_key(height))?;
        self.statuses
            .lock()
            .expect("statuses mutex poisoned")
            .remove(&block_status_key(height));
        Ok(())
    }

    fn get_blocks_for_retry(&self, failed_only: bool) -> Result<Vec<i64>, StorageError> {
        Self::injected(&self.fail_retry_listing, "block-status-".to_string())?;
        Ok(self
            .statuses
            .lock()
            .expect("statuses mutex poisoned")
            .values()
            .filter(|(_, status)| !failed_only || *status == BlockScanStatus::Failed)
            .map(|(height, _)| *height)
            .collect())
    }

    fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
