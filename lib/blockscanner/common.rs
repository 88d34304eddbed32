use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::source::ChainHeightSource;
use crate::config::BlockScannerConfiguration;
use crate::server::monitoring::{inc_error, ScannerMetrics};
use crate::storage::{BlockScanStatus, ScannerStorage};

/// Feeds block heights to the processor: new heights from the persisted cursor up to one block
/// behind the statechain tip, plus heights recorded for retry.
pub struct CommonBlockScanner<H> {
    inner: Arc<ScannerInner<H>>,
    heights_tx: flume::Sender<i64>,
    heights_rx: flume::Receiver<i64>,
}

struct ScannerInner<H> {
    cfg: BlockScannerConfiguration,
    storage: Arc<dyn ScannerStorage>,
    height_source: H,
    metrics: ScannerMetrics,
}

impl<H> CommonBlockScanner<H>
where
    H: ChainHeightSource + 'static,
{
    pub fn new(
        cfg: BlockScannerConfiguration,
        storage: Arc<dyn ScannerStorage>,
        height_source: H,
        metrics: ScannerMetrics,
    ) -> Self {
        let (heights_tx, heights_rx) = flume::bounded(cfg.block_scan_processors.max(1));
        Self {
            inner: Arc::new(ScannerInner {
                cfg,
                storage,
                height_source,
                metrics,
            }),
            heights_tx,
            heights_rx,
        }
    }

    /// Heights to process, in emission order.
    pub fn messages(&self) -> flume::Receiver<i64> {
        self.heights_rx.clone()
    }

    /// Spawns the scan loop and the retry loop. Both exit once `stop` fires.
    pub fn start(&self, stop: CancellationToken) -> Vec<JoinHandle<()>> {
        let scan = tokio::spawn(
            Arc::clone(&self.inner).scan_blocks(self.heights_tx.clone(), stop.clone()),
        );
        let retry =
            tokio::spawn(Arc::clone(&self.inner).retry_loop(self.heights_tx.clone(), stop));
        vec![scan, retry]
    }
}

impl<H: ChainHeightSource> ScannerInner<H> {
    async fn scan_blocks(self: Arc<Self>, heights: flume::Sender<i64>, stop: CancellationToken) {
        let mut previous = match self.storage.get_scan_pos() {
            Ok(pos) => pos,
            Err(err) => {
                inc_error(&self.metrics.common_scanner_errors, "fail_get_scan_pos", "");
                tracing::error!(
                    event = "get_scan_pos_failed",
                    start_height = self.cfg.start_block_height,
                    error = %err,
                    "failed to read scan position, starting from configured height"
                );
                self.cfg.start_block_height
            }
        };
        self.metrics.current_position.set(previous);
        tracing::info!(event = "block_scan_started", position = previous, "scanning blocks");

        if !self.retry_blocks(&heights, &stop, false).await {
            return;
        }

        loop {
            let tip = tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                tip = self.height_source.get_statechain_height() => tip,
            };

            // One block behind the tip so THORNode has finished writing the height.
            let target = match tip {
                Ok(tip) => Some(tip - 1),
                Err(err) if err.is_cancelled() => return,
                Err(err) => {
                    inc_error(&self.metrics.common_scanner_errors, "fail_get_block", "");
                    tracing::error!(
                        event = "get_statechain_height_failed",
                        error = %err,
                        "failed to get statechain height"
                    );
                    None
                }
            };

            match target {
                Some(target) if target > previous => {
                    for height in previous + 1..=target {
                        if !self.scan_height(height, &heights, &stop).await {
                            return;
                        }
                        previous = height;
                    }
                }
                _ => {
                    tokio::select! {
                        _ = stop.cancelled() => return,
                        _ = tokio::time::sleep(self.cfg.block_height_discover_backoff) => {}
                    }
                }
            }
        }
    }

    /// Marks `height` as pending, hands it over and advances the cursor. Returns `false` when
    /// scanning must stop.
    async fn scan_height(
        &self,
        height: i64,
        heights: &flume::Sender<i64>,
        stop: &CancellationToken,
    ) -> bool {
        self.metrics.total_block_scanned.inc();
        if let Err(err) = self
            .storage
            .set_block_scanner_status(height, BlockScanStatus::NotStarted)
        {
            inc_error(
                &self.metrics.common_scanner_errors,
                "fail_set_block_status",
                height,
            );
            tracing::error!(
                event = "set_block_status_failed",
                height,
                error = %err,
                "failed to set block status"
            );
            return false;
        }

        tokio::select! {
            biased;
            _ = stop.cancelled() => return false,
            sent = heights.send_async(height) => if sent.is_err() {
                return false;
            },
        }

        self.metrics.current_position.set(height);
        if let Err(err) = self.storage.set_scan_pos(height) {
            inc_error(
                &self.metrics.common_scanner_errors,
                "fail_save_block_pos",
                height,
            );
            tracing::error!(
                event = "save_scan_pos_failed",
                height,
                error = %err,
                "failed to save block scan pos"
            );
            return false;
        }
        true
    }

    async fn retry_loop(self: Arc<Self>, heights: flume::Sender<i64>, stop: CancellationToken) {
        let period = self.cfg.block_retry_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; startup already resent everything.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    if !self.retry_blocks(&heights, &stop, true).await {
                        break;
                    }
                }
            }
        }
        tracing::debug!(event = "block_retry_loop_stopped", "stopped retrying blocks");
    }

    /// Resends recorded heights. Returns `false` once stopped.
    async fn retry_blocks(
        &self,
        heights: &flume::Sender<i64>,
        stop: &CancellationToken,
        failed_only: bool,
    ) -> bool {
        let blocks = match self.storage.get_blocks_for_retry(failed_only) {
            Ok(blocks) => blocks,
            Err(err) => {
                inc_error(
                    &self.metrics.common_scanner_errors,
                    "fail_get_blocks_for_retry",
                    "",
                );
                tracing::error!(
                    event = "get_blocks_for_retry_failed",
                    error = %err,
                    "failed to get blocks for retry"
                );
                return true;
            }
        };
        if !blocks.is_empty() {
            tracing::debug!(
                event = "retry_blocks",
                count = blocks.len(),
                failed_only,
                "retrying blocks"
            );
        }

        for height in blocks {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return false,
                sent = heights.send_async(height) => {
                    if sent.is_err() {
                        return false;
                    }
                    self.metrics.total_retry_blocks.inc();
                }
            }
        }
        true
    }
}
