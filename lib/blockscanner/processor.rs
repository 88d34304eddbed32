use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::source::BlockSource;
use crate::pubkeys::PubKeyManager;
use crate::server::monitoring::{inc_error, ScannerMetrics};
use crate::storage::{BlockScanStatus, ScannerStorage};
use crate::thorclient::types::{Keygens, TxOut};
use crate::thorclient::ThorClientError;

/// What happened to one height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Keysign and keygen lookups both succeeded; the status record is gone.
    Completed,
    /// Keysign succeeded but keygen lookup failed; the status record is still gone.
    KeygenFailed,
    /// Keysign lookup failed; the height is recorded as `Failed`.
    Failed,
    /// Stopped mid-block; the status record was left as it was.
    Interrupted,
}

enum ProcessError {
    Client(ThorClientError),
    ChannelClosed,
    Stopped,
}

impl From<ThorClientError> for ProcessError {
    fn from(err: ThorClientError) -> Self {
        if err.is_cancelled() {
            Self::Stopped
        } else {
            Self::Client(err)
        }
    }
}

/// Turns scanned heights into `TxOut` and `Keygens` values for the signer.
pub struct BlockProcessor<C> {
    client: C,
    storage: Arc<dyn ScannerStorage>,
    pub_keys: Arc<PubKeyManager>,
    metrics: ScannerMetrics,
    txout_tx: flume::Sender<TxOut>,
    keygens_tx: flume::Sender<Keygens>,
}

impl<C: BlockSource> BlockProcessor<C> {
    pub fn new(
        client: C,
        storage: Arc<dyn ScannerStorage>,
        pub_keys: Arc<PubKeyManager>,
        metrics: ScannerMetrics,
        txout_tx: flume::Sender<TxOut>,
        keygens_tx: flume::Sender<Keygens>,
    ) -> Self {
        Self {
            client,
            storage,
            pub_keys,
            metrics,
            txout_tx,
            keygens_tx,
        }
    }

    /// Processes heights until `stop` fires or the height channel closes. Dropping `self` on
    /// return closes both output channels.
    pub async fn run(self, heights: flume::Receiver<i64>, stop: CancellationToken) {
        tracing::info!(event = "block_processor_started", "processing scanned blocks");
        loop {
            let height = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                received = heights.recv_async() => match received {
                    Ok(height) => height,
                    Err(_) => break,
                },
            };

            if self.process_block(height, &stop).await == BlockOutcome::Interrupted {
                break;
            }
        }
        tracing::info!(event = "block_processor_stopped", "stopped processing blocks");
    }

    pub async fn process_block(&self, height: i64, stop: &CancellationToken) -> BlockOutcome {
        let pub_keys = self.pub_keys.get_sign_pks();

        match self.process_txout_block(height, &pub_keys, stop).await {
            Ok(()) => {}
            Err(ProcessError::Client(err)) => {
                tracing::error!(
                    event = "search_tx_failed",
                    height,
                    error = %err,
                    "failed to search tx out in block"
                );
                if let Err(store_err) = self
                    .storage
                    .set_block_scanner_status(height, BlockScanStatus::Failed)
                {
                    inc_error(
                        &self.metrics.block_scanner_errors,
                        "fail_set_block_Status",
                        height,
                    );
                    tracing::error!(
                        event = "set_block_status_failed",
                        height,
                        error = %store_err,
                        "failed to record block as failed"
                    );
                }
                inc_error(&self.metrics.block_scanner_errors, "fail_search_tx", height);
                return BlockOutcome::Failed;
            }
            Err(ProcessError::ChannelClosed | ProcessError::Stopped) => {
                return BlockOutcome::Interrupted
            }
        }

        if let Err(err) = self.storage.remove_block_status(height) {
            inc_error(
                &self.metrics.block_scanner_errors,
                "fail_remove_block_Status",
                height,
            );
            tracing::error!(
                event = "remove_block_status_failed",
                height,
                error = %err,
                "fail to remove block status from data store, thus block will be re processed"
            );
        }

        match self.process_keygen_block(height, &pub_keys, stop).await {
            Ok(()) => BlockOutcome::Completed,
            Err(ProcessError::Client(err)) => {
                inc_error(
                    &self.metrics.block_scanner_errors,
                    "fail_process_keygen",
                    height,
                );
                tracing::error!(
                    event = "process_keygen_failed",
                    height,
                    error = %err,
                    "failed to process keygen"
                );
                BlockOutcome::KeygenFailed
            }
            Err(ProcessError::ChannelClosed | ProcessError::Stopped) => BlockOutcome::Interrupted,
        }
    }

    async fn process_txout_block(
        &self,
        height: i64,
        pub_keys: &[String],
        stop: &CancellationToken,
    ) -> Result<(), ProcessError> {
        for pub_key in pub_keys.iter().filter(|key| !key.is_empty()) {
            let tx_out = call_or_stop(self.client.get_keysign(height, pub_key), stop).await?;
            if tx_out.is_empty() {
                tracing::debug!(event = "block_no_txout", height, "nothing to process");
                self.metrics.block_no_txout.inc();
            }
            send_or_stop(&self.txout_tx, tx_out, stop).await?;
            self.metrics.txout_emitted.inc();
        }
        Ok(())
    }

    async fn process_keygen_block(
        &self,
        height: i64,
        pub_keys: &[String],
        stop: &CancellationToken,
    ) -> Result<(), ProcessError> {
        for pub_key in pub_keys.iter().filter(|key| !key.is_empty()) {
            let keygens = call_or_stop(self.client.get_keygens(height, pub_key), stop).await?;
            send_or_stop(&self.keygens_tx, keygens, stop).await?;
            self.metrics.keygens_emitted.inc();
        }
        Ok(())
    }
}

async fn call_or_stop<T>(
    call: impl Future<Output = Result<T, ThorClientError>>,
    stop: &CancellationToken,
) -> Result<T, ProcessError> {
    tokio::select! {
        biased;
        _ = stop.cancelled() => Err(ProcessError::Stopped),
        result = call => result.map_err(ProcessError::from),
    }
}

/// Blocks until a consumer takes `value`; a stop signal discards it.
async fn send_or_stop<T>(
    tx: &flume::Sender<T>,
    value: T,
    stop: &CancellationToken,
) -> Result<(), ProcessError> {
    tokio::select! {
        biased;
        _ = stop.cancelled() => Err(ProcessError::Stopped),
        sent = tx.send_async(value) => sent.map_err(|_| ProcessError::ChannelClosed),
    }
}
