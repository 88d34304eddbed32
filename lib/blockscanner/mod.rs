//! Block scanning for the signer: heights come from [`CommonBlockScanner`], the
//! [`BlockProcessor`] turns each one into `TxOut` and `Keygens` values, and
//! [`ThorchainBlockScanner`] owns the tasks and the stop signal.

mod common;
mod processor;
mod source;

pub use common::CommonBlockScanner;
pub use processor::{BlockOutcome, BlockProcessor};
pub use source::{BlockSource, ChainHeightSource};

use std::sync::Arc;

use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::config::BlockScannerConfiguration;
use crate::pubkeys::PubKeyManager;
use crate::server::monitoring::ScannerMetrics;
use crate::storage::ScannerStorage;
use crate::thorclient::types::{Keygens, TxOut};

#[cfg(test)]
mod test_support;

#[derive(Error, Debug)]
pub enum ScannerError {
    #[error("block scanner already started")]
    AlreadyStarted,
    #[error("block scanner task failed: {0}")]
    Join(#[from] JoinError),
}

/// Lifecycle controller for the signer's block scanning.
///
/// The storage handle is shared, never closed here; whoever opened it closes it after
/// [`ThorchainBlockScanner::stop`] returns.
pub struct ThorchainBlockScanner<C, H> {
    common: CommonBlockScanner<H>,
    processor: Option<BlockProcessor<C>>,
    txout_rx: flume::Receiver<TxOut>,
    keygens_rx: flume::Receiver<Keygens>,
    stop_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl<C, H> ThorchainBlockScanner<C, H>
where
    C: BlockSource + 'static,
    H: ChainHeightSource + 'static,
{
    pub fn new(
        cfg: BlockScannerConfiguration,
        storage: Arc<dyn ScannerStorage>,
        client: C,
        height_source: H,
        pub_keys: Arc<PubKeyManager>,
        metrics: ScannerMetrics,
    ) -> Self {
        // Rendezvous: every send waits for a consumer, so slow signing throttles scanning.
        let (txout_tx, txout_rx) = flume::bounded(0);
        let (keygens_tx, keygens_rx) = flume::bounded(0);

        let common =
            CommonBlockScanner::new(cfg, Arc::clone(&storage), height_source, metrics.clone());
        let processor =
            BlockProcessor::new(client, storage, pub_keys, metrics, txout_tx, keygens_tx);

        Self {
            common,
            processor: Some(processor),
            txout_rx,
            keygens_rx,
            stop_token: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    pub fn txout_messages(&self) -> flume::Receiver<TxOut> {
        self.txout_rx.clone()
    }

    pub fn keygen_messages(&self) -> flume::Receiver<Keygens> {
        self.keygens_rx.clone()
    }

    /// Token cancelled by [`ThorchainBlockScanner::stop`]; companion tasks use it to stop
    /// with the scanner.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.clone()
    }

    /// Spawns the processor and the height producers.
    pub fn start(&mut self) -> Result<(), ScannerError> {
        let processor = self.processor.take().ok_or(ScannerError::AlreadyStarted)?;
        let heights = self.common.messages();
        self.handles
            .push(tokio::spawn(processor.run(heights, self.stop_token.clone())));
        self.handles.extend(self.common.start(self.stop_token.clone()));
        tracing::info!(
            event = "block_scanner_started",
            "thorchain block scanner started"
        );
        Ok(())
    }

    /// Signals every task to stop and waits for all of them. Calling it again is a no-op.
    ///
    /// Consumers must keep draining the output channels until this returns; a value the
    /// processor was holding when the signal fired is dropped.
    pub async fn stop(&mut self) -> Result<(), ScannerError> {
        self.stop_token.cancel();
        let handles: Vec<_> = self.handles.drain(..).collect();
        let mut first_err = None;
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(
                    event = "block_scanner_task_failed",
                    error = %err,
                    "scanner task failed"
                );
                first_err.get_or_insert(err);
            }
        }
        tracing::info!(event = "block_scanner_stopped", "thorchain block scanner stopped");
        match first_err {
            Some(err) => Err(ScannerError::Join(err)),
            None => Ok(()),
        }
    }
}
