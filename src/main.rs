use signer_scanner_lib::{
    blockscanner::{ScannerError, ThorchainBlockScanner},
    cli::{parse_args, Cli},
    config::{Config, ConfigError},
    consumer::{log_keygens, TxOutRecorder},
    logging::{format_error_report, init_logging},
    pubkeys::refresh_vault_pub_keys,
    server::{monitoring::ScannerMetrics, register_metrics, setup_server_with_addr},
    state::AppState,
    storage::{RocksScannerStorage, ScannerStorage, StorageError},
    thorclient::{ThorClientError, ThorchainClient},
};
use std::process::ExitCode;
use std::sync::Arc;

use dotenv::dotenv;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
enum RunError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to start metrics server: {0}")]
    Server(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Client(#[from] ThorClientError),
    #[error(transparent)]
    Scanner(#[from] ScannerError),
}

/// Cancels `shutdown_token` on SIGTERM or SIGINT.
async fn handle_shutdown_signals(shutdown_token: CancellationToken) {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(err), _) | (_, Err(err)) => {
                error!(
                    event = "signal_handler_failed",
                    error = %err,
                    "failed to register signal handlers"
                );
                shutdown_token.cancel();
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => info!(event = "shutdown_signal", signal = "SIGTERM", "shutting down"),
        _ = sigint.recv() => info!(event = "shutdown_signal", signal = "SIGINT", "shutting down"),
        _ = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();
}

async fn run(cli: Cli) -> Result<(), RunError> {
    let mut config = Config::from_env()?;
    if let Some(start_height) = cli.start_height {
        config.block_scanner.start_block_height = start_height;
    }
    info!(
        event = "config_loaded",
        chain_host = %config.client.chain_host,
        chain_id = %config.client.chain_id,
        db_path = %config.block_scanner.db_path.display(),
        "config loaded"
    );

    let shutdown_token = CancellationToken::new();
    let state = Arc::new(AppState::new(shutdown_token.clone()));
    let signal_handle = tokio::spawn(handle_shutdown_signals(shutdown_token.clone()));

    let metrics = register_metrics(&state).await;
    let server_handle = setup_server_with_addr(Arc::clone(&state), config.metrics_addr).await?;

    let storage = Arc::new(RocksScannerStorage::open(
        &config.block_scanner.db_path,
        config.block_scanner.start_block_height,
    )?);

    let result = scan_until_shutdown(
        &cli,
        config,
        Arc::clone(&storage),
        metrics,
        &shutdown_token,
    )
    .await;

    shutdown_token.cancel();
    if let Err(err) = storage.close() {
        warn!(event = "storage_close_failed", error = %err, "failed to close storage");
    }
    if let Err(err) = server_handle.await {
        warn!(event = "metrics_server_join_failed", error = %err, "metrics server task failed");
    }
    signal_handle.abort();
    result
}

async fn scan_until_shutdown(
    cli: &Cli,
    config: Config,
    storage: Arc<RocksScannerStorage>,
    metrics: ScannerMetrics,
    shutdown_token: &CancellationToken,
) -> Result<(), RunError> {
    let client = Arc::new(ThorchainClient::new(
        config.client,
        metrics.clone(),
        shutdown_token.child_token(),
    )?);

    let startup = if cli.skip_whitelist_wait {
        warn!(event = "whitelist_wait_skipped", "skipping whitelist wait");
        client.load_account_info().await
    } else {
        client.start().await
    };
    let pub_keys = match startup {
        Ok(()) => client.get_pub_keys().await,
        Err(err) => Err(err),
    };
    let pub_keys = match pub_keys {
        Ok(pub_keys) => Arc::new(pub_keys),
        Err(err) if err.is_cancelled() => {
            info!(event = "startup_cancelled", "shutdown requested during startup");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    match pub_keys.fetch_pub_keys(&client).await {
        Ok(added) => info!(event = "vault_pubkeys_loaded", added, "loaded vault pubkeys"),
        Err(err) if err.is_cancelled() => {
            info!(event = "startup_cancelled", "shutdown requested during startup");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }
    info!(
        event = "pubkeys_loaded",
        count = pub_keys.len(),
        signers = pub_keys.get_sign_pks().len(),
        "loaded pubkeys"
    );

    let mut scanner = ThorchainBlockScanner::new(
        config.block_scanner,
        Arc::clone(&storage) as Arc<dyn ScannerStorage>,
        Arc::clone(&client),
        Arc::clone(&client),
        Arc::clone(&pub_keys),
        metrics,
    );
    let pub_key_refresh = tokio::spawn(refresh_vault_pub_keys(
        pub_keys,
        Arc::clone(&client),
        config.pub_key_refresh_interval,
        scanner.stop_token(),
    ));
    let txout_consumer = tokio::spawn(TxOutRecorder::new(storage).run(scanner.txout_messages()));
    let keygen_consumer = tokio::spawn(log_keygens(scanner.keygen_messages()));

    scanner.start()?;
    shutdown_token.cancelled().await;

    // Consumers drain until the processor drops its senders inside `stop`.
    let stopped = scanner.stop().await;
    drop(scanner);
    client.stop();
    if let Err(err) = pub_key_refresh.await {
        warn!(event = "pubkey_refresh_join_failed", error = %err, "pubkey refresh task failed");
    }
    for consumer in [txout_consumer, keygen_consumer] {
        if let Err(err) = consumer.await {
            warn!(event = "consumer_join_failed", error = %err, "consumer task failed");
        }
    }
    stopped?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let cli = parse_args();
    init_logging("signer_scanner", "scanner", &cli.log_level);

    match run(cli).await {
        Ok(()) => {
            info!(event = "signer_scanner_stopped", "signer scanner stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(
                event = "signer_scanner_failed",
                report = %format_error_report(&err),
                "signer scanner failed"
            );
            ExitCode::FAILURE
        }
    }
}
