use crate::build_info;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

/// Labels of the error counter families: the failure name plus a context value such as a
/// block height or node address.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub error_name: String,
    pub additional: String,
}

pub type ErrorCounter = Family<ErrorLabels, Counter>;

/// Bumps `error_name` on `family` with the given context label.
pub fn inc_error(family: &ErrorCounter, error_name: &str, additional: impl ToString) {
    family
        .get_or_create(&ErrorLabels {
            error_name: error_name.to_string(),
            additional: additional.to_string(),
        })
        .inc();
}

/// Current value of one labeled error counter.
pub fn error_count(family: &ErrorCounter, error_name: &str, additional: impl ToString) -> u64 {
    family
        .get_or_create(&ErrorLabels {
            error_name: error_name.to_string(),
            additional: additional.to_string(),
        })
        .get()
}

/// Registers immutable build metadata as a labeled gauge fixed at `1`.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "signer_scanner",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

#[derive(Clone)]
pub struct ScannerMetrics {
    /// Per-block processor failures (`fail_search_tx`, `fail_process_keygen`, ...).
    pub block_scanner_errors: ErrorCounter,
    /// THORNode client failures (`fail_get_node_account`, `fail_unmarshal_lastblock`, ...).
    pub client_errors: ErrorCounter,
    /// Height discovery and retry-loop failures.
    pub common_scanner_errors: ErrorCounter,
    /// Vault pubkey lookup failures.
    pub pub_key_manager_errors: ErrorCounter,
    pub total_block_scanned: Counter,
    pub total_retry_blocks: Counter,
    /// Last height handed to the processor.
    pub current_position: Gauge,
    pub txout_emitted: Counter,
    pub keygens_emitted: Counter,
    pub block_no_txout: Counter,
}

impl ScannerMetrics {
    fn init() -> Self {
        Self {
            block_scanner_errors: ErrorCounter::default(),
            client_errors: ErrorCounter::default(),
            common_scanner_errors: ErrorCounter::default(),
            pub_key_manager_errors: ErrorCounter::default(),
            total_block_scanned: Counter::default(),
            total_retry_blocks: Counter::default(),
            current_position: Gauge::default(),
            txout_emitted: Counter::default(),
            keygens_emitted: Counter::default(),
            block_no_txout: Counter::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "block_scanner_errors",
            "Errors raised while processing scanned blocks",
            metrics.block_scanner_errors.clone(),
        );
        sub_registry.register(
            "thorchain_client_errors",
            "Errors raised by the THORNode REST client",
            metrics.client_errors.clone(),
        );
        sub_registry.register(
            "common_block_scanner_errors",
            "Errors raised while discovering or retrying block heights",
            metrics.common_scanner_errors.clone(),
        );
        sub_registry.register(
            "pubkey_manager_errors",
            "Errors raised while loading vault pubkeys",
            metrics.pub_key_manager_errors.clone(),
        );
        sub_registry.register(
            "total_block_scanned",
            "Total number of block heights handed to the processor",
            metrics.total_block_scanned.clone(),
        );
        sub_registry.register(
            "total_retry_blocks",
            "Total number of block heights resubmitted from the retry ledger",
            metrics.total_retry_blocks.clone(),
        );
        sub_registry.register(
            "current_position",
            "Current block scan position",
            metrics.current_position.clone(),
        );
        sub_registry.register(
            "txout_emitted",
            "Total number of TxOut values delivered to consumers",
            metrics.txout_emitted.clone(),
        );
        sub_registry.register(
            "keygens_emitted",
            "Total number of Keygens values delivered to consumers",
            metrics.keygens_emitted.clone(),
        );
        sub_registry.register(
            "block_no_txout",
            "Keysign responses that carried no outbound transactions",
            metrics.block_no_txout.clone(),
        );
        metrics
    }
}

pub static SCANNER_METRICS: OnceCell<ScannerMetrics> = OnceCell::const_new();
