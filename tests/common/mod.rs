#![allow(dead_code)]

use axum::{extract::State, http::StatusCode, http::Uri, routing::get, Router};
use prometheus_client::registry::Registry;
use signer_scanner_lib::config::{
    ClientConfiguration, PubKeyBootstrapPolicy, RetryPolicy, WhitelistPolicy,
};
use signer_scanner_lib::server::monitoring::ScannerMetrics;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const SIGNER_ADDRESS: &str = "thor1f3s7q037eancht7sg0aj995dht25rwrnu4ats5";

#[derive(Default)]
struct MockThornodeState {
    /// Scripted `(status, body)` per request path; the last entry repeats.
    responses: Mutex<HashMap<String, VecDeque<(u16, String)>>>,
    hits: Mutex<HashMap<String, u32>>,
}

/// In-process THORNode REST API with scripted responses.
pub struct MockThornode {
    pub host: String,
    state: Arc<MockThornodeState>,
    task: tokio::task::JoinHandle<()>,
}

impl MockThornode {
    pub async fn start() -> Self {
        let state = Arc::new(MockThornodeState::default());
        let app = Router::new()
            .route("/auth/accounts/{addr}", get(scripted_handler))
            .route("/thorchain/nodeaccount/{addr}", get(scripted_handler))
            .route("/thorchain/keysign/{height}/{pub_key}", get(scripted_handler))
            .route("/thorchain/keygen/{height}/{pub_key}", get(scripted_handler))
            .route("/thorchain/lastblock/", get(scripted_handler))
            .route("/thorchain/lastblock/{chain}", get(scripted_handler))
            .route("/thorchain/vaults/pubkeys", get(scripted_handler))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock thornode listener");
        let addr = listener
            .local_addr()
            .expect("mock thornode listener should have a local address");

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("mock thornode axum server failed");
        });

        Self {
            host: addr.to_string(),
            state,
            task,
        }
    }

    pub fn script(&self, path: &str, status: u16, body: impl Into<String>) -> &Self {
        self.state
            .responses
            .lock()
            .expect("responses mutex poisoned")
            .entry(path.to_string())
            .or_default()
            .push_back((status, body.into()));
        self
    }

    pub fn hits(&self, path: &str) -> u32 {
        *self
            .state
            .hits
            .lock()
            .expect("hits mutex poisoned")
            .get(path)
            .unwrap_or(&0)
    }
}

impl Drop for MockThornode {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn scripted_handler(
    State(state): State<Arc<MockThornodeState>>,
    uri: Uri,
) -> (StatusCode, String) {
    let path = uri.path().to_string();
    *state
        .hits
        .lock()
        .expect("hits mutex poisoned")
        .entry(path.clone())
        .or_insert(0) += 1;

    let mut responses = state.responses.lock().expect("responses mutex poisoned");
    let scripted = responses.get_mut(&path).and_then(|queue| {
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    });

    match scripted {
        Some((status, body)) => (
            StatusCode::from_u16(status).expect("scripted status should be valid"),
            body,
        ),
        None => (StatusCode::NOT_FOUND, format!("no scripted response for {path}")),
    }
}

pub fn client_config(host: &str) -> ClientConfiguration {
    ClientConfiguration {
        chain_id: "thorchain".to_string(),
        chain_host: host.to_string(),
        chain_home_folder: "~/.thorcli".to_string(),
        signer_name: "signer".to_string(),
        signer_passwd: "signerpassword".to_string(),
        signer_address: SIGNER_ADDRESS.to_string(),
        request_timeout: Duration::from_secs(5),
        retry_policy: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        },
        whitelist: WhitelistPolicy {
            deadline: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
        },
        pub_key_bootstrap: PubKeyBootstrapPolicy {
            attempts: 3,
            interval: Duration::from_millis(10),
        },
    }
}

pub fn test_metrics() -> ScannerMetrics {
    ScannerMetrics::register(&mut Registry::default(), "test")
}

pub fn account_body(account_number: &str, sequence: &str) -> String {
    serde_json::json!({
        "height": "78",
        "result": {
            "type": "cosmos-sdk/Account",
            "value": {
                "address": SIGNER_ADDRESS,
                "coins": [],
                "public_key": null,
                "account_number": account_number,
                "sequence": sequence
            }
        }
    })
    .to_string()
}

pub fn node_account_body(status: &str, secp256k1: &str, membership: &[&str]) -> String {
    serde_json::json!({
        "node_address": SIGNER_ADDRESS,
        "status": status,
        "pub_key_set": {
            "secp256k1": secp256k1,
            "ed25519": ""
        },
        "validator_cons_pub_key": "",
        "bond_address": "tbnb1yycn4mh6ffwpjf584t8lpp7c27ghu03gpvqkfj",
        "active_block_height": "10",
        "status_since": "10",
        "signer_membership": membership
    })
    .to_string()
}

pub fn keysign_body(height: i64) -> String {
    serde_json::json!({
        "height": height.to_string(),
        "tx_array": [{
            "chain": "BNB",
            "to": "tbnb186nvjtqk4kkea3f8a30xh4vqtkrlu2rm9xgly3",
            "vault_pubkey": "thorpub1addwnpepqflvfv08t6qt95lmttd6wpf3ss8wx63e9vf6fvyuj2yy6nnyna576rfzjks",
            "coin": { "asset": "BNB.BNB", "amount": "194765912" },
            "memo": "OUTBOUND:E9A0A3F5C6D4E0B3",
            "max_gas": null,
            "in_hash": "E9A0A3F5C6D4E0B3",
            "out_hash": ""
        }]
    })
    .to_string()
}

pub fn keygens_body(height: i64, members: &[&str]) -> String {
    serde_json::json!({
        "height": height.to_string(),
        "keygens": [members]
    })
    .to_string()
}

pub fn lastblock_body(observed: i64, signed: i64, statechain: i64) -> String {
    serde_json::json!({
        "chain": "BNB",
        "lastobservedin": observed.to_string(),
        "lastsignedout": signed.to_string(),
        "statechain": statechain.to_string()
    })
    .to_string()
}
