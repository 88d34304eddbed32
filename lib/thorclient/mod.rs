//! REST client for the THORNode API consumed by the signer.

pub mod codec;
pub mod error;
pub mod http;
pub mod retry;
pub mod types;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfiguration;
use crate::pubkeys::PubKeyManager;
use crate::server::monitoring::{inc_error, ScannerMetrics};
use codec::decode;
pub use error::ThorClientError;
use http::RetryableHttpClient;
use types::{
    AccountResp, AminoEnvelope, BaseAccount, Keygens, NodeAccount, QueryResHeights, TxOut,
    VaultPubKeys,
};

pub const AUTH_ACCOUNT_ENDPOINT: &str = "/auth/accounts";
pub const KEYGEN_ENDPOINT: &str = "/thorchain/keygen";
pub const KEYSIGN_ENDPOINT: &str = "/thorchain/keysign";
pub const LAST_BLOCK_ENDPOINT: &str = "/thorchain/lastblock";
pub const NODE_ACCOUNT_ENDPOINT: &str = "/thorchain/nodeaccount";
pub const VAULTS_ENDPOINT: &str = "/thorchain/vaults/pubkeys";

pub struct ThorchainClient {
    cfg: ClientConfiguration,
    http: RetryableHttpClient,
    metrics: ScannerMetrics,
    cancel_token: CancellationToken,
    account_number: AtomicU64,
    sequence_number: AtomicU64,
}

impl ThorchainClient {
    /// Validates `cfg` and builds the client. Cancelling `cancel_token` aborts every in-flight
    /// request and every startup wait.
    pub fn new(
        cfg: ClientConfiguration,
        metrics: ScannerMetrics,
        cancel_token: CancellationToken,
    ) -> Result<Self, ThorClientError> {
        cfg.validate()?;
        let http = RetryableHttpClient::new(
            cfg.request_timeout,
            cfg.retry_policy,
            cancel_token.clone(),
        )?;
        Ok(Self {
            cfg,
            http,
            metrics,
            cancel_token,
            account_number: AtomicU64::new(0),
            sequence_number: AtomicU64::new(0),
        })
    }

    pub fn thorchain_url(&self, path: &str) -> String {
        format!("http://{}{}", self.cfg.chain_host, path)
    }

    pub fn signer_address(&self) -> &str {
        &self.cfg.signer_address
    }

    /// Waits for the whitelist, then caches the signer's account number and sequence.
    pub async fn start(&self) -> Result<(), ThorClientError> {
        self.ensure_node_whitelisted_with_timeout().await?;
        self.load_account_info().await
    }

    /// Fetches and caches the account number and sequence without the whitelist wait.
    pub async fn load_account_info(&self) -> Result<(), ThorClientError> {
        let (account_number, sequence) = self.get_account_number_and_sequence().await?;
        self.account_number.store(account_number, Ordering::SeqCst);
        self.sequence_number.store(sequence, Ordering::SeqCst);
        tracing::info!(
            event = "thornode_account_loaded",
            account_number,
            sequence,
            "cached signer account info"
        );
        Ok(())
    }

    pub fn stop(&self) {
        tracing::info!(event = "thornode_client_stopped", "stopping thorchain client");
    }

    pub fn account_number(&self) -> u64 {
        self.account_number.load(Ordering::SeqCst)
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number.load(Ordering::SeqCst)
    }

    /// Polls the signer's node account until its status allows signing.
    pub async fn ensure_node_whitelisted_with_timeout(&self) -> Result<(), ThorClientError> {
        let policy = self.cfg.whitelist;
        let deadline = Instant::now() + policy.deadline;
        loop {
            match self.ensure_node_whitelisted().await {
                Ok(()) => return Ok(()),
                Err(ThorClientError::EmptySignerAddress) => {
                    return Err(ThorClientError::EmptySignerAddress)
                }
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => tracing::warn!(
                    event = "node_not_whitelisted",
                    address = %self.cfg.signer_address,
                    error = %err,
                    "node account is not whitelisted, will retry"
                ),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ThorClientError::NotWhitelisted(policy.deadline));
            }
            self.sleep_or_cancel(policy.poll_interval.min(deadline - now))
                .await?;
        }
    }

    async fn ensure_node_whitelisted(&self) -> Result<(), ThorClientError> {
        if self.cfg.signer_address.is_empty() {
            return Err(ThorClientError::EmptySignerAddress);
        }
        let account = self.get_node_account(&self.cfg.signer_address).await?;
        if !account.status.is_whitelisted() {
            return Err(ThorClientError::InactiveNode(account.status.to_string()));
        }
        Ok(())
    }

    /// Waits for the node account to publish its secp256k1 key and returns a manager holding
    /// the membership keys and the node key, all as signers.
    pub async fn get_pub_keys(&self) -> Result<PubKeyManager, ThorClientError> {
        let policy = self.cfg.pub_key_bootstrap;
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        let account = loop {
            let account = self
                .get_node_account(&self.cfg.signer_address)
                .await
                .map_err(|err| err.context("failed to get node account from thorchain"))?;
            if !account.pub_key_set.secp256k1.is_empty() || attempt >= attempts {
                break account;
            }
            tracing::info!(
                event = "node_pubkey_pending",
                attempt,
                "node account has no secp256k1 key yet"
            );
            self.sleep_or_cancel(policy.interval).await?;
            attempt += 1;
        };

        let manager = PubKeyManager::new();
        for member in account.signer_membership {
            if !member.is_empty() {
                manager.add(member, true);
            }
        }
        if account.pub_key_set.secp256k1.is_empty() {
            return Err(ThorClientError::MissingNodePubKey);
        }
        manager.add_node_pub_key(account.pub_key_set.secp256k1);
        Ok(manager)
    }

    pub async fn get_node_account(&self, addr: &str) -> Result<NodeAccount, ThorClientError> {
        let url = self.thorchain_url(&format!("{NODE_ACCOUNT_ENDPOINT}/{addr}"));
        let body = self.http.get(&url).await.map_err(|err| {
            if !err.is_cancelled() {
                inc_error(&self.metrics.client_errors, "fail_get_node_account", addr);
            }
            err
        })?;
        decode(&body).map_err(|source| {
            inc_error(
                &self.metrics.client_errors,
                "fail_unmarshal_node_account",
                addr,
            );
            ThorClientError::Decode {
                context: "failed to unmarshal node account",
                source,
            }
        })
    }

    pub async fn get_last_observed_in_height(&self, chain: &str) -> Result<i64, ThorClientError> {
        let heights = self
            .get_last_block(chain)
            .await
            .map_err(|err| err.context("failed to GetLastObservedInHeight"))?;
        Ok(heights.last_chain_height)
    }

    pub async fn get_last_signed_out_height(&self) -> Result<i64, ThorClientError> {
        let heights = self
            .get_last_block("")
            .await
            .map_err(|err| err.context("failed to GetLastSignedOutheight"))?;
        Ok(heights.last_signed_height)
    }

    pub async fn get_statechain_height(&self) -> Result<i64, ThorClientError> {
        let heights = self
            .get_last_block("")
            .await
            .map_err(|err| err.context("failed to GetStatechainHeight"))?;
        Ok(heights.statechain)
    }

    async fn get_last_block(&self, chain: &str) -> Result<QueryResHeights, ThorClientError> {
        let url = self.thorchain_url(&format!("{LAST_BLOCK_ENDPOINT}/{chain}"));
        let body = self.http.get(&url).await?;
        decode(&body).map_err(|source| {
            inc_error(&self.metrics.client_errors, "fail_unmarshal_lastblock", chain);
            ThorClientError::Decode {
                context: "failed to unmarshal last block",
                source,
            }
        })
    }

    pub async fn get_keysign(&self, height: i64, pub_key: &str) -> Result<TxOut, ThorClientError> {
        let url = self.thorchain_url(&format!("{KEYSIGN_ENDPOINT}/{height}/{pub_key}"));
        let body = self.http.get(&url).await?;
        decode(&body).map_err(|source| ThorClientError::Decode {
            context: "failed to unmarshal keysign",
            source,
        })
    }

    pub async fn get_keygens(
        &self,
        height: i64,
        pub_key: &str,
    ) -> Result<Keygens, ThorClientError> {
        let url = self.thorchain_url(&format!("{KEYGEN_ENDPOINT}/{height}/{pub_key}"));
        let body = self.http.get(&url).await?;
        decode(&body).map_err(|source| ThorClientError::Decode {
            context: "failed to unmarshal keygens",
            source,
        })
    }

    pub async fn get_vault_pubkeys(&self) -> Result<VaultPubKeys, ThorClientError> {
        let url = self.thorchain_url(VAULTS_ENDPOINT);
        let body = self
            .http
            .get(&url)
            .await
            .map_err(|err| err.context("fail to get pubkeys from thorchain"))?;
        decode(&body).map_err(|source| {
            inc_error(
                &self.metrics.pub_key_manager_errors,
                "fail_unmarshal_pubkeys",
                "",
            );
            ThorClientError::Decode {
                context: "fail to unmarshal pubkeys",
                source,
            }
        })
    }

    /// Reads the signer's account number and sequence from `/auth/accounts`.
    pub async fn get_account_number_and_sequence(&self) -> Result<(u64, u64), ThorClientError> {
        let url = self.thorchain_url(&format!(
            "{AUTH_ACCOUNT_ENDPOINT}/{}",
            self.cfg.signer_address
        ));
        let body = self
            .http
            .get(&url)
            .await
            .map_err(|err| err.context("failed to get auth accounts"))?;

        let resp: AccountResp =
            serde_json::from_slice(&body).map_err(|source| ThorClientError::Decode {
                context: "failed to unmarshal account resp",
                source,
            })?;
        let account: AminoEnvelope<BaseAccount> =
            serde_json::from_value(resp.result).map_err(|source| ThorClientError::Decode {
                context: "failed to unmarshal base account",
                source,
            })?;

        Ok((account.value.account_number, account.value.sequence))
    }

    async fn sleep_or_cancel(&self, duration: Duration) -> Result<(), ThorClientError> {
        tokio::select! {
            _ = self.cancel_token.cancelled() => Err(ThorClientError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
