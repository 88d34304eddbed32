use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::thorclient::types::VaultPubKeys;
use crate::thorclient::{ThorClientError, ThorchainClient};

/// One tracked pubkey. Only signer keys are queried for keysign and keygen work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedPubKey {
    pub pub_key: String,
    pub signer: bool,
    pub node_account: bool,
}

/// Ordered set of pubkeys known to this node: its own signing keys plus vault keys from
/// THORNode.
///
/// Iteration order is insertion order; the block processor queries THORNode in that order.
#[derive(Debug, Default)]
pub struct PubKeyManager {
    keys: RwLock<Vec<ManagedPubKey>>,
}

impl PubKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `pub_key`. An existing key is only ever promoted to signer, never demoted.
    pub fn add(&self, pub_key: impl Into<String>, signer: bool) {
        let pub_key = pub_key.into();
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        match keys.iter_mut().find(|key| key.pub_key == pub_key) {
            Some(existing) => existing.signer |= signer,
            None => keys.push(ManagedPubKey {
                pub_key,
                signer,
                node_account: false,
            }),
        }
    }

    /// Adds this node's own key as a signer.
    pub fn add_node_pub_key(&self, pub_key: impl Into<String>) {
        let pub_key = pub_key.into();
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        match keys.iter_mut().find(|key| key.pub_key == pub_key) {
            Some(existing) => {
                existing.signer = true;
                existing.node_account = true;
            }
            None => keys.push(ManagedPubKey {
                pub_key,
                signer: true,
                node_account: true,
            }),
        }
    }

    pub fn remove(&self, pub_key: &str) {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        keys.retain(|key| key.pub_key != pub_key);
    }

    pub fn contains(&self, pub_key: &str) -> bool {
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.iter().any(|key| key.pub_key == pub_key)
    }

    /// Snapshot of every tracked key.
    pub fn get_pks(&self) -> Vec<String> {
        self.snapshot(|_| true)
    }

    /// Snapshot of the keys this node signs with.
    pub fn get_sign_pks(&self) -> Vec<String> {
        self.snapshot(|key| key.signer)
    }

    pub fn node_pub_key(&self) -> Option<String> {
        self.snapshot(|key| key.node_account).into_iter().next()
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds every asgard and yggdrasil key from THORNode as a non-signer. Returns how many
    /// keys were new.
    pub async fn fetch_pub_keys<S>(&self, source: &S) -> Result<usize, ThorClientError>
    where
        S: VaultPubKeySource + ?Sized,
    {
        let vaults = source.get_vault_pubkeys().await?;
        let before = self.len();
        for pub_key in vaults.asgard.into_iter().chain(vaults.yggdrasil) {
            if !pub_key.is_empty() {
                self.add(pub_key, false);
            }
        }
        Ok(self.len().saturating_sub(before))
    }

    fn snapshot(&self, keep: impl Fn(&ManagedPubKey) -> bool) -> Vec<String> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|key| keep(key))
            .map(|key| key.pub_key.clone())
            .collect()
    }
}

/// Collects signer keys.
impl<S: Into<String>> FromIterator<S> for PubKeyManager {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let manager = Self::new();
        for key in iter {
            manager.add(key, true);
        }
        manager
    }
}

/// Source of the vault pubkeys published by THORNode.
pub trait VaultPubKeySource: Send + Sync {
    fn get_vault_pubkeys(&self) -> BoxFuture<'_, Result<VaultPubKeys, ThorClientError>>;
}

impl<T> VaultPubKeySource for Arc<T>
where
    T: VaultPubKeySource + ?Sized,
{
    fn get_vault_pubkeys(&self) -> BoxFuture<'_, Result<VaultPubKeys, ThorClientError>> {
        (**self).get_vault_pubkeys()
    }
}

impl VaultPubKeySource for ThorchainClient {
    fn get_vault_pubkeys(&self) -> BoxFuture<'_, Result<VaultPubKeys, ThorClientError>> {
        Box::pin(ThorchainClient::get_vault_pubkeys(self))
    }
}

/// Re-reads the vault pubkeys every `period` until `stop` fires. The first fetch is the
/// caller's; this loop starts one period later. Failures are logged and retried next tick.
pub async fn refresh_vault_pub_keys<S>(
    manager: Arc<PubKeyManager>,
    source: S,
    period: Duration,
    stop: CancellationToken,
) where
    S: VaultPubKeySource,
{
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    tracing::info!(event = "pubkey_refresh_started", "start to update pub keys");

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            fetched = manager.fetch_pub_keys(&source) => fetched,
        };
        match fetched {
            Ok(0) => {}
            Ok(added) => tracing::info!(
                event = "vault_pubkeys_added",
                added,
                total = manager.len(),
                "added vault pubkeys"
            ),
            Err(err) if err.is_cancelled() => break,
            Err(err) => tracing::error!(
                event = "vault_pubkeys_fetch_failed",
                error = %err,
                "fail to get pubkeys from thorchain"
            ),
        }
    }
    tracing::info!(event = "pubkey_refresh_stopped", "stop to update pub keys");
}
