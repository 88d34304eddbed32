use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::codec::{amino_int, null_as_default};

/// Outer envelope of `/auth/accounts/<addr>`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccountResp {
    pub height: String,
    pub result: serde_json::Value,
}

/// Amino type envelope: `{"type": "...", "value": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AminoEnvelope<T> {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BaseAccount {
    #[serde(default)]
    pub address: String,
    #[serde(with = "amino_int")]
    pub account_number: u64,
    #[serde(with = "amino_int")]
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Coin {
    pub asset: String,
    #[serde(with = "amino_int")]
    pub amount: u64,
}

/// One outbound transaction THORNode asks this node to sign.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TxOutItem {
    pub chain: String,
    pub to: String,
    pub vault_pubkey: String,
    pub coin: Coin,
    #[serde(default)]
    pub memo: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub max_gas: Vec<Coin>,
    #[serde(default)]
    pub in_hash: String,
    #[serde(default)]
    pub out_hash: String,
}

/// Keysign payload for one height and vault pubkey.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TxOut {
    #[serde(with = "amino_int")]
    pub height: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tx_array: Vec<TxOutItem>,
}

impl TxOut {
    pub fn is_empty(&self) -> bool {
        self.tx_array.is_empty()
    }
}

/// Member pubkeys of one key-generation ceremony.
pub type Keygen = Vec<String>;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Keygens {
    #[serde(with = "amino_int")]
    pub height: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub keygens: Vec<Keygen>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeStatus {
    #[default]
    Unknown,
    WhiteListed,
    Standby,
    Ready,
    Active,
    Disabled,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::WhiteListed => "whitelisted",
            Self::Standby => "standby",
            Self::Ready => "ready",
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    /// Case-insensitive; anything unrecognized maps to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        [
            Self::WhiteListed,
            Self::Standby,
            Self::Ready,
            Self::Active,
            Self::Disabled,
        ]
        .into_iter()
        .find(|status| status.as_str().eq_ignore_ascii_case(raw))
        .unwrap_or(Self::Unknown)
    }

    pub fn is_whitelisted(self) -> bool {
        !matches!(self, Self::Unknown | Self::Disabled)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NodeStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NodeStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct PubKeySet {
    #[serde(default)]
    pub secp256k1: String,
    #[serde(default)]
    pub ed25519: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeAccount {
    pub node_address: String,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub pub_key_set: PubKeySet,
    #[serde(default)]
    pub validator_cons_pub_key: String,
    #[serde(default)]
    pub bond_address: String,
    #[serde(default, with = "amino_int")]
    pub active_block_height: i64,
    #[serde(default, with = "amino_int")]
    pub status_since: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub signer_membership: Vec<String>,
}

/// Response of `/thorchain/lastblock/<chain>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct QueryResHeights {
    #[serde(default)]
    pub chain: String,
    #[serde(rename = "lastobservedin", with = "amino_int")]
    pub last_chain_height: i64,
    #[serde(rename = "lastsignedout", with = "amino_int")]
    pub last_signed_height: i64,
    #[serde(with = "amino_int")]
    pub statechain: i64,
}

/// Response of `/thorchain/vaults/pubkeys`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct VaultPubKeys {
    #[serde(default, deserialize_with = "null_as_default")]
    pub asgard: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub yggdrasil: Vec<String>,
}

/// Amino-wrapped message inside a `StdTx`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Msg {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StdFee {
    #[serde(default, deserialize_with = "null_as_default")]
    pub amount: Vec<Coin>,
    #[serde(with = "amino_int")]
    pub gas: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StdTx {
    pub msg: Vec<Msg>,
    pub fee: StdFee,
    #[serde(default, deserialize_with = "null_as_default")]
    pub signatures: Vec<serde_json::Value>,
    #[serde(default)]
    pub memo: String,
}

/// Broadcast mode accepted by the `/txs` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxMode {
    Sync,
    Async,
    Block,
}

/// Body posted to `/txs` by the signer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SetTx {
    pub mode: TxMode,
    pub tx: StdTx,
}
