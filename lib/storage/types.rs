use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::thorclient::types::TxOut;

/// Processing state of one scanned block height.
///
/// The numeric codes are persisted as the single value byte of `block-status-<height>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockScanStatus {
    Processing = 0,
    Failed = 1,
    Finished = 2,
    NotStarted = 3,
}

impl BlockScanStatus {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for BlockScanStatus {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Processing),
            1 => Ok(Self::Failed),
            2 => Ok(Self::Finished),
            3 => Ok(Self::NotStarted),
            other => Err(other),
        }
    }
}

/// Signer-side state of a locally stored `TxOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalStatus {
    Processing = 0,
    Failed = 1,
}

impl Serialize for LocalStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for LocalStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Self::Processing),
            1 => Ok(Self::Failed),
            other => Err(serde::de::Error::custom(format!(
                "unknown local status code {other}"
            ))),
        }
    }
}

/// Value stored under `txout-<height>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutLocalItem {
    pub tx_out: TxOut,
    pub status: LocalStatus,
}
