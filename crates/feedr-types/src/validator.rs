//! Validator identities and voting power.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::VALIDATOR_ADDRESS_LEN;

/// A validator consensus address. Serialized as lowercase hex.
#[serde_as]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatorId(#[serde_as(as = "serde_with::hex::Hex")] pub [u8; VALIDATOR_ADDRESS_LEN]);

impl ValidatorId {
    pub fn as_bytes(&self) -> &[u8; VALIDATOR_ADDRESS_LEN] {
        &self.0
    }
}

impl From<[u8; VALIDATOR_ADDRESS_LEN]> for ValidatorId {
    fn from(bytes: [u8; VALIDATOR_ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorId({self})")
    }
}

/// Error parsing a hex validator address.
#[derive(Debug, thiserror::Error)]
pub enum ValidatorIdError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected 20 bytes, got {0}")]
    Length(usize),
}

impl FromStr for ValidatorId {
    type Err = ValidatorIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let arr: [u8; VALIDATOR_ADDRESS_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| ValidatorIdError::Length(bytes.len()))?;
        Ok(Self(arr))
    }
}

/// An active validator and its voting power.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorPower {
    pub validator: ValidatorId,
    pub power: u64,
}
