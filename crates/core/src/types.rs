//! Core enums shared by the DDO model and the processors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::ALLOWED_VERSIONS;
use crate::error::CoreError;

/// Lifecycle state of a data NFT's metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum NftState {
    /// Listed and orderable.
    Active = 0,
    /// No longer maintained.
    EndOfLife = 1,
    /// Superseded by another asset.
    Deprecated = 2,
    /// Revoked by the publisher.
    Revoked = 3,
    /// Temporarily not orderable.
    OrderingDisabled = 4,
}

impl NftState {
    /// Whether entering this state removes the DDO body (soft delete).
    pub const fn is_soft_deleted(&self) -> bool {
        matches!(self, NftState::Deprecated | NftState::Revoked)
    }

    /// Raw on-chain value.
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for NftState {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NftState::Active),
            1 => Ok(NftState::EndOfLife),
            2 => Ok(NftState::Deprecated),
            3 => Ok(NftState::Revoked),
            4 => Ok(NftState::OrderingDisabled),
            other => Err(CoreError::InvalidState(other)),
        }
    }
}

impl From<NftState> for u8 {
    fn from(state: NftState) -> Self {
        state.as_u8()
    }
}

impl fmt::Display for NftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NftState::Active => "ACTIVE",
            NftState::EndOfLife => "END_OF_LIFE",
            NftState::Deprecated => "DEPRECATED",
            NftState::Revoked => "REVOKED",
            NftState::OrderingDisabled => "ORDERING_DISABLED",
        };
        f.write_str(name)
    }
}

/// DDO schema version from the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DdoVersion {
    /// `4.1.0`
    V4_1_0,
    /// `4.3.0`, adds consumer parameters on services.
    V4_3_0,
    /// `4.5.0`
    V4_5_0,
}

impl DdoVersion {
    /// Every accepted version, oldest first.
    pub const ALL: [DdoVersion; 3] = [DdoVersion::V4_1_0, DdoVersion::V4_3_0, DdoVersion::V4_5_0];

    /// Semantic version string.
    pub const fn as_str(&self) -> &'static str {
        match self {
            DdoVersion::V4_1_0 => ALLOWED_VERSIONS[0],
            DdoVersion::V4_3_0 => ALLOWED_VERSIONS[1],
            DdoVersion::V4_5_0 => ALLOWED_VERSIONS[2],
        }
    }
}

impl FromStr for DdoVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DdoVersion::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| CoreError::UnsupportedVersion(s.to_string()))
    }
}

impl TryFrom<String> for DdoVersion {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DdoVersion> for String {
    fn from(version: DdoVersion) -> Self {
        version.as_str().to_string()
    }
}

impl fmt::Display for DdoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of service offered by an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Download access.
    Access,
    /// Compute-to-data.
    Compute,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nft_state_conversion() {
        for raw in 0u8..=4 {
            let state = NftState::try_from(raw).unwrap();
            assert_eq!(state.as_u8(), raw);
        }
        assert!(NftState::try_from(5).is_err());

        assert!(NftState::Deprecated.is_soft_deleted());
        assert!(NftState::Revoked.is_soft_deleted());
        assert!(!NftState::EndOfLife.is_soft_deleted());
        assert!(!NftState::OrderingDisabled.is_soft_deleted());
    }

    #[test]
    fn test_nft_state_serde_as_integer() {
        assert_eq!(serde_json::to_string(&NftState::Revoked).unwrap(), "3");
        let state: NftState = serde_json::from_str("0").unwrap();
        assert_eq!(state, NftState::Active);
        assert!(serde_json::from_str::<NftState>("9").is_err());
    }

    #[test]
    fn test_version_allow_list() {
        assert_eq!("4.1.0".parse::<DdoVersion>().unwrap(), DdoVersion::V4_1_0);
        assert_eq!("4.5.0".parse::<DdoVersion>().unwrap(), DdoVersion::V4_5_0);
        assert!("4.0.0".parse::<DdoVersion>().is_err());
        assert!("5.0.0".parse::<DdoVersion>().is_err());
        assert_eq!(
            serde_json::to_string(&DdoVersion::V4_3_0).unwrap(),
            "\"4.3.0\""
        );
    }
}
