//! # Stitch Keys
//!
//! The closed set of typed dimensions along which two entities may be
//! linked. Every key declares its element type, a priority (higher is
//! stronger evidence) and whether its edges are directed.
//!
//! Relationship types in the store are the key names, so the name mapping
//! must stay stable. `TryFrom<&str>` recovers a key from a relationship
//! type and is total: unknown names are an error, never a panic.

use crate::types::{ScalarType, StitchError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A typed stitching dimension.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StitchKey {
    N_Name,
    I_UNII,
    I_CAS,
    I_SID,
    I_CID,
    I_ChEMBL,
    I_DB,
    I_CODE,
    I_MeSH,
    I_UniProt,
    I_NCT,
    I_PMID,
    I_ANY,
    H_InChIKey,
    H_LyChI_L1,
    H_LyChI_L2,
    H_LyChI_L3,
    H_LyChI_L4,
    H_LyChI_L5,
    H_SHA1,
    H_SHA256,
    H_MD5,
    U_Wikipedia,
    U_DOI,
    T_ActiveMoiety,
    T_Keyword,
}

impl StitchKey {
    /// Every key in declaration order.
    pub const ALL: [Self; 26] = [
        Self::N_Name,
        Self::I_UNII,
        Self::I_CAS,
        Self::I_SID,
        Self::I_CID,
        Self::I_ChEMBL,
        Self::I_DB,
        Self::I_CODE,
        Self::I_MeSH,
        Self::I_UniProt,
        Self::I_NCT,
        Self::I_PMID,
        Self::I_ANY,
        Self::H_InChIKey,
        Self::H_LyChI_L1,
        Self::H_LyChI_L2,
        Self::H_LyChI_L3,
        Self::H_LyChI_L4,
        Self::H_LyChI_L5,
        Self::H_SHA1,
        Self::H_SHA256,
        Self::H_MD5,
        Self::U_Wikipedia,
        Self::U_DOI,
        Self::T_ActiveMoiety,
        Self::T_Keyword,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::N_Name => "N_Name",
            Self::I_UNII => "I_UNII",
            Self::I_CAS => "I_CAS",
            Self::I_SID => "I_SID",
            Self::I_CID => "I_CID",
            Self::I_ChEMBL => "I_ChEMBL",
            Self::I_DB => "I_DB",
            Self::I_CODE => "I_CODE",
            Self::I_MeSH => "I_MeSH",
            Self::I_UniProt => "I_UniProt",
            Self::I_NCT => "I_NCT",
            Self::I_PMID => "I_PMID",
            Self::I_ANY => "I_ANY",
            Self::H_InChIKey => "H_InChIKey",
            Self::H_LyChI_L1 => "H_LyChI_L1",
            Self::H_LyChI_L2 => "H_LyChI_L2",
            Self::H_LyChI_L3 => "H_LyChI_L3",
            Self::H_LyChI_L4 => "H_LyChI_L4",
            Self::H_LyChI_L5 => "H_LyChI_L5",
            Self::H_SHA1 => "H_SHA1",
            Self::H_SHA256 => "H_SHA256",
            Self::H_MD5 => "H_MD5",
            Self::U_Wikipedia => "U_Wikipedia",
            Self::U_DOI => "U_DOI",
            Self::T_ActiveMoiety => "T_ActiveMoiety",
            Self::T_Keyword => "T_Keyword",
        }
    }

    /// Element type accepted by this key.
    #[must_use]
    pub const fn value_type(self) -> ScalarType {
        match self {
            Self::I_SID | Self::I_CID | Self::I_PMID | Self::I_ANY => ScalarType::Long,
            _ => ScalarType::String,
        }
    }

    /// Evidence strength, from 1 (weak) to 5 (strong).
    #[must_use]
    pub const fn priority(self) -> u32 {
        match self {
            Self::H_SHA1 | Self::H_SHA256 | Self::T_ActiveMoiety => 5,
            Self::H_MD5 => 4,
            Self::I_UNII | Self::H_InChIKey | Self::H_LyChI_L5 => 3,
            Self::N_Name
            | Self::I_CAS
            | Self::I_CID
            | Self::I_ChEMBL
            | Self::I_DB
            | Self::I_MeSH
            | Self::I_UniProt
            | Self::I_PMID
            | Self::H_LyChI_L4 => 2,
            _ => 1,
        }
    }

    /// Directed keys point from a member to a parent concept.
    #[must_use]
    pub const fn directed(self) -> bool {
        matches!(self, Self::T_ActiveMoiety)
    }

    /// Keys whose priority lies in `lower..=upper`, in declaration order.
    #[must_use]
    pub fn keys(lower: u32, upper: u32) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|k| (lower..=upper).contains(&k.priority()))
            .collect()
    }
}

impl fmt::Display for StitchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<&str> for StitchKey {
    type Error = StitchError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == name)
            .ok_or_else(|| StitchError::UnknownStitchKey(name.to_string()))
    }
}

impl std::str::FromStr for StitchKey {
    type Err = StitchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for key in StitchKey::ALL {
            assert_eq!(StitchKey::try_from(key.name()).unwrap(), key);
        }
    }

    #[test]
    fn unknown_name_is_an_error() {
        assert!(matches!(
            StitchKey::try_from("PAYLOAD"),
            Err(StitchError::UnknownStitchKey(_))
        ));
        assert!(StitchKey::try_from("I_CAS.SNAPSHOT").is_err());
    }

    #[test]
    fn long_keys() {
        assert_eq!(StitchKey::I_CID.value_type(), ScalarType::Long);
        assert_eq!(StitchKey::I_CAS.value_type(), ScalarType::String);
    }

    #[test]
    fn keys_by_priority_range() {
        let strongest = StitchKey::keys(5, 5);
        assert_eq!(
            strongest,
            vec![StitchKey::H_SHA1, StitchKey::H_SHA256, StitchKey::T_ActiveMoiety]
        );
        assert_eq!(StitchKey::keys(1, 5).len(), StitchKey::ALL.len());
        assert!(StitchKey::keys(6, 9).is_empty());
    }

    #[test]
    fn only_active_moiety_is_directed() {
        let directed: Vec<_> = StitchKey::ALL.into_iter().filter(|k| k.directed()).collect();
        assert_eq!(directed, vec![StitchKey::T_ActiveMoiety]);
    }
}
