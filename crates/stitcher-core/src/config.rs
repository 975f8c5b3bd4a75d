//! # Stitch Configuration
//!
//! Tunable heuristics of the engine. The defaults reproduce the
//! thresholds the resolution rules were designed around; every one of
//! them can be overridden from a TOML file:
//!
//! ```toml
//! fanout_warn = 50
//! excluded_keys = ["H_LyChI_L1", "H_LyChI_L2", "H_LyChI_L3"]
//! require_distinct_sources = false
//!
//! [blacklist]
//! N_Name = ["WATER", "SALT"]
//! ```

use crate::primitives::{DEFAULT_FANOUT_WARN, DEFAULT_MIN_CLIQUE_SIZE};
use crate::stitch_key::StitchKey;
use crate::types::{Scalar, StitchError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchConfig {
    /// Index hits for one value above which stitching logs a fan-out warning.
    pub fanout_warn: usize,

    /// Smallest clique the enumeration emits.
    pub min_clique_size: usize,

    /// Keys left out of clique enumeration during resolution.
    pub excluded_keys: Vec<StitchKey>,

    /// Keys whose cliques are always closed.
    pub always_close: Vec<StitchKey>,

    /// Keys whose cliques are never closed.
    pub never_close: Vec<StitchKey>,

    /// Close only when no entity outside the clique shares the value.
    pub require_exclusive_value: bool,

    /// Close only when every clique member comes from a distinct source.
    pub require_distinct_sources: bool,

    /// Values never stitched, by key name. `"*"` applies to every key.
    pub blacklist: BTreeMap<String, Vec<String>>,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            fanout_warn: DEFAULT_FANOUT_WARN,
            min_clique_size: DEFAULT_MIN_CLIQUE_SIZE,
            excluded_keys: vec![
                StitchKey::H_LyChI_L1,
                StitchKey::H_LyChI_L2,
                StitchKey::H_LyChI_L3,
            ],
            always_close: vec![StitchKey::H_LyChI_L4, StitchKey::H_LyChI_L5],
            never_close: vec![StitchKey::H_LyChI_L3],
            require_exclusive_value: true,
            require_distinct_sources: true,
            blacklist: BTreeMap::new(),
        }
    }
}

/// Blacklist entry applying to every key.
const ANY_KEY: &str = "*";

impl StitchConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, StitchError> {
        let config: Self =
            toml::from_str(text).map_err(|e| StitchError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StitchError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            StitchError::IoError(format!(
                "Cannot read config '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&text)
    }

    /// Reject out-of-range thresholds and unknown key names.
    pub fn validate(&self) -> Result<(), StitchError> {
        if self.min_clique_size < DEFAULT_MIN_CLIQUE_SIZE {
            return Err(StitchError::InvalidConfig(format!(
                "min_clique_size must be at least {}, got {}",
                DEFAULT_MIN_CLIQUE_SIZE, self.min_clique_size
            )));
        }
        if let Some(key) = self.always_close.iter().find(|k| self.never_close.contains(k)) {
            return Err(StitchError::InvalidConfig(format!(
                "{key} is both always_close and never_close"
            )));
        }
        for name in self.blacklist.keys() {
            if name != ANY_KEY {
                StitchKey::try_from(name.as_str())?;
            }
        }
        Ok(())
    }

    /// Keys enumerated during resolution, in declaration order.
    #[must_use]
    pub fn resolution_keys(&self) -> Vec<StitchKey> {
        StitchKey::ALL
            .into_iter()
            .filter(|k| !self.excluded_keys.contains(k))
            .collect()
    }

    /// True when `value` must not be stitched under `key`.
    #[must_use]
    pub fn is_blacklisted(&self, key: StitchKey, value: &Scalar) -> bool {
        let text = value.to_string();
        [key.name(), ANY_KEY]
            .iter()
            .filter_map(|name| self.blacklist.get(*name))
            .flatten()
            .any(|entry| entry.eq_ignore_ascii_case(&text))
    }

    /// Add `values` to the blacklist of `key`.
    pub fn add_blacklist(&mut self, key: StitchKey, values: &[&str]) {
        self.blacklist
            .entry(key.name().to_string())
            .or_default()
            .extend(values.iter().map(|v| (*v).to_string()));
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
    fn defaults_are_valid() {
        let config = StitchConfig::default();
        config.validate().unwrap();
        assert_eq!(config.fanout_warn, 20);
        assert!(!config.resolution_keys().contains(&StitchKey::H_LyChI_L3));
        assert!(config.resolution_keys().contains(&StitchKey::H_LyChI_L4));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = StitchConfig::from_toml_str("fanout_warn = 5\n").unwrap();
        assert_eq!(config.fanout_warn, 5);
        assert_eq!(config.min_clique_size, 3);
        assert!(config.require_distinct_sources);
    }

    #[test]
    fn keys_parse_from_toml() {
        let config = StitchConfig::from_toml_str(
            "excluded_keys = [\"N_Name\"]\n[blacklist]\nI_CAS = [\"50-00-0\"]\n",
        )
        .unwrap();
        assert_eq!(config.excluded_keys, vec![StitchKey::N_Name]);
        assert!(config.is_blacklisted(StitchKey::I_CAS, &Scalar::from("50-00-0")));
        assert!(!config.is_blacklisted(StitchKey::N_Name, &Scalar::from("50-00-0")));
    }

    #[test]
    fn small_cliques_rejected() {
        let err = StitchConfig::from_toml_str("min_clique_size = 2\n");
        assert!(matches!(err, Err(StitchError::InvalidConfig(_))));
    }

    #[test]
    fn unknown_blacklist_key_rejected() {
        let err = StitchConfig::from_toml_str("[blacklist]\nI_NOPE = [\"x\"]\n");
        assert!(matches!(err, Err(StitchError::UnknownStitchKey(_))));
    }

    #[test]
    fn wildcard_blacklist_is_case_insensitive() {
        let mut config = StitchConfig::default();
        config.blacklist.insert("*".into(), vec!["water".into()]);
        assert!(config.is_blacklisted(StitchKey::N_Name, &Scalar::from("WATER")));
        config.add_blacklist(StitchKey::I_CID, &["42"]);
        assert!(config.is_blacklisted(StitchKey::I_CID, &Scalar::Long(42)));
    }
}
