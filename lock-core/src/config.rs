// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Engine configuration

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::crypto::EncryptionAlgo;
use crate::error::{LockError, LockResult};

/// What happens to the unlock counter when a vault is rebound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebindCounterPolicy {
    /// Carry the count over to the new vault id
    #[default]
    Preserve,
    /// Start the new vault id at zero
    Reset,
}

/// LOCK engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// Network addresses are validated against
    pub network: Network,
    /// Confirmations a binding or unlocking transaction needs
    pub min_confirmations: u32,
    /// AEAD used when a seal request does not name one
    pub default_algorithm: EncryptionAlgo,
    pub rebind_counter_policy: RebindCounterPolicy,
    /// Maximum metadata hint length in bytes
    pub max_hint_len: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            min_confirmations: 1,
            default_algorithm: EncryptionAlgo::Aes256Gcm,
            rebind_counter_policy: RebindCounterPolicy::Preserve,
            max_hint_len: 1024,
        }
    }
}

impl LockConfig {
    /// Default configuration for another network
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> LockResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| LockError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LockResult<()> {
        if self.min_confirmations < 1 {
            return Err(LockError::InvalidConfig(
                "min_confirmations must be at least 1".into(),
            ));
        }
        if self.max_hint_len > u16::MAX as usize {
            return Err(LockError::InvalidConfig(format!(
                "max_hint_len must not exceed {}",
                u16::MAX
            )));
        }
        Ok(())
    }
}
