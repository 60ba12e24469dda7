// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Hash-chained audit log of vault lifecycle operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::Sha256Hasher;
use crate::error::AccessError;
use crate::identity::VaultId;
use crate::HASH_SIZE;

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    /// Vault the action applied to, once it has an id
    pub vault_id: Option<VaultId>,
    pub success: bool,
    /// Proof-of-Access failures behind a denied unseal
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<AccessError>,
    pub details: Option<String>,
    /// SHA-256 of the previous entry's JSON (chain integrity)
    pub prev_hash: [u8; HASH_SIZE],
}

/// Audit actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Seal,
    SelectAmount,
    Bind,
    Unseal,
    Rebind,
}

/// Audit log with integrity chain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditLog {
    pub entries: Vec<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Append an entry chained to the current tail
    pub fn add(
        &mut self,
        action: AuditAction,
        vault_id: Option<VaultId>,
        success: bool,
        errors: Vec<AccessError>,
        details: Option<String>,
    ) {
        let prev_hash = self
            .entries
            .last()
            .map(Self::entry_hash)
            .unwrap_or([0u8; HASH_SIZE]);

        self.entries.push(AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            vault_id,
            success,
            errors,
            details,
            prev_hash,
        });
    }

    /// Verify audit log integrity
    pub fn verify_integrity(&self) -> bool {
        let mut prev_hash = [0u8; HASH_SIZE];

        for entry in &self.entries {
            if entry.prev_hash != prev_hash {
                return false;
            }
            prev_hash = Self::entry_hash(entry);
        }

        true
    }

    /// Entries recorded against one vault id
    pub fn history(&self, vault_id: &VaultId) -> Vec<&AuditEntry> {
        self.entries
            .iter()
            .filter(|e| e.vault_id.as_ref() == Some(vault_id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_hash(entry: &AuditEntry) -> [u8; HASH_SIZE] {
        let data = serde_json::to_vec(entry).unwrap_or_default();
        Sha256Hasher::hash(&data)
    }
}
