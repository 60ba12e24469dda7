// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Vault identity
//
//   vault_id = hex(SHA-256(seal_bytes || canonical_metadata || txid_le[32]))
//
// The txid is hashed in internal (little-endian) byte order, i.e. the
// reverse of its usual hex display.

use std::str::FromStr;

use bitcoin::hashes::Hash;
use bitcoin::Txid;
use serde::{Deserialize, Serialize};

use crate::crypto::Sha256Hasher;
use crate::error::{LockError, LockResult};
use crate::metadata::VaultMetadata;
use crate::HASH_SIZE;

/// 32-byte vault identifier, rendered as 64 lowercase hex characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct VaultId([u8; HASH_SIZE]);

impl VaultId {
    /// Final identity for a vault bound to `txid`
    pub fn compute(seal_bytes: &[u8], metadata: &VaultMetadata, txid: &Txid) -> LockResult<Self> {
        let canonical = metadata.canonical_bytes()?;
        let txid_bytes = txid.to_byte_array();
        Ok(Self(Sha256Hasher::hash_parts(&[
            seal_bytes,
            &canonical[..],
            &txid_bytes[..],
        ])))
    }

    /// Draft identity against an all-zero txid. Only used to key drafts
    /// before binding; never a protocol-level vault id.
    pub fn provisional(seal_bytes: &[u8], metadata: &VaultMetadata) -> LockResult<Self> {
        Self::compute(seal_bytes, metadata, &Txid::all_zeros())
    }

    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for VaultId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for VaultId {
    type Err = LockError;

    fn from_str(s: &str) -> LockResult<Self> {
        if s.len() != HASH_SIZE * 2 || s.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(LockError::DeserializationFailed(
                "vault id must be 64 lowercase hex characters".into(),
            ));
        }
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| LockError::DeserializationFailed(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl From<VaultId> for String {
    fn from(id: VaultId) -> Self {
        id.to_hex()
    }
}

impl TryFrom<String> for VaultId {
    type Error = LockError;

    fn try_from(s: String) -> LockResult<Self> {
        s.parse()
    }
}
