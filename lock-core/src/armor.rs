// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Armoring for SEAL export/import
//
// Features:
// - Base64 armoring with headers
// - SHA-256 checksum verification
// - PEM-like format, 64-char data lines

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::crypto::{constant_time_eq, Sha256Hasher};
use crate::error::{LockError, LockResult};
use crate::seal::SealFile;

/// Armor format version
pub const ARMOR_VERSION: u8 = 1;

/// Armor label for SEAL files
pub const SEAL_ARMOR_TYPE: &str = "LOCK SEAL";

/// Armored payload with integrity check
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoredPayload {
    /// Armor type, e.g. "LOCK SEAL"
    pub armor_type: String,
    /// Base64-encoded data
    pub data: String,
    /// SHA-256 of the raw data, lowercase hex
    pub checksum: String,
    pub version: u8,
    /// Creation timestamp (Unix epoch)
    pub timestamp: i64,
}

impl ArmoredPayload {
    pub fn encode(data: &[u8], armor_type: &str) -> Self {
        Self {
            armor_type: armor_type.to_string(),
            data: BASE64.encode(data),
            checksum: hex::encode(Sha256Hasher::hash(data)),
            version: ARMOR_VERSION,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Armor a SEAL file for text transport
    pub fn from_seal(seal: &SealFile) -> Self {
        Self::encode(&seal.to_bytes(), SEAL_ARMOR_TYPE)
    }

    /// Decode and verify the checksum
    pub fn decode(&self) -> LockResult<Vec<u8>> {
        if self.version != ARMOR_VERSION {
            return Err(LockError::ArmorDecodingFailed);
        }
        let data = BASE64
            .decode(&self.data)
            .map_err(|_| LockError::ArmorDecodingFailed)?;

        let expected = hex::decode(&self.checksum).map_err(|_| LockError::ArmorDecodingFailed)?;
        if !constant_time_eq(&Sha256Hasher::hash(&data), &expected) {
            return Err(LockError::ArmorDecodingFailed);
        }
        Ok(data)
    }

    /// Decode a SEAL armor; the inner bytes must parse as a SEAL file
    pub fn to_seal(&self) -> LockResult<SealFile> {
        if self.armor_type != SEAL_ARMOR_TYPE {
            return Err(LockError::ArmorDecodingFailed);
        }
        SealFile::decode(&self.decode()?)
    }

    pub fn to_pem(&self) -> String {
        let mut lines = vec![
            format!("-----BEGIN {}-----", self.armor_type),
            format!("Version: {}", self.version),
            format!("Timestamp: {}", self.timestamp),
            format!("SHA256: {}", self.checksum),
            String::new(),
        ];

        for chunk in self.data.as_bytes().chunks(64) {
            lines.push(String::from_utf8_lossy(chunk).to_string());
        }

        lines.push(format!("-----END {}-----", self.armor_type));
        lines.join("\n")
    }

    pub fn from_pem(pem: &str) -> LockResult<Self> {
        let lines: Vec<&str> = pem.trim().lines().map(str::trim_end).collect();
        let (first, rest) = lines.split_first().ok_or(LockError::ArmorDecodingFailed)?;
        let (last, body) = rest.split_last().ok_or(LockError::ArmorDecodingFailed)?;

        let armor_type = first
            .strip_prefix("-----BEGIN ")
            .and_then(|s| s.strip_suffix("-----"))
            .ok_or(LockError::ArmorDecodingFailed)?;
        let footer_type = last
            .strip_prefix("-----END ")
            .and_then(|s| s.strip_suffix("-----"))
            .ok_or(LockError::ArmorDecodingFailed)?;
        if armor_type != footer_type {
            return Err(LockError::ArmorDecodingFailed);
        }

        let separator = body
            .iter()
            .position(|line| line.is_empty())
            .ok_or(LockError::ArmorDecodingFailed)?;

        let mut version = None;
        let mut timestamp = 0i64;
        let mut checksum = None;
        for line in &body[..separator] {
            if let Some(v) = line.strip_prefix("Version: ") {
                version = Some(v.parse().map_err(|_| LockError::ArmorDecodingFailed)?);
            } else if let Some(t) = line.strip_prefix("Timestamp: ") {
                timestamp = t.parse().map_err(|_| LockError::ArmorDecodingFailed)?;
            } else if let Some(c) = line.strip_prefix("SHA256: ") {
                checksum = Some(c.to_string());
            }
        }

        let data: String = body[separator + 1..]
            .iter()
            .filter(|line| !line.is_empty())
            .copied()
            .collect();

        Ok(Self {
            armor_type: armor_type.to_string(),
            data,
            checksum: checksum.ok_or(LockError::ArmorDecodingFailed)?,
            version: version.ok_or(LockError::ArmorDecodingFailed)?,
            timestamp,
        })
    }
}
