// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Stateless key derivation
//
// Both keys depend only on an ECDH shared secret and the SEAL hash, so a
// SEAL can be produced before any on-chain action exists:
//
//   payload key  = HKDF-SHA256(ikm = ECDH,             salt = SEAL_hash,
//                              info = "LOCK-PROTOCOL-V1")
//   metadata key = HKDF-SHA256(ikm = ECDH || SEAL_hash, salt = "LOCK-METADATA",
//                              info = "metadata-encryption-v1")

use bitcoin::secp256k1::{PublicKey, SecretKey};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::{ecdh_shared_secret, SecureKey, Sha256Hasher};
use crate::error::{LockError, LockResult};
use crate::{HASH_SIZE, KEY_SIZE, METADATA_KDF_INFO, METADATA_KDF_SALT, PAYLOAD_KDF_INFO};

/// HKDF-based key derivation for payload and metadata keys
pub struct KeyDerivation;

impl KeyDerivation {
    /// SHA-256 of the full `.seal` byte contents
    pub fn seal_hash(seal_bytes: &[u8]) -> [u8; HASH_SIZE] {
        Sha256Hasher::hash(seal_bytes)
    }

    /// Key that wraps the SEAL content key.
    ///
    /// `local` is the caller's secret, `peer` the other party's public key:
    /// the unlocker passes (unlocker secret, creator public) and the creator
    /// passes (creator secret, unlocker public); both get the same key.
    pub fn payload_key(
        local: &SecretKey,
        peer: &PublicKey,
        seal_hash: &[u8; HASH_SIZE],
    ) -> LockResult<SecureKey> {
        let shared = ecdh_shared_secret(local, peer);
        hkdf_sha256(shared.as_slice(), seal_hash, PAYLOAD_KDF_INFO)
    }

    /// Key that encrypts vault metadata at rest
    pub fn metadata_key(
        local: &SecretKey,
        peer: &PublicKey,
        seal_hash: &[u8; HASH_SIZE],
    ) -> LockResult<SecureKey> {
        let shared = ecdh_shared_secret(local, peer);
        let mut ikm = Zeroizing::new(Vec::with_capacity(shared.len() + HASH_SIZE));
        ikm.extend_from_slice(shared.as_slice());
        ikm.extend_from_slice(seal_hash);
        hkdf_sha256(&ikm, METADATA_KDF_SALT, METADATA_KDF_INFO)
    }
}

fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8]) -> LockResult<SecureKey> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = vec![0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|_| LockError::CryptoError("HKDF expansion failed".into()))?;
    Ok(SecureKey::from_bytes(okm))
}
