// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Cryptographic primitives layer
//
// Implements:
// - AES-256-GCM: Authenticated encryption (required)
// - ChaCha20-Poly1305: Authenticated encryption (optional)
// - SHA-256: SEAL hashing and vault identity
// - HMAC-SHA256: Keyed integrity tags
// - ECDH (secp256k1): Shared secret agreement
// - Constant-time comparison for tag/MAC verification

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes256Gcm;
use bitcoin::secp256k1::{ecdh, PublicKey, Secp256k1, SecretKey};
use chacha20poly1305::aead::AeadInPlace as _;
use chacha20poly1305::ChaCha20Poly1305;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{LockError, LockResult};
use crate::{HASH_SIZE, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Secure key material that zeroizes on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureKey {
    bytes: Vec<u8>,
}

impl SecureKey {
    /// Fresh random key from the OS CSPRNG
    pub fn generate(size: usize) -> Self {
        let mut bytes = vec![0u8; size];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureKey").field("len", &self.bytes.len()).finish()
    }
}

/// AEAD algorithm carried in the SEAL header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionAlgo {
    #[serde(rename = "AES-256-GCM")]
    Aes256Gcm,
    #[serde(rename = "ChaCha20-Poly1305")]
    ChaCha20Poly1305,
}

impl EncryptionAlgo {
    /// Wire name written into the SEAL header
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES-256-GCM",
            Self::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AES-256-GCM" => Some(Self::Aes256Gcm),
            "ChaCha20-Poly1305" => Some(Self::ChaCha20Poly1305),
            _ => None,
        }
    }
}

impl Default for EncryptionAlgo {
    fn default() -> Self {
        Self::Aes256Gcm
    }
}

impl std::fmt::Display for EncryptionAlgo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Output of one AEAD encryption: detached tag, no plaintext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AeadOutput {
    pub algo: EncryptionAlgo,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

enum CipherImpl {
    Aes(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

/// AEAD cipher bound to a single 256-bit key
pub struct AeadCipher {
    algo: EncryptionAlgo,
    inner: CipherImpl,
}

impl AeadCipher {
    pub fn new(algo: EncryptionAlgo, key: &SecureKey) -> LockResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(LockError::CryptoError(format!(
                "expected {KEY_SIZE}-byte key, got {}",
                key.len()
            )));
        }
        let inner = match algo {
            EncryptionAlgo::Aes256Gcm => CipherImpl::Aes(Box::new(
                Aes256Gcm::new_from_slice(key.as_bytes())
                    .map_err(|_| LockError::CryptoError("invalid AES-256-GCM key".into()))?,
            )),
            EncryptionAlgo::ChaCha20Poly1305 => CipherImpl::ChaCha(Box::new(
                ChaCha20Poly1305::new_from_slice(key.as_bytes())
                    .map_err(|_| LockError::CryptoError("invalid ChaCha20-Poly1305 key".into()))?,
            )),
        };
        Ok(Self { algo, inner })
    }

    pub fn algo(&self) -> EncryptionAlgo {
        self.algo
    }

    /// Generate a random nonce
    pub fn generate_nonce() -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }

    /// Encrypt under a fresh random nonce, binding `aad`
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> LockResult<AeadOutput> {
        let nonce = Self::generate_nonce();
        let mut buffer = plaintext.to_vec();
        let nonce_ga = GenericArray::from_slice(&nonce);
        let tag = match &self.inner {
            CipherImpl::Aes(c) => c.encrypt_in_place_detached(nonce_ga, aad, &mut buffer),
            CipherImpl::ChaCha(c) => c.encrypt_in_place_detached(nonce_ga, aad, &mut buffer),
        }
        .map_err(|_| LockError::CryptoError("encryption failed".into()))?;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(tag.as_slice());

        Ok(AeadOutput {
            algo: self.algo,
            nonce,
            ciphertext: buffer,
            tag: tag_bytes,
        })
    }

    /// Decrypt and authenticate. On tag mismatch nothing is returned and the
    /// working buffer is wiped.
    pub fn decrypt(&self, output: &AeadOutput, aad: &[u8]) -> LockResult<Zeroizing<Vec<u8>>> {
        if output.algo != self.algo {
            return Err(LockError::CryptoError(format!(
                "cipher is {} but payload is {}",
                self.algo, output.algo
            )));
        }
        let mut buffer = Zeroizing::new(output.ciphertext.clone());
        let nonce = GenericArray::from_slice(&output.nonce);
        let tag = GenericArray::from_slice(&output.tag);
        match &self.inner {
            CipherImpl::Aes(c) => c.decrypt_in_place_detached(nonce, aad, buffer.as_mut_slice(), tag),
            CipherImpl::ChaCha(c) => {
                c.decrypt_in_place_detached(nonce, aad, buffer.as_mut_slice(), tag)
            }
        }
        .map_err(|_| LockError::AuthenticationFailed)?;
        Ok(buffer)
    }
}

/// SHA-256 hasher
pub struct Sha256Hasher;

impl Sha256Hasher {
    pub fn hash(data: &[u8]) -> [u8; HASH_SIZE] {
        Sha256::digest(data).into()
    }

    /// Hash the concatenation of several byte strings
    pub fn hash_parts(parts: &[&[u8]]) -> [u8; HASH_SIZE] {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().into()
    }
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 tag
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> LockResult<[u8; HASH_SIZE]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| LockError::CryptoError("invalid HMAC key".into()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// Verify an HMAC-SHA256 tag in constant time
pub fn verify_hmac_sha256(key: &[u8], data: &[u8], tag: &[u8]) -> LockResult<bool> {
    let expected = hmac_sha256(key, data)?;
    Ok(constant_time_eq(&expected, tag))
}

/// Constant-time equality; slices of different length compare unequal
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// ECDH over secp256k1. The shared secret is the compressed encoding
/// (33 bytes) of `secret * peer`, matching common wallet libraries.
pub fn ecdh_shared_secret(secret: &SecretKey, peer: &PublicKey) -> Zeroizing<[u8; 33]> {
    let mut point = ecdh::shared_secret_point(peer, secret);
    let mut shared = Zeroizing::new([0u8; 33]);
    shared[0] = 0x02 | (point[63] & 1);
    shared[1..].copy_from_slice(&point[..32]);
    point.zeroize();
    shared
}

/// Public key for a secp256k1 secret key
pub fn public_key_of(secret: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(&Secp256k1::signing_only(), secret)
}
