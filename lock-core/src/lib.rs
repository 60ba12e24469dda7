// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// LOCK Core - Proof-of-Access verification engine for Bitcoin-bound vaults
//
// Layers:
// - SEAL: canonical binary container for the encrypted payload
// - AES-256-GCM / ChaCha20-Poly1305: authenticated encryption
// - ECDH (secp256k1) + HKDF-SHA256: stateless key derivation
// - SHA-256: SEAL hashing and vault identity
// - Proof-of-Access: transaction rule checklist (signer, recipient,
//   amount, block-height time-lock, unlock limit, confirmation/RBF)
// - Lifecycle: seal -> bind -> unseal -> rebind state machine

pub mod armor;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod metadata;
pub mod poa;
pub mod seal;
pub mod storage;
pub mod timelock;
pub mod transaction;
pub mod vault;
pub mod wallet;

pub use armor::*;
pub use audit::*;
pub use config::*;
pub use crypto::*;
pub use error::*;
pub use identity::*;
pub use kdf::*;
pub use metadata::*;
pub use poa::*;
pub use seal::*;
pub use storage::*;
pub use timelock::*;
pub use transaction::*;
pub use vault::*;
pub use wallet::*;

/// Metadata schema version (v1.1 validation rules)
pub const METADATA_VERSION: &str = "1.1";

/// SEAL container magic bytes
pub const SEAL_MAGIC: [u8; 4] = *b"SEAL";

/// SEAL container format version
pub const SEAL_VERSION: u8 = 1;

/// Symmetric key size in bytes (AES-256 / ChaCha20)
pub const KEY_SIZE: usize = 32;

/// AEAD nonce size in bytes
pub const NONCE_SIZE: usize = 12;

/// AEAD authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// SHA-256 output size
pub const HASH_SIZE: usize = 32;

/// HKDF info for the payload key
pub const PAYLOAD_KDF_INFO: &[u8] = b"LOCK-PROTOCOL-V1";

/// HKDF salt for the metadata key
pub const METADATA_KDF_SALT: &[u8] = b"LOCK-METADATA";

/// HKDF info for the metadata key
pub const METADATA_KDF_INFO: &[u8] = b"metadata-encryption-v1";
