// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// SEAL binary container
//
// Layout (all multi-byte integers little-endian):
//
//   magic[4] = "SEAL"
//   version: u8
//   algo_len: u8, algo: utf8
//   nonce[12]
//   ciphertext_len: u32
//   ciphertext[ciphertext_len]
//   integrity_tag[16]
//   optional: hint_len: u16, hint: utf8[hint_len]
//
// The header (magic, version, algorithm, hint) is bound into the AEAD as
// associated data, so a flipped bit anywhere either breaks parsing or breaks
// authentication.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::crypto::{AeadCipher, AeadOutput, EncryptionAlgo, Sha256Hasher};
use crate::error::{LockError, LockResult};
use crate::{HASH_SIZE, NONCE_SIZE, SEAL_MAGIC, SEAL_VERSION, TAG_SIZE};

/// Decoded `.seal` container. Serializes as base64 of the encoded bytes
/// and deserializes through `decode`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EncodedSeal", into = "EncodedSeal")]
pub struct SealFile {
    version: u8,
    algo: EncryptionAlgo,
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
    integrity_tag: [u8; TAG_SIZE],
    metadata_hint: Option<String>,
}

impl SealFile {
    /// Build a SEAL from an AEAD output. The output must have been produced
    /// with `SealFile::associated_data(algo, hint)` as AAD.
    pub fn new(payload: AeadOutput, metadata_hint: Option<String>) -> LockResult<Self> {
        if u32::try_from(payload.ciphertext.len()).is_err() {
            return Err(LockError::MalformedSeal("ciphertext exceeds u32 length".into()));
        }
        if let Some(hint) = &metadata_hint {
            if u16::try_from(hint.len()).is_err() {
                return Err(LockError::MalformedSeal("metadata hint exceeds u16 length".into()));
            }
        }
        Ok(Self {
            version: SEAL_VERSION,
            algo: payload.algo,
            nonce: payload.nonce,
            ciphertext: payload.ciphertext,
            integrity_tag: payload.tag,
            metadata_hint,
        })
    }

    /// Encrypt `plaintext` and wrap it in a SEAL
    pub fn seal_payload(
        cipher: &AeadCipher,
        plaintext: &[u8],
        metadata_hint: Option<String>,
    ) -> LockResult<Self> {
        let aad = Self::associated_data(cipher.algo(), metadata_hint.as_deref());
        let payload = cipher.encrypt(plaintext, &aad)?;
        Self::new(payload, metadata_hint)
    }

    /// Encode an AEAD output straight to `.seal` bytes
    pub fn encode(payload: AeadOutput, metadata_hint: Option<String>) -> LockResult<Vec<u8>> {
        Ok(Self::new(payload, metadata_hint)?.to_bytes())
    }

    /// Associated data binding the SEAL header to the ciphertext
    pub fn associated_data(algo: EncryptionAlgo, metadata_hint: Option<&str>) -> Vec<u8> {
        let name = algo.name().as_bytes();
        let mut aad = Vec::with_capacity(8 + name.len() + metadata_hint.map_or(0, str::len));
        aad.extend_from_slice(&SEAL_MAGIC);
        aad.push(SEAL_VERSION);
        aad.push(name.len() as u8);
        aad.extend_from_slice(name);
        match metadata_hint {
            Some(hint) => {
                aad.push(1);
                aad.extend_from_slice(hint.as_bytes());
            }
            None => aad.push(0),
        }
        aad
    }

    /// Decrypt the payload with the content key cipher
    pub fn open(&self, cipher: &AeadCipher) -> LockResult<Zeroizing<Vec<u8>>> {
        let aad = Self::associated_data(self.algo, self.metadata_hint.as_deref());
        cipher.decrypt(&self.aead_output(), &aad)
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn algo(&self) -> EncryptionAlgo {
        self.algo
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Length written into the header; always equals `ciphertext().len()`
    pub fn ciphertext_len(&self) -> u32 {
        self.ciphertext.len() as u32
    }

    pub fn integrity_tag(&self) -> &[u8; TAG_SIZE] {
        &self.integrity_tag
    }

    pub fn metadata_hint(&self) -> Option<&str> {
        self.metadata_hint.as_deref()
    }

    pub fn aead_output(&self) -> AeadOutput {
        AeadOutput {
            algo: self.algo,
            nonce: self.nonce,
            ciphertext: self.ciphertext.clone(),
            tag: self.integrity_tag,
        }
    }

    /// SHA-256 of the full encoded container
    pub fn hash(&self) -> [u8; HASH_SIZE] {
        Sha256Hasher::hash(&self.to_bytes())
    }

    /// Serialize to the canonical `.seal` byte layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let name = self.algo.name().as_bytes();
        let hint_len = self.metadata_hint.as_ref().map_or(0, |h| 2 + h.len());
        let mut out = Vec::with_capacity(
            4 + 1 + 1 + name.len() + NONCE_SIZE + 4 + self.ciphertext.len() + TAG_SIZE + hint_len,
        );
        out.extend_from_slice(&SEAL_MAGIC);
        out.push(self.version);
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext_len().to_le_bytes());
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.integrity_tag);
        if let Some(hint) = &self.metadata_hint {
            out.extend_from_slice(&(hint.len() as u16).to_le_bytes());
            out.extend_from_slice(hint.as_bytes());
        }
        out
    }

    /// Parse `.seal` bytes. Any structural inconsistency is `MalformedSeal`.
    pub fn decode(bytes: &[u8]) -> LockResult<Self> {
        let mut reader = Reader::new(bytes);

        if reader.take(4, "magic")? != SEAL_MAGIC {
            return Err(malformed("bad magic"));
        }

        let version = reader.u8("version")?;
        if version != SEAL_VERSION {
            return Err(malformed(format!("unsupported version {version}")));
        }

        let algo_len = reader.u8("algorithm length")? as usize;
        let algo_name = std::str::from_utf8(reader.take(algo_len, "algorithm")?)
            .map_err(|_| malformed("algorithm name is not utf-8"))?;
        let algo = EncryptionAlgo::from_name(algo_name)
            .ok_or_else(|| malformed(format!("unsupported algorithm {algo_name:?}")))?;

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(reader.take(NONCE_SIZE, "nonce")?);

        let ciphertext_len = reader.u32("ciphertext length")? as usize;
        if reader.remaining() < ciphertext_len.saturating_add(TAG_SIZE) {
            return Err(malformed(format!(
                "ciphertext_len {ciphertext_len} inconsistent with {} remaining bytes",
                reader.remaining()
            )));
        }
        let ciphertext = reader.take(ciphertext_len, "ciphertext")?.to_vec();

        let mut integrity_tag = [0u8; TAG_SIZE];
        integrity_tag.copy_from_slice(reader.take(TAG_SIZE, "integrity tag")?);

        let metadata_hint = if reader.remaining() == 0 {
            None
        } else {
            let hint_len = reader.u16("hint length")? as usize;
            if reader.remaining() != hint_len {
                return Err(malformed(format!(
                    "hint length {hint_len} inconsistent with {} remaining bytes",
                    reader.remaining()
                )));
            }
            let hint = std::str::from_utf8(reader.take(hint_len, "hint")?)
                .map_err(|_| malformed("metadata hint is not utf-8"))?;
            Some(hint.to_string())
        };

        Ok(Self {
            version,
            algo,
            nonce,
            ciphertext,
            integrity_tag,
            metadata_hint,
        })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
struct EncodedSeal(String);

impl TryFrom<EncodedSeal> for SealFile {
    type Error = LockError;

    fn try_from(encoded: EncodedSeal) -> LockResult<Self> {
        let bytes = BASE64
            .decode(encoded.0.as_bytes())
            .map_err(|_| malformed("seal is not valid base64"))?;
        Self::decode(&bytes)
    }
}

impl From<SealFile> for EncodedSeal {
    fn from(seal: SealFile) -> Self {
        Self(BASE64.encode(seal.to_bytes()))
    }
}

fn malformed(reason: impl Into<String>) -> LockError {
    LockError::MalformedSeal(reason.into())
}

/// Bounds-checked little-endian cursor
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> LockResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(malformed(format!("truncated {what}")));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self, what: &str) -> LockResult<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> LockResult<u16> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2, what)?);
        Ok(u16::from_le_bytes(buf))
    }

    fn u32(&mut self, what: &str) -> LockResult<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4, what)?);
        Ok(u32::from_le_bytes(buf))
    }
}
