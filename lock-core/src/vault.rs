// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Vault lifecycle
//
//   Draft --bind--> Bound --unseal--> Active --unseal--> Exhausted
//     |                |                 |
//     +-select amount  +------rebind-----+--> Expired (superseded)
//
// Security features:
// - Payload under a random content key, content key wrapped by the
//   ECDH/HKDF payload key salted with the SEAL hash
// - Proof-of-Access validation before any decryption
// - Atomic unlock counting
// - Wallet-signed rebinding
// - Audit logging

use bitcoin::secp256k1::{PublicKey, SecretKey};
use bitcoin::sign_message::MessageSignature;
use bitcoin::Txid;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::audit::{AuditAction, AuditLog};
use crate::config::{LockConfig, RebindCounterPolicy};
use crate::crypto::{public_key_of, AeadCipher, AeadOutput, EncryptionAlgo, SecureKey};
use crate::error::{FieldViolation, LockError, LockResult};
use crate::identity::VaultId;
use crate::kdf::KeyDerivation;
use crate::metadata::{AmountCondition, AuthorizedWallet, MetadataEnvelope, VaultMetadata};
use crate::poa::{AccessDecision, ProofOfAccessResult, ProofOfAccessValidator, ValidationContext};
use crate::seal::SealFile;
use crate::storage::{MemoryUnlockCounter, MemoryVaultStore, UnlockCounter, VaultStore};
use crate::transaction::{BitcoinSource, BitcoinTransactionFacts};
use crate::wallet::{p2wpkh_address, rebind_message, verify_wallet_signature};
use crate::KEY_SIZE;

/// Vault status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaultStatus {
    /// Sealed, not yet bound to a transaction
    Draft,
    /// Bound to a confirmed transaction, never unlocked
    Bound,
    /// Unlocked at least once, unlocks remaining
    Active,
    /// Superseded by a rebind
    Expired,
    /// Unlock limit reached
    Exhausted,
}

/// Stored vault record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub id: VaultId,
    pub seal: SealFile,
    pub metadata: VaultMetadata,
    pub unlock_count: u32,
    pub status: VaultStatus,
    pub creator_public_key: PublicKey,
    pub unlocker_public_key: PublicKey,
    /// Content key wrapped under the payload key, AAD = SEAL hash
    pub wrapped_key: AeadOutput,
    /// Successor id once rebound
    pub superseded_by: Option<VaultId>,
}

impl Vault {
    pub fn seal_hash(&self) -> [u8; crate::HASH_SIZE] {
        KeyDerivation::seal_hash(&self.seal.to_bytes())
    }

    /// The other party's public key for an ECDH with `secret`. Works for
    /// both the creator and the unlocker.
    fn peer_of(&self, secret: &SecretKey) -> PublicKey {
        if public_key_of(secret) == self.creator_public_key {
            self.unlocker_public_key
        } else {
            self.creator_public_key
        }
    }

    /// Unwrap the content key and decrypt the SEAL payload
    pub fn open_payload(&self, secret: &SecretKey) -> LockResult<Zeroizing<Vec<u8>>> {
        let seal_hash = self.seal_hash();
        let payload_key = KeyDerivation::payload_key(secret, &self.peer_of(secret), &seal_hash)?;
        let content_key = AeadCipher::new(self.wrapped_key.algo, &payload_key)?
            .decrypt(&self.wrapped_key, &seal_hash)?;
        let content_key = SecureKey::from_bytes(content_key.to_vec());
        self.seal.open(&AeadCipher::new(self.seal.algo(), &content_key)?)
    }

    pub fn metadata_key(&self, secret: &SecretKey) -> LockResult<SecureKey> {
        KeyDerivation::metadata_key(secret, &self.peer_of(secret), &self.seal_hash())
    }

    fn status_for(count: u32, limit: Option<u32>) -> VaultStatus {
        match limit {
            Some(limit) if count >= limit => VaultStatus::Exhausted,
            _ if count > 0 => VaultStatus::Active,
            _ => VaultStatus::Bound,
        }
    }
}

/// Everything needed to seal a payload
pub struct SealRequest {
    pub payload: Zeroizing<Vec<u8>>,
    pub metadata: VaultMetadata,
    pub creator_key: SecretKey,
    pub unlocker_public_key: PublicKey,
    pub hint: Option<String>,
    /// Falls back to the configured default
    pub algorithm: Option<EncryptionAlgo>,
}

impl SealRequest {
    pub fn new(
        payload: impl Into<Vec<u8>>,
        metadata: VaultMetadata,
        creator_key: SecretKey,
        unlocker_public_key: PublicKey,
    ) -> Self {
        Self {
            payload: Zeroizing::new(payload.into()),
            metadata,
            creator_key,
            unlocker_public_key,
            hint: None,
            algorithm: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_algorithm(mut self, algorithm: EncryptionAlgo) -> Self {
        self.algorithm = Some(algorithm);
        self
    }
}

/// Outcome of PSBT-time amount selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendSelection {
    /// Draft id after selection (changes when a range is first fixed)
    pub draft_id: VaultId,
    /// Amount the unlocking transaction must spend; `None` for `Any`
    pub amount: Option<u64>,
}

/// Orchestrates seal, bind, unseal and rebind over the storage collaborators
pub struct VaultLifecycle<S: VaultStore, C: UnlockCounter> {
    config: LockConfig,
    validator: ProofOfAccessValidator,
    store: S,
    counter: C,
    audit_log: Mutex<AuditLog>,
}

impl VaultLifecycle<MemoryVaultStore, MemoryUnlockCounter> {
    /// Lifecycle over in-memory storage
    pub fn in_memory(config: LockConfig) -> LockResult<Self> {
        Self::new(config, MemoryVaultStore::new(), MemoryUnlockCounter::new())
    }
}

impl<S: VaultStore, C: UnlockCounter> VaultLifecycle<S, C> {
    pub fn new(config: LockConfig, store: S, counter: C) -> LockResult<Self> {
        config.validate()?;
        Ok(Self {
            validator: ProofOfAccessValidator::new(&config),
            config,
            store,
            counter,
            audit_log: Mutex::new(AuditLog::new()),
        })
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn counter(&self) -> &C {
        &self.counter
    }

    /// Snapshot of the audit log
    pub fn audit_log(&self) -> AuditLog {
        self.audit_log.lock().clone()
    }

    fn audit(&self, action: AuditAction, vault_id: Option<VaultId>, success: bool, details: Option<String>) {
        self.audit_log.lock().add(action, vault_id, success, Vec::new(), details);
    }

    fn audit_result(&self, vault_id: VaultId, result: &ProofOfAccessResult) {
        self.audit_log.lock().add(
            AuditAction::Unseal,
            Some(vault_id),
            result.valid,
            result.errors.clone(),
            None,
        );
    }

    fn load(&self, id: &VaultId) -> LockResult<Vault> {
        self.store.get(id)?.ok_or(LockError::VaultNotFound)
    }

    /// Take a draft out of the store. Of two racing callers only one gets
    /// it; the other sees `VaultNotFound`.
    fn claim_draft(&self, id: &VaultId) -> LockResult<Vault> {
        let draft = self.store.remove(id)?.ok_or(LockError::VaultNotFound)?;
        if draft.status != VaultStatus::Draft {
            let status = draft.status;
            self.store.put(draft)?;
            return Err(LockError::InvalidState(status));
        }
        Ok(draft)
    }

    fn require_confirmed(&self, facts: &BitcoinTransactionFacts) -> LockResult<()> {
        if facts.confirmations < self.config.min_confirmations {
            return Err(LockError::TransactionNotConfirmed);
        }
        Ok(())
    }

    /// Encrypt a payload into a SEAL and store it as a `Draft`
    pub fn seal(&self, request: SealRequest) -> LockResult<Vault> {
        let SealRequest {
            payload,
            metadata,
            creator_key,
            unlocker_public_key,
            hint,
            algorithm,
        } = request;

        let mut violations = metadata.violations(self.config.network);
        if metadata.txid.is_some() {
            violations.push(FieldViolation::new("txid", "must not be set before binding"));
        }
        if let Some(hint) = &hint {
            if hint.len() > self.config.max_hint_len {
                violations.push(FieldViolation::new(
                    "metadata_hint",
                    format!("longer than {} bytes", self.config.max_hint_len),
                ));
            }
        }
        if !violations.is_empty() {
            warn!(violations = violations.len(), "seal rejected: invalid metadata");
            self.audit(AuditAction::Seal, None, false, Some(format!("{} violation(s)", violations.len())));
            return Err(LockError::InvalidMetadata(violations));
        }

        let algo = algorithm.unwrap_or(self.config.default_algorithm);
        let content_key = SecureKey::generate(KEY_SIZE);
        let seal = SealFile::seal_payload(&AeadCipher::new(algo, &content_key)?, &payload, hint)?;

        let seal_bytes = seal.to_bytes();
        let seal_hash = KeyDerivation::seal_hash(&seal_bytes);
        let payload_key = KeyDerivation::payload_key(&creator_key, &unlocker_public_key, &seal_hash)?;
        let wrapped_key = AeadCipher::new(algo, &payload_key)?.encrypt(content_key.as_bytes(), &seal_hash)?;

        let vault = Vault {
            id: VaultId::provisional(&seal_bytes, &metadata)?,
            seal,
            metadata,
            unlock_count: 0,
            status: VaultStatus::Draft,
            creator_public_key: public_key_of(&creator_key),
            unlocker_public_key,
            wrapped_key,
            superseded_by: None,
        };
        self.store.put(vault.clone())?;

        info!(draft_id = %vault.id, algo = %algo, "vault sealed");
        self.audit(AuditAction::Seal, Some(vault.id), true, None);
        Ok(vault)
    }

    /// Fix the spend amount of a draft (PSBT time). A `Range` picks a
    /// uniform random target once; the draft is re-keyed under its new
    /// provisional id. Calling again returns the same selection.
    pub fn select_spend_amount(&self, draft_id: &VaultId) -> LockResult<SpendSelection> {
        let draft = self.load(draft_id)?;
        if draft.status != VaultStatus::Draft {
            return Err(LockError::InvalidState(draft.status));
        }

        let already_fixed = draft.metadata.amount_condition.target().is_some()
            || draft.metadata.amount_condition == AmountCondition::Any;
        if already_fixed {
            let amount = draft.metadata.amount_condition.target();
            return Ok(SpendSelection { draft_id: draft.id, amount });
        }

        // whoever removes the draft owns the selection
        let original = self.claim_draft(draft_id)?;
        let mut draft = original.clone();
        let amount = draft
            .metadata
            .amount_condition
            .select_random(&mut rand::thread_rng());
        let new_id = VaultId::provisional(&draft.seal.to_bytes(), &draft.metadata)?;
        draft.id = new_id;
        if !self.store.insert_new(draft)? {
            self.store.put(original)?;
            return Err(LockError::Storage("provisional id already in use".into()));
        }

        debug!(draft_id = %new_id, amount = ?amount, "spend amount selected");
        self.audit(AuditAction::SelectAmount, Some(new_id), true, None);
        Ok(SpendSelection { draft_id: new_id, amount })
    }

    /// Bind a draft to a confirmed transaction, producing the final vault id
    pub fn bind(&self, draft_id: &VaultId, facts: &BitcoinTransactionFacts) -> LockResult<Vault> {
        let loaded = self.load(draft_id)?;
        if loaded.status != VaultStatus::Draft {
            return Err(LockError::InvalidState(loaded.status));
        }
        if let Err(e) = self.require_confirmed(facts) {
            warn!(draft_id = %draft_id, txid = %facts.txid, "bind rejected: unconfirmed");
            self.audit(AuditAction::Bind, Some(*draft_id), false, Some(facts.txid.to_string()));
            return Err(e);
        }

        let draft = self.claim_draft(draft_id)?;
        let mut vault = draft.clone();
        // a range left unselected is fixed now so validation is deterministic
        vault
            .metadata
            .amount_condition
            .select_random(&mut rand::thread_rng());
        vault.metadata.txid = Some(facts.txid);
        vault.id = VaultId::compute(&vault.seal.to_bytes(), &vault.metadata, &facts.txid)?;
        vault.status = VaultStatus::Bound;

        if !self.store.insert_new(vault.clone())? {
            self.store.put(draft)?;
            return Err(LockError::TxidAlreadyBound);
        }
        self.counter.set_unlock_count(&vault.id, 0)?;

        info!(vault_id = %vault.id, txid = %facts.txid, "vault bound");
        self.audit(AuditAction::Bind, Some(vault.id), true, Some(facts.txid.to_string()));
        Ok(vault)
    }

    /// Run the Proof-of-Access checklist and, if it passes, decrypt and
    /// consume one unlock. A denied attempt changes nothing.
    pub fn unseal(
        &self,
        vault_id: &VaultId,
        facts: &BitcoinTransactionFacts,
        current_block_height: u32,
        unlocker_key: &SecretKey,
    ) -> LockResult<AccessDecision> {
        let vault = self.load(vault_id)?;
        if matches!(vault.status, VaultStatus::Draft | VaultStatus::Expired) {
            return Err(LockError::InvalidState(vault.status));
        }

        let ctx = ValidationContext {
            current_block_height,
            prior_unlock_count: self.counter.get_unlock_count(vault_id)?,
        };
        let decision = self
            .validator
            .authorize(facts, &vault.metadata, ctx, || vault.open_payload(unlocker_key));

        let (plaintext, result) = match decision {
            Err(e) => {
                warn!(vault_id = %vault_id, error = %e, "unseal aborted");
                self.audit(AuditAction::Unseal, Some(*vault_id), false, Some(e.to_string()));
                return Err(e);
            }
            Ok(AccessDecision::Denied(result)) => {
                info!(vault_id = %vault_id, txid = %facts.txid, failures = result.errors.len(), "unseal denied");
                self.audit_result(*vault_id, &result);
                return Ok(AccessDecision::Denied(result));
            }
            Ok(AccessDecision::Granted { plaintext, result }) => (plaintext, result),
        };

        let limit = vault.metadata.unlock_limit;
        let Some(count) = self.counter.increment_if_below_limit(vault_id, limit)? else {
            let current = self.load(vault_id)?;
            if current.status == VaultStatus::Expired {
                // rebound between check and increment; its counter is frozen
                warn!(vault_id = %vault_id, "unseal aborted: vault superseded");
                self.audit(AuditAction::Unseal, Some(*vault_id), false, Some("superseded".into()));
                return Err(LockError::InvalidState(VaultStatus::Expired));
            }
            // another unseal took the last unlock between check and increment
            let result = ProofOfAccessResult::limit_reached(limit.unwrap_or(0));
            info!(vault_id = %vault_id, "unseal denied: limit reached concurrently");
            self.audit_result(*vault_id, &result);
            return Ok(AccessDecision::Denied(result));
        };

        self.store.update(vault_id, &mut |stored| {
            stored.unlock_count = stored.unlock_count.max(count);
            if stored.status != VaultStatus::Expired {
                stored.status = Vault::status_for(stored.unlock_count, limit);
            }
            Ok(())
        })?;

        info!(vault_id = %vault_id, unlock_count = count, "vault unsealed");
        self.audit_result(*vault_id, &result);
        Ok(AccessDecision::Granted { plaintext, result })
    }

    /// Resolve the transaction and chain tip through a Bitcoin collaborator,
    /// then unseal
    pub fn unseal_with_source(
        &self,
        vault_id: &VaultId,
        txid: &Txid,
        source: &dyn BitcoinSource,
        unlocker_key: &SecretKey,
    ) -> LockResult<AccessDecision> {
        let facts = source.get_transaction(txid)?;
        let height = source.current_block_height()?;
        self.unseal(vault_id, &facts, height, unlocker_key)
    }

    /// Move a vault onto a new transaction. The signature must come from a
    /// currently authorized wallet (the creator's P2WPKH address for `Any`).
    /// The old record is kept as `Expired` and points at its successor.
    pub fn rebind(
        &self,
        vault_id: &VaultId,
        new_facts: &BitcoinTransactionFacts,
        signature: &MessageSignature,
    ) -> LockResult<Vault> {
        let old = self.load(vault_id)?;
        if matches!(old.status, VaultStatus::Draft | VaultStatus::Expired) {
            return Err(LockError::InvalidState(old.status));
        }
        if old.metadata.txid == Some(new_facts.txid) {
            return Err(LockError::TxidAlreadyBound);
        }

        let network = self.config.network;
        let candidates = match &old.metadata.authorized_wallet {
            AuthorizedWallet::Any => vec![p2wpkh_address(&old.creator_public_key, network)],
            wallet => wallet.addresses().to_vec(),
        };
        let message = rebind_message(vault_id, &new_facts.txid);
        let signer = match verify_wallet_signature(signature, &message, &candidates, network) {
            Ok(signer) => signer,
            Err(e) => {
                warn!(vault_id = %vault_id, "rebind rejected: bad signature");
                self.audit(AuditAction::Rebind, Some(*vault_id), false, Some(e.to_string()));
                return Err(e);
            }
        };
        self.require_confirmed(new_facts)?;

        let mut vault = old.clone();
        vault.metadata.txid = Some(new_facts.txid);
        vault.id = VaultId::compute(&vault.seal.to_bytes(), &vault.metadata, &new_facts.txid)?;
        vault.superseded_by = None;
        if self.store.get(&vault.id)?.is_some() {
            return Err(LockError::TxidAlreadyBound);
        }
        let new_id = vault.id;

        // expire the old record first; a concurrent rebind of it loses here
        self.store.update(vault_id, &mut |stored| {
            if matches!(stored.status, VaultStatus::Draft | VaultStatus::Expired) {
                return Err(LockError::InvalidState(stored.status));
            }
            stored.status = VaultStatus::Expired;
            stored.superseded_by = Some(new_id);
            Ok(())
        })?;
        // no unseal of the old id can count after this
        let final_count = self.counter.retire(vault_id)?;

        let count = match self.config.rebind_counter_policy {
            RebindCounterPolicy::Preserve => final_count,
            RebindCounterPolicy::Reset => 0,
        };
        vault.unlock_count = count;
        vault.status = Vault::status_for(count, vault.metadata.unlock_limit);

        self.counter.set_unlock_count(&new_id, count)?;
        if !self.store.insert_new(vault.clone())? {
            return Err(LockError::TxidAlreadyBound);
        }

        info!(
            old_id = %vault_id,
            new_id = %new_id,
            txid = %new_facts.txid,
            signer = %signer,
            unlock_count = count,
            "vault rebound"
        );
        self.audit(AuditAction::Rebind, Some(new_id), true, Some(vault_id.to_hex()));
        Ok(vault)
    }

    /// Read-only view of any record, terminal ones included
    pub fn inspect(&self, vault_id: &VaultId) -> LockResult<Vault> {
        self.load(vault_id)
    }

    /// Metadata protected under the metadata key, as its visibility asks.
    /// `secret` is either party's key.
    pub fn export_metadata(&self, vault_id: &VaultId, secret: &SecretKey) -> LockResult<MetadataEnvelope> {
        let vault = self.load(vault_id)?;
        let key = vault.metadata_key(secret)?;
        MetadataEnvelope::seal(&vault.metadata, &key, vault.seal.algo())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccessError;
    use crate::metadata::{Address, RecipientWallet, Visibility};
    use crate::transaction::{TxInput, TxOutput};
    use crate::wallet::sign_message;
    use bitcoin::hashes::Hash;
    use bitcoin::Network;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;

    const RECIPIENT: &str = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";
    const PAYLOAD: &[u8] = b"xprv9s21ZrQH143K3QTDL4LXw2F7HEK3wJUD2nW2nRk4stbPy6cq3jPPqjiChkVvvNKmPGJxWUtg6LnF5kejMRNNU3TGtRBeJgk33yuGBxrMPHi";

    fn secret(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    fn creator() -> SecretKey {
        secret(1)
    }

    fn unlocker() -> SecretKey {
        secret(2)
    }

    fn wallet_key() -> SecretKey {
        secret(3)
    }

    fn wallet_address() -> Address {
        p2wpkh_address(&public_key_of(&wallet_key()), Network::Bitcoin)
    }

    fn metadata() -> VaultMetadata {
        VaultMetadata::new(
            AuthorizedWallet::One(wallet_address()),
            AmountCondition::Fixed { amount: 10_000 },
        )
        .with_recipient(RecipientWallet::Address(Address::new(RECIPIENT)))
        .with_unlock_limit(2)
    }

    fn binding(byte: u8, confirmations: u32) -> BitcoinTransactionFacts {
        BitcoinTransactionFacts {
            txid: Txid::from_byte_array([byte; 32]),
            inputs: vec![TxInput { address: Some(wallet_address()), value: 20_000 }],
            outputs: vec![TxOutput { address: Some(wallet_address()), value: 19_000 }],
            confirmations,
            replaceable: false,
            block_height: Some(849_000),
        }
    }

    fn unlocking(spent: u64) -> BitcoinTransactionFacts {
        BitcoinTransactionFacts {
            txid: Txid::from_byte_array([0xAA; 32]),
            inputs: vec![TxInput { address: Some(wallet_address()), value: 50_000 }],
            outputs: vec![
                TxOutput { address: Some(Address::new(RECIPIENT)), value: spent },
                TxOutput { address: Some(wallet_address()), value: 49_000 - spent },
            ],
            confirmations: 2,
            replaceable: false,
            block_height: Some(850_000),
        }
    }

    fn lifecycle() -> VaultLifecycle<MemoryVaultStore, MemoryUnlockCounter> {
        VaultLifecycle::in_memory(LockConfig::default()).unwrap()
    }

    fn request(metadata: VaultMetadata) -> SealRequest {
        SealRequest::new(PAYLOAD, metadata, creator(), public_key_of(&unlocker()))
    }

    fn bound(lc: &VaultLifecycle<MemoryVaultStore, MemoryUnlockCounter>) -> Vault {
        let draft = lc.seal(request(metadata())).unwrap();
        lc.bind(&draft.id, &binding(1, 1)).unwrap()
    }

    #[test]
    fn test_seal_creates_draft() {
        let lc = lifecycle();
        let draft = lc.seal(request(metadata()).with_hint("cold storage")).unwrap();

        assert_eq!(draft.status, VaultStatus::Draft);
        assert_eq!(draft.seal.metadata_hint(), Some("cold storage"));
        assert_eq!(draft.id, VaultId::provisional(&draft.seal.to_bytes(), &draft.metadata).unwrap());
        assert_eq!(lc.inspect(&draft.id).unwrap(), draft);
        assert_eq!(draft.open_payload(&unlocker()).unwrap().as_slice(), PAYLOAD);
    }

    #[test]
    fn test_seal_reports_every_violation() {
        let lc = lifecycle();
        let mut bad = VaultMetadata::new(
            AuthorizedWallet::One(Address::new("not-an-address")),
            AmountCondition::Fixed { amount: 0 },
        )
        .with_unlock_limit(0);
        bad.txid = Some(Txid::all_zeros());

        match lc.seal(request(bad)) {
            Err(LockError::InvalidMetadata(violations)) => {
                let fields: Vec<_> = violations.iter().map(|v| v.field.as_str()).collect();
                assert_eq!(fields, ["authorized_wallet", "amount_condition.amount", "unlock_limit", "txid"]);
            }
            other => panic!("expected InvalidMetadata, got {other:?}"),
        }
        assert!(lc.store().is_empty());
    }

    #[test]
    fn test_bind_requires_confirmation() {
        let lc = lifecycle();
        let draft = lc.seal(request(metadata())).unwrap();
        assert!(matches!(
            lc.bind(&draft.id, &binding(1, 0)),
            Err(LockError::TransactionNotConfirmed)
        ));
        assert_eq!(lc.inspect(&draft.id).unwrap().status, VaultStatus::Draft);
    }

    #[test]
    fn test_bind_computes_final_id() {
        let lc = lifecycle();
        let draft = lc.seal(request(metadata())).unwrap();
        let vault = lc.bind(&draft.id, &binding(1, 1)).unwrap();

        assert_eq!(vault.status, VaultStatus::Bound);
        assert_eq!(vault.metadata.txid, Some(Txid::from_byte_array([1; 32])));
        assert_eq!(
            vault.id,
            VaultId::compute(&vault.seal.to_bytes(), &vault.metadata, &Txid::from_byte_array([1; 32])).unwrap()
        );
        assert_ne!(vault.id, draft.id);
        assert!(matches!(lc.inspect(&draft.id), Err(LockError::VaultNotFound)));
        assert!(matches!(
            lc.unseal(&draft.id, &unlocking(10_000), 850_000, &unlocker()),
            Err(LockError::VaultNotFound)
        ));
    }

    #[test]
    fn test_unseal_until_exhausted() {
        let lc = lifecycle();
        let vault = bound(&lc);

        let first = lc.unseal(&vault.id, &unlocking(10_000), 850_000, &unlocker()).unwrap();
        match first {
            AccessDecision::Granted { plaintext, .. } => assert_eq!(plaintext.as_slice(), PAYLOAD),
            AccessDecision::Denied(r) => panic!("denied: {:?}", r.errors),
        }
        let stored = lc.inspect(&vault.id).unwrap();
        assert_eq!((stored.status, stored.unlock_count), (VaultStatus::Active, 1));

        assert!(lc.unseal(&vault.id, &unlocking(10_000), 850_000, &unlocker()).unwrap().is_granted());
        let stored = lc.inspect(&vault.id).unwrap();
        assert_eq!((stored.status, stored.unlock_count), (VaultStatus::Exhausted, 2));

        let third = lc.unseal(&vault.id, &unlocking(10_000), 850_000, &unlocker()).unwrap();
        assert_eq!(third.result().errors, vec![AccessError::UnlockLimitExceeded { limit: 2 }]);
        assert_eq!(lc.counter().get_unlock_count(&vault.id).unwrap(), 2);

        let log = lc.audit_log();
        assert!(log.verify_integrity());
        assert_eq!(log.history(&vault.id).len(), 4);
    }

    #[test]
    fn test_denied_unseal_changes_nothing() {
        let lc = lifecycle();
        let vault = bound(&lc);

        let decision = lc.unseal(&vault.id, &unlocking(9_000), 850_000, &unlocker()).unwrap();
        assert!(!decision.is_granted());
        assert_eq!(
            decision.result().errors,
            vec![AccessError::AmountConditionUnsatisfied { spent: 9_000 }]
        );
        assert_eq!(lc.inspect(&vault.id).unwrap(), vault);
        assert_eq!(lc.counter().get_unlock_count(&vault.id).unwrap(), 0);
    }

    #[test]
    fn test_tampered_seal_fails_authentication() {
        let lc = lifecycle();
        let vault = bound(&lc);

        let mut bytes = vault.seal.to_bytes();
        // magic 4, version 1, algo 1 + 11, nonce 12, length 4
        bytes[33] ^= 0x01;
        let tampered = SealFile::decode(&bytes).unwrap();
        lc.store()
            .update(&vault.id, &mut |v| {
                v.seal = tampered.clone();
                Ok(())
            })
            .unwrap();

        assert!(matches!(
            lc.unseal(&vault.id, &unlocking(10_000), 850_000, &unlocker()),
            Err(LockError::AuthenticationFailed)
        ));
        assert_eq!(lc.counter().get_unlock_count(&vault.id).unwrap(), 0);
    }

    #[test]
    fn test_wrong_unlocker_key_fails_authentication() {
        let lc = lifecycle();
        let vault = bound(&lc);
        assert!(matches!(
            lc.unseal(&vault.id, &unlocking(10_000), 850_000, &secret(9)),
            Err(LockError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_chacha_vault() {
        let lc = lifecycle();
        let draft = lc
            .seal(request(metadata()).with_algorithm(EncryptionAlgo::ChaCha20Poly1305))
            .unwrap();
        assert_eq!(draft.seal.algo(), EncryptionAlgo::ChaCha20Poly1305);
        let vault = lc.bind(&draft.id, &binding(1, 1)).unwrap();
        assert!(lc.unseal(&vault.id, &unlocking(10_000), 850_000, &unlocker()).unwrap().is_granted());
    }

    #[test]
    fn test_range_selection_rekeys_draft() {
        let lc = lifecycle();
        let mut m = metadata();
        m.amount_condition = AmountCondition::Range { min: 5_000, max: 15_000, selected_amount: None };
        let draft = lc.seal(request(m)).unwrap();

        let selection = lc.select_spend_amount(&draft.id).unwrap();
        let amount = selection.amount.unwrap();
        assert!((5_000..=15_000).contains(&amount));
        assert_ne!(selection.draft_id, draft.id);
        assert!(matches!(lc.inspect(&draft.id), Err(LockError::VaultNotFound)));
        assert_eq!(lc.select_spend_amount(&selection.draft_id).unwrap(), selection);

        let vault = lc.bind(&selection.draft_id, &binding(1, 1)).unwrap();
        assert_eq!(vault.metadata.amount_condition.target(), Some(amount));
        assert!(lc.unseal(&vault.id, &unlocking(amount), 850_000, &unlocker()).unwrap().is_granted());
    }

    #[test]
    fn test_unseal_draft_is_invalid_state() {
        let lc = lifecycle();
        let draft = lc.seal(request(metadata())).unwrap();
        assert!(matches!(
            lc.unseal(&draft.id, &unlocking(10_000), 850_000, &unlocker()),
            Err(LockError::InvalidState(VaultStatus::Draft))
        ));
    }

    #[test]
    fn test_rebind_preserves_counter_and_expires_old() {
        let lc = lifecycle();
        let vault = bound(&lc);
        assert!(lc.unseal(&vault.id, &unlocking(10_000), 850_000, &unlocker()).unwrap().is_granted());

        let next = binding(2, 1);
        let signature = sign_message(&wallet_key(), &rebind_message(&vault.id, &next.txid));
        let rebound = lc.rebind(&vault.id, &next, &signature).unwrap();

        assert_ne!(rebound.id, vault.id);
        assert_eq!(rebound.metadata.txid, Some(next.txid));
        assert_eq!((rebound.status, rebound.unlock_count), (VaultStatus::Active, 1));
        assert_eq!(lc.counter().get_unlock_count(&rebound.id).unwrap(), 1);

        let old = lc.inspect(&vault.id).unwrap();
        assert_eq!(old.status, VaultStatus::Expired);
        assert_eq!(old.superseded_by, Some(rebound.id));
        assert!(matches!(
            lc.unseal(&vault.id, &unlocking(10_000), 850_000, &unlocker()),
            Err(LockError::InvalidState(VaultStatus::Expired))
        ));
        assert!(lc.unseal(&rebound.id, &unlocking(10_000), 850_000, &unlocker()).unwrap().is_granted());
        assert_eq!(lc.inspect(&rebound.id).unwrap().status, VaultStatus::Exhausted);
    }

    #[test]
    fn test_rebind_freezes_old_counter() {
        let lc = lifecycle();
        let vault = bound(&lc);
        assert!(lc.unseal(&vault.id, &unlocking(10_000), 850_000, &unlocker()).unwrap().is_granted());

        let next = binding(2, 1);
        let signature = sign_message(&wallet_key(), &rebind_message(&vault.id, &next.txid));
        let rebound = lc.rebind(&vault.id, &next, &signature).unwrap();

        assert_eq!(lc.counter().increment_if_below_limit(&vault.id, Some(2)).unwrap(), None);
        assert_eq!(lc.counter().get_unlock_count(&vault.id).unwrap(), 1);
        assert_eq!(lc.counter().get_unlock_count(&rebound.id).unwrap(), 1);

        // a second rebind of the superseded record is refused
        let other = binding(3, 1);
        let signature = sign_message(&wallet_key(), &rebind_message(&vault.id, &other.txid));
        assert!(matches!(
            lc.rebind(&vault.id, &other, &signature),
            Err(LockError::InvalidState(VaultStatus::Expired))
        ));
    }

    #[test]
    fn test_rebind_never_reuses_an_earlier_id() {
        let lc = lifecycle();
        let vault = bound(&lc);
        let next = binding(2, 1);
        let signature = sign_message(&wallet_key(), &rebind_message(&vault.id, &next.txid));
        let rebound = lc.rebind(&vault.id, &next, &signature).unwrap();

        let back = binding(1, 1);
        let signature = sign_message(&wallet_key(), &rebind_message(&rebound.id, &back.txid));
        assert!(matches!(lc.rebind(&rebound.id, &back, &signature), Err(LockError::TxidAlreadyBound)));
        assert_eq!(lc.inspect(&rebound.id).unwrap(), rebound);
        assert_eq!(lc.inspect(&vault.id).unwrap().status, VaultStatus::Expired);
    }

    /// Counter that parks the first armed increment until released
    struct GatedCounter {
        inner: MemoryUnlockCounter,
        armed: AtomicBool,
        entered: Barrier,
        release: Barrier,
    }

    impl UnlockCounter for GatedCounter {
        fn get_unlock_count(&self, id: &VaultId) -> LockResult<u32> {
            self.inner.get_unlock_count(id)
        }

        fn increment_if_below_limit(&self, id: &VaultId, limit: Option<u32>) -> LockResult<Option<u32>> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.wait();
                self.release.wait();
            }
            self.inner.increment_if_below_limit(id, limit)
        }

        fn set_unlock_count(&self, id: &VaultId, count: u32) -> LockResult<()> {
            self.inner.set_unlock_count(id, count)
        }

        fn retire(&self, id: &VaultId) -> LockResult<u32> {
            self.inner.retire(id)
        }
    }

    #[test]
    fn test_unseal_racing_rebind_stays_within_limit() {
        let counter = GatedCounter {
            inner: MemoryUnlockCounter::new(),
            armed: AtomicBool::new(false),
            entered: Barrier::new(2),
            release: Barrier::new(2),
        };
        let lc = VaultLifecycle::new(LockConfig::default(), MemoryVaultStore::new(), counter).unwrap();
        let draft = lc.seal(request(metadata())).unwrap();
        let vault = lc.bind(&draft.id, &binding(1, 1)).unwrap();
        assert!(lc.unseal(&vault.id, &unlocking(10_000), 850_000, &unlocker()).unwrap().is_granted());

        let next = binding(2, 1);
        let signature = sign_message(&wallet_key(), &rebind_message(&vault.id, &next.txid));
        lc.counter().armed.store(true, Ordering::SeqCst);

        let (in_flight, rebound) = std::thread::scope(|s| {
            let handle = s.spawn(|| lc.unseal(&vault.id, &unlocking(10_000), 850_000, &unlocker()));
            // the unseal has passed its checklist and waits at the increment
            lc.counter().entered.wait();
            let rebound = lc.rebind(&vault.id, &next, &signature).unwrap();
            lc.counter().release.wait();
            (handle.join().unwrap(), rebound)
        });

        assert!(matches!(in_flight, Err(LockError::InvalidState(VaultStatus::Expired))));
        assert_eq!(rebound.unlock_count, 1);
        assert_eq!(lc.counter().get_unlock_count(&vault.id).unwrap(), 1);

        let mut grants = 1;
        for _ in 0..3 {
            if lc.unseal(&rebound.id, &unlocking(10_000), 850_000, &unlocker()).unwrap().is_granted() {
                grants += 1;
            }
        }
        assert_eq!(grants, 2);
        assert_eq!(lc.inspect(&rebound.id).unwrap().status, VaultStatus::Exhausted);
        assert_eq!(lc.inspect(&vault.id).unwrap().status, VaultStatus::Expired);
    }

    #[test]
    fn test_concurrent_range_selection_picks_once() {
        let lc = lifecycle();
        let mut m = metadata();
        m.amount_condition = AmountCondition::Range { min: 1, max: 1_000_000, selected_amount: None };
        let draft = lc.seal(request(m)).unwrap();

        let outcomes: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| lc.select_spend_amount(&draft.id))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let selections: Vec<_> = outcomes.iter().filter_map(|o| o.as_ref().ok()).collect();
        assert_eq!(selections.len(), 1);
        assert!(outcomes
            .iter()
            .filter(|o| o.is_err())
            .all(|o| matches!(o, Err(LockError::VaultNotFound))));
        assert_eq!(lc.store().len(), 1);
        let stored = lc.inspect(&selections[0].draft_id).unwrap();
        assert_eq!(stored.metadata.amount_condition.target(), selections[0].amount);
    }

    #[test]
    fn test_concurrent_binds_produce_one_vault() {
        let lc = lifecycle();
        let draft = lc.seal(request(metadata())).unwrap();

        let outcomes: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (1..=8u8)
                .map(|byte| {
                    let (lc, id) = (&lc, draft.id);
                    s.spawn(move || lc.bind(&id, &binding(byte, 1)))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert_eq!(lc.store().len(), 1);
        assert!(matches!(lc.inspect(&draft.id), Err(LockError::VaultNotFound)));
    }

    #[test]
    fn test_rebind_reset_policy() {
        let config = LockConfig {
            rebind_counter_policy: RebindCounterPolicy::Reset,
            ..LockConfig::default()
        };
        let lc = VaultLifecycle::in_memory(config).unwrap();
        let vault = bound(&lc);
        assert!(lc.unseal(&vault.id, &unlocking(10_000), 850_000, &unlocker()).unwrap().is_granted());

        let next = binding(2, 1);
        let signature = sign_message(&wallet_key(), &rebind_message(&vault.id, &next.txid));
        let rebound = lc.rebind(&vault.id, &next, &signature).unwrap();
        assert_eq!((rebound.status, rebound.unlock_count), (VaultStatus::Bound, 0));
    }

    #[test]
    fn test_rebind_rejects_bad_signatures() {
        let lc = lifecycle();
        let vault = bound(&lc);
        let next = binding(2, 1);

        let stranger = sign_message(&secret(8), &rebind_message(&vault.id, &next.txid));
        assert!(matches!(lc.rebind(&vault.id, &next, &stranger), Err(LockError::InvalidSignature)));

        let wrong_txid = sign_message(&wallet_key(), &rebind_message(&vault.id, &binding(3, 1).txid));
        assert!(matches!(lc.rebind(&vault.id, &next, &wrong_txid), Err(LockError::InvalidSignature)));

        let same = binding(1, 1);
        let signature = sign_message(&wallet_key(), &rebind_message(&vault.id, &same.txid));
        assert!(matches!(lc.rebind(&vault.id, &same, &signature), Err(LockError::TxidAlreadyBound)));

        let unconfirmed = binding(4, 0);
        let signature = sign_message(&wallet_key(), &rebind_message(&vault.id, &unconfirmed.txid));
        assert!(matches!(
            lc.rebind(&vault.id, &unconfirmed, &signature),
            Err(LockError::TransactionNotConfirmed)
        ));
        assert_eq!(lc.inspect(&vault.id).unwrap().status, VaultStatus::Bound);
    }

    #[test]
    fn test_rebind_any_wallet_needs_creator_signature() {
        let lc = lifecycle();
        let mut m = metadata();
        m.authorized_wallet = AuthorizedWallet::Any;
        let draft = lc.seal(request(m)).unwrap();
        let vault = lc.bind(&draft.id, &binding(1, 1)).unwrap();
        let next = binding(2, 1);
        let message = rebind_message(&vault.id, &next.txid);

        let by_wallet = sign_message(&wallet_key(), &message);
        assert!(matches!(lc.rebind(&vault.id, &next, &by_wallet), Err(LockError::InvalidSignature)));

        let by_creator = sign_message(&creator(), &message);
        assert!(lc.rebind(&vault.id, &next, &by_creator).is_ok());
    }

    #[test]
    fn test_export_metadata_for_both_parties() {
        let lc = lifecycle();
        let vault = bound(&lc);

        let envelope = lc.export_metadata(&vault.id, &unlocker()).unwrap();
        assert!(matches!(envelope, MetadataEnvelope::Encrypted { .. }));
        let creator_key = vault.metadata_key(&creator()).unwrap();
        assert_eq!(envelope.open(&creator_key).unwrap(), vault.metadata);

        let mut m = metadata();
        m.visibility = Visibility::Plaintext;
        let draft = lc.seal(request(m)).unwrap();
        let envelope = lc.export_metadata(&draft.id, &creator()).unwrap();
        assert!(matches!(envelope, MetadataEnvelope::Plaintext { .. }));
        assert!(envelope.open(&draft.metadata_key(&unlocker()).unwrap()).is_ok());
    }

    struct FixedSource {
        facts: BitcoinTransactionFacts,
        height: u32,
    }

    impl BitcoinSource for FixedSource {
        fn get_transaction(&self, txid: &Txid) -> LockResult<BitcoinTransactionFacts> {
            if *txid == self.facts.txid {
                Ok(self.facts.clone())
            } else {
                Err(LockError::BitcoinSource(format!("unknown transaction {txid}")))
            }
        }

        fn current_block_height(&self) -> LockResult<u32> {
            Ok(self.height)
        }
    }

    #[test]
    fn test_unseal_with_source() {
        let lc = lifecycle();
        let draft = lc.seal(request(metadata().with_time_lock(850_000))).unwrap();
        let vault = lc.bind(&draft.id, &binding(1, 1)).unwrap();

        let early = FixedSource { facts: unlocking(10_000), height: 849_999 };
        let decision = lc
            .unseal_with_source(&vault.id, &early.facts.txid, &early, &unlocker())
            .unwrap();
        assert_eq!(
            decision.result().errors,
            vec![AccessError::VaultTimeLocked { unlock_height: 850_000, current_height: 849_999 }]
        );

        let ready = FixedSource { facts: unlocking(10_000), height: 850_000 };
        assert!(lc
            .unseal_with_source(&vault.id, &ready.facts.txid, &ready, &unlocker())
            .unwrap()
            .is_granted());
        assert!(matches!(
            lc.unseal_with_source(&vault.id, &Txid::all_zeros(), &ready, &unlocker()),
            Err(LockError::BitcoinSource(_))
        ));
    }

    #[test]
    fn test_store_update_is_all_or_nothing() {
        let lc = lifecycle();
        let vault = bound(&lc);
        let outcome = lc.store().update(&vault.id, &mut |v| {
            v.unlock_count = 99;
            Err(LockError::Storage("abort".into()))
        });
        assert!(outcome.is_err());
        assert_eq!(lc.inspect(&vault.id).unwrap().unlock_count, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = LockConfig { min_confirmations: 0, ..LockConfig::default() };
        assert!(matches!(VaultLifecycle::in_memory(config), Err(LockError::InvalidConfig(_))));
    }
}
