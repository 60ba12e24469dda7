// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Proof-of-Access validator
//
// Checklist, in order:
//   1. confirmation / RBF
//   2. authorized wallet signed an input
//   3. recipient wallet is paid
//   4. amount condition (inputs - change, fee excluded)
//   5. block-height time-lock
//   6. unlock limit
//   7. SEAL integrity (AEAD), only when 1-6 all pass
//
// Checks 1-6 accumulate every failure so a client can show a complete
// diagnostic. Check 7 errors are terminal and propagate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::LockConfig;
use crate::error::{AccessError, LockResult};
use crate::metadata::{AuthorizedWallet, RecipientWallet, VaultMetadata};
use crate::timelock::BlockHeightLock;
use crate::transaction::BitcoinTransactionFacts;

/// Chain and counter state an attempt is judged against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationContext {
    pub current_block_height: u32,
    pub prior_unlock_count: u32,
}

/// Outcome of checks 1-6
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfAccessResult {
    pub valid: bool,
    pub errors: Vec<AccessError>,
    pub timestamp: DateTime<Utc>,
}

impl ProofOfAccessResult {
    fn from_errors(errors: Vec<AccessError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            timestamp: Utc::now(),
        }
    }

    /// Result for an attempt that passed the checklist but lost the race
    /// for the last unlock
    pub fn limit_reached(limit: u32) -> Self {
        Self::from_errors(vec![AccessError::UnlockLimitExceeded { limit }])
    }

    pub fn has(&self, predicate: impl Fn(&AccessError) -> bool) -> bool {
        self.errors.iter().any(predicate)
    }
}

/// Final decision for one unlock attempt
pub enum AccessDecision {
    Granted {
        plaintext: Zeroizing<Vec<u8>>,
        result: ProofOfAccessResult,
    },
    Denied(ProofOfAccessResult),
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }

    pub fn result(&self) -> &ProofOfAccessResult {
        match self {
            Self::Granted { result, .. } | Self::Denied(result) => result,
        }
    }
}

impl std::fmt::Debug for AccessDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Granted { plaintext, .. } => f
                .debug_struct("Granted")
                .field("plaintext_len", &plaintext.len())
                .finish(),
            Self::Denied(result) => f.debug_tuple("Denied").field(result).finish(),
        }
    }
}

/// Pure, stateless decision engine
#[derive(Debug, Clone)]
pub struct ProofOfAccessValidator {
    min_confirmations: u32,
}

impl Default for ProofOfAccessValidator {
    fn default() -> Self {
        Self { min_confirmations: 1 }
    }
}

impl ProofOfAccessValidator {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            min_confirmations: config.min_confirmations.max(1),
        }
    }

    /// Run checks 1-6 and report every failure
    pub fn validate(
        &self,
        facts: &BitcoinTransactionFacts,
        metadata: &VaultMetadata,
        ctx: ValidationContext,
    ) -> ProofOfAccessResult {
        let mut errors = Vec::new();

        self.check_confirmation(facts, &mut errors);
        Self::check_authorized_wallet(facts, metadata, &mut errors);
        Self::check_recipient(facts, metadata, &mut errors);
        Self::check_amount(facts, metadata, &mut errors);
        Self::check_time_lock(metadata, ctx, &mut errors);
        Self::check_unlock_limit(metadata, ctx, &mut errors);

        debug!(
            txid = %facts.txid,
            failures = errors.len(),
            "proof-of-access checklist evaluated"
        );

        ProofOfAccessResult::from_errors(errors)
    }

    /// Run checks 1-6, then check 7 through `open` only if they all pass.
    /// `open` is never called for a denied attempt; its errors propagate.
    pub fn authorize<F>(
        &self,
        facts: &BitcoinTransactionFacts,
        metadata: &VaultMetadata,
        ctx: ValidationContext,
        open: F,
    ) -> LockResult<AccessDecision>
    where
        F: FnOnce() -> LockResult<Zeroizing<Vec<u8>>>,
    {
        let result = self.validate(facts, metadata, ctx);
        if !result.valid {
            return Ok(AccessDecision::Denied(result));
        }
        let plaintext = open()?;
        Ok(AccessDecision::Granted { plaintext, result })
    }

    fn check_confirmation(&self, facts: &BitcoinTransactionFacts, errors: &mut Vec<AccessError>) {
        if facts.confirmations < self.min_confirmations {
            errors.push(AccessError::TransactionNotConfirmed {
                confirmations: facts.confirmations,
                required: self.min_confirmations,
            });
        }
        if facts.replaceable {
            errors.push(AccessError::TransactionReplaceable);
        }
    }

    fn check_authorized_wallet(
        facts: &BitcoinTransactionFacts,
        metadata: &VaultMetadata,
        errors: &mut Vec<AccessError>,
    ) {
        if metadata.authorized_wallet == AuthorizedWallet::Any {
            return;
        }
        let authorized = facts
            .input_addresses()
            .any(|signer| metadata.authorized_wallet.permits(signer));
        if !authorized {
            errors.push(AccessError::UnauthorizedWallet);
        }
    }

    fn check_recipient(
        facts: &BitcoinTransactionFacts,
        metadata: &VaultMetadata,
        errors: &mut Vec<AccessError>,
    ) {
        match &metadata.recipient_wallet {
            RecipientWallet::Address(address) if address.is_any_keyword() => {
                errors.push(AccessError::InvalidMetadata {
                    field: "recipient_wallet".into(),
                    reason: "ANY is only valid for authorized_wallet".into(),
                });
            }
            recipient => {
                if facts.recipient_output(recipient).is_none() {
                    errors.push(AccessError::RecipientMismatch);
                }
            }
        }
    }

    fn check_amount(
        facts: &BitcoinTransactionFacts,
        metadata: &VaultMetadata,
        errors: &mut Vec<AccessError>,
    ) {
        let spent = facts.amount_spent(&metadata.recipient_wallet);
        if !metadata.amount_condition.is_satisfied_by(spent) {
            errors.push(AccessError::AmountConditionUnsatisfied { spent });
        }
    }

    fn check_time_lock(metadata: &VaultMetadata, ctx: ValidationContext, errors: &mut Vec<AccessError>) {
        if let Some(height) = metadata.time_lock {
            if let Err(e) = BlockHeightLock::new(height).check(ctx.current_block_height) {
                errors.push(e);
            }
        }
    }

    fn check_unlock_limit(
        metadata: &VaultMetadata,
        ctx: ValidationContext,
        errors: &mut Vec<AccessError>,
    ) {
        if let Some(limit) = metadata.unlock_limit {
            if ctx.prior_unlock_count >= limit {
                errors.push(AccessError::UnlockLimitExceeded { limit });
            }
        }
    }
}
