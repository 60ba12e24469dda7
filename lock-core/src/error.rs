// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vault::VaultStatus;

/// A single metadata field that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

fn describe_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Terminal engine errors with security-conscious messages
#[derive(Error, Debug)]
pub enum LockError {
    #[error("malformed seal: {0}")]
    MalformedSeal(String),

    #[error("crypto error: {0}")]
    CryptoError(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid metadata: {}", describe_violations(.0))]
    InvalidMetadata(Vec<FieldViolation>),

    #[error("transaction not confirmed")]
    TransactionNotConfirmed,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("vault not found")]
    VaultNotFound,

    #[error("operation not permitted while vault is {0:?}")]
    InvalidState(VaultStatus),

    #[error("transaction is already bound to this vault")]
    TxidAlreadyBound,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("armor decoding failed")]
    ArmorDecodingFailed,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("bitcoin source error: {0}")]
    BitcoinSource(String),
}

pub type LockResult<T> = Result<T, LockError>;

/// Proof-of-Access check failures, collected rather than thrown
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessError {
    #[error("transaction has {confirmations} confirmation(s), {required} required")]
    TransactionNotConfirmed { confirmations: u32, required: u32 },

    #[error("transaction signals replace-by-fee")]
    TransactionReplaceable,

    #[error("no transaction input is signed by an authorized wallet")]
    UnauthorizedWallet,

    #[error("no transaction output pays the recipient wallet")]
    RecipientMismatch,

    #[error("amount spent ({spent} sats) does not satisfy the amount condition")]
    AmountConditionUnsatisfied { spent: u64 },

    #[error("vault is time-locked until block {unlock_height} (current {current_height})")]
    VaultTimeLocked { unlock_height: u32, current_height: u32 },

    #[error("unlock limit of {limit} reached")]
    UnlockLimitExceeded { limit: u32 },

    #[error("metadata schema error in {field}: {reason}")]
    InvalidMetadata { field: String, reason: String },
}
