// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Vault metadata: the unlock rules a Proof-of-Access is checked against
//
// JSON shape:
//   authorized_wallet: "ANY" | "<address>" | ["<address>", ...]
//   amount_condition:  {"type":"fixed","amount"} | {"type":"range","min","max","selected_amount"?}
//                      | {"type":"any"}
//   recipient_wallet:  "self" | "<address>"
//   time_lock, unlock_limit, visibility, txid, created_at, version

use std::collections::HashSet;
use std::str::FromStr;

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Network, Txid};
use chrono::{DateTime, SubsecRound, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::crypto::{hmac_sha256, verify_hmac_sha256, AeadCipher, AeadOutput, EncryptionAlgo, SecureKey};
use crate::error::{FieldViolation, LockError, LockResult};
use crate::METADATA_VERSION;

const ANY_KEYWORD: &str = "ANY";
const SELF_KEYWORD: &str = "self";
const METADATA_AAD: &[u8] = b"LOCK-METADATA";

/// Bitcoin address as it appears in metadata and transaction facts.
///
/// Kept as text so that facts from any explorer can be compared without
/// re-encoding; `check` validates it against a network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate format and network prefix
    pub fn check(&self, network: Network) -> Result<(), String> {
        let unchecked = bitcoin::Address::<NetworkUnchecked>::from_str(&self.0)
            .map_err(|e| format!("{:?} is not a valid address: {e}", self.0))?;
        unchecked
            .require_network(network)
            .map(|_| ())
            .map_err(|_| format!("{:?} is not a {network} address", self.0))
    }

    /// Address equality; bech32 addresses compare case-insensitively
    pub fn matches(&self, other: &Address) -> bool {
        if self.is_bech32() && other.is_bech32() {
            self.0.eq_ignore_ascii_case(&other.0)
        } else {
            self.0 == other.0
        }
    }

    /// The literal `"ANY"` keyword, valid only for `authorized_wallet`
    pub fn is_any_keyword(&self) -> bool {
        self.0.eq_ignore_ascii_case(ANY_KEYWORD)
    }

    fn is_bech32(&self) -> bool {
        let lower = self.0.to_ascii_lowercase();
        ["bc1", "tb1", "bcrt1"].iter().any(|hrp| lower.starts_with(hrp))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&bitcoin::Address> for Address {
    fn from(address: &bitcoin::Address) -> Self {
        Self(address.to_string())
    }
}

/// Wallets allowed to sign the unlocking transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WalletRepr", into = "WalletRepr")]
pub enum AuthorizedWallet {
    Any,
    One(Address),
    Many(Vec<Address>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum WalletRepr {
    One(String),
    Many(Vec<String>),
}

impl TryFrom<WalletRepr> for AuthorizedWallet {
    type Error = String;

    fn try_from(repr: WalletRepr) -> Result<Self, Self::Error> {
        Ok(match repr {
            WalletRepr::One(s) if s.eq_ignore_ascii_case(ANY_KEYWORD) => Self::Any,
            WalletRepr::One(s) => Self::One(Address(s)),
            WalletRepr::Many(list) => Self::Many(list.into_iter().map(Address).collect()),
        })
    }
}

impl From<AuthorizedWallet> for WalletRepr {
    fn from(wallet: AuthorizedWallet) -> Self {
        match wallet {
            AuthorizedWallet::Any => Self::One(ANY_KEYWORD.to_string()),
            AuthorizedWallet::One(a) => Self::One(a.0),
            AuthorizedWallet::Many(list) => Self::Many(list.into_iter().map(|a| a.0).collect()),
        }
    }
}

impl AuthorizedWallet {
    /// Listed addresses; empty for `Any`
    pub fn addresses(&self) -> &[Address] {
        match self {
            Self::Any => &[],
            Self::One(a) => std::slice::from_ref(a),
            Self::Many(list) => list,
        }
    }

    /// At-least-one-of semantics; `Any` permits every signer
    pub fn permits(&self, signer: &Address) -> bool {
        match self {
            Self::Any => true,
            Self::One(a) => a.matches(signer),
            Self::Many(list) => list.iter().any(|a| a.matches(signer)),
        }
    }
}

/// Where the unlocking transaction must send funds
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecipientWallet {
    /// Back to one of the transaction's own input addresses
    #[default]
    SelfWallet,
    Address(Address),
}

impl From<String> for RecipientWallet {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case(SELF_KEYWORD) {
            Self::SelfWallet
        } else {
            Self::Address(Address(s))
        }
    }
}

impl From<RecipientWallet> for String {
    fn from(recipient: RecipientWallet) -> Self {
        match recipient {
            RecipientWallet::SelfWallet => SELF_KEYWORD.to_string(),
            RecipientWallet::Address(a) => a.0,
        }
    }
}

/// Spend amount rule, in satoshis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AmountCondition {
    Fixed {
        amount: u64,
    },
    /// The range only picks a target once, at PSBT time; validation is an
    /// exact match against `selected_amount`.
    Range {
        min: u64,
        max: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selected_amount: Option<u64>,
    },
    Any,
}

impl AmountCondition {
    /// Exact amount the spend must equal, if one is fixed
    pub fn target(&self) -> Option<u64> {
        match self {
            Self::Fixed { amount } => Some(*amount),
            Self::Range { selected_amount, .. } => *selected_amount,
            Self::Any => None,
        }
    }

    pub fn is_satisfied_by(&self, spent: u64) -> bool {
        match self {
            Self::Any => spent > 0,
            _ => self.target() == Some(spent),
        }
    }

    /// Fix the target of a `Range` to `amount`. Fails if a different amount
    /// was already selected or `amount` is outside the range.
    pub fn select(&mut self, amount: u64) -> Result<u64, FieldViolation> {
        match self {
            Self::Range { min, max, selected_amount } => match *selected_amount {
                Some(existing) if existing == amount => Ok(existing),
                Some(existing) => Err(FieldViolation::new(
                    "amount_condition.selected_amount",
                    format!("already fixed at {existing}"),
                )),
                None if amount < *min || amount > *max => Err(FieldViolation::new(
                    "amount_condition.selected_amount",
                    format!("{amount} is outside [{min}, {max}]"),
                )),
                None => {
                    *selected_amount = Some(amount);
                    Ok(amount)
                }
            },
            _ => Err(FieldViolation::new(
                "amount_condition",
                "only range conditions take a selected amount",
            )),
        }
    }

    /// PSBT-time selection: pick uniformly within a `Range` once and keep it.
    /// Returns the authoritative target, or `None` for `Any`.
    pub fn select_random<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<u64> {
        match self {
            Self::Range { min, max, selected_amount } => {
                if selected_amount.is_none() && min <= max {
                    *selected_amount = Some(rng.gen_range(*min..=*max));
                }
                *selected_amount
            }
            _ => self.target(),
        }
    }

    fn violations(&self, out: &mut Vec<FieldViolation>) {
        match self {
            Self::Fixed { amount } if *amount == 0 => out.push(FieldViolation::new(
                "amount_condition.amount",
                "must be greater than zero",
            )),
            Self::Range { min, max, selected_amount } => {
                if *min == 0 {
                    out.push(FieldViolation::new("amount_condition.min", "must be greater than zero"));
                }
                if min > max {
                    out.push(FieldViolation::new(
                        "amount_condition.max",
                        format!("max {max} is below min {min}"),
                    ));
                }
                if let Some(selected) = selected_amount {
                    if selected < min || selected > max {
                        out.push(FieldViolation::new(
                            "amount_condition.selected_amount",
                            format!("{selected} is outside [{min}, {max}]"),
                        ));
                    }
                }
            }
            _ => {}
        }
    }
}

/// Whether metadata is encrypted at rest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Encrypted,
    Plaintext,
}

/// Unlock rules bound to a vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultMetadata {
    pub authorized_wallet: AuthorizedWallet,
    pub amount_condition: AmountCondition,
    #[serde(default)]
    pub recipient_wallet: RecipientWallet,
    /// Block height before which no unlock is possible
    #[serde(default)]
    pub time_lock: Option<u32>,
    #[serde(default)]
    pub unlock_limit: Option<u32>,
    #[serde(default)]
    pub visibility: Visibility,
    /// Binding transaction, set by bind/rebind
    #[serde(default)]
    pub txid: Option<Txid>,
    pub created_at: DateTime<Utc>,
    pub version: String,
}

impl VaultMetadata {
    pub fn new(authorized_wallet: AuthorizedWallet, amount_condition: AmountCondition) -> Self {
        Self {
            authorized_wallet,
            amount_condition,
            recipient_wallet: RecipientWallet::SelfWallet,
            time_lock: None,
            unlock_limit: None,
            visibility: Visibility::Encrypted,
            txid: None,
            // whole seconds keep the canonical encoding stable across clients
            created_at: Utc::now().trunc_subsecs(0),
            version: METADATA_VERSION.to_string(),
        }
    }

    pub fn with_recipient(mut self, recipient: RecipientWallet) -> Self {
        self.recipient_wallet = recipient;
        self
    }

    pub fn with_time_lock(mut self, height: u32) -> Self {
        self.time_lock = Some(height);
        self
    }

    pub fn with_unlock_limit(mut self, limit: u32) -> Self {
        self.unlock_limit = Some(limit);
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Every shape violation, in field order
    pub fn violations(&self, network: Network) -> Vec<FieldViolation> {
        let mut out = Vec::new();

        match &self.authorized_wallet {
            AuthorizedWallet::Any => {}
            AuthorizedWallet::One(address) => {
                if let Err(reason) = address.check(network) {
                    out.push(FieldViolation::new("authorized_wallet", reason));
                }
            }
            AuthorizedWallet::Many(list) => {
                if list.is_empty() {
                    out.push(FieldViolation::new(
                        "authorized_wallet",
                        "must list at least one address",
                    ));
                }
                let mut seen = HashSet::new();
                for (i, address) in list.iter().enumerate() {
                    let field = format!("authorized_wallet[{i}]");
                    if address.is_any_keyword() {
                        out.push(FieldViolation::new(field, "ANY cannot appear inside a list"));
                    } else if let Err(reason) = address.check(network) {
                        out.push(FieldViolation::new(field, reason));
                    } else if !seen.insert(address.as_str().to_ascii_lowercase()) {
                        out.push(FieldViolation::new(field, "duplicate address"));
                    }
                }
            }
        }

        self.amount_condition.violations(&mut out);

        if let RecipientWallet::Address(address) = &self.recipient_wallet {
            if address.is_any_keyword() {
                out.push(FieldViolation::new(
                    "recipient_wallet",
                    "ANY is only valid for authorized_wallet",
                ));
            } else if let Err(reason) = address.check(network) {
                out.push(FieldViolation::new("recipient_wallet", reason));
            }
        }

        if self.unlock_limit == Some(0) {
            out.push(FieldViolation::new("unlock_limit", "must be at least 1"));
        }

        if self.version != METADATA_VERSION {
            out.push(FieldViolation::new(
                "version",
                format!("unsupported version {:?}, expected {METADATA_VERSION:?}", self.version),
            ));
        }

        out
    }

    pub fn validate(&self, network: Network) -> LockResult<()> {
        let violations = self.violations(network);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(LockError::InvalidMetadata(violations))
        }
    }

    /// Deterministic encoding: compact UTF-8 JSON with lexicographically
    /// sorted object keys at every level.
    pub fn canonical_bytes(&self) -> LockResult<Vec<u8>> {
        let value = serde_json::to_value(self)
            .map_err(|e| LockError::SerializationFailed(e.to_string()))?;
        serde_json::to_vec(&value).map_err(|e| LockError::SerializationFailed(e.to_string()))
    }

    pub fn from_json(json: &[u8]) -> LockResult<Self> {
        serde_json::from_slice(json).map_err(|e| LockError::DeserializationFailed(e.to_string()))
    }
}

/// Metadata as stored or transported: encrypted, or plaintext with a MAC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "visibility", rename_all = "lowercase")]
pub enum MetadataEnvelope {
    Encrypted { payload: AeadOutput },
    Plaintext { metadata: String, mac: String },
}

impl MetadataEnvelope {
    /// Protect metadata under the metadata key according to its visibility
    pub fn seal(metadata: &VaultMetadata, key: &SecureKey, algo: EncryptionAlgo) -> LockResult<Self> {
        let canonical = metadata.canonical_bytes()?;
        match metadata.visibility {
            Visibility::Encrypted => {
                let cipher = AeadCipher::new(algo, key)?;
                Ok(Self::Encrypted {
                    payload: cipher.encrypt(&canonical, METADATA_AAD)?,
                })
            }
            Visibility::Plaintext => {
                let mac = hmac_sha256(key.as_bytes(), &canonical)?;
                let metadata = String::from_utf8(canonical)
                    .map_err(|e| LockError::SerializationFailed(e.to_string()))?;
                Ok(Self::Plaintext {
                    metadata,
                    mac: hex::encode(mac),
                })
            }
        }
    }

    /// Recover metadata, authenticating it under the metadata key
    pub fn open(&self, key: &SecureKey) -> LockResult<VaultMetadata> {
        match self {
            Self::Encrypted { payload } => {
                let cipher = AeadCipher::new(payload.algo, key)?;
                let json = cipher.decrypt(payload, METADATA_AAD)?;
                VaultMetadata::from_json(&json)
            }
            Self::Plaintext { metadata, mac } => {
                let tag = hex::decode(mac).map_err(|_| LockError::AuthenticationFailed)?;
                if !verify_hmac_sha256(key.as_bytes(), metadata.as_bytes(), &tag)? {
                    return Err(LockError::AuthenticationFailed);
                }
                VaultMetadata::from_json(metadata.as_bytes())
            }
        }
    }
}
