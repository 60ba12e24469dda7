// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Bitcoin transaction facts consumed by the validator.
//
// Resolving these (explorer/RPC lookups, deriving input addresses from
// scriptSig/witness on the right network) is the job of a `BitcoinSource`
// collaborator; the engine only inspects the resolved values.

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

use crate::error::LockResult;
use crate::metadata::{Address, RecipientWallet};

/// A spent output, attributed to the address whose key signed for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// `None` when the signing key cannot be mapped to an address
    pub address: Option<Address>,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// `None` for scripts without an address form (e.g. OP_RETURN)
    pub address: Option<Address>,
    pub value: u64,
}

/// Resolved view of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinTransactionFacts {
    pub txid: Txid,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub confirmations: u32,
    /// Signals BIP-125 replace-by-fee
    pub replaceable: bool,
    pub block_height: Option<u32>,
}

impl BitcoinTransactionFacts {
    pub fn input_addresses(&self) -> impl Iterator<Item = &Address> {
        self.inputs.iter().filter_map(|i| i.address.as_ref())
    }

    pub fn is_input_address(&self, address: &Address) -> bool {
        self.input_addresses().any(|a| a.matches(address))
    }

    pub fn pays(&self, address: &Address) -> bool {
        self.outputs
            .iter()
            .any(|o| o.address.as_ref().is_some_and(|a| a.matches(address)))
    }

    pub fn total_input_value(&self) -> u64 {
        self.inputs.iter().map(|i| i.value).fold(0u64, u64::saturating_add)
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.value).fold(0u64, u64::saturating_add)
    }

    /// Network fee; `None` when outputs exceed inputs (inconsistent facts)
    pub fn fee(&self) -> Option<u64> {
        self.total_input_value().checked_sub(self.total_output_value())
    }

    /// Index of the output that pays the recipient. For `SelfWallet` this is
    /// the first output back to an input address.
    pub fn recipient_output(&self, recipient: &RecipientWallet) -> Option<usize> {
        self.outputs.iter().position(|o| match (&o.address, recipient) {
            (Some(a), RecipientWallet::SelfWallet) => self.is_input_address(a),
            (Some(a), RecipientWallet::Address(r)) => a.matches(r),
            (None, _) => false,
        })
    }

    /// Outputs returning funds to an input address, other than the
    /// recipient output itself
    pub fn change_value(&self, recipient: &RecipientWallet) -> u64 {
        let designated = self.recipient_output(recipient);
        self.outputs
            .iter()
            .enumerate()
            .filter(|(i, o)| {
                Some(*i) != designated
                    && o.address.as_ref().is_some_and(|a| self.is_input_address(a))
            })
            .map(|(_, o)| o.value)
            .fold(0u64, u64::saturating_add)
    }

    /// `Σ inputs − Σ change − fee`: what actually left the signer's wallet
    /// towards the recipient, network fee excluded. Zero for inconsistent
    /// facts.
    pub fn amount_spent(&self, recipient: &RecipientWallet) -> u64 {
        let Some(fee) = self.fee() else {
            return 0;
        };
        self.total_input_value()
            .saturating_sub(self.change_value(recipient))
            .saturating_sub(fee)
    }
}

/// Bitcoin-layer collaborator (explorer, RPC node)
pub trait BitcoinSource: Send + Sync {
    fn get_transaction(&self, txid: &Txid) -> LockResult<BitcoinTransactionFacts>;

    fn current_block_height(&self) -> LockResult<u32>;
}
