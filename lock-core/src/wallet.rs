// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Hyperpolymath
//
// Wallet signatures for rebinding
//
// A rebind is authorized by a Bitcoin signed message ("Bitcoin Signed
// Message:\n" prefix, 65-byte recoverable signature) over
// `rebind_message(vault_id, new_txid)`. The signer's public key is recovered
// and its P2PKH, P2WPKH and P2SH-P2WPKH addresses are compared against the
// candidates.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sign_message::{signed_msg_hash, MessageSignature};
use bitcoin::{CompressedPublicKey, Network, Txid};

use crate::error::{LockError, LockResult};
use crate::identity::VaultId;
use crate::metadata::Address;
use crate::PAYLOAD_KDF_INFO;

/// Text a wallet signs to move `vault_id` onto `new_txid`
pub fn rebind_message(vault_id: &VaultId, new_txid: &Txid) -> String {
    let protocol = String::from_utf8_lossy(PAYLOAD_KDF_INFO);
    format!("{protocol} rebind {vault_id} {new_txid}")
}

/// Sign `message` the way wallets implement `signmessage`
pub fn sign_message(secret: &SecretKey, message: &str) -> MessageSignature {
    let secp = Secp256k1::signing_only();
    let digest = Message::from_digest(signed_msg_hash(message).to_byte_array());
    MessageSignature::new(secp.sign_ecdsa_recoverable(&digest, secret), true)
}

/// Base64 form used by wallet software
pub fn signature_to_base64(signature: &MessageSignature) -> String {
    BASE64.encode(signature.serialize())
}

pub fn signature_from_base64(encoded: &str) -> LockResult<MessageSignature> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|_| LockError::InvalidSignature)?;
    MessageSignature::from_slice(&bytes).map_err(|_| LockError::InvalidSignature)
}

/// Native SegWit address of a key
pub fn p2wpkh_address(public_key: &PublicKey, network: Network) -> Address {
    Address::from(&bitcoin::Address::p2wpkh(&CompressedPublicKey(*public_key), network))
}

/// Addresses a recovered key may be known by
fn addresses_for(public_key: &bitcoin::PublicKey, network: Network) -> Vec<Address> {
    let mut addresses = vec![Address::from(&bitcoin::Address::p2pkh(
        public_key.pubkey_hash(),
        network,
    ))];
    if let Ok(compressed) = CompressedPublicKey::try_from(*public_key) {
        addresses.push(Address::from(&bitcoin::Address::p2wpkh(&compressed, network)));
        addresses.push(Address::from(&bitcoin::Address::p2shwpkh(&compressed, network)));
    }
    addresses
}

/// Return the candidate address that signed `message`, or
/// `InvalidSignature` if none did
pub fn verify_wallet_signature(
    signature: &MessageSignature,
    message: &str,
    candidates: &[Address],
    network: Network,
) -> LockResult<Address> {
    let secp = Secp256k1::verification_only();
    let signer = signature
        .recover_pubkey(&secp, signed_msg_hash(message))
        .map_err(|_| LockError::InvalidSignature)?;

    addresses_for(&signer, network)
        .into_iter()
        .find(|derived| candidates.iter().any(|c| c.matches(derived)))
        .ok_or(LockError::InvalidSignature)
}
