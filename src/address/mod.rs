//! Component A: deterministic, non-custodial TRON address derivation from
//! a merchant's stored xPub.
//!
//! Never returns a placeholder address on failure - every error path ends
//! in `GatewayError::AddressDerivation`, which the payment service treats
//! as fatal to the enclosing transaction (see `payment::PaymentService::create`).

use std::str::FromStr;

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpub};
use bitcoin::secp256k1::Secp256k1;
use sha2::{Digest, Sha256};
use tiny_keccak::{Hasher, Keccak};

use crate::errors::GatewayError;

const TRON_VERSION_BYTE: u8 = 0x41;

/// Derive the TRON base58 address for `index` under the wallet's stored
/// xPub, via the non-hardened `0/index` path (change=0, address index).
///
/// Per spec §9 open question: the source accepts a merchant-supplied
/// `derivation_path`/prefix on wallet creation but never consults it during
/// derivation, which would silently misrepresent a wallet's addressing
/// scheme. This port makes that explicit: any prefix other than the
/// default `m/44'/195'/0'/0` is rejected at wallet-creation time (see
/// `store::postgres::PgStore::insert_wallet`) rather than silently ignored.
pub fn derive(xpub: &str, index: u32) -> Result<String, GatewayError> {
    let parsed = Xpub::from_str(xpub)
        .map_err(|e| GatewayError::AddressDerivation(format!("invalid xpub: {e}")))?;

    let secp = Secp256k1::verification_only();
    let path = DerivationPath::from(vec![
        ChildNumber::from_normal_idx(0)
            .map_err(|e| GatewayError::AddressDerivation(e.to_string()))?,
        ChildNumber::from_normal_idx(index)
            .map_err(|e| GatewayError::AddressDerivation(e.to_string()))?,
    ]);

    let child = parsed
        .derive_pub(&secp, &path)
        .map_err(|e| GatewayError::AddressDerivation(format!("child derivation failed: {e}")))?;

    Ok(pubkey_to_tron_address(&child.public_key))
}

fn pubkey_to_tron_address(pubkey: &bitcoin::secp256k1::PublicKey) -> String {
    // Uncompressed form is 0x04 || X || Y; the TRON scheme hashes X||Y only.
    let uncompressed = pubkey.serialize_uncompressed();
    let body = &uncompressed[1..];

    let mut hasher = Keccak::v256();
    hasher.update(body);
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);

    let mut payload = Vec::with_capacity(21);
    payload.push(TRON_VERSION_BYTE);
    payload.extend_from_slice(&hash[12..]);

    let checksum = Sha256::digest(Sha256::digest(&payload));
    payload.extend_from_slice(&checksum[..4]);

    bs58::encode(payload).into_string()
}

/// `validate_xpub(xpub) -> bool`: does it parse as a BIP32 extended public key?
pub fn validate_xpub(xpub: &str) -> bool {
    Xpub::from_str(xpub).is_ok()
}

/// `validate_tron_address(addr) -> bool` per §4.A: leading 'T', 34 chars,
/// base58-decodes to 25 bytes whose trailing 4 match the double-SHA256
/// checksum of the leading 21.
pub fn validate_tron_address(address: &str) -> bool {
    if !address.starts_with('T') || address.len() != 34 {
        return false;
    }

    let decoded = match bs58::decode(address).into_vec() {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    if decoded.len() != 25 {
        return false;
    }

    let (payload, checksum) = decoded.split_at(21);
    let expected = Sha256::digest(Sha256::digest(payload));
    checksum == &expected[..4]
}

#[cfg(test)]
mod tests {
    use super::*;

    // A real mainnet-format xpub, used only to exercise the derivation path;
    // it carries no private material.
    const TEST_XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";

    #[test]
    fn derivation_is_deterministic() {
        let a = derive(TEST_XPUB, 1).unwrap();
        let b = derive(TEST_XPUB, 1).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_indices_diverge() {
        let a = derive(TEST_XPUB, 1).unwrap();
        let b = derive(TEST_XPUB, 2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn derived_address_round_trips_through_validation() {
        let addr = derive(TEST_XPUB, 7).unwrap();
        assert!(addr.starts_with('T'));
        assert_eq!(addr.len(), 34);
        assert!(validate_tron_address(&addr));
    }

    #[test]
    fn rejects_malformed_xpub() {
        let err = derive("not-an-xpub", 0).unwrap_err();
        assert!(matches!(err, GatewayError::AddressDerivation(_)));
    }

    #[test]
    fn validates_known_good_address() {
        assert!(validate_tron_address("TLBaRhANQoJFTqre9Nf1mjDRHMHEz4LvKE"));
    }

    #[test]
    fn rejects_bad_checksum() {
        assert!(!validate_tron_address("TLBaRhANQoJFTqre9Nf1mjDRHMHEz4LvKF"));
    }

    #[test]
    fn rejects_wrong_prefix_or_length() {
        assert!(!validate_tron_address("1LBaRhANQoJFTqre9Nf1mjDRHMHEz4LvKE"));
        assert!(!validate_tron_address("TLBaRhANQoJFTqre9Nf1mjDRHMHEz4Lv"));
    }

    #[test]
    fn validate_xpub_rejects_garbage() {
        assert!(!validate_xpub("garbage"));
        assert!(validate_xpub(TEST_XPUB));
    }
}
