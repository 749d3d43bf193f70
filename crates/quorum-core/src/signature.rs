//! Per-leaf signatures
//!
//! Plain signers produce recoverable ECDSA signatures (over the digest
//! directly, or over the personal-message prefix of it) or contract
//! signatures checked on-chain. Sapient signers produce opaque bytes that
//! their verifier maps back to an image hash.

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};

use crate::primitives::{hex_bytes, keccak256, keccak256_concat, Address, Hash32};
use crate::topology::SignerRef;
use crate::CoreError;

const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Compact recoverable ECDSA signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsY {
    pub r: Hash32,
    pub s: Hash32,
    pub y_parity: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignerSignature {
    /// ECDSA over the digest.
    Hash(RsY),
    /// ECDSA over the personal-message wrapping of the digest.
    EthSign(RsY),
    /// Contract signature, validated by the signer contract itself.
    Erc1271 {
        address: Address,
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SapientKind {
    /// Verifier receives the full payload.
    Sapient,
    /// Verifier receives only the digest.
    SapientCompact,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SapientSignature {
    pub kind: SapientKind,
    pub address: Address,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

/// A signature bound to one topology leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LeafSignature {
    Signer {
        address: Address,
        signature: SignerSignature,
    },
    Sapient {
        image_hash: Hash32,
        signature: SapientSignature,
    },
}

impl LeafSignature {
    pub fn address(&self) -> Address {
        match self {
            LeafSignature::Signer { address, .. } => *address,
            LeafSignature::Sapient { signature, .. } => signature.address,
        }
    }

    pub fn image_hash(&self) -> Option<Hash32> {
        match self {
            LeafSignature::Signer { .. } => None,
            LeafSignature::Sapient { image_hash, .. } => Some(*image_hash),
        }
    }

    /// Plain signatures match by address; sapient ones by address and image hash.
    pub fn matches(&self, signer: &SignerRef) -> bool {
        match (self, signer.image_hash) {
            (LeafSignature::Signer { address, .. }, None) => *address == signer.address,
            (LeafSignature::Sapient { image_hash, signature }, Some(leaf_image)) => {
                signature.address == signer.address && *image_hash == leaf_image
            }
            _ => false,
        }
    }

    /// Check a recoverable signature against its claimed address.
    ///
    /// Contract and sapient signatures cannot be checked off-chain and pass.
    pub fn verify(&self, digest: &Hash32) -> Result<(), CoreError> {
        match self {
            LeafSignature::Signer {
                address,
                signature: signature @ (SignerSignature::Hash(_) | SignerSignature::EthSign(_)),
            } => {
                let recovered = recover_address(digest, signature)?;
                if recovered != *address {
                    return Err(CoreError::SignatureMismatch(format!(
                        "signature recovers to {}, expected {}",
                        recovered, address
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Address controlled by a public key.
pub fn address_of(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    Address::from_hash_tail(&keccak256(&uncompressed[1..]))
}

/// Address controlled by a secret key.
pub fn address_of_secret(secret_key: &SecretKey) -> Address {
    let secp = Secp256k1::signing_only();
    address_of(&PublicKey::from_secret_key(&secp, secret_key))
}

/// Digest actually signed by an `EthSign` signature.
pub fn personal_message_digest(digest: &Hash32) -> Hash32 {
    keccak256_concat(&[PERSONAL_MESSAGE_PREFIX, digest.as_bytes()])
}

fn sign_raw(secret_key: &SecretKey, message: &Hash32) -> RsY {
    let secp = Secp256k1::signing_only();
    let msg = Message::from_digest(message.0);
    let (recovery_id, compact) = secp
        .sign_ecdsa_recoverable(&msg, secret_key)
        .serialize_compact();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&compact[..32]);
    s.copy_from_slice(&compact[32..]);
    RsY {
        r: Hash32(r),
        s: Hash32(s),
        y_parity: recovery_id.to_i32() as u8,
    }
}

/// Hash-type signature of `digest`.
pub fn sign_digest(secret_key: &SecretKey, digest: &Hash32) -> SignerSignature {
    SignerSignature::Hash(sign_raw(secret_key, digest))
}

/// Personal-message signature of `digest`.
pub fn sign_personal(secret_key: &SecretKey, digest: &Hash32) -> SignerSignature {
    SignerSignature::EthSign(sign_raw(secret_key, &personal_message_digest(digest)))
}

fn recover_raw(message: &Hash32, rsy: &RsY) -> Result<Address, CoreError> {
    let recovery_id = RecoveryId::from_i32(rsy.y_parity as i32)
        .map_err(|e| CoreError::InvalidSignature(format!("recovery id: {}", e)))?;
    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(rsy.r.as_bytes());
    compact[32..].copy_from_slice(rsy.s.as_bytes());
    let signature = RecoverableSignature::from_compact(&compact, recovery_id)
        .map_err(|e| CoreError::InvalidSignature(format!("compact signature: {}", e)))?;
    let secp = Secp256k1::verification_only();
    let public_key = secp
        .recover_ecdsa(&Message::from_digest(message.0), &signature)
        .map_err(|e| CoreError::InvalidSignature(format!("recovery failed: {}", e)))?;
    Ok(address_of(&public_key))
}

/// Recover the signer address of a recoverable signature.
pub fn recover_address(digest: &Hash32, signature: &SignerSignature) -> Result<Address, CoreError> {
    match signature {
        SignerSignature::Hash(rsy) => recover_raw(digest, rsy),
        SignerSignature::EthSign(rsy) => recover_raw(&personal_message_digest(digest), rsy),
        SignerSignature::Erc1271 { .. } => Err(CoreError::InvalidSignature(
            "contract signatures are not recoverable".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(seed: u8) -> SecretKey {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x01;
        bytes[31] = seed;
        SecretKey::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_known_address() {
        // Secret key 1 controls the well-known address 0x7e5f...bdf
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let sk = SecretKey::from_slice(&bytes).unwrap();
        assert_eq!(
            address_of_secret(&sk).to_string(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_sign_and_recover() {
        let sk = test_key(7);
        let digest = keccak256(b"payload");

        let hash_sig = sign_digest(&sk, &digest);
        assert_eq!(recover_address(&digest, &hash_sig).unwrap(), address_of_secret(&sk));

        let personal = sign_personal(&sk, &digest);
        assert_eq!(recover_address(&digest, &personal).unwrap(), address_of_secret(&sk));

        // Same bytes read as the other kind recover somebody else
        if let SignerSignature::Hash(rsy) = hash_sig {
            let misread = SignerSignature::EthSign(rsy);
            assert_ne!(
                recover_address(&digest, &misread).ok(),
                Some(address_of_secret(&sk))
            );
        }
    }

    #[test]
    fn test_verify_detects_wrong_signer() {
        let digest = keccak256(b"payload");
        let signature = LeafSignature::Signer {
            address: address_of_secret(&test_key(2)),
            signature: sign_digest(&test_key(1), &digest),
        };
        assert!(matches!(
            signature.verify(&digest),
            Err(CoreError::SignatureMismatch(_))
        ));
    }

    #[test]
    fn test_matches_sapient_requires_image_hash() {
        let module = Address([0x99; 20]);
        let signature = LeafSignature::Sapient {
            image_hash: Hash32([1; 32]),
            signature: SapientSignature {
                kind: SapientKind::SapientCompact,
                address: module,
                data: vec![0xde, 0xad],
            },
        };
        let right = SignerRef {
            address: module,
            image_hash: Some(Hash32([1; 32])),
            weight: 1,
        };
        let wrong_image = SignerRef {
            image_hash: Some(Hash32([2; 32])),
            ..right
        };
        let plain = SignerRef {
            image_hash: None,
            ..right
        };
        assert!(signature.matches(&right));
        assert!(!signature.matches(&wrong_image));
        assert!(!signature.matches(&plain));
        assert!(signature.verify(&Hash32::ZERO).is_ok());
    }
}
