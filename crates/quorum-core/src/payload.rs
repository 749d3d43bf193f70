//! Signing payloads and their digests
//!
//! Digests follow the typed-structured-data layout:
//!
//! ```text
//! digest = H(0x19 0x01 ++ domain_separator(wallet, chain_id) ++ struct_hash(payload))
//! ```
//!
//! The digest binds a payload to one wallet on one chain, so the same calls
//! signed for another wallet or chain never verify.

use serde::{Deserialize, Serialize};

use crate::primitives::{
    address_word, hex_bytes, keccak256, keccak256_concat, u256_word, u256_word_u128, Address,
    Hash32,
};

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const DOMAIN_NAME: &str = "Quorum Wallet";
const DOMAIN_VERSION: &str = "1";

const CALL_TYPE: &str = "Call(address to,uint256 value,bytes data,uint256 gasLimit,bool delegateCall,bool onlyFallback,uint256 behaviorOnError)";
const CALLS_TYPE: &str = "Calls(Call[] calls,uint256 space,uint256 nonce)";
const MESSAGE_TYPE: &str = "Message(bytes message)";
const CONFIG_UPDATE_TYPE: &str = "ConfigUpdate(bytes32 imageHash)";
const DIGEST_TYPE: &str = "Digest(bytes32 digest)";

/// What the wallet does when a call reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BehaviorOnError {
    #[default]
    Ignore,
    Revert,
    Abort,
}

impl BehaviorOnError {
    fn as_u64(self) -> u64 {
        match self {
            BehaviorOnError::Ignore => 0,
            BehaviorOnError::Revert => 1,
            BehaviorOnError::Abort => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub to: Address,
    pub value: u128,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub gas_limit: u64,
    #[serde(default)]
    pub delegate_call: bool,
    #[serde(default)]
    pub only_fallback: bool,
    #[serde(default)]
    pub behavior_on_error: BehaviorOnError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Payload {
    Calls {
        space: u64,
        nonce: u64,
        calls: Vec<Call>,
    },
    Message {
        #[serde(with = "hex_bytes")]
        message: Vec<u8>,
    },
    ConfigUpdate {
        image_hash: Hash32,
    },
    Digest {
        digest: Hash32,
    },
}

/// Anything that can be bound to a wallet and chain as a signing digest.
pub trait PayloadDigest {
    fn digest(&self, wallet: &Address, chain_id: u64) -> Hash32;
}

fn type_hash(ty: &str) -> Hash32 {
    keccak256(ty.as_bytes())
}

fn bool_word(value: bool) -> [u8; 32] {
    u256_word(value as u64)
}

/// Domain separator for one wallet on one chain.
pub fn domain_separator(wallet: &Address, chain_id: u64) -> Hash32 {
    keccak256_concat(&[
        type_hash(DOMAIN_TYPE).as_bytes(),
        keccak256(DOMAIN_NAME.as_bytes()).as_bytes(),
        keccak256(DOMAIN_VERSION.as_bytes()).as_bytes(),
        &u256_word(chain_id),
        &address_word(wallet),
    ])
}

impl Call {
    pub fn struct_hash(&self) -> Hash32 {
        keccak256_concat(&[
            type_hash(CALL_TYPE).as_bytes(),
            &address_word(&self.to),
            &u256_word_u128(self.value),
            keccak256(&self.data).as_bytes(),
            &u256_word(self.gas_limit),
            &bool_word(self.delegate_call),
            &bool_word(self.only_fallback),
            &u256_word(self.behavior_on_error.as_u64()),
        ])
    }
}

impl Payload {
    pub fn message(message: impl Into<Vec<u8>>) -> Self {
        Payload::Message {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Calls { .. } => "calls",
            Payload::Message { .. } => "message",
            Payload::ConfigUpdate { .. } => "config-update",
            Payload::Digest { .. } => "digest",
        }
    }

    pub fn struct_hash(&self) -> Hash32 {
        match self {
            Payload::Calls { space, nonce, calls } => {
                let call_hashes: Vec<u8> = calls
                    .iter()
                    .flat_map(|call| call.struct_hash().0)
                    .collect();
                let calls_type = format!("{}{}", CALLS_TYPE, CALL_TYPE);
                keccak256_concat(&[
                    type_hash(&calls_type).as_bytes(),
                    keccak256(&call_hashes).as_bytes(),
                    &u256_word(*space),
                    &u256_word(*nonce),
                ])
            }
            Payload::Message { message } => keccak256_concat(&[
                type_hash(MESSAGE_TYPE).as_bytes(),
                keccak256(message).as_bytes(),
            ]),
            Payload::ConfigUpdate { image_hash } => keccak256_concat(&[
                type_hash(CONFIG_UPDATE_TYPE).as_bytes(),
                image_hash.as_bytes(),
            ]),
            Payload::Digest { digest } => {
                keccak256_concat(&[type_hash(DIGEST_TYPE).as_bytes(), digest.as_bytes()])
            }
        }
    }
}

impl PayloadDigest for Payload {
    fn digest(&self, wallet: &Address, chain_id: u64) -> Hash32 {
        keccak256_concat(&[
            &[0x19, 0x01],
            domain_separator(wallet, chain_id).as_bytes(),
            self.struct_hash().as_bytes(),
        ])
    }
}
