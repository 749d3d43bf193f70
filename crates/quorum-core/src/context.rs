//! Counterfactual wallet addresses
//!
//! A wallet's address is known before deployment: it is the CREATE2 address
//! of the factory deploying the wallet proxy with the configuration's image
//! hash as salt.
//!
//! ```text
//! address = last20( H(0xff ++ factory ++ image_hash ++ H(creation_code ++ u256(stage1))) )
//! ```

use serde::{Deserialize, Serialize};

use crate::primitives::{address_word, hex_bytes, keccak256_concat, Address, Hash32};

/// Deployment parameters of one protocol generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub version: u8,
    pub factory: Address,
    /// Implementation the proxy points to on first deployment.
    pub stage1: Address,
    /// Implementation after the first configuration update.
    pub stage2: Address,
    #[serde(with = "hex_bytes")]
    pub creation_code: Vec<u8>,
}

const V1_FACTORY: [u8; 20] = [
    0x4e, 0x4b, 0x1e, 0x0c, 0x63, 0x17, 0x5f, 0x6e, 0x9a, 0x2d, 0x0b, 0x58, 0x7c, 0x36, 0x21, 0x90,
    0x1f, 0x4d, 0x8a, 0x03,
];
const V1_STAGE1: [u8; 20] = [
    0x21, 0x7c, 0x5a, 0x90, 0x3e, 0x41, 0x6b, 0x88, 0x0d, 0x92, 0xc4, 0x17, 0x55, 0xe0, 0x3a, 0x6f,
    0x18, 0xb2, 0x09, 0x7d,
];
const V1_STAGE2: [u8; 20] = [
    0x8f, 0x03, 0x3d, 0x6a, 0x52, 0xb1, 0x7e, 0x04, 0xc9, 0x60, 0x2b, 0x1d, 0x94, 0x7a, 0x35, 0x0e,
    0xd6, 0x48, 0x11, 0xc5,
];
/// Minimal proxy init code: copies runtime code that delegates to the
/// implementation stored at the slot keyed by the proxy address.
const V1_CREATION_CODE: &[u8] = &[
    0x60, 0x3e, 0x60, 0x0e, 0x3d, 0x39, 0x60, 0x1e, 0x80, 0x51, 0x30, 0x55, 0xf3, 0x36, 0x3d, 0x3d,
    0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x30, 0x54, 0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d,
    0x91, 0x60, 0x1c, 0x57, 0xfd, 0x5b, 0xf3,
];

impl Context {
    /// The versioned registry of known contexts, oldest first.
    pub fn known() -> Vec<Context> {
        vec![Context {
            version: 1,
            factory: Address::new(V1_FACTORY),
            stage1: Address::new(V1_STAGE1),
            stage2: Address::new(V1_STAGE2),
            creation_code: V1_CREATION_CODE.to_vec(),
        }]
    }

    /// Context for a given protocol generation.
    pub fn by_version(version: u8) -> Option<Context> {
        Self::known().into_iter().find(|c| c.version == version)
    }

    /// Hash of the full init code (creation code followed by the stage1 argument).
    pub fn init_code_hash(&self) -> Hash32 {
        keccak256_concat(&[&self.creation_code, &address_word(&self.stage1)])
    }

    /// Address of the wallet that `image_hash` deploys to under this context.
    pub fn counterfactual_address(&self, image_hash: &Hash32) -> Address {
        counterfactual_address(image_hash, self)
    }
}

/// CREATE2-style derivation of a wallet address from its initial image hash.
pub fn counterfactual_address(image_hash: &Hash32, context: &Context) -> Address {
    let hash = keccak256_concat(&[
        &[0xff],
        context.factory.as_bytes(),
        image_hash.as_bytes(),
        context.init_code_hash().as_bytes(),
    ]);
    Address::from_hash_tail(&hash)
}
