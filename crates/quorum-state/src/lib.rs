//! Quorum State
//!
//! Durable storage consumed by the signing core: configurations by image
//! hash, counterfactual wallets, payloads and signatures by digest, and
//! auxiliary hash trees.
//!
//! Two backends are provided: [`MemoryStore`] for tests and short-lived
//! processes, and [`SqliteStore`] for anything that must survive a restart.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use quorum_core::{
    Address, Configuration, Context, GenericTree, Hash32, LeafSignature, Payload,
    SapientSignature, SignerSignature,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from state operations
#[derive(Error, Debug)]
pub enum StateError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

/// How a wallet address was derived before deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterfactualWallet {
    pub image_hash: Hash32,
    pub context: Context,
}

/// A payload together with the wallet and chain it was requested for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPayload {
    pub wallet: Address,
    pub chain_id: u64,
    pub payload: Payload,
}

/// Storage contract of the signing core.
///
/// Methods are synchronous; async callers must not hold locks across them.
pub trait StateStore: Send + Sync {
    fn load_config(&self, image_hash: &Hash32) -> Result<Option<Configuration>, StateError>;
    fn save_config(&self, image_hash: &Hash32, config: &Configuration) -> Result<(), StateError>;

    fn load_counterfactual_wallet(
        &self,
        wallet: &Address,
    ) -> Result<Option<CounterfactualWallet>, StateError>;
    fn save_counterfactual_wallet(
        &self,
        wallet: &Address,
        image_hash: &Hash32,
        context: &Context,
    ) -> Result<(), StateError>;

    fn load_payload_of_digest(&self, digest: &Hash32) -> Result<Option<StoredPayload>, StateError>;
    fn save_payload_of_digest(&self, digest: &Hash32, payload: &StoredPayload)
        -> Result<(), StateError>;

    fn load_signature_of_digest(
        &self,
        signer: &Address,
        digest: &Hash32,
    ) -> Result<Option<SignerSignature>, StateError>;
    fn save_signature_of_digest(
        &self,
        signer: &Address,
        digest: &Hash32,
        signature: &SignerSignature,
    ) -> Result<(), StateError>;

    fn load_sapient_signature_of_digest(
        &self,
        signer: &Address,
        image_hash: &Hash32,
        digest: &Hash32,
    ) -> Result<Option<SapientSignature>, StateError>;
    fn save_sapient_signature_of_digest(
        &self,
        signer: &Address,
        image_hash: &Hash32,
        digest: &Hash32,
        signature: &SapientSignature,
    ) -> Result<(), StateError>;

    /// Every stored signature for a digest, oldest first.
    fn load_signatures_of_digest(&self, digest: &Hash32) -> Result<Vec<LeafSignature>, StateError>;

    fn load_tree(&self, root_hash: &Hash32) -> Result<Option<GenericTree>, StateError>;
    fn save_tree(&self, root_hash: &Hash32, tree: &GenericTree) -> Result<(), StateError>;

    /// Store a leaf signature under the plain or sapient key it belongs to.
    fn save_leaf_signature(
        &self,
        digest: &Hash32,
        signature: &LeafSignature,
    ) -> Result<(), StateError> {
        match signature {
            LeafSignature::Signer { address, signature } => {
                self.save_signature_of_digest(address, digest, signature)
            }
            LeafSignature::Sapient {
                image_hash,
                signature,
            } => self.save_sapient_signature_of_digest(
                &signature.address,
                image_hash,
                digest,
                signature,
            ),
        }
    }
}
