//! Quorum Core
//!
//! Configuration trees, image hashes and signature aggregation for
//! threshold smart-contract wallets.
//!
//! # Identity
//!
//! A wallet is controlled by a [`Configuration`]: a threshold, a checkpoint
//! and a recursive [`Topology`] of weighted signers. The configuration hashes
//! to an image hash, and the image hash of the first configuration fixes the
//! wallet's counterfactual address.
//!
//! # Signing
//!
//! An [`Envelope`] binds a configuration to a payload on one wallet and
//! chain; a [`Signed`] envelope collects one signature per leaf until the
//! aggregate weight reaches the threshold, then encodes the proof for a
//! verifier.

pub mod config;
pub mod context;
pub mod encoding;
pub mod envelope;
pub mod payload;
pub mod primitives;
pub mod signature;
pub mod topology;
pub mod tree;

pub use config::{ConfigEdit, Configuration, ProtocolVersion};
pub use context::{counterfactual_address, Context};
pub use encoding::{decode_signature, encode_signature, recover, DecodedSignature, Recovered};
pub use envelope::{Envelope, Signed, WeightReport};
pub use payload::{Call, Payload, PayloadDigest};
pub use primitives::{keccak256, Address, Hash32, Weight};
pub use signature::{LeafSignature, RsY, SapientKind, SapientSignature, SignerSignature};
pub use topology::{SignerLeaf, SignerRef, Topology, MAX_DEPTH};
pub use tree::GenericTree;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),

    #[error("Checkpoint must increase: current {current}, requested {requested}")]
    CheckpointRegression { current: u64, requested: u64 },

    #[error("Leaf already signed: {0}")]
    AlreadySigned(String),

    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),
}
