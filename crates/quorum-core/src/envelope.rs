//! Signing requests and signature aggregation
//!
//! An [`Envelope`] binds a configuration to one payload on one wallet and
//! chain. A [`Signed`] envelope accumulates at most one signature per
//! topology leaf; its weight is recomputed from the signature set on every
//! query.

use serde::{Deserialize, Serialize};

use crate::config::Configuration;
use crate::encoding;
use crate::payload::{Payload, PayloadDigest};
use crate::primitives::{Address, Hash32, Weight};
use crate::signature::LeafSignature;
use crate::topology::SignerRef;
use crate::CoreError;

/// An unsigned request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<P = Payload> {
    pub wallet: Address,
    pub chain_id: u64,
    pub configuration: Configuration,
    pub payload: P,
}

/// Aggregate weight of a signature set against a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightReport {
    pub weight: Weight,
    pub threshold: Weight,
}

impl WeightReport {
    pub fn reached(&self) -> bool {
        self.weight >= self.threshold
    }
}

impl<P: PayloadDigest> Envelope<P> {
    pub fn new(wallet: Address, chain_id: u64, configuration: Configuration, payload: P) -> Self {
        Self {
            wallet,
            chain_id,
            configuration,
            payload,
        }
    }

    /// The digest every signer of this request signs.
    pub fn digest(&self) -> Hash32 {
        self.payload.digest(&self.wallet, self.chain_id)
    }

    pub fn into_signed(self) -> Signed<P> {
        Signed {
            envelope: self,
            signatures: Vec::new(),
        }
    }
}

/// An envelope with the signatures collected so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signed<P = Payload> {
    pub envelope: Envelope<P>,
    signatures: Vec<LeafSignature>,
}

/// Weight of `signatures` under `configuration` for `digest`.
pub fn weight_of(
    configuration: &Configuration,
    digest: &Hash32,
    signatures: &[LeafSignature],
) -> WeightReport {
    let weight = configuration
        .topology
        .weight_with(digest, |leaf| signatures.iter().any(|s| s.matches(leaf)));
    WeightReport {
        weight,
        threshold: configuration.threshold,
    }
}

impl<P: PayloadDigest> Signed<P> {
    /// Rebuild a signed envelope from stored signatures, checking each one.
    pub fn from_parts(
        envelope: Envelope<P>,
        signatures: impl IntoIterator<Item = LeafSignature>,
    ) -> Result<Self, CoreError> {
        let mut signed = envelope.into_signed();
        for signature in signatures {
            signed.add_signature(signature, false)?;
        }
        Ok(signed)
    }

    pub fn digest(&self) -> Hash32 {
        self.envelope.digest()
    }

    pub fn configuration(&self) -> &Configuration {
        &self.envelope.configuration
    }

    /// Signatures in insertion order.
    pub fn signatures(&self) -> &[LeafSignature] {
        &self.signatures
    }

    /// The signature registered for a leaf, if any.
    pub fn signature_for_leaf(&self, leaf: &SignerRef) -> Option<&LeafSignature> {
        self.signatures.iter().find(|s| s.matches(leaf))
    }

    pub fn is_signed(&self, leaf: &SignerRef) -> bool {
        self.signature_for_leaf(leaf).is_some()
    }

    pub fn weight(&self) -> WeightReport {
        weight_of(&self.envelope.configuration, &self.digest(), &self.signatures)
    }

    pub fn reached_threshold(&self) -> bool {
        self.weight().reached()
    }

    /// Register a signature for the leaf it matches.
    ///
    /// Fails with `AlreadySigned` when the leaf already holds a signature and
    /// `replace` is not set; with `replace`, the previous one is dropped.
    pub fn add_signature(&mut self, signature: LeafSignature, replace: bool) -> Result<(), CoreError> {
        let leaf = self
            .envelope
            .configuration
            .signers()
            .into_iter()
            .find(|leaf| signature.matches(leaf))
            .ok_or_else(|| {
                CoreError::SignatureMismatch(format!(
                    "no leaf for signer {}{}",
                    signature.address(),
                    signature
                        .image_hash()
                        .map(|h| format!(" with image hash {}", h))
                        .unwrap_or_default()
                ))
            })?;
        signature.verify(&self.digest())?;

        match self.signatures.iter().position(|s| s.matches(&leaf)) {
            Some(_) if !replace => Err(CoreError::AlreadySigned(leaf.address.to_string())),
            Some(index) => {
                self.signatures[index] = signature;
                Ok(())
            }
            None => {
                self.signatures.push(signature);
                Ok(())
            }
        }
    }

    /// Wire form of the current signature set.
    pub fn encode_signature(&self) -> Result<Vec<u8>, CoreError> {
        encoding::encode_signature(
            &self.envelope.configuration,
            &self.digest(),
            &self.signatures,
        )
    }
}
