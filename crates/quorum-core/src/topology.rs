//! Configuration topology
//!
//! A recursive tree of signer leaves, sapient (externally verified) signer
//! leaves, pre-authorized subdigests and nested sub-configurations. Hashing
//! follows the generic tree fold; each leaf kind has its own domain tag so
//! two different leaf kinds never share a preimage.
//!
//! # Weight
//!
//! ```text
//! signer / sapient   weight if signed, else 0
//! subdigest          Weight::MAX if it equals the request digest, else 0
//! nested             its weight if its subtree reaches its own threshold, else 0
//! node               0 (pruned, nothing to evaluate)
//! branch             saturating sum of children
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::primitives::{keccak256_concat, u256_word, Address, Hash32, Weight};
use crate::tree::{root_hash, HashTree, Shape};
use crate::CoreError;

const SIGNER_TAG: &[u8] = b"quorum:signer:";
const SAPIENT_SIGNER_TAG: &[u8] = b"quorum:sapient-signer:";
const SUBDIGEST_TAG: &[u8] = b"quorum:subdigest:";
const NESTED_TAG: &[u8] = b"quorum:nested:";

/// Deepest allowed nesting of branch and nested records below the root.
pub const MAX_DEPTH: usize = 128;

/// A plain key signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerLeaf {
    pub address: Address,
    pub weight: Weight,
}

/// A signer whose authority is checked by an external verifier bound to
/// `image_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SapientSignerLeaf {
    pub address: Address,
    pub weight: Weight,
    pub image_hash: Hash32,
}

/// Pre-authorizes one exact digest, regardless of signer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubdigestLeaf {
    pub digest: Hash32,
}

/// A sub-configuration that counts as `weight` only when it reaches its own
/// `threshold`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedLeaf {
    pub weight: Weight,
    pub threshold: Weight,
    pub tree: Box<Topology>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum Topology {
    Signer(SignerLeaf),
    SapientSigner(SapientSignerLeaf),
    Subdigest(SubdigestLeaf),
    Nested(NestedLeaf),
    /// Already-hashed subtree.
    Node(Hash32),
    Branch(Vec<Topology>),
}

/// A signer-capable leaf, as seen by signature matching and handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignerRef {
    pub address: Address,
    /// Set for sapient signers only.
    pub image_hash: Option<Hash32>,
    pub weight: Weight,
}

impl SignerRef {
    pub fn is_sapient(&self) -> bool {
        self.image_hash.is_some()
    }

    /// Identity of the leaf, independent of weight.
    pub fn key(&self) -> (Address, Option<Hash32>) {
        (self.address, self.image_hash)
    }
}

impl SignerLeaf {
    pub fn hash(&self) -> Hash32 {
        keccak256_concat(&[SIGNER_TAG, self.address.as_bytes(), &u256_word(self.weight)])
    }
}

impl SapientSignerLeaf {
    pub fn hash(&self) -> Hash32 {
        keccak256_concat(&[
            SAPIENT_SIGNER_TAG,
            self.address.as_bytes(),
            &u256_word(self.weight),
            self.image_hash.as_bytes(),
        ])
    }
}

impl SubdigestLeaf {
    pub fn hash(&self) -> Hash32 {
        keccak256_concat(&[SUBDIGEST_TAG, self.digest.as_bytes()])
    }
}

impl NestedLeaf {
    fn seal_hash(&self, tree_hash: Hash32) -> Hash32 {
        keccak256_concat(&[
            NESTED_TAG,
            tree_hash.as_bytes(),
            &u256_word(self.threshold),
            &u256_word(self.weight),
        ])
    }
}

impl HashTree for Topology {
    fn shape(&self) -> Shape<'_, Self> {
        match self {
            Topology::Signer(leaf) => Shape::Hashed(leaf.hash()),
            Topology::SapientSigner(leaf) => Shape::Hashed(leaf.hash()),
            Topology::Subdigest(leaf) => Shape::Hashed(leaf.hash()),
            Topology::Node(hash) => Shape::Hashed(*hash),
            Topology::Nested(nested) => Shape::Wrapped(&nested.tree),
            Topology::Branch(children) => Shape::Branch(children),
        }
    }

    fn seal(&self, inner: Hash32) -> Hash32 {
        match self {
            Topology::Nested(nested) => nested.seal_hash(inner),
            _ => inner,
        }
    }
}

enum PruneFrame {
    Visit(Topology),
    Nested { weight: Weight, threshold: Weight },
    Branch(usize),
}

enum WeightFrame<'a> {
    Visit(&'a Topology),
    Sum(usize),
    Gate { weight: Weight, threshold: Weight },
}

impl Topology {
    pub fn signer(address: Address, weight: Weight) -> Self {
        Topology::Signer(SignerLeaf { address, weight })
    }

    pub fn sapient_signer(address: Address, weight: Weight, image_hash: Hash32) -> Self {
        Topology::SapientSigner(SapientSignerLeaf {
            address,
            weight,
            image_hash,
        })
    }

    pub fn subdigest(digest: Hash32) -> Self {
        Topology::Subdigest(SubdigestLeaf { digest })
    }

    pub fn nested(weight: Weight, threshold: Weight, tree: Topology) -> Self {
        Topology::Nested(NestedLeaf {
            weight,
            threshold,
            tree: Box::new(tree),
        })
    }

    /// Join leaves into one topology; a single leaf stays unwrapped.
    pub fn from_leaves(mut leaves: Vec<Topology>) -> Result<Self, CoreError> {
        match leaves.len() {
            0 => Err(CoreError::InvalidTopology("empty topology".into())),
            1 => Ok(leaves.remove(0)),
            _ => Ok(Topology::Branch(leaves)),
        }
    }

    /// Root hash of the topology.
    pub fn hash(&self) -> Hash32 {
        root_hash(self)
    }

    /// Check structural invariants and reject ambiguous signer sets.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut plain: HashSet<Address> = HashSet::new();
        let mut sapient: HashSet<(Address, Hash32)> = HashSet::new();
        let mut stack = vec![(self, 0usize)];

        while let Some((node, depth)) = stack.pop() {
            if depth > MAX_DEPTH {
                return Err(CoreError::InvalidTopology(format!(
                    "topology nested deeper than {}",
                    MAX_DEPTH
                )));
            }
            match node {
                Topology::Signer(leaf) => {
                    if leaf.weight == 0 {
                        return Err(CoreError::InvalidTopology(format!(
                            "signer {} has zero weight",
                            leaf.address
                        )));
                    }
                    if !plain.insert(leaf.address) {
                        return Err(CoreError::InvalidTopology(format!(
                            "duplicate signer {}",
                            leaf.address
                        )));
                    }
                }
                Topology::SapientSigner(leaf) => {
                    if leaf.weight == 0 {
                        return Err(CoreError::InvalidTopology(format!(
                            "sapient signer {} has zero weight",
                            leaf.address
                        )));
                    }
                    if !sapient.insert((leaf.address, leaf.image_hash)) {
                        return Err(CoreError::InvalidTopology(format!(
                            "duplicate sapient signer {} for {}",
                            leaf.address, leaf.image_hash
                        )));
                    }
                }
                Topology::Nested(nested) => {
                    if nested.threshold == 0 || nested.weight == 0 {
                        return Err(CoreError::InvalidTopology(
                            "nested leaf needs non-zero weight and threshold".into(),
                        ));
                    }
                    stack.push((&nested.tree, depth + 1));
                }
                Topology::Branch(children) => {
                    if children.len() < 2 {
                        return Err(CoreError::InvalidTopology(format!(
                            "branch with {} children",
                            children.len()
                        )));
                    }
                    stack.extend(children.iter().map(|child| (child, depth + 1)));
                }
                Topology::Subdigest(_) | Topology::Node(_) => {}
            }
        }
        Ok(())
    }

    /// Signer-capable leaves in left-to-right order.
    pub fn signers(&self) -> Vec<SignerRef> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Topology::Signer(leaf) => out.push(SignerRef {
                    address: leaf.address,
                    image_hash: None,
                    weight: leaf.weight,
                }),
                Topology::SapientSigner(leaf) => out.push(SignerRef {
                    address: leaf.address,
                    image_hash: Some(leaf.image_hash),
                    weight: leaf.weight,
                }),
                Topology::Nested(nested) => stack.push(&nested.tree),
                Topology::Branch(children) => stack.extend(children.iter().rev()),
                Topology::Subdigest(_) | Topology::Node(_) => {}
            }
        }
        out
    }

    /// Find the signer-capable leaf for a signer identity.
    pub fn find_signer(&self, address: &Address, image_hash: Option<&Hash32>) -> Option<SignerRef> {
        self.signers()
            .into_iter()
            .find(|s| s.address == *address && s.image_hash.as_ref() == image_hash)
    }

    /// Aggregate weight given a predicate telling which leaves are signed.
    pub fn weight_with<F>(&self, digest: &Hash32, is_signed: F) -> Weight
    where
        F: Fn(&SignerRef) -> bool,
    {
        let mut stack = vec![WeightFrame::Visit(self)];
        let mut values: Vec<Weight> = Vec::new();

        while let Some(frame) = stack.pop() {
            match frame {
                WeightFrame::Visit(node) => match node {
                    Topology::Signer(leaf) => {
                        let signer = SignerRef {
                            address: leaf.address,
                            image_hash: None,
                            weight: leaf.weight,
                        };
                        values.push(if is_signed(&signer) { leaf.weight } else { 0 });
                    }
                    Topology::SapientSigner(leaf) => {
                        let signer = SignerRef {
                            address: leaf.address,
                            image_hash: Some(leaf.image_hash),
                            weight: leaf.weight,
                        };
                        values.push(if is_signed(&signer) { leaf.weight } else { 0 });
                    }
                    Topology::Subdigest(leaf) => {
                        values.push(if leaf.digest == *digest { Weight::MAX } else { 0 });
                    }
                    Topology::Node(_) => values.push(0),
                    Topology::Nested(nested) => {
                        stack.push(WeightFrame::Gate {
                            weight: nested.weight,
                            threshold: nested.threshold,
                        });
                        stack.push(WeightFrame::Visit(&nested.tree));
                    }
                    Topology::Branch(children) => {
                        stack.push(WeightFrame::Sum(children.len()));
                        for child in children.iter().rev() {
                            stack.push(WeightFrame::Visit(child));
                        }
                    }
                },
                WeightFrame::Sum(count) => {
                    let start = values.len() - count;
                    let total = values
                        .drain(start..)
                        .fold(0 as Weight, |acc, w| acc.saturating_add(w));
                    values.push(total);
                }
                WeightFrame::Gate { weight, threshold } => {
                    let inner = values.pop().unwrap_or(0);
                    values.push(if inner >= threshold { weight } else { 0 });
                }
            }
        }

        values.pop().unwrap_or(0)
    }

    /// Mutable access to the plain signer leaf for `address`.
    pub(crate) fn signer_leaf_mut(&mut self, address: &Address) -> Option<&mut SignerLeaf> {
        let mut stack: Vec<&mut Topology> = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Topology::Signer(leaf) if leaf.address == *address => return Some(leaf),
                Topology::Nested(nested) => stack.push(&mut nested.tree),
                Topology::Branch(children) => stack.extend(children.iter_mut()),
                _ => {}
            }
        }
        None
    }

    /// Drop every signer and sapient leaf whose address is in `remove`.
    ///
    /// Nested leaves left empty disappear and single-child branches collapse
    /// into their child. Returns `None` when nothing is left.
    pub(crate) fn without_addresses(self, remove: &HashSet<Address>) -> Option<Topology> {
        let mut stack = vec![PruneFrame::Visit(self)];
        let mut kept: Vec<Option<Topology>> = Vec::new();

        while let Some(frame) = stack.pop() {
            match frame {
                PruneFrame::Visit(node) => match node {
                    Topology::Signer(ref leaf) if remove.contains(&leaf.address) => kept.push(None),
                    Topology::SapientSigner(ref leaf) if remove.contains(&leaf.address) => {
                        kept.push(None)
                    }
                    Topology::Nested(NestedLeaf {
                        weight,
                        threshold,
                        tree,
                    }) => {
                        stack.push(PruneFrame::Nested { weight, threshold });
                        stack.push(PruneFrame::Visit(*tree));
                    }
                    Topology::Branch(children) => {
                        stack.push(PruneFrame::Branch(children.len()));
                        stack.extend(children.into_iter().rev().map(PruneFrame::Visit));
                    }
                    other => kept.push(Some(other)),
                },
                PruneFrame::Nested { weight, threshold } => {
                    let tree = kept.pop().flatten();
                    kept.push(tree.map(|tree| Topology::nested(weight, threshold, tree)));
                }
                PruneFrame::Branch(count) => {
                    let start = kept.len().saturating_sub(count);
                    let children: Vec<Topology> = kept.drain(start..).flatten().collect();
                    kept.push(Topology::from_leaves(children).ok());
                }
            }
        }

        kept.pop().flatten()
    }
}
