//! Generic hash tree
//!
//! Trees of raw values (`Leaf`), already-hashed opaque subtrees (`Node`) and
//! ordered branches. A branch hashes as a left fold over its children:
//!
//! ```text
//! acc = hash(children[0])
//! acc = H(acc ++ hash(children[i]))   for i = 1..n
//! ```
//!
//! Child order is significant. The configuration topology reuses the same
//! fold through the [`HashTree`] trait, and [`root_hash`] walks any such tree
//! with an explicit stack so adversarially deep inputs cannot exhaust the
//! call stack.

use serde::{Deserialize, Serialize};

use crate::primitives::{hex_bytes, keccak256, keccak256_concat, Hash32};
use crate::CoreError;

/// How a tree node contributes to its parent's hash.
pub enum Shape<'a, T> {
    /// Fully resolved hash (leaf values, pruned nodes).
    Hashed(Hash32),
    /// Ordered children, folded left to right.
    Branch(&'a [T]),
    /// A single child whose hash is post-processed by [`HashTree::seal`].
    Wrapped(&'a T),
}

/// A recursive structure hashed with the branch left fold.
pub trait HashTree: Sized {
    fn shape(&self) -> Shape<'_, Self>;

    /// Turn the hash of a wrapped child into this node's hash.
    fn seal(&self, inner: Hash32) -> Hash32 {
        inner
    }
}

enum Frame<'a, T> {
    Visit(&'a T),
    Fold(usize),
    Seal(&'a T),
}

/// Fold two hashes: `H(acc ++ next)`.
pub fn fold_pair(acc: &Hash32, next: &Hash32) -> Hash32 {
    keccak256_concat(&[acc.as_bytes(), next.as_bytes()])
}

/// Root hash of any [`HashTree`], computed iteratively.
pub fn root_hash<T: HashTree>(tree: &T) -> Hash32 {
    let mut stack = vec![Frame::Visit(tree)];
    let mut values: Vec<Hash32> = Vec::new();

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Visit(node) => match node.shape() {
                Shape::Hashed(hash) => values.push(hash),
                Shape::Branch(children) => {
                    stack.push(Frame::Fold(children.len()));
                    for child in children.iter().rev() {
                        stack.push(Frame::Visit(child));
                    }
                }
                Shape::Wrapped(child) => {
                    stack.push(Frame::Seal(node));
                    stack.push(Frame::Visit(child));
                }
            },
            Frame::Fold(count) => {
                let start = values.len() - count;
                let folded = values
                    .drain(start..)
                    .reduce(|acc, next| fold_pair(&acc, &next))
                    .unwrap_or(Hash32::ZERO);
                values.push(folded);
            }
            Frame::Seal(node) => {
                let inner = values.pop().unwrap_or(Hash32::ZERO);
                values.push(node.seal(inner));
            }
        }
    }

    values.pop().unwrap_or(Hash32::ZERO)
}

/// Auxiliary tree of raw values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "kebab-case")]
pub enum GenericTree {
    Leaf(#[serde(with = "hex_bytes")] Vec<u8>),
    Node(Hash32),
    Branch(Vec<GenericTree>),
}

impl HashTree for GenericTree {
    fn shape(&self) -> Shape<'_, Self> {
        match self {
            GenericTree::Leaf(value) => Shape::Hashed(keccak256(value)),
            GenericTree::Node(hash) => Shape::Hashed(*hash),
            GenericTree::Branch(children) => Shape::Branch(children),
        }
    }
}

impl GenericTree {
    pub fn leaf(value: impl Into<Vec<u8>>) -> Self {
        GenericTree::Leaf(value.into())
    }

    pub fn hash(&self) -> Hash32 {
        root_hash(self)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, GenericTree::Leaf(_))
    }

    pub fn is_node(&self) -> bool {
        matches!(self, GenericTree::Node(_))
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, GenericTree::Branch(_))
    }

    /// Check the structural invariant: every branch has at least two children.
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if let GenericTree::Branch(children) = node {
                if children.len() < 2 {
                    return Err(CoreError::InvalidTopology(format!(
                        "branch with {} children",
                        children.len()
                    )));
                }
                stack.extend(children.iter());
            }
        }
        Ok(())
    }

    /// Whether this is a well-formed tree.
    pub fn is_tree(&self) -> bool {
        self.validate().is_ok()
    }
}
