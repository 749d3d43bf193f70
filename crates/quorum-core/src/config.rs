//! Wallet configuration and its image hash
//!
//! A configuration is `threshold + checkpoint + topology`. Its image hash is
//! the wallet's portable identity:
//!
//! ```text
//! image_hash = H( H(root_hash(topology) ++ u256(threshold)) ++ u256(checkpoint) )
//! ```
//!
//! The field order is pinned per [`ProtocolVersion`] and never varies at call
//! time; changing it would change every derived wallet address.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::primitives::{keccak256_concat, u256_word, Address, Hash32, Weight};
use crate::topology::{SignerLeaf, SignerRef, Topology};
use crate::CoreError;

/// Version of the image hash and signature encoding rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProtocolVersion {
    #[default]
    V1,
}

impl ProtocolVersion {
    pub fn as_byte(self) -> u8 {
        match self {
            ProtocolVersion::V1 => 1,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, CoreError> {
        match byte {
            1 => Ok(ProtocolVersion::V1),
            other => Err(CoreError::UnsupportedVersion(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub threshold: Weight,
    pub checkpoint: u64,
    pub topology: Topology,
}

/// A reconfiguration request for [`Configuration::edit`].
#[derive(Debug, Clone, Default)]
pub struct ConfigEdit {
    /// New plain signers; an address already present merges its weight.
    pub add: Vec<SignerLeaf>,
    /// Addresses whose signer and sapient leaves are removed.
    pub remove: Vec<Address>,
    pub threshold: Option<Weight>,
    /// Must be strictly greater than the current checkpoint.
    pub checkpoint: Option<u64>,
}

impl Configuration {
    /// Build and validate a V1 configuration.
    pub fn new(threshold: Weight, checkpoint: u64, topology: Topology) -> Result<Self, CoreError> {
        let config = Self {
            version: ProtocolVersion::V1,
            threshold,
            checkpoint,
            topology,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.threshold == 0 {
            return Err(CoreError::InvalidThreshold("threshold must be positive".into()));
        }
        self.topology.validate()
    }

    /// The configuration's identity.
    pub fn image_hash(&self) -> Hash32 {
        match self.version {
            ProtocolVersion::V1 => {
                let root = self.topology.hash();
                let with_threshold = keccak256_concat(&[root.as_bytes(), &u256_word(self.threshold)]);
                keccak256_concat(&[with_threshold.as_bytes(), &u256_word(self.checkpoint)])
            }
        }
    }

    pub fn signers(&self) -> Vec<SignerRef> {
        self.topology.signers()
    }

    /// Apply an edit, returning the new configuration.
    ///
    /// Removal happens before additions, so removing and re-adding an address
    /// in one edit replaces its weight.
    pub fn edit(&self, edit: &ConfigEdit) -> Result<Configuration, CoreError> {
        let checkpoint = match edit.checkpoint {
            Some(next) if next <= self.checkpoint => {
                return Err(CoreError::CheckpointRegression {
                    current: self.checkpoint,
                    requested: next,
                })
            }
            Some(next) => next,
            None => self.checkpoint,
        };

        let remove: HashSet<Address> = edit.remove.iter().copied().collect();
        let mut topology = if remove.is_empty() {
            Some(self.topology.clone())
        } else {
            self.topology.clone().without_addresses(&remove)
        };

        // Merge duplicate additions first, keeping first-seen order
        let mut merged: BTreeMap<Address, (usize, Weight)> = BTreeMap::new();
        for (index, leaf) in edit.add.iter().enumerate() {
            let entry = merged.entry(leaf.address).or_insert((index, 0));
            entry.1 = entry.1.saturating_add(leaf.weight);
        }
        let mut additions: Vec<(usize, Address, Weight)> = merged
            .into_iter()
            .map(|(address, (index, weight))| (index, address, weight))
            .collect();
        additions.sort_by_key(|(index, _, _)| *index);

        let mut appended = Vec::new();
        for (_, address, weight) in additions {
            match topology.as_mut().and_then(|t| t.signer_leaf_mut(&address)) {
                Some(existing) => existing.weight = existing.weight.saturating_add(weight),
                None => appended.push(Topology::signer(address, weight)),
            }
        }

        let topology = match (topology, appended.is_empty()) {
            (Some(t), true) => t,
            (Some(Topology::Branch(mut children)), false) => {
                children.extend(appended);
                Topology::Branch(children)
            }
            (Some(t), false) => {
                let mut leaves = vec![t];
                leaves.extend(appended);
                Topology::Branch(leaves)
            }
            (None, _) => Topology::from_leaves(appended)?,
        };

        let next = Configuration {
            version: self.version,
            threshold: edit.threshold.unwrap_or(self.threshold),
            checkpoint,
            topology,
        };
        next.validate()?;
        Ok(next)
    }
}
