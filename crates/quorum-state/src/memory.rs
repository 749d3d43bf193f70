//! In-memory state store

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use quorum_core::{
    Address, Configuration, Context, GenericTree, Hash32, LeafSignature, SapientSignature,
    SignerSignature,
};

use crate::{CounterfactualWallet, StateError, StateStore, StoredPayload};

#[derive(Default)]
struct Tables {
    configs: HashMap<Hash32, Configuration>,
    wallets: HashMap<Address, CounterfactualWallet>,
    payloads: HashMap<Hash32, StoredPayload>,
    signatures: HashMap<Hash32, Vec<LeafSignature>>,
    trees: HashMap<Hash32, GenericTree>,
}

/// Process-local store; contents are lost on drop.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StateError> {
        self.tables
            .read()
            .map_err(|e| StateError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StateError> {
        self.tables
            .write()
            .map_err(|e| StateError::Poisoned(e.to_string()))
    }

    fn upsert_signature(&self, digest: &Hash32, signature: LeafSignature) -> Result<(), StateError> {
        let mut tables = self.write()?;
        let entries = tables.signatures.entry(*digest).or_default();
        let key = (signature.address(), signature.image_hash());
        match entries
            .iter_mut()
            .find(|s| (s.address(), s.image_hash()) == key)
        {
            Some(existing) => *existing = signature,
            None => entries.push(signature),
        }
        Ok(())
    }
}

impl StateStore for MemoryStore {
    fn load_config(&self, image_hash: &Hash32) -> Result<Option<Configuration>, StateError> {
        Ok(self.read()?.configs.get(image_hash).cloned())
    }

    fn save_config(&self, image_hash: &Hash32, config: &Configuration) -> Result<(), StateError> {
        self.write()?.configs.insert(*image_hash, config.clone());
        Ok(())
    }

    fn load_counterfactual_wallet(
        &self,
        wallet: &Address,
    ) -> Result<Option<CounterfactualWallet>, StateError> {
        Ok(self.read()?.wallets.get(wallet).cloned())
    }

    fn save_counterfactual_wallet(
        &self,
        wallet: &Address,
        image_hash: &Hash32,
        context: &Context,
    ) -> Result<(), StateError> {
        self.write()?.wallets.insert(
            *wallet,
            CounterfactualWallet {
                image_hash: *image_hash,
                context: context.clone(),
            },
        );
        Ok(())
    }

    fn load_payload_of_digest(&self, digest: &Hash32) -> Result<Option<StoredPayload>, StateError> {
        Ok(self.read()?.payloads.get(digest).cloned())
    }

    fn save_payload_of_digest(
        &self,
        digest: &Hash32,
        payload: &StoredPayload,
    ) -> Result<(), StateError> {
        self.write()?.payloads.insert(*digest, payload.clone());
        Ok(())
    }

    fn load_signature_of_digest(
        &self,
        signer: &Address,
        digest: &Hash32,
    ) -> Result<Option<SignerSignature>, StateError> {
        let tables = self.read()?;
        let found = tables.signatures.get(digest).and_then(|entries| {
            entries.iter().find_map(|s| match s {
                LeafSignature::Signer { address, signature } if address == signer => {
                    Some(signature.clone())
                }
                _ => None,
            })
        });
        Ok(found)
    }

    fn save_signature_of_digest(
        &self,
        signer: &Address,
        digest: &Hash32,
        signature: &SignerSignature,
    ) -> Result<(), StateError> {
        self.upsert_signature(
            digest,
            LeafSignature::Signer {
                address: *signer,
                signature: signature.clone(),
            },
        )
    }

    fn load_sapient_signature_of_digest(
        &self,
        signer: &Address,
        image_hash: &Hash32,
        digest: &Hash32,
    ) -> Result<Option<SapientSignature>, StateError> {
        let tables = self.read()?;
        let found = tables.signatures.get(digest).and_then(|entries| {
            entries.iter().find_map(|s| match s {
                LeafSignature::Sapient {
                    image_hash: stored,
                    signature,
                } if stored == image_hash && signature.address == *signer => {
                    Some(signature.clone())
                }
                _ => None,
            })
        });
        Ok(found)
    }

    fn save_sapient_signature_of_digest(
        &self,
        signer: &Address,
        image_hash: &Hash32,
        digest: &Hash32,
        signature: &SapientSignature,
    ) -> Result<(), StateError> {
        let mut signature = signature.clone();
        signature.address = *signer;
        self.upsert_signature(
            digest,
            LeafSignature::Sapient {
                image_hash: *image_hash,
                signature,
            },
        )
    }

    fn load_signatures_of_digest(&self, digest: &Hash32) -> Result<Vec<LeafSignature>, StateError> {
        Ok(self
            .read()?
            .signatures
            .get(digest)
            .cloned()
            .unwrap_or_default())
    }

    fn load_tree(&self, root_hash: &Hash32) -> Result<Option<GenericTree>, StateError> {
        Ok(self.read()?.trees.get(root_hash).cloned())
    }

    fn save_tree(&self, root_hash: &Hash32, tree: &GenericTree) -> Result<(), StateError> {
        self.write()?.trees.insert(*root_hash, tree.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::{RsY, SapientKind, Topology};

    fn rsy(byte: u8) -> SignerSignature {
        SignerSignature::Hash(RsY {
            r: Hash32([byte; 32]),
            s: Hash32([byte; 32]),
            y_parity: 0,
        })
    }

    #[test]
    fn test_config_roundtrip() {
        let store = MemoryStore::new();
        let config = Configuration::new(1, 0, Topology::signer(Address([1; 20]), 1)).unwrap();
        let image_hash = config.image_hash();

        assert!(store.load_config(&image_hash).unwrap().is_none());
        store.save_config(&image_hash, &config).unwrap();
        assert_eq!(store.load_config(&image_hash).unwrap(), Some(config));
    }

    #[test]
    fn test_signatures_upsert_per_leaf() {
        let store = MemoryStore::new();
        let digest = Hash32([9; 32]);
        let signer = Address([1; 20]);

        store.save_signature_of_digest(&signer, &digest, &rsy(1)).unwrap();
        store.save_signature_of_digest(&signer, &digest, &rsy(2)).unwrap();
        assert_eq!(
            store.load_signature_of_digest(&signer, &digest).unwrap(),
            Some(rsy(2))
        );
        assert_eq!(store.load_signatures_of_digest(&digest).unwrap().len(), 1);

        // Other digests are untouched
        assert!(store
            .load_signature_of_digest(&signer, &Hash32::ZERO)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_sapient_keyed_by_image_hash() {
        let store = MemoryStore::new();
        let digest = Hash32([9; 32]);
        let module = Address([5; 20]);
        let signature = SapientSignature {
            kind: SapientKind::SapientCompact,
            address: module,
            data: vec![1, 2],
        };

        store
            .save_leaf_signature(
                &digest,
                &LeafSignature::Sapient {
                    image_hash: Hash32([1; 32]),
                    signature: signature.clone(),
                },
            )
            .unwrap();

        assert_eq!(
            store
                .load_sapient_signature_of_digest(&module, &Hash32([1; 32]), &digest)
                .unwrap(),
            Some(signature)
        );
        assert!(store
            .load_sapient_signature_of_digest(&module, &Hash32([2; 32]), &digest)
            .unwrap()
            .is_none());
        assert!(store.load_signature_of_digest(&module, &digest).unwrap().is_none());
    }
}
