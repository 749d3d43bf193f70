//! Wire encoding of aggregated signatures
//!
//! ```text
//! version:u8 checkpoint:u64 threshold:u64 record
//! ```
//!
//! followed by one pre-order record per topology node. All integers are
//! big-endian. Branch and nested subtrees that carry no signature (and no
//! subdigest for the request) are written as a node record holding their
//! hash, so the verifier still recomputes the same image hash.
//!
//! | tag  | record                                            |
//! |------|---------------------------------------------------|
//! | 0x00 | unsigned signer: address weight                   |
//! | 0x01 | hash signature: weight r s y                      |
//! | 0x02 | eth-sign signature: weight r s y                  |
//! | 0x03 | erc1271: weight address len:u32 data              |
//! | 0x04 | sapient: weight image_hash address len:u32 data   |
//! | 0x05 | sapient-compact: same as sapient                  |
//! | 0x06 | unsigned sapient: address weight image_hash       |
//! | 0x07 | subdigest: digest                                 |
//! | 0x08 | node: hash                                        |
//! | 0x09 | branch: count:u16 then `count` records            |
//! | 0x0a | nested: weight threshold then one record          |
//!
//! Signer addresses of hash and eth-sign records are not written; the
//! decoder recovers them from the digest. Branch and nested records may not
//! nest deeper than [`MAX_DEPTH`] below the root.

use std::collections::{HashMap, HashSet};

use crate::config::{Configuration, ProtocolVersion};
use crate::envelope::{weight_of, WeightReport};
use crate::primitives::{Address, Hash32, Weight};
use crate::signature::{
    recover_address, LeafSignature, RsY, SapientKind, SapientSignature, SignerSignature,
};
use crate::topology::{Topology, MAX_DEPTH};
use crate::CoreError;

const TAG_SIGNER: u8 = 0x00;
const TAG_HASH: u8 = 0x01;
const TAG_ETH_SIGN: u8 = 0x02;
const TAG_ERC1271: u8 = 0x03;
const TAG_SAPIENT: u8 = 0x04;
const TAG_SAPIENT_COMPACT: u8 = 0x05;
const TAG_SAPIENT_UNSIGNED: u8 = 0x06;
const TAG_SUBDIGEST: u8 = 0x07;
const TAG_NODE: u8 = 0x08;
const TAG_BRANCH: u8 = 0x09;
const TAG_NESTED: u8 = 0x0a;

type LeafKey = (Address, Option<Hash32>);

/// A decoded signature: the configuration it proves and its signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSignature {
    pub configuration: Configuration,
    pub signatures: Vec<LeafSignature>,
}

/// What a verifier learns from an encoded signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recovered {
    pub image_hash: Hash32,
    pub weight: Weight,
    pub threshold: Weight,
}

impl Recovered {
    pub fn reached(&self) -> bool {
        self.weight >= self.threshold
    }
}

/// Marks, per node, whether its subtree carries anything the verifier needs.
fn needed_nodes<'a>(
    root: &'a Topology,
    signed: &HashSet<LeafKey>,
    digest: &Hash32,
) -> HashMap<*const Topology, bool> {
    let mut needed: HashMap<*const Topology, bool> = HashMap::new();
    let mut stack: Vec<(&'a Topology, bool)> = vec![(root, false)];

    while let Some((node, expanded)) = stack.pop() {
        let value = match node {
            Topology::Signer(leaf) => signed.contains(&(leaf.address, None)),
            Topology::SapientSigner(leaf) => {
                signed.contains(&(leaf.address, Some(leaf.image_hash)))
            }
            Topology::Subdigest(leaf) => leaf.digest == *digest,
            Topology::Node(_) => false,
            Topology::Nested(nested) if !expanded => {
                stack.push((node, true));
                stack.push((&nested.tree, false));
                continue;
            }
            Topology::Nested(nested) => needed
                .get(&(nested.tree.as_ref() as *const Topology))
                .copied()
                .unwrap_or(false),
            Topology::Branch(children) if !expanded => {
                stack.push((node, true));
                stack.extend(children.iter().map(|c| (c, false)));
                continue;
            }
            Topology::Branch(children) => children.iter().any(|c| {
                needed
                    .get(&(c as *const Topology))
                    .copied()
                    .unwrap_or(false)
            }),
        };
        needed.insert(node as *const Topology, value);
    }
    needed
}

fn put_rsy(out: &mut Vec<u8>, rsy: &RsY) {
    out.extend_from_slice(rsy.r.as_bytes());
    out.extend_from_slice(rsy.s.as_bytes());
    out.push(rsy.y_parity);
}

fn data_len(len: usize) -> Result<u32, CoreError> {
    u32::try_from(len).map_err(|_| {
        CoreError::Encoding(format!("{} bytes of signature data exceed the u32 length prefix", len))
    })
}

fn branch_len(len: usize) -> Result<u16, CoreError> {
    u16::try_from(len)
        .map_err(|_| CoreError::Encoding(format!("branch of {} children exceeds the u16 count", len)))
}

fn put_data(out: &mut Vec<u8>, data: &[u8]) -> Result<(), CoreError> {
    out.extend_from_slice(&data_len(data.len())?.to_be_bytes());
    out.extend_from_slice(data);
    Ok(())
}

/// Encode `signatures` over `configuration` in topology order.
///
/// Fails when a branch or a data field is too large for its length prefix.
pub fn encode_signature(
    configuration: &Configuration,
    digest: &Hash32,
    signatures: &[LeafSignature],
) -> Result<Vec<u8>, CoreError> {
    let by_leaf: HashMap<LeafKey, &LeafSignature> = signatures
        .iter()
        .map(|s| ((s.address(), s.image_hash()), s))
        .collect();
    let signed: HashSet<LeafKey> = by_leaf.keys().copied().collect();
    let needed = needed_nodes(&configuration.topology, &signed, digest);
    let is_needed = |node: &Topology| {
        needed
            .get(&(node as *const Topology))
            .copied()
            .unwrap_or(false)
    };

    let mut out = Vec::new();
    out.push(configuration.version.as_byte());
    out.extend_from_slice(&configuration.checkpoint.to_be_bytes());
    out.extend_from_slice(&configuration.threshold.to_be_bytes());

    let mut stack = vec![&configuration.topology];
    while let Some(node) = stack.pop() {
        match node {
            Topology::Signer(leaf) => match by_leaf.get(&(leaf.address, None)) {
                Some(LeafSignature::Signer { signature, .. }) => match signature {
                    SignerSignature::Hash(rsy) => {
                        out.push(TAG_HASH);
                        out.extend_from_slice(&leaf.weight.to_be_bytes());
                        put_rsy(&mut out, rsy);
                    }
                    SignerSignature::EthSign(rsy) => {
                        out.push(TAG_ETH_SIGN);
                        out.extend_from_slice(&leaf.weight.to_be_bytes());
                        put_rsy(&mut out, rsy);
                    }
                    SignerSignature::Erc1271 { data, .. } => {
                        out.push(TAG_ERC1271);
                        out.extend_from_slice(&leaf.weight.to_be_bytes());
                        out.extend_from_slice(leaf.address.as_bytes());
                        put_data(&mut out, data)?;
                    }
                },
                _ => {
                    out.push(TAG_SIGNER);
                    out.extend_from_slice(leaf.address.as_bytes());
                    out.extend_from_slice(&leaf.weight.to_be_bytes());
                }
            },
            Topology::SapientSigner(leaf) => {
                match by_leaf.get(&(leaf.address, Some(leaf.image_hash))) {
                    Some(LeafSignature::Sapient { signature, .. }) => {
                        out.push(match signature.kind {
                            SapientKind::Sapient => TAG_SAPIENT,
                            SapientKind::SapientCompact => TAG_SAPIENT_COMPACT,
                        });
                        out.extend_from_slice(&leaf.weight.to_be_bytes());
                        out.extend_from_slice(leaf.image_hash.as_bytes());
                        out.extend_from_slice(signature.address.as_bytes());
                        put_data(&mut out, &signature.data)?;
                    }
                    _ => {
                        out.push(TAG_SAPIENT_UNSIGNED);
                        out.extend_from_slice(leaf.address.as_bytes());
                        out.extend_from_slice(&leaf.weight.to_be_bytes());
                        out.extend_from_slice(leaf.image_hash.as_bytes());
                    }
                }
            }
            Topology::Subdigest(leaf) => {
                out.push(TAG_SUBDIGEST);
                out.extend_from_slice(leaf.digest.as_bytes());
            }
            Topology::Node(hash) => {
                out.push(TAG_NODE);
                out.extend_from_slice(hash.as_bytes());
            }
            Topology::Nested(_) | Topology::Branch(_) if !is_needed(node) => {
                out.push(TAG_NODE);
                out.extend_from_slice(node.hash().as_bytes());
            }
            Topology::Nested(nested) => {
                out.push(TAG_NESTED);
                out.extend_from_slice(&nested.weight.to_be_bytes());
                out.extend_from_slice(&nested.threshold.to_be_bytes());
                stack.push(&nested.tree);
            }
            Topology::Branch(children) => {
                out.push(TAG_BRANCH);
                out.extend_from_slice(&branch_len(children.len())?.to_be_bytes());
                stack.extend(children.iter().rev());
            }
        }
    }
    Ok(out)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CoreError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                CoreError::Encoding(format!("signature truncated at byte {}", self.pos))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CoreError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CoreError> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2)?);
        Ok(u16::from_be_bytes(buf))
    }

    fn u32(&mut self) -> Result<u32, CoreError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }

    fn u64(&mut self) -> Result<u64, CoreError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn address(&mut self) -> Result<Address, CoreError> {
        Address::from_slice(self.take(20)?)
    }

    fn hash(&mut self) -> Result<Hash32, CoreError> {
        Hash32::from_slice(self.take(32)?)
    }

    fn rsy(&mut self) -> Result<RsY, CoreError> {
        Ok(RsY {
            r: self.hash()?,
            s: self.hash()?,
            y_parity: self.u8()?,
        })
    }

    fn data(&mut self) -> Result<Vec<u8>, CoreError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

enum Pending {
    Branch {
        remaining: usize,
        children: Vec<Topology>,
    },
    Nested {
        weight: Weight,
        threshold: Weight,
    },
}

fn check_depth(pending: &[Pending]) -> Result<(), CoreError> {
    if pending.len() >= MAX_DEPTH {
        return Err(CoreError::Encoding(format!(
            "records nested deeper than {}",
            MAX_DEPTH
        )));
    }
    Ok(())
}

/// Decode an encoded signature, recovering ECDSA signers against `digest`.
pub fn decode_signature(bytes: &[u8], digest: &Hash32) -> Result<DecodedSignature, CoreError> {
    let mut reader = Reader { bytes, pos: 0 };
    let version = ProtocolVersion::from_byte(reader.u8()?)?;
    let checkpoint = reader.u64()?;
    let threshold = reader.u64()?;

    let mut signatures = Vec::new();
    let mut pending: Vec<Pending> = Vec::new();

    let topology = loop {
        let tag = reader.u8()?;
        let mut done = match tag {
            TAG_SIGNER => {
                let address = reader.address()?;
                Topology::signer(address, reader.u64()?)
            }
            TAG_HASH | TAG_ETH_SIGN => {
                let weight = reader.u64()?;
                let rsy = reader.rsy()?;
                let signature = if tag == TAG_HASH {
                    SignerSignature::Hash(rsy)
                } else {
                    SignerSignature::EthSign(rsy)
                };
                let address = recover_address(digest, &signature)?;
                signatures.push(LeafSignature::Signer { address, signature });
                Topology::signer(address, weight)
            }
            TAG_ERC1271 => {
                let weight = reader.u64()?;
                let address = reader.address()?;
                let data = reader.data()?;
                signatures.push(LeafSignature::Signer {
                    address,
                    signature: SignerSignature::Erc1271 { address, data },
                });
                Topology::signer(address, weight)
            }
            TAG_SAPIENT | TAG_SAPIENT_COMPACT => {
                let weight = reader.u64()?;
                let image_hash = reader.hash()?;
                let address = reader.address()?;
                let data = reader.data()?;
                let kind = if tag == TAG_SAPIENT {
                    SapientKind::Sapient
                } else {
                    SapientKind::SapientCompact
                };
                signatures.push(LeafSignature::Sapient {
                    image_hash,
                    signature: SapientSignature {
                        kind,
                        address,
                        data,
                    },
                });
                Topology::sapient_signer(address, weight, image_hash)
            }
            TAG_SAPIENT_UNSIGNED => {
                let address = reader.address()?;
                let weight = reader.u64()?;
                Topology::sapient_signer(address, weight, reader.hash()?)
            }
            TAG_SUBDIGEST => Topology::subdigest(reader.hash()?),
            TAG_NODE => Topology::Node(reader.hash()?),
            TAG_BRANCH => {
                let count = reader.u16()? as usize;
                if count < 2 {
                    return Err(CoreError::Encoding(format!(
                        "branch with {} children",
                        count
                    )));
                }
                check_depth(&pending)?;
                pending.push(Pending::Branch {
                    remaining: count,
                    children: Vec::with_capacity(count),
                });
                continue;
            }
            TAG_NESTED => {
                let weight = reader.u64()?;
                let threshold = reader.u64()?;
                check_depth(&pending)?;
                pending.push(Pending::Nested { weight, threshold });
                continue;
            }
            other => {
                return Err(CoreError::Encoding(format!(
                    "unknown record tag {:#04x}",
                    other
                )))
            }
        };

        // Attach the finished node, closing every parent it completes
        let finished = loop {
            match pending.pop() {
                None => break Some(done),
                Some(Pending::Nested { weight, threshold }) => {
                    done = Topology::nested(weight, threshold, done);
                }
                Some(Pending::Branch {
                    remaining,
                    mut children,
                }) => {
                    children.push(done);
                    if remaining > 1 {
                        pending.push(Pending::Branch {
                            remaining: remaining - 1,
                            children,
                        });
                        break None;
                    }
                    done = Topology::Branch(children);
                }
            }
        };
        if let Some(root) = finished {
            break root;
        }
    };

    if !reader.is_empty() {
        return Err(CoreError::Encoding(format!(
            "{} trailing bytes after signature",
            bytes.len() - reader.pos
        )));
    }

    let configuration = Configuration {
        version,
        threshold,
        checkpoint,
        topology,
    };
    configuration.validate()?;
    Ok(DecodedSignature {
        configuration,
        signatures,
    })
}

/// Recompute image hash and aggregate weight from an encoded signature.
pub fn recover(bytes: &[u8], digest: &Hash32) -> Result<Recovered, CoreError> {
    let decoded = decode_signature(bytes, digest)?;
    let WeightReport { weight, threshold } =
        weight_of(&decoded.configuration, digest, &decoded.signatures);
    Ok(Recovered {
        image_hash: decoded.configuration.image_hash(),
        weight,
        threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::payload::Payload;
    use crate::signature::{address_of_secret, sign_digest, sign_personal};
    use secp256k1::SecretKey;

    fn key(seed: u8) -> SecretKey {
        let mut bytes = [0x22u8; 32];
        bytes[31] = seed;
        SecretKey::from_slice(&bytes).unwrap()
    }

    fn addr(seed: u8) -> Address {
        address_of_secret(&key(seed))
    }

    fn nested_config() -> Configuration {
        Configuration::new(
            3,
            7,
            Topology::Branch(vec![
                Topology::nested(
                    3,
                    2,
                    Topology::Branch(vec![
                        Topology::signer(addr(1), 1),
                        Topology::signer(addr(2), 1),
                        Topology::signer(addr(3), 1),
                    ]),
                ),
                Topology::signer(addr(4), 1),
                Topology::Branch(vec![
                    Topology::sapient_signer(Address([0x55; 20]), 1, Hash32([5; 32])),
                    Topology::subdigest(Hash32([6; 32])),
                ]),
            ]),
        )
        .unwrap()
    }

    fn envelope() -> Envelope {
        Envelope::new(
            Address([0x77; 20]),
            10,
            nested_config(),
            Payload::message(b"encode me".to_vec()),
        )
    }

    #[test]
    fn test_recover_matches_envelope() {
        let mut signed = envelope().into_signed();
        let digest = signed.digest();
        signed
            .add_signature(
                LeafSignature::Signer {
                    address: addr(2),
                    signature: sign_personal(&key(2), &digest),
                },
                false,
            )
            .unwrap();
        signed
            .add_signature(
                LeafSignature::Signer {
                    address: addr(1),
                    signature: sign_digest(&key(1), &digest),
                },
                false,
            )
            .unwrap();

        let bytes = signed.encode_signature().unwrap();
        let recovered = recover(&bytes, &digest).unwrap();
        assert_eq!(recovered.image_hash, nested_config().image_hash());
        assert_eq!(recovered.weight, 3);
        assert_eq!(recovered.threshold, 3);
        assert!(recovered.reached());
    }

    #[test]
    fn test_order_is_topology_not_insertion() {
        let base = envelope().into_signed();
        let digest = base.digest();
        let sig = |seed: u8| LeafSignature::Signer {
            address: addr(seed),
            signature: sign_digest(&key(seed), &digest),
        };

        let mut forward = base.clone();
        forward.add_signature(sig(1), false).unwrap();
        forward.add_signature(sig(4), false).unwrap();
        let mut backward = base;
        backward.add_signature(sig(4), false).unwrap();
        backward.add_signature(sig(1), false).unwrap();

        assert_eq!(forward.encode_signature().unwrap(), backward.encode_signature().unwrap());
    }

    #[test]
    fn test_unsigned_subtrees_are_pruned() {
        let mut signed = envelope().into_signed();
        let digest = signed.digest();
        signed
            .add_signature(
                LeafSignature::Signer {
                    address: addr(4),
                    signature: sign_digest(&key(4), &digest),
                },
                false,
            )
            .unwrap();
        let bytes = signed.encode_signature().unwrap();
        let decoded = decode_signature(&bytes, &digest).unwrap();

        // Only the top-level signer is signed; its unsigned siblings become nodes
        match &decoded.configuration.topology {
            Topology::Branch(children) => {
                assert!(matches!(children[0], Topology::Node(_)));
                assert!(matches!(children[1], Topology::Signer(_)));
                assert!(matches!(children[2], Topology::Node(_)));
            }
            other => panic!("unexpected root {:?}", other),
        }
        assert_eq!(decoded.configuration.image_hash(), nested_config().image_hash());
        assert_eq!(decoded.signatures.len(), 1);

        // With nothing signed the whole tree collapses to its root hash
        let empty = envelope().into_signed().encode_signature().unwrap();
        assert_eq!(empty.len(), 1 + 8 + 8 + 1 + 32);
        let recovered = recover(&empty, &digest).unwrap();
        assert_eq!(recovered.image_hash, nested_config().image_hash());
        assert_eq!(recovered.weight, 0);
    }

    #[test]
    fn test_matching_subdigest_is_kept() {
        let mut config = nested_config();
        let digest = envelope().digest();
        config.topology = Topology::Branch(vec![
            Topology::signer(addr(1), 1),
            Topology::nested(1, 1, Topology::subdigest(digest)),
        ]);
        let bytes = encode_signature(&config, &digest, &[]).unwrap();
        let recovered = recover(&bytes, &digest).unwrap();
        assert_eq!(recovered.image_hash, config.image_hash());
        assert_eq!(recovered.weight, 1);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        let signed = envelope().into_signed();
        let digest = signed.digest();
        let bytes = signed.encode_signature().unwrap();

        let mut wrong_version = bytes.clone();
        wrong_version[0] = 9;
        assert!(matches!(
            decode_signature(&wrong_version, &digest),
            Err(CoreError::UnsupportedVersion(9))
        ));

        assert!(matches!(
            decode_signature(&bytes[..bytes.len() - 1], &digest),
            Err(CoreError::Encoding(_))
        ));

        let mut trailing = bytes;
        trailing.push(0);
        assert!(matches!(
            decode_signature(&trailing, &digest),
            Err(CoreError::Encoding(_))
        ));
    }

    #[test]
    fn test_sapient_and_contract_records() {
        let module = Address([0x55; 20]);
        let contract = Address([0x66; 20]);
        let config = Configuration::new(
            2,
            0,
            Topology::Branch(vec![
                Topology::sapient_signer(module, 1, Hash32([5; 32])),
                Topology::signer(contract, 1),
            ]),
        )
        .unwrap();
        let digest = Hash32([1; 32]);
        let signatures = vec![
            LeafSignature::Signer {
                address: contract,
                signature: SignerSignature::Erc1271 {
                    address: contract,
                    data: vec![1, 2, 3],
                },
            },
            LeafSignature::Sapient {
                image_hash: Hash32([5; 32]),
                signature: SapientSignature {
                    kind: SapientKind::Sapient,
                    address: module,
                    data: vec![9; 70],
                },
            },
        ];

        let bytes = encode_signature(&config, &digest, &signatures).unwrap();
        let decoded = decode_signature(&bytes, &digest).unwrap();
        assert_eq!(decoded.configuration, config);
        // Decoded in topology order
        assert_eq!(decoded.signatures[0], signatures[1]);
        assert_eq!(decoded.signatures[1], signatures[0]);
        assert!(recover(&bytes, &digest).unwrap().reached());
    }

    fn nested_records(depth: usize) -> Vec<u8> {
        let mut bytes = vec![1u8];
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes.extend_from_slice(&1u64.to_be_bytes());
        for _ in 0..depth {
            bytes.push(TAG_NESTED);
            bytes.extend_from_slice(&1u64.to_be_bytes());
            bytes.extend_from_slice(&1u64.to_be_bytes());
        }
        bytes.push(TAG_NODE);
        bytes.extend_from_slice(&[0x11; 32]);
        bytes
    }

    #[test]
    fn test_decode_rejects_deep_nesting() {
        let digest = Hash32([1; 32]);
        let decoded = decode_signature(&nested_records(MAX_DEPTH), &digest).unwrap();
        assert_eq!(decoded.configuration.topology.signers().len(), 0);

        assert!(matches!(
            decode_signature(&nested_records(MAX_DEPTH + 1), &digest),
            Err(CoreError::Encoding(_))
        ));
        // Far past the limit fails the same way, without building the tree
        assert!(matches!(
            decode_signature(&nested_records(30_000), &digest),
            Err(CoreError::Encoding(_))
        ));
    }

    #[test]
    fn test_length_prefixes_are_checked() {
        assert_eq!(branch_len(u16::MAX as usize).unwrap(), u16::MAX);
        assert!(matches!(
            branch_len(u16::MAX as usize + 1),
            Err(CoreError::Encoding(_))
        ));
        assert_eq!(data_len(u32::MAX as usize).unwrap(), u32::MAX);
        if usize::BITS > 32 {
            assert!(matches!(
                data_len(u32::MAX as usize + 1),
                Err(CoreError::Encoding(_))
            ));
        }
    }

    #[test]
    fn test_oversized_branch_is_not_encoded() {
        let digest = Hash32([3; 32]);
        let wide = |count: u32| {
            let mut leaves: Vec<Topology> = (1..count)
                .map(|i| {
                    let mut address = [0u8; 20];
                    address[16..].copy_from_slice(&i.to_be_bytes());
                    Topology::signer(Address(address), 1)
                })
                .collect();
            // Keeps the branch from collapsing into a node record
            leaves.push(Topology::subdigest(digest));
            Configuration::new(1, 0, Topology::Branch(leaves)).unwrap()
        };

        let fits = wide(u16::MAX as u32);
        let bytes = encode_signature(&fits, &digest, &[]).unwrap();
        let recovered = recover(&bytes, &digest).unwrap();
        assert_eq!(recovered.image_hash, fits.image_hash());
        assert!(recovered.reached());

        let too_wide = wide(u16::MAX as u32 + 1);
        assert!(matches!(
            encode_signature(&too_wide, &digest, &[]),
            Err(CoreError::Encoding(_))
        ));
    }
}
