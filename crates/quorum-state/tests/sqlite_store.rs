//! SQLite store against a real database file.

use quorum_core::signature::{address_of_secret, sign_digest};
use quorum_core::{
    counterfactual_address, Address, Configuration, Context, GenericTree, Hash32, LeafSignature,
    Payload, SapientKind, SapientSignature, Topology,
};
use quorum_state::{SqliteStore, StateStore, StoredPayload};
use secp256k1::SecretKey;
use tempfile::TempDir;

fn test_key(seed: u8) -> SecretKey {
    let mut bytes = [0u8; 32];
    bytes[0] = 0x01;
    bytes[31] = seed;
    SecretKey::from_slice(&bytes).unwrap()
}

fn configuration() -> Configuration {
    Configuration::new(
        2,
        1,
        Topology::Branch(vec![
            Topology::signer(address_of_secret(&test_key(1)), 1),
            Topology::signer(address_of_secret(&test_key(2)), 1),
        ]),
    )
    .unwrap()
}

#[test]
fn test_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.db");
    let config = configuration();
    let image_hash = config.image_hash();
    let context = Context::by_version(1).unwrap();
    let wallet = counterfactual_address(&image_hash, &context);

    {
        let store = SqliteStore::open(&path).unwrap();
        store.save_config(&image_hash, &config).unwrap();
        store
            .save_counterfactual_wallet(&wallet, &image_hash, &context)
            .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.load_config(&image_hash).unwrap(), Some(config));
    let stored = store.load_counterfactual_wallet(&wallet).unwrap().unwrap();
    assert_eq!(stored.image_hash, image_hash);
    assert_eq!(stored.context, context);
    assert!(store
        .load_counterfactual_wallet(&Address([0xEE; 20]))
        .unwrap()
        .is_none());
}

#[test]
fn test_payload_and_signatures() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("state.db")).unwrap();

    let payload = StoredPayload {
        wallet: Address([0x77; 20]),
        chain_id: 1,
        payload: Payload::message(b"persist me".to_vec()),
    };
    let digest = Hash32([0xD1; 32]);
    store.save_payload_of_digest(&digest, &payload).unwrap();
    assert_eq!(store.load_payload_of_digest(&digest).unwrap(), Some(payload));

    let signer = address_of_secret(&test_key(1));
    let first = sign_digest(&test_key(1), &digest);
    store.save_signature_of_digest(&signer, &digest, &first).unwrap();

    let module = Address([0x55; 20]);
    let sapient = SapientSignature {
        kind: SapientKind::SapientCompact,
        address: module,
        data: vec![0xAA, 0xBB],
    };
    store
        .save_sapient_signature_of_digest(&module, &Hash32([3; 32]), &digest, &sapient)
        .unwrap();

    assert_eq!(
        store.load_signature_of_digest(&signer, &digest).unwrap(),
        Some(first.clone())
    );
    assert_eq!(
        store
            .load_sapient_signature_of_digest(&module, &Hash32([3; 32]), &digest)
            .unwrap(),
        Some(sapient)
    );

    let all = store.load_signatures_of_digest(&digest).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(
        all[0],
        LeafSignature::Signer {
            address: signer,
            signature: first,
        }
    );

    // Overwriting keeps one row per leaf
    let second = sign_digest(&test_key(1), &Hash32([0xD2; 32]));
    store.save_signature_of_digest(&signer, &digest, &second).unwrap();
    assert_eq!(store.load_signatures_of_digest(&digest).unwrap().len(), 2);
    assert_eq!(
        store.load_signature_of_digest(&signer, &digest).unwrap(),
        Some(second)
    );
}

#[test]
fn test_trees() {
    let store = SqliteStore::open_in_memory().unwrap();
    let tree = GenericTree::Branch(vec![
        GenericTree::leaf(b"left".to_vec()),
        GenericTree::Node(Hash32([4; 32])),
    ]);
    let root = tree.hash();

    assert!(store.load_tree(&root).unwrap().is_none());
    store.save_tree(&root, &tree).unwrap();
    let loaded = store.load_tree(&root).unwrap().unwrap();
    assert_eq!(loaded.hash(), root);
    assert_eq!(loaded, tree);
}
