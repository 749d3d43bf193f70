//! Sessions persist accepted signatures and resume from them.

use quorum_core::signature::{address_of_secret, sign_digest};
use quorum_core::{
    counterfactual_address, Address, Configuration, Context, Envelope, LeafSignature, Payload,
    SignerRef, Topology,
};
use quorum_signers::handlers::LocalKeyHandler;
use quorum_signers::{HandlerRegistry, Orchestrator, RequestState, SignerConfig};
use quorum_state::{MemoryStore, SqliteStore, StateStore};
use secp256k1::SecretKey;
use std::sync::Arc;
use tempfile::TempDir;

fn test_key(seed: u8) -> SecretKey {
    let mut bytes = [0u8; 32];
    bytes[0] = 0x02;
    bytes[31] = seed;
    SecretKey::from_slice(&bytes).unwrap()
}

fn signer(seed: u8) -> Address {
    address_of_secret(&test_key(seed))
}

fn envelope() -> Envelope {
    let configuration = Configuration::new(
        2,
        0,
        Topology::Branch(vec![
            Topology::signer(signer(1), 1),
            Topology::signer(signer(2), 1),
            Topology::signer(signer(3), 1),
        ]),
    )
    .unwrap();
    let context = Context::by_version(1).unwrap();
    let wallet = counterfactual_address(&configuration.image_hash(), &context);
    Envelope::new(wallet, 10, configuration, Payload::message(b"resume".to_vec()))
}

fn orchestrator_with_key(seed: u8, store: Arc<dyn StateStore>) -> Orchestrator {
    let keys = Arc::new(LocalKeyHandler::new());
    keys.add_key(&test_key(seed));
    let registry = HandlerRegistry::new().with_handler(keys, [signer(seed)]);
    Orchestrator::new(Arc::new(registry), SignerConfig::default()).with_store(store)
}

fn leaf(seed: u8) -> SignerRef {
    SignerRef {
        address: signer(seed),
        image_hash: None,
        weight: 1,
    }
}

#[tokio::test]
async fn test_resume_across_reopen() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("quorum.db");
    let envelope = envelope();
    let digest = envelope.digest();

    {
        let store: Arc<dyn StateStore> = Arc::new(SqliteStore::open(&path).unwrap());
        let session = orchestrator_with_key(1, store.clone())
            .start(envelope.clone())
            .unwrap();
        let report = session.handle(&leaf(1)).await.unwrap();
        assert_eq!(report.weight, 1);

        let stored = store.load_payload_of_digest(&digest).unwrap().unwrap();
        assert_eq!(stored.wallet, envelope.wallet);
        assert!(store
            .load_config(&envelope.configuration.image_hash())
            .unwrap()
            .is_some());
    }

    let store: Arc<dyn StateStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let session = orchestrator_with_key(2, store.clone())
        .start(envelope.clone())
        .unwrap();
    assert_eq!(session.weight().weight, 1);

    let report = session.collect().await.unwrap();
    assert!(report.reached());
    assert_eq!(session.state(), RequestState::Complete);
    assert_eq!(store.load_signatures_of_digest(&digest).unwrap().len(), 2);
}

#[tokio::test]
async fn test_already_complete_on_start() {
    let store = Arc::new(MemoryStore::new());
    let envelope = envelope();
    let digest = envelope.digest();
    for seed in [1u8, 3] {
        store
            .save_leaf_signature(
                &digest,
                &LeafSignature::Signer {
                    address: signer(seed),
                    signature: sign_digest(&test_key(seed), &digest),
                },
            )
            .unwrap();
    }

    let session = orchestrator_with_key(2, store).start(envelope).unwrap();
    assert_eq!(session.state(), RequestState::Complete);
    assert!(session.reached_threshold());
}

#[tokio::test]
async fn test_invalid_stored_signature_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let envelope = envelope();
    let digest = envelope.digest();
    // Signed with key 4 but claimed for signer 1
    store
        .save_leaf_signature(
            &digest,
            &LeafSignature::Signer {
                address: signer(1),
                signature: sign_digest(&test_key(4), &digest),
            },
        )
        .unwrap();

    let session = orchestrator_with_key(1, store).start(envelope).unwrap();
    assert_eq!(session.weight().weight, 0);
    assert_eq!(session.handle(&leaf(1)).await.unwrap().weight, 1);
}
