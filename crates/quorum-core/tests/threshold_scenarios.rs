//! End-to-end threshold scenarios over the public API.
//!
//! 1. Flat 2-of-2: weight grows one signer at a time
//! 2. Nested 2-of-3 worth 3 satisfies a top threshold of 3 on its own
//! 3. The encoded proof of each recovers the wallet's image hash

use quorum_core::signature::{address_of_secret, sign_digest};
use quorum_core::{
    counterfactual_address, recover, Address, Configuration, Context, Envelope, LeafSignature,
    Payload, Signed, Topology,
};
use secp256k1::SecretKey;

fn test_key(seed: u8) -> SecretKey {
    let mut bytes = [0u8; 32];
    bytes[0] = 0x01;
    bytes[31] = seed;
    SecretKey::from_slice(&bytes).unwrap()
}

fn signer(seed: u8) -> Address {
    address_of_secret(&test_key(seed))
}

fn sign(signed: &mut Signed, seed: u8) {
    let signature = LeafSignature::Signer {
        address: signer(seed),
        signature: sign_digest(&test_key(seed), &signed.digest()),
    };
    signed.add_signature(signature, false).unwrap();
}

fn envelope_for(configuration: Configuration) -> Envelope {
    let context = Context::by_version(1).unwrap();
    let wallet = counterfactual_address(&configuration.image_hash(), &context);
    Envelope::new(wallet, 1, configuration, Payload::message(b"scenario".to_vec()))
}

#[test]
fn test_flat_two_of_two() {
    let configuration = Configuration::new(
        2,
        0,
        Topology::Branch(vec![
            Topology::signer(signer(0xA), 1),
            Topology::signer(signer(0xB), 1),
        ]),
    )
    .unwrap();
    let mut signed = envelope_for(configuration.clone()).into_signed();

    assert!(!signed.reached_threshold());

    sign(&mut signed, 0xA);
    assert_eq!(signed.weight().weight, 1);
    assert!(!signed.reached_threshold());

    sign(&mut signed, 0xB);
    assert_eq!(signed.weight().weight, 2);
    assert!(signed.reached_threshold());

    let recovered = recover(&signed.encode_signature().unwrap(), &signed.digest()).unwrap();
    assert_eq!(recovered.image_hash, configuration.image_hash());
    assert!(recovered.reached());
}

#[test]
fn test_nested_threshold_satisfies_parent() {
    let configuration = Configuration::new(
        3,
        0,
        Topology::Branch(vec![
            Topology::nested(
                3,
                2,
                Topology::Branch(vec![
                    Topology::signer(signer(0xA), 1),
                    Topology::signer(signer(0xB), 1),
                    Topology::signer(signer(0xC), 1),
                ]),
            ),
            Topology::signer(signer(0xD), 1),
        ]),
    )
    .unwrap();
    let mut signed = envelope_for(configuration.clone()).into_signed();

    sign(&mut signed, 0xA);
    assert_eq!(signed.weight().weight, 0);

    sign(&mut signed, 0xB);
    assert_eq!(signed.weight().weight, 3);
    assert!(signed.reached_threshold());

    let recovered = recover(&signed.encode_signature().unwrap(), &signed.digest()).unwrap();
    assert_eq!(recovered.image_hash, configuration.image_hash());
    assert_eq!(recovered.weight, 3);
}

#[test]
fn test_proof_is_bound_to_digest() {
    let configuration = Configuration::new(1, 0, Topology::signer(signer(0xA), 1)).unwrap();
    let mut signed = envelope_for(configuration.clone()).into_signed();
    sign(&mut signed, 0xA);
    let bytes = signed.encode_signature().unwrap();

    // Recovering against another digest yields another signer, hence another image hash
    let other = envelope_for(configuration.clone());
    let other_digest = Envelope::new(other.wallet, 2, other.configuration, other.payload).digest();
    let recovered = recover(&bytes, &other_digest).unwrap();
    assert_ne!(recovered.image_hash, configuration.image_hash());
}
