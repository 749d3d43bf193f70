#![no_main]

use libfuzzer_sys::fuzz_target;
use quorum_core::{decode_signature, encode_signature, recover, Hash32};

fuzz_target!(|data: &[u8]| {
    // The first 32 bytes pick the digest, the rest is the signature.
    if data.len() < 32 {
        return;
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&data[..32]);
    let digest = Hash32(digest);
    let bytes = &data[32..];

    let _ = recover(bytes, &digest);

    // Anything that decodes must re-encode to the same image hash
    if let Ok(decoded) = decode_signature(bytes, &digest) {
        let reencoded = encode_signature(&decoded.configuration, &digest, &decoded.signatures)
            .expect("decoded signature must re-encode");
        let recovered = recover(&reencoded, &digest).expect("re-encoded signature must decode");
        assert_eq!(recovered.image_hash, decoded.configuration.image_hash());
    }
});
