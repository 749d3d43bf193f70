#![no_main]

use libfuzzer_sys::fuzz_target;
use quorum_core::Configuration;

fuzz_target!(|data: &[u8]| {
    // Parsing and validating arbitrary JSON must never panic.
    if let Ok(config) = serde_json::from_slice::<Configuration>(data) {
        if config.validate().is_ok() {
            let _ = config.image_hash();
            let _ = config.signers();
        }
    }
});
