//! Fuzz target for public-key frame decoding
//!
//! Whatever decodes must re-encode to the identical payload.

#![no_main]

use libfuzzer_sys::fuzz_target;
use teeline_core::{decode_public_key, encode_public_key};

fuzz_target!(|data: &[u8]| {
    if let Ok(key) = decode_public_key(data) {
        assert_eq!(encode_public_key(&key), data);
    }
});
