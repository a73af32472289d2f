//! Fuzz target: header extra-data decoding
//!
//! Feeds arbitrary bytes as a header's extra-data. Decoding must either
//! fail cleanly or yield a record that re-encodes to an equal record.
//!
//! Run: cargo +nightly fuzz run fuzz_extra_decode -- -max_len=8192

#![no_main]
use libfuzzer_sys::fuzz_target;
use tessera_core::header::{decode_extra_data, encode_extra_data, Header};
use tessera_core::{Address, Hash, EXTRA_VANITY};

fuzz_target!(|data: &[u8]| {
    let decoded = match decode_extra_data(data) {
        Ok(extra) => extra,
        Err(_) => return,
    };
    let encoded = encode_extra_data(&[0u8; EXTRA_VANITY], &decoded).expect("re-encode");
    let again = decode_extra_data(&encoded).expect("decode re-encoded");
    assert_eq!(decoded, again);

    // Seal recovery on arbitrary bytes must not panic either
    let header = Header {
        parent_hash: Hash::ZERO,
        coinbase: Address::ZERO,
        number: 1,
        time: 0,
        extra: data.to_vec(),
    };
    let _ = header.recover_signer();
});
