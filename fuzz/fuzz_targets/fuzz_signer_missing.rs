//! Fuzz target: missing-signer search
//!
//! Arbitrary queues and signer positions for both the legacy and the
//! Trantor search. Results must be duplicate-free queue members and never
//! name the signer sealing the block.
//!
//! Run: cargo +nightly fuzz run fuzz_signer_missing

#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeSet;
use tessera_consensus::signer::signer_missing;
use tessera_core::Address;

#[derive(Arbitrary, Debug)]
struct FuzzQueues {
    queue: Vec<u8>,
    previous: Vec<u8>,
    last: u8,
    current: u8,
    number: u64,
    trantor_block: u64,
    new_loop: bool,
}

fuzz_target!(|input: FuzzQueues| {
    let queue: Vec<Address> = input.queue.iter().map(|b| Address([*b; 20])).collect();
    let previous: Vec<Address> = input.previous.iter().map(|b| Address([*b; 20])).collect();
    let last = Address([input.last; 20]);
    let current = Address([input.current; 20]);

    let missing = signer_missing(
        input.number,
        input.trantor_block,
        &last,
        &current,
        &queue,
        Some(&previous),
        input.new_loop,
    );

    let unique: BTreeSet<&Address> = missing.iter().collect();
    assert_eq!(unique.len(), missing.len());
    let trantor = input.number >= input.trantor_block;
    if trantor || !input.new_loop {
        assert!(!missing.contains(&current));
    }
    if trantor {
        assert!(missing.iter().all(|m| queue.contains(m)));
    }
});
