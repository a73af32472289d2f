//! Fuzz target: flow report payload processing
//!
//! Arbitrary payloads from an enrolled reporter against an empty ledger.
//! Processing must never panic, and every sub-record index is either
//! accepted or dropped, never both.
//!
//! Run: cargo +nightly fuzz run fuzz_flow_payload -- -max_len=4096

#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeMap;
use tessera_consensus::flow::{
    parse_payload, parse_sub_record, process_flow_report, CustomTx, FlowReportOutcome, FulBalanceCache,
    ReportContext,
};
use tessera_core::ful::{FulProvider, MemoryFulProvider};
use tessera_core::{Address, Hash};

#[derive(Arbitrary, Debug)]
struct FuzzReport {
    payload: Vec<u8>,
    number: u64,
    prefixed: bool,
}

fuzz_target!(|input: FuzzReport| {
    let reporter = Address([0x77; 20]);
    let mut data = if input.prefixed {
        b"tessera:1:Flwrpt:En:".to_vec()
    } else {
        Vec::new()
    };
    data.extend_from_slice(&input.payload);

    let sub_count = match parse_payload(&data) {
        Ok(subs) => {
            for sub in &subs {
                let _ = parse_sub_record(sub);
            }
            subs.len()
        }
        Err(_) => 0,
    };

    let provider = MemoryFulProvider::new();
    let state = provider.open(provider.empty_root()).expect("open");
    let pledge: BTreeMap<Address, u128> = [(reporter, 1)].into_iter().collect();
    let ctx = ReportContext {
        number: input.number,
        time: input.number.saturating_mul(3),
        period: 3,
        flow_pledge: &pledge,
    };
    let tx = CustomTx {
        hash: Hash::ZERO,
        sender: reporter,
        data,
    };
    let mut cache = FulBalanceCache::new(state.as_ref());
    if let Ok(FlowReportOutcome::Processed { record, accepted, dropped, log }) =
        process_flow_report(&tx, &ctx, &mut cache)
    {
        assert_eq!(record.is_some(), !accepted.is_empty());
        assert_eq!(log.is_some(), !accepted.is_empty());
        assert!(accepted.len() + dropped.len() <= sub_count);
        assert!(accepted.iter().all(|i| dropped.iter().all(|(d, _)| d != i)));
    }
});
