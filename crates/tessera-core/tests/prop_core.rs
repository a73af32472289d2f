// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PROPERTY-BASED TESTS - tessera-core
//
// Verifies ledger and trie invariants:
// - Trie root depends only on contents, never on edit order
// - Trie and in-memory FUL ledgers agree on every balance
// - Failed subtraction never changes the ledger
// - commit → reopen reproduces getAll() exactly
// - Effect Record survives the extra-data envelope
//
// Run: cargo test --release -p tessera-core --test prop_core
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::ful::{FulError, FulProvider, MemoryFulProvider, TrieFulProvider};
use tessera_core::header::{decode_extra_data, encode_extra_data, ExchangeRecord, HeaderExtra};
use tessera_core::store::MemoryStore;
use tessera_core::trie::Trie;
use tessera_core::{Address, EXTRA_VANITY};

#[derive(Debug, Clone)]
enum Op {
    Add(u8, u64),
    Sub(u8, u64),
    Set(u8, u64),
    Delete(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8, 0u64..1_000).prop_map(|(a, v)| Op::Add(a, v)),
        (0u8..8, 0u64..1_000).prop_map(|(a, v)| Op::Sub(a, v)),
        (0u8..8, 0u64..1_000).prop_map(|(a, v)| Op::Set(a, v)),
        (0u8..8).prop_map(Op::Delete),
    ]
}

// ─────────────────────────────────────────────────────────────────
// TRIE PROPERTIES
// ─────────────────────────────────────────────────────────────────

proptest! {
    /// PROPERTY: root of a map is the same whatever order it was built in
    #[test]
    fn prop_trie_root_order_independent(
        entries in proptest::collection::btree_map(proptest::collection::vec(any::<u8>(), 1..6), any::<u8>(), 0..24)
    ) {
        let mut forward = Trie::new(Arc::new(MemoryStore::new()));
        for (k, v) in &entries {
            forward.insert(k, vec![*v]).unwrap();
        }
        let mut backward = Trie::new(Arc::new(MemoryStore::new()));
        for (k, v) in entries.iter().rev() {
            backward.insert(k, vec![*v]).unwrap();
        }
        prop_assert_eq!(forward.root_hash(), backward.root_hash());

        let listed: BTreeMap<Vec<u8>, u8> = forward
            .entries()
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k, v[0]))
            .collect();
        prop_assert_eq!(listed, entries);
    }

    /// PROPERTY: removing every key leaves the empty root
    #[test]
    fn prop_trie_remove_all_is_empty(
        keys in proptest::collection::btree_set(proptest::collection::vec(any::<u8>(), 1..6), 0..24)
    ) {
        let mut trie = Trie::new(Arc::new(MemoryStore::new()));
        for k in &keys {
            trie.insert(k, k.clone()).unwrap();
        }
        for k in &keys {
            prop_assert!(trie.remove(k).unwrap());
        }
        prop_assert_eq!(trie.root_hash(), tessera_core::trie::empty_root());
    }
}

// ─────────────────────────────────────────────────────────────────
// FUL LEDGER PROPERTIES
// ─────────────────────────────────────────────────────────────────

proptest! {
    /// PROPERTY: trie and memory ledgers apply the same ops identically,
    /// and a rejected sub changes nothing
    #[test]
    fn prop_ful_backends_agree(ops in proptest::collection::vec(op_strategy(), 0..60)) {
        let trie_provider = TrieFulProvider::new(Arc::new(MemoryStore::new()));
        let memory_provider = MemoryFulProvider::new();
        let mut a = trie_provider.open(trie_provider.empty_root()).unwrap();
        let mut b = memory_provider.open(memory_provider.empty_root()).unwrap();

        for op in ops {
            match op {
                Op::Add(x, v) => {
                    a.add(&Address([x; 20]), v as u128).unwrap();
                    b.add(&Address([x; 20]), v as u128).unwrap();
                }
                Op::Sub(x, v) => {
                    let before = a.get_all().unwrap();
                    let ra = a.sub(&Address([x; 20]), v as u128);
                    let rb = b.sub(&Address([x; 20]), v as u128);
                    prop_assert_eq!(ra.is_ok(), rb.is_ok());
                    if let Err(e) = ra {
                        let is_insufficient = matches!(e, FulError::InsufficientBalance { .. });
                        prop_assert!(is_insufficient);
                        prop_assert_eq!(a.get_all().unwrap(), before);
                    }
                }
                Op::Set(x, v) => {
                    a.set(&Address([x; 20]), v as u128).unwrap();
                    b.set(&Address([x; 20]), v as u128).unwrap();
                }
                Op::Delete(x) => {
                    a.delete(&Address([x; 20])).unwrap();
                    b.delete(&Address([x; 20])).unwrap();
                }
            }
        }
        prop_assert_eq!(a.get_all().unwrap(), b.get_all().unwrap());

        let root = a.commit().unwrap();
        let reopened = trie_provider.open(root).unwrap();
        prop_assert_eq!(reopened.get_all().unwrap(), a.get_all().unwrap());
    }
}

// ─────────────────────────────────────────────────────────────────
// EXTRA-DATA ENVELOPE
// ─────────────────────────────────────────────────────────────────

proptest! {
    /// PROPERTY: decode(encode(extra)) == extra for arbitrary exchange lists
    #[test]
    fn prop_extra_envelope(
        time in any::<u64>(),
        amounts in proptest::collection::vec(any::<u128>(), 0..8),
        harvest in proptest::option::of(any::<u128>()),
    ) {
        let extra = HeaderExtra {
            loop_start_time: time,
            exchange_nfc: amounts
                .iter()
                .enumerate()
                .map(|(i, a)| ExchangeRecord { target: Address([i as u8; 20]), amount: *a })
                .collect(),
            flow_harvest: harvest,
            ..Default::default()
        };
        let data = encode_extra_data(&[7u8; EXTRA_VANITY], &extra).unwrap();
        prop_assert_eq!(decode_extra_data(&data).unwrap(), extra);
    }
}
