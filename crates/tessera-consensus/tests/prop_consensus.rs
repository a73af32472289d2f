// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PROPERTY-BASED TESTS - tessera-consensus
//
// Verifies consensus invariants for arbitrary queues, grants and records:
// - Missing signers never repeat and never include the sealing signer
// - Rewards convert to pledge items only at the deposit threshold
// - Playment never decreases and settled items disappear
// - L1 checkpoints reload the exact item multiset; merging keeps totals
// - The Effect Record verifier ignores order and catches removals
//
// Run: cargo test --release -p tessera-consensus --test prop_consensus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tessera_consensus::error::VerifyError;
use tessera_consensus::lock_profit::{LockData, RevenueBinding};
use tessera_consensus::rewards::{block_reward, mul_div};
use tessera_consensus::signer::{signer_missing_legacy, signer_missing_trantor};
use tessera_consensus::verify::verify_header_extra;
use tessera_core::config::LockParameter;
use tessera_core::header::{GrantProfitRecord, HeaderExtra, LockRewardRecord, RewardKind};
use tessera_core::store::MemoryStore;
use tessera_core::{blocks_per_year, keccak256, Address};

const LOCK: LockParameter = LockParameter {
    lock_period: 0,
    rls_period: 0,
    interval: 0,
};

fn queue_strategy() -> impl Strategy<Value = Vec<Address>> {
    proptest::collection::btree_set(1u8..40, 1..12)
        .prop_map(|set| set.into_iter().map(|b| Address([b; 20])).collect())
}

fn grant(target: u8, amount: u128) -> LockRewardRecord {
    LockRewardRecord {
        target: Address([target; 20]),
        amount,
        kind: RewardKind::Flow,
        flow_value1: 0,
        flow_value2: 0,
    }
}

// ─────────────────────────────────────────────────────────────────
// SIGNER PROPERTIES
// ─────────────────────────────────────────────────────────────────

proptest! {
    /// PROPERTY: Trantor search yields distinct queue members other than current
    #[test]
    fn prop_trantor_missing_well_formed(
        queue in queue_strategy(),
        previous in queue_strategy(),
        last in 1u8..40,
        current_index in any::<prop::sample::Index>(),
        crossing in any::<bool>(),
    ) {
        let current = queue[current_index.index(queue.len())];
        let last = Address([last; 20]);
        let prev = if crossing { Some(previous.as_slice()) } else { None };
        let missing = signer_missing_trantor(&last, &current, &queue, prev);

        let unique: BTreeSet<_> = missing.iter().collect();
        prop_assert_eq!(unique.len(), missing.len(), "duplicates in {:?}", missing);
        prop_assert!(!missing.contains(&current));
        prop_assert!(missing.iter().all(|m| queue.contains(m)));
        prop_assert!(missing.len() < queue.len());
    }

    /// PROPERTY: Legacy search yields distinct queue members other than current
    #[test]
    fn prop_legacy_missing_well_formed(
        queue in queue_strategy(),
        last_index in any::<prop::sample::Index>(),
        current_index in any::<prop::sample::Index>(),
        new_loop in any::<bool>(),
    ) {
        let last = queue[last_index.index(queue.len())];
        let current = queue[current_index.index(queue.len())];
        let missing = signer_missing_legacy(&last, &current, &queue, new_loop);

        let unique: BTreeSet<_> = missing.iter().collect();
        prop_assert_eq!(unique.len(), missing.len());
        prop_assert!(!missing.contains(&last));
        if !new_loop {
            prop_assert!(!missing.contains(&current));
        }
    }

    /// PROPERTY: Consecutive in-queue signers never miss anybody
    #[test]
    fn prop_adjacent_signers_miss_nobody(queue in queue_strategy(), at in any::<prop::sample::Index>()) {
        let i = at.index(queue.len());
        let next = queue[(i + 1) % queue.len()];
        if queue.len() > 1 {
            prop_assert!(signer_missing_trantor(&queue[i], &next, &queue, None).is_empty());
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// LOCK LEDGER PROPERTIES
// ─────────────────────────────────────────────────────────────────

proptest! {
    /// PROPERTY: RewardBalance converts exactly when it reaches the deposit,
    /// and nothing is lost in conversion
    #[test]
    fn prop_deposit_threshold(
        amounts in proptest::collection::vec(1u128..1_000, 1..40),
        deposit in 1u128..5_000,
    ) {
        let mut lock = LockData::new(RewardKind::Flow);
        let target = Address([7; 20]);
        let revenue = RevenueBinding::direct(&target);
        for (number, amount) in amounts.iter().enumerate() {
            let before = lock.reward_balance.get(&target).copied().unwrap_or(0);
            let locked_before = lock.lock_balance.get(&target).map_or(0, |m| m.len());
            lock.add_reward(&grant(7, *amount), number as u64 + 1, deposit, LOCK, &revenue, false);

            let after = lock.reward_balance.get(&target).copied();
            let locked_after = lock.lock_balance.get(&target).map_or(0, |m| m.len());
            if before + amount >= deposit {
                prop_assert_eq!(after, None);
                prop_assert_eq!(locked_after, locked_before + 1);
            } else {
                prop_assert_eq!(after, Some(before + amount));
                prop_assert_eq!(locked_after, locked_before);
            }
        }
        let pending = lock.reward_balance.get(&target).copied().unwrap_or(0);
        let locked: u128 = lock.lock_balance.values().flat_map(|m| m.values()).map(|i| i.amount).sum();
        prop_assert_eq!(pending + locked, amounts.iter().sum::<u128>());
    }

    /// PROPERTY: Playment is non-decreasing across payouts and the item is
    /// removed exactly when it is fully paid
    #[test]
    fn prop_playment_monotonic(
        amount in 10u128..100_000,
        payouts in proptest::collection::vec(1u128..5_000, 1..20),
    ) {
        let store = MemoryStore::new();
        let mut lock = LockData::new(RewardKind::Signer);
        let target = Address([3; 20]);
        lock.add_reward(
            &LockRewardRecord { kind: RewardKind::Signer, ..grant(3, amount) },
            1,
            0,
            LOCK,
            &RevenueBinding::direct(&target),
            true,
        );
        lock.save_cache_l1(&store, &keccak256(b"block-1")).unwrap();

        let mut last_playment = 0u128;
        for (i, pay) in payouts.iter().enumerate() {
            let record = GrantProfitRecord {
                which: RewardKind::Signer,
                miner_address: target,
                block_number: 1,
                amount: *pay,
                revenue_address: target,
                revenue_contract: Address::ZERO,
                multi_signature: Address::ZERO,
            };
            let hash = keccak256(format!("payout-{}", i).as_bytes());
            lock.update_grant_profit(&store, &[record], &hash).unwrap();
            let items = lock.outstanding_items(&store).unwrap();
            match items.first() {
                Some(item) => {
                    prop_assert!(item.playment >= last_playment);
                    prop_assert!(item.playment < item.amount);
                    last_playment = item.playment;
                }
                None => {
                    prop_assert!(last_playment + pay >= amount);
                    break;
                }
            }
        }
    }

    /// PROPERTY: Items written to L1 reload as the same multiset, and
    /// merging into L2 preserves every target's outstanding total
    #[test]
    fn prop_l1_l2_round_trip(
        grants in proptest::collection::vec((1u8..6, 1u128..10_000, 1u64..50), 1..40),
    ) {
        let store = MemoryStore::new();
        let mut lock = LockData::new(RewardKind::Bandwidth);
        let mut expected: BTreeMap<(Address, u64), u128> = BTreeMap::new();
        for (target, amount, number) in &grants {
            let record = LockRewardRecord { kind: RewardKind::Bandwidth, ..grant(*target, *amount) };
            let addr = Address([*target; 20]);
            lock.add_reward(&record, *number, 0, LOCK, &RevenueBinding::direct(&addr), true);
            *expected.entry((addr, *number)).or_insert(0) += amount;
        }

        let before = lock.load_items(&store).unwrap();
        lock.save_cache_l1(&store, &keccak256(b"l1")).unwrap();
        prop_assert!(lock.lock_balance.is_empty());
        let reloaded = lock.load_items(&store).unwrap();
        prop_assert_eq!(&before, &reloaded);
        let by_key: BTreeMap<(Address, u64), u128> = reloaded
            .values()
            .map(|i| ((i.target, i.start_high), i.amount))
            .collect();
        prop_assert_eq!(by_key, expected.clone());

        lock.merge(&store, &keccak256(b"l2"), 3).unwrap();
        prop_assert!(lock.cache_l1.is_empty());
        let mut totals: BTreeMap<Address, u128> = BTreeMap::new();
        for item in lock.outstanding_items(&store).unwrap() {
            *totals.entry(item.target).or_insert(0) += item.amount;
        }
        let mut expected_totals: BTreeMap<Address, u128> = BTreeMap::new();
        for ((addr, _), amount) in expected {
            *expected_totals.entry(addr).or_insert(0) += amount;
        }
        prop_assert_eq!(totals, expected_totals);
    }
}

// ─────────────────────────────────────────────────────────────────
// VERIFIER & REWARD PROPERTIES
// ─────────────────────────────────────────────────────────────────

proptest! {
    /// PROPERTY: Record order never matters; a removal always names its category
    #[test]
    fn prop_verifier_order_insensitive(
        rewards in proptest::collection::vec((1u8..10, 1u128..1_000), 1..20),
        exits in proptest::collection::vec(1u8..10, 0..10),
        rotate in 0usize..20,
    ) {
        let current = HeaderExtra {
            lock_reward: rewards.iter().map(|(t, a)| grant(*t, *a)).collect(),
            candidate_exit: exits.iter().map(|b| Address([*b; 20])).collect(),
            ..Default::default()
        };
        let mut claimed = current.clone();
        let len = claimed.lock_reward.len();
        claimed.lock_reward.rotate_left(rotate % len);
        claimed.candidate_exit.reverse();
        prop_assert_eq!(verify_header_extra(&current, &claimed), Ok(()));

        claimed.lock_reward.pop();
        let err = verify_header_extra(&current, &claimed).unwrap_err();
        prop_assert_eq!(err.category(), "lock_reward");
        let is_length_mismatch = matches!(err, VerifyError::LengthMismatch { .. });
        prop_assert!(is_length_mismatch);
    }

    /// PROPERTY: The per-block reward never grows from one year to the next
    #[test]
    fn prop_block_reward_non_increasing(year in 0u64..30) {
        let period = 3;
        let bpy = blocks_per_year(period);
        prop_assert!(block_reward(bpy * (year + 1) + 1, period) <= block_reward(bpy * year + 1, period));
    }

    /// PROPERTY: mul_div is exact whenever the product fits
    #[test]
    fn prop_mul_div_exact(a in 0u128..u64::MAX as u128, b in 0u128..u64::MAX as u128, c in 1u128..u64::MAX as u128) {
        prop_assert_eq!(mul_div(a, b, c), a * b / c);
    }
}
