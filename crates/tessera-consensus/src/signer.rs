// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - SIGNER ROTATION & PENALTY DETECTION
//
// Time-sliced DPoS rotation:
// - A loop is one pass over the signer queue, `period` seconds per slot
// - A block landing past the end of the loop starts a new loop and a
//   freshly elected queue (tally descending, deterministic shuffle)
// - Slots skipped between two consecutive blocks are "missing" signers and
//   each one gains punishment; a signer who seals resets to zero
//
// Two missing-signer searches exist and are height-gated: the legacy one
// (before the Trantor fork) and the Trantor one that positions the last
// signer in the previous loop's queue across a loop boundary.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::{BTreeMap, BTreeSet};
use tessera_core::config::PunishPolicy;
use tessera_core::{keccak256, Address, Hash};

fn push_unique(out: &mut Vec<Address>, seen: &mut BTreeSet<Address>, addr: Address) {
    if seen.insert(addr) {
        out.push(addr);
    }
}

// ─────────────────────────────────────────────────────────────────
// MISSING SIGNERS
// ─────────────────────────────────────────────────────────────────

/// Legacy search.
///
/// Same loop: every signer strictly between `last` and `current`.
/// New loop: every signer after `last` up to the end of the old queue;
/// slots of the new loop before `current` are not counted.
pub fn signer_missing_legacy(
    last: &Address,
    current: &Address,
    queue: &[Address],
    new_loop: bool,
) -> Vec<Address> {
    let mut out = Vec::new();
    let mut seen = BTreeSet::new();
    if !queue.contains(last) {
        return out;
    }
    if new_loop {
        for signer in queue.iter().rev() {
            if signer == last {
                break;
            }
            push_unique(&mut out, &mut seen, *signer);
        }
        out.reverse();
    } else {
        let mut recording = false;
        for signer in queue {
            if recording {
                if signer == current {
                    break;
                }
                push_unique(&mut out, &mut seen, *signer);
            } else if signer == last {
                recording = true;
            }
        }
    }
    out
}

/// Trantor search.
///
/// `last` is positioned in `previous` (falling back to `queue` when there is
/// no previous loop or `last` is not in it), `current` in `queue`. The missing
/// signers are the `queue` slots strictly after last's slot up to current's
/// slot, wrapping once when current's slot does not come after last's. So
/// `last == current` inside one loop misses everybody else.
pub fn signer_missing_trantor(
    last: &Address,
    current: &Address,
    queue: &[Address],
    previous: Option<&[Address]>,
) -> Vec<Address> {
    let mut out = Vec::new();
    if queue.is_empty() {
        return out;
    }
    let last_slot = previous
        .and_then(|prev| prev.iter().position(|a| a == last))
        .or_else(|| queue.iter().position(|a| a == last));
    let current_slot = queue.iter().position(|a| a == current);
    let (l, mut c) = match (last_slot, current_slot) {
        (Some(l), Some(c)) => (l, c),
        _ => return out,
    };
    let len = queue.len();
    if c <= l {
        c += len;
    }
    let mut seen = BTreeSet::new();
    for i in (l + 1)..c {
        let signer = queue[i % len];
        if signer != *current {
            push_unique(&mut out, &mut seen, signer);
        }
    }
    out
}

/// Height-gated dispatch between the two searches
pub fn signer_missing(
    number: u64,
    trantor_block: u64,
    last: &Address,
    current: &Address,
    queue: &[Address],
    previous: Option<&[Address]>,
    new_loop: bool,
) -> Vec<Address> {
    if number >= trantor_block {
        signer_missing_trantor(last, current, queue, if new_loop { previous } else { None })
    } else {
        // Before the fork a new loop is judged against the queue that just ended
        match (new_loop, previous) {
            (true, Some(prev)) => signer_missing_legacy(last, current, prev, true),
            _ => signer_missing_legacy(last, current, queue, false),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// LOOP TIMING & ELECTION
// ─────────────────────────────────────────────────────────────────

/// Whole loops between `loop_start_time` and `time`
pub fn loops_elapsed(time: u64, loop_start_time: u64, period: u64, len: usize) -> u64 {
    let loop_secs = period.max(1) * (len.max(1) as u64);
    time.saturating_sub(loop_start_time) / loop_secs
}

/// Queue slot owning `time` within the loop starting at `loop_start_time`
pub fn slot_at(time: u64, loop_start_time: u64, period: u64, len: usize) -> usize {
    let slots = time.saturating_sub(loop_start_time) / period.max(1);
    (slots % (len.max(1) as u64)) as usize
}

/// Elect the queue for a new loop.
///
/// Candidates are ranked by tally (descending, address ascending on ties),
/// the top `max_signer_count` are shuffled by `keccak(seed || address)` and
/// the result is cycled to fill every slot. No eligible candidate → empty.
pub fn elect_queue(
    tally: &BTreeMap<Address, u128>,
    punished: &BTreeMap<Address, u64>,
    kick_threshold: u64,
    max_signer_count: usize,
    seed: &Hash,
) -> Vec<Address> {
    let mut ranked: Vec<(&Address, &u128)> = tally
        .iter()
        .filter(|(addr, _)| {
            kick_threshold == 0 || punished.get(*addr).copied().unwrap_or(0) < kick_threshold
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(max_signer_count);

    let mut elected: Vec<(Hash, Address)> = ranked
        .into_iter()
        .map(|(addr, _)| (tessera_crypto::keccak256_concat(&[seed.as_bytes(), addr.as_bytes()]), *addr))
        .collect();
    elected.sort();

    if elected.is_empty() {
        return Vec::new();
    }
    (0..max_signer_count)
        .map(|i| elected[i % elected.len()].1)
        .collect()
}

/// Seed of the election at a loop boundary
pub fn election_seed(parent_hash: &Hash, loop_start_time: u64) -> Hash {
    let mut data = parent_hash.0.to_vec();
    data.extend_from_slice(&loop_start_time.to_be_bytes());
    keccak256(&data)
}

// ─────────────────────────────────────────────────────────────────
// PUNISHMENT
// ─────────────────────────────────────────────────────────────────

/// Charge every missing signer; the sealing signer starts over at zero.
pub fn apply_punishment(
    punished: &mut BTreeMap<Address, u64>,
    missing: &[Address],
    signer: &Address,
    policy: &PunishPolicy,
) {
    for addr in missing {
        let counter = punished.entry(*addr).or_insert(0);
        *counter = counter.saturating_add(policy.miss_increment);
    }
    punished.remove(signer);
}

/// Decay every counter at a loop boundary; counters reaching zero are dropped
pub fn forgive_loop(punished: &mut BTreeMap<Address, u64>, policy: &PunishPolicy) {
    if policy.loop_forgiveness == 0 {
        return;
    }
    punished.retain(|_, counter| {
        *counter = counter.saturating_sub(policy.loop_forgiveness);
        *counter > 0
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Address = Address([0xA; 20]);
    const B: Address = Address([0xB; 20]);
    const C: Address = Address([0xC; 20]);

    fn set(v: Vec<Address>) -> BTreeSet<Address> {
        v.into_iter().collect()
    }

    #[test]
    fn test_trantor_same_loop_vectors() {
        let q = [A, B, C];
        assert_eq!(set(signer_missing_trantor(&A, &B, &q, None)), set(vec![]));
        assert_eq!(set(signer_missing_trantor(&A, &C, &q, None)), set(vec![B]));
        assert_eq!(set(signer_missing_trantor(&C, &B, &q, None)), set(vec![A]));
        assert_eq!(set(signer_missing_trantor(&C, &C, &q, None)), set(vec![A, B]));
    }

    #[test]
    fn test_trantor_cross_loop_vectors() {
        let q = [A, B, C];
        let prev = [C, A, B];
        assert_eq!(set(signer_missing_trantor(&B, &B, &q, Some(&prev))), set(vec![A]));
        assert_eq!(set(signer_missing_trantor(&A, &C, &q, Some(&prev))), set(vec![]));
        assert_eq!(set(signer_missing_trantor(&C, &A, &q, Some(&prev))), set(vec![B, C]));
    }

    #[test]
    fn test_trantor_unknown_signer_misses_nobody() {
        let q = [A, B, C];
        let stranger = Address([0xD; 20]);
        assert!(signer_missing_trantor(&stranger, &B, &q, None).is_empty());
        assert!(signer_missing_trantor(&A, &stranger, &q, None).is_empty());
        assert!(signer_missing_trantor(&A, &B, &[], None).is_empty());
    }

    #[test]
    fn test_trantor_never_lists_current_or_duplicates() {
        let q = [A, B, A, C];
        let missing = signer_missing_trantor(&C, &C, &q, None);
        assert!(!missing.contains(&C));
        assert_eq!(missing.len(), set(missing.clone()).len());
    }

    #[test]
    fn test_legacy_vectors() {
        let q = [A, B, C];
        assert!(signer_missing_legacy(&A, &B, &q, false).is_empty());
        assert_eq!(signer_missing_legacy(&A, &C, &q, false), vec![B]);
        assert!(signer_missing_legacy(&C, &A, &q, true).is_empty());
        assert!(signer_missing_legacy(&C, &B, &q, true).is_empty());
        assert_eq!(signer_missing_legacy(&B, &C, &q, true), vec![C]);
        assert_eq!(signer_missing_legacy(&A, &C, &q, true), vec![B, C]);
    }

    #[test]
    fn test_dispatch_is_height_gated() {
        let q = [A, B, C];
        let prev = [C, A, B];
        // A then C across a loop boundary: legacy counts B, left over at the
        // end of the old queue, Trantor counts nobody
        assert_eq!(
            set(signer_missing(5, 10, &A, &C, &q, Some(&prev), true)),
            set(vec![B])
        );
        assert!(signer_missing(10, 10, &A, &C, &q, Some(&prev), true).is_empty());
        // Without a loop change the previous queue is ignored
        assert_eq!(
            set(signer_missing(10, 10, &C, &B, &q, Some(&prev), false)),
            set(vec![A])
        );
    }

    #[test]
    fn test_slot_and_loop_timing() {
        // 3 signers, 3-second slots → 9-second loops starting at t=100
        assert_eq!(slot_at(100, 100, 3, 3), 0);
        assert_eq!(slot_at(103, 100, 3, 3), 1);
        assert_eq!(slot_at(108, 100, 3, 3), 2);
        assert_eq!(loops_elapsed(108, 100, 3, 3), 0);
        assert_eq!(loops_elapsed(109, 100, 3, 3), 1);
        assert_eq!(loops_elapsed(127, 100, 3, 3), 3);
    }

    #[test]
    fn test_election_ranks_and_fills() {
        let mut tally = BTreeMap::new();
        tally.insert(A, 300u128);
        tally.insert(B, 200);
        tally.insert(C, 100);
        let seed = keccak256(b"parent");

        let queue = elect_queue(&tally, &BTreeMap::new(), 0, 2, &seed);
        assert_eq!(set(queue.clone()), set(vec![A, B]));
        assert_eq!(queue.len(), 2);

        let queue = elect_queue(&tally, &BTreeMap::new(), 0, 5, &seed);
        assert_eq!(queue.len(), 5);
        assert_eq!(queue[3], queue[0]);
        assert_eq!(queue[4], queue[1]);
    }

    #[test]
    fn test_election_is_deterministic_and_seeded() {
        let tally: BTreeMap<Address, u128> = (1..=8u8).map(|i| (Address([i; 20]), 10)).collect();
        let s1 = keccak256(b"one");
        let a = elect_queue(&tally, &BTreeMap::new(), 0, 8, &s1);
        let b = elect_queue(&tally, &BTreeMap::new(), 0, 8, &s1);
        assert_eq!(a, b);
        let c = elect_queue(&tally, &BTreeMap::new(), 0, 8, &keccak256(b"two"));
        assert_eq!(set(a.clone()), set(c.clone()));
    }

    #[test]
    fn test_election_skips_kicked() {
        let mut tally = BTreeMap::new();
        tally.insert(A, 10u128);
        tally.insert(B, 10);
        let mut punished = BTreeMap::new();
        punished.insert(A, 50u64);
        let queue = elect_queue(&tally, &punished, 50, 2, &Hash::ZERO);
        assert_eq!(queue, vec![B, B]);
        assert!(elect_queue(&BTreeMap::new(), &punished, 50, 2, &Hash::ZERO).is_empty());
    }

    #[test]
    fn test_punishment_increment_and_reset() {
        let policy = PunishPolicy {
            miss_increment: 2,
            loop_forgiveness: 1,
            kick_threshold: 0,
        };
        let mut punished = BTreeMap::new();
        apply_punishment(&mut punished, &[A, B], &C, &policy);
        apply_punishment(&mut punished, &[A], &C, &policy);
        assert_eq!(punished.get(&A), Some(&4));
        assert_eq!(punished.get(&B), Some(&2));

        apply_punishment(&mut punished, &[], &A, &policy);
        assert_eq!(punished.get(&A), None);

        forgive_loop(&mut punished, &policy);
        assert_eq!(punished.get(&B), Some(&1));
        forgive_loop(&mut punished, &policy);
        assert!(punished.is_empty());
    }
}
