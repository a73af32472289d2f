// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - HEADER-EXTRA VERIFIER
//
// Compares the locally recomputed Effect Record with the producer's claim,
// category by category. Record lists are multisets: order is irrelevant,
// every record on one side must pair with exactly one equal record on the
// other. The first mismatch rejects the block.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::fmt::Debug;
use tessera_core::header::{FlowReportItem, FlowReportRecord, HeaderExtra};

use crate::error::VerifyError;

/// Pair every record of `from` with an unused equal record of `into`
fn contained<T: Debug>(
    category: &'static str,
    from: &[T],
    into: &[T],
    eq: &impl Fn(&T, &T) -> bool,
) -> Result<(), VerifyError> {
    let mut used = vec![false; into.len()];
    for record in from {
        let slot = into
            .iter()
            .enumerate()
            .position(|(i, other)| !used[i] && eq(record, other));
        match slot {
            Some(i) => used[i] = true,
            None => {
                return Err(VerifyError::Unmatched {
                    category,
                    record: format!("{:?}", record),
                })
            }
        }
    }
    Ok(())
}

/// Multiset equality of two record lists under `eq`
pub fn verify_records<T: Debug>(
    category: &'static str,
    current: &[T],
    claimed: &[T],
    eq: impl Fn(&T, &T) -> bool,
) -> Result<(), VerifyError> {
    if current.len() != claimed.len() {
        return Err(VerifyError::LengthMismatch {
            category,
            current: current.len(),
            claimed: claimed.len(),
        });
    }
    contained(category, current, claimed, &eq)?;
    contained(category, claimed, current, &eq)
}

fn verify_scalar<T: PartialEq + Debug>(category: &'static str, current: &T, claimed: &T) -> Result<(), VerifyError> {
    if current != claimed {
        return Err(VerifyError::ScalarMismatch {
            category,
            current: format!("{:?}", current),
            claimed: format!("{:?}", claimed),
        });
    }
    Ok(())
}

fn verify_optional<T: PartialEq + Debug>(
    category: &'static str,
    current: &Option<T>,
    claimed: &Option<T>,
) -> Result<(), VerifyError> {
    match (current, claimed) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(VerifyError::CurrentMissing { category }),
        (Some(_), None) => Err(VerifyError::ClaimedMissing { category }),
        (Some(a), Some(b)) => verify_scalar(category, a, b),
    }
}

/// Flow reports match when their header fields agree and their items are
/// equal as multisets
pub fn flow_reports_equal(a: &FlowReportRecord, b: &FlowReportRecord) -> bool {
    a.chain_hash == b.chain_hash
        && a.report_time == b.report_time
        && verify_records::<FlowReportItem>("report_content", &a.report_content, &b.report_content, |x, y| x == y)
            .is_ok()
}

macro_rules! verify_lists {
    ($current:expr, $claimed:expr, $($field:ident),+ $(,)?) => {
        $(
            verify_records(stringify!($field), &$current.$field, &$claimed.$field, |a, b| a == b)?;
        )+
    };
}

/// Verify every category except the FUL root, which the engine checks
/// against its own trie
pub fn verify_header_extra(current: &HeaderExtra, claimed: &HeaderExtra) -> Result<(), VerifyError> {
    verify_scalar("loop_start_time", &current.loop_start_time, &claimed.loop_start_time)?;
    if current.signer_queue.len() != claimed.signer_queue.len() {
        return Err(VerifyError::LengthMismatch {
            category: "signer_queue",
            current: current.signer_queue.len(),
            claimed: claimed.signer_queue.len(),
        });
    }
    // Queue order decides slots, so it is compared as a sequence
    verify_scalar("signer_queue", &current.signer_queue, &claimed.signer_queue)?;
    verify_lists!(current, claimed, signer_missing);
    verify_scalar(
        "confirmed_block_number",
        &current.confirmed_block_number,
        &claimed.confirmed_block_number,
    )?;
    verify_lists!(
        current,
        claimed,
        lock_reward,
        exchange_nfc,
        device_bind,
        candidate_pledge,
        candidate_punish,
        miner_stake,
        candidate_exit,
        claimed_bandwidth,
        flow_miner_exit,
        bandwidth_punish,
    );
    verify_scalar("config_exch_rate", &current.config_exch_rate, &claimed.config_exch_rate)?;
    verify_scalar("config_off_line", &current.config_off_line, &claimed.config_off_line)?;
    verify_lists!(
        current,
        claimed,
        config_deposit,
        config_isp_qos,
        lock_parameters,
        manager_address,
    );
    verify_optional("flow_harvest", &current.flow_harvest, &claimed.flow_harvest)?;
    verify_lists!(current, claimed, grant_profit);
    verify_records("flow_report", &current.flow_report, &claimed.flow_report, flow_reports_equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::header::{LockRewardRecord, RewardKind};
    use tessera_core::{keccak256, Address};

    fn reward(b: u8, amount: u128) -> LockRewardRecord {
        LockRewardRecord {
            target: Address([b; 20]),
            amount,
            kind: RewardKind::Signer,
            flow_value1: 0,
            flow_value2: 0,
        }
    }

    fn item(b: u8, v1: u64) -> FlowReportItem {
        FlowReportItem {
            target: Address([b; 20]),
            report_number: 7,
            flow_value1: v1,
            flow_value2: 0,
        }
    }

    fn sample() -> HeaderExtra {
        HeaderExtra {
            loop_start_time: 100,
            signer_queue: vec![Address([1; 20]), Address([2; 20])],
            lock_reward: vec![reward(1, 10), reward(2, 20), reward(1, 10)],
            candidate_exit: vec![Address([3; 20]), Address([4; 20])],
            flow_report: vec![FlowReportRecord {
                chain_hash: keccak256(b"tx"),
                report_time: 5,
                report_content: vec![item(1, 3), item(2, 4)],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_identical_records_verify() {
        assert_eq!(verify_header_extra(&sample(), &sample()), Ok(()));
        assert_eq!(verify_header_extra(&HeaderExtra::default(), &HeaderExtra::default()), Ok(()));
    }

    #[test]
    fn test_order_is_irrelevant() {
        let current = sample();
        let mut claimed = sample();
        claimed.lock_reward.reverse();
        claimed.candidate_exit.reverse();
        claimed.flow_report[0].report_content.reverse();
        assert_eq!(verify_header_extra(&current, &claimed), Ok(()));
    }

    #[test]
    fn test_removed_record_names_category() {
        let current = sample();
        let mut claimed = sample();
        claimed.lock_reward.pop();
        let err = verify_header_extra(&current, &claimed).unwrap_err();
        assert_eq!(err.category(), "lock_reward");
        assert!(matches!(err, VerifyError::LengthMismatch { current: 3, claimed: 2, .. }));

        let mut current = sample();
        current.candidate_exit.pop();
        let err = verify_header_extra(&current, &sample()).unwrap_err();
        assert_eq!(err.category(), "candidate_exit");
    }

    #[test]
    fn test_duplicates_count_as_multiset() {
        let current = vec![reward(1, 10), reward(1, 10), reward(2, 20)];
        let claimed = vec![reward(1, 10), reward(2, 20), reward(2, 20)];
        let err = verify_records("lock_reward", &current, &claimed, |a, b| a == b).unwrap_err();
        assert!(matches!(err, VerifyError::Unmatched { category: "lock_reward", .. }));
    }

    #[test]
    fn test_changed_amount_is_unmatched() {
        let current = sample();
        let mut claimed = sample();
        claimed.lock_reward[1].amount = 21;
        assert!(matches!(
            verify_header_extra(&current, &claimed),
            Err(VerifyError::Unmatched { category: "lock_reward", .. })
        ));
    }

    #[test]
    fn test_nested_report_items_compared() {
        let current = sample();
        let mut claimed = sample();
        claimed.flow_report[0].report_content[0].flow_value1 = 99;
        assert!(matches!(
            verify_header_extra(&current, &claimed),
            Err(VerifyError::Unmatched { category: "flow_report", .. })
        ));
    }

    #[test]
    fn test_flow_harvest_presence() {
        let mut current = sample();
        let claimed = sample();
        current.flow_harvest = Some(10);
        assert_eq!(
            verify_header_extra(&current, &claimed),
            Err(VerifyError::ClaimedMissing { category: "flow_harvest" })
        );
        assert_eq!(
            verify_header_extra(&claimed, &current),
            Err(VerifyError::CurrentMissing { category: "flow_harvest" })
        );
        let mut other = sample();
        other.flow_harvest = Some(11);
        assert!(matches!(
            verify_header_extra(&current, &other),
            Err(VerifyError::ScalarMismatch { category: "flow_harvest", .. })
        ));
    }

    #[test]
    fn test_signer_queue_order_matters() {
        let current = sample();
        let mut claimed = sample();
        claimed.signer_queue.reverse();
        assert!(matches!(
            verify_header_extra(&current, &claimed),
            Err(VerifyError::ScalarMismatch { category: "signer_queue", .. })
        ));
    }

    #[test]
    fn test_scalar_config_mismatch() {
        let current = sample();
        let mut claimed = sample();
        claimed.config_exch_rate = 7;
        assert!(matches!(
            verify_header_extra(&current, &claimed),
            Err(VerifyError::ScalarMismatch { category: "config_exch_rate", .. })
        ));
    }
}
