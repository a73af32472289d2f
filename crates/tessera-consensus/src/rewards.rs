// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - REWARD ENGINE
//
// Three emission schedules, all pure functions of (block number, period,
// configuration), all paid through the lock ledger rather than credited:
//
//   Block      105,000,000 NFC total, yearly factor 2^(-1/6),  every block
//   Bandwidth  210,000,000 NFC total, yearly factor 2^(-1/12), daily pool
//   Flow       1 NFC per 60 GB, 1.5498% fewer wei per MB each exabyte mined
//
// Money is u128 wei with truncating integer division. The only float is the
// block schedule's yearly share, 2^(-(Y-1)/6) - 2^(-Y/6), which is rounded to
// 16 decimal places before it touches an amount.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use tessera_core::config::BandwidthTier;
use tessera_core::header::{LockRewardRecord, RewardKind};
use tessera_core::{blocks_per_year, Address, WEI_PER_NFC};

use crate::flow::FlowCounters;
use crate::snapshot::ClaimedBandwidth;

/// Fixed-point scale of the decay factors
pub const REWARD_SCALE: u128 = 1_000_000_000_000_000_000;

pub const BLOCK_REWARD_TOTAL: u128 = 105_000_000 * WEI_PER_NFC;
/// Fixed-point scale of the block schedule's yearly share
pub const BLOCK_SHARE_SCALE: u128 = 10_000_000_000_000_000;

pub const BANDWIDTH_REWARD_TOTAL: u128 = 210_000_000 * WEI_PER_NFC;
/// 2^(-1/12) at 10^18
pub const BANDWIDTH_REWARD_DECAY: u128 = 943_874_312_681_693_496;

pub const DAYS_PER_YEAR: u128 = 365;

/// Wei per MB of flow before the first exabyte: 1 NFC buys 60 GB
pub const FLOW_BASE_RATE: u128 = WEI_PER_NFC / (60 * 1024);
/// One exabyte, in MB
pub const FLOW_BAND_MB: u128 = 1 << 40;
pub const FLOW_BAND_RATIO_NUM: u128 = 984_502;
pub const FLOW_BAND_RATIO_DEN: u128 = 1_000_000;

/// Share of the tier reward kept for claims whose ISP/QoS id is unknown
pub const DEFAULT_QOS_PERCENT: u32 = 100;

/// floor(a * b / c) without overflowing on a * b when a is large
pub fn mul_div(a: u128, b: u128, c: u128) -> u128 {
    if c == 0 {
        return 0;
    }
    (a / c)
        .saturating_mul(b)
        .saturating_add((a % c).saturating_mul(b) / c)
}

/// Emission year of a block: ceil(number / blocks_per_year), at least 1
pub fn reward_year(number: u64, period: u64) -> u64 {
    let bpy = blocks_per_year(period);
    number.div_ceil(bpy).max(1)
}

/// ratio^years at REWARD_SCALE, truncating after every step
pub fn decay_factor(ratio: u128, years: u64) -> u128 {
    let mut factor = REWARD_SCALE;
    for _ in 0..years {
        factor = factor * ratio / REWARD_SCALE;
        if factor == 0 {
            break;
        }
    }
    factor
}

/// Amount emitted in `year` by a geometric schedule summing to `total`
pub fn yearly_emission(total: u128, ratio: u128, year: u64) -> u128 {
    let first_year = mul_div(total, REWARD_SCALE - ratio, REWARD_SCALE);
    mul_div(first_year, decay_factor(ratio, year.saturating_sub(1)), REWARD_SCALE)
}

// ─────────────────────────────────────────────────────────────────
// BLOCK REWARD
// ─────────────────────────────────────────────────────────────────

/// Share of the block total emitted in `year`, at BLOCK_SHARE_SCALE
pub fn block_year_share(year: u64) -> u128 {
    let y = year.max(1) as f64;
    let share = 2f64.powf(-(y - 1.0) / 6.0) - 2f64.powf(-y / 6.0);
    (share * BLOCK_SHARE_SCALE as f64).round() as u128
}

pub fn block_reward(number: u64, period: u64) -> u128 {
    let year = reward_year(number, period);
    let yearly = mul_div(BLOCK_REWARD_TOTAL, block_year_share(year), BLOCK_SHARE_SCALE);
    yearly / blocks_per_year(period) as u128
}

/// Grant the block reward to the coinbase
pub fn accumulate_block_reward(
    records: &mut Vec<LockRewardRecord>,
    coinbase: &Address,
    number: u64,
    period: u64,
) {
    let amount = block_reward(number, period);
    if amount == 0 {
        return;
    }
    records.push(LockRewardRecord {
        target: *coinbase,
        amount,
        kind: RewardKind::Signer,
        flow_value1: 0,
        flow_value2: 0,
    });
}

// ─────────────────────────────────────────────────────────────────
// BANDWIDTH REWARD
// ─────────────────────────────────────────────────────────────────

pub fn bandwidth_daily_pool(number: u64, period: u64) -> u128 {
    let year = reward_year(number, period);
    yearly_emission(BANDWIDTH_REWARD_TOTAL, BANDWIDTH_REWARD_DECAY, year) / DAYS_PER_YEAR
}

/// Per-mille of the daily pool earned by a claim: highest tier reached, 0 below the first
pub fn bandwidth_share(bandwidth: u32, tiers: &[BandwidthTier]) -> u32 {
    tiers
        .iter()
        .filter(|t| bandwidth >= t.bandwidth)
        .map(|t| t.per_mille)
        .last()
        .unwrap_or(0)
}

pub fn bandwidth_reward(
    number: u64,
    period: u64,
    bandwidth: u32,
    tiers: &[BandwidthTier],
    qos_percent: u32,
) -> u128 {
    let share = bandwidth_share(bandwidth, tiers) as u128;
    let tier_reward = bandwidth_daily_pool(number, period) * share / 1000;
    tier_reward * qos_percent as u128 / 100
}

/// Bandwidth rewards for every address that mined flow during the day and
/// holds a bandwidth claim
pub fn accumulate_bandwidth_rewards(
    records: &mut Vec<LockRewardRecord>,
    flows: &BTreeMap<Address, FlowCounters>,
    claims: &BTreeMap<Address, ClaimedBandwidth>,
    isp_qos: &BTreeMap<u32, u32>,
    tiers: &[BandwidthTier],
    number: u64,
    period: u64,
) {
    for (target, counters) in flows {
        if counters.flow_value1 == 0 {
            continue;
        }
        let claim = match claims.get(target) {
            Some(c) => c,
            None => continue,
        };
        let qos = isp_qos
            .get(&claim.isp_qos_id)
            .copied()
            .unwrap_or(DEFAULT_QOS_PERCENT);
        let amount = bandwidth_reward(number, period, claim.bandwidth, tiers, qos);
        if amount == 0 {
            continue;
        }
        records.push(LockRewardRecord {
            target: *target,
            amount,
            kind: RewardKind::Bandwidth,
            flow_value1: counters.flow_value1,
            flow_value2: counters.flow_value2,
        });
    }
}

// ─────────────────────────────────────────────────────────────────
// FLOW REWARD
// ─────────────────────────────────────────────────────────────────

/// Wei per MB once `total_flow_mb` has been mined network-wide
pub fn flow_rate(total_flow_mb: u128) -> u128 {
    let bands = total_flow_mb / FLOW_BAND_MB;
    let mut rate = FLOW_BASE_RATE;
    let mut band = 0u128;
    while band < bands && rate > 0 {
        rate = rate * FLOW_BAND_RATIO_NUM / FLOW_BAND_RATIO_DEN;
        band += 1;
    }
    rate
}

/// Flow rewards of a completed day.
///
/// Each address earns `flow_value1 × rate`; when the sum exceeds
/// `daily_pool` every address gets its proportional share of the pool
/// instead. Returns the flow (MB) that was rewarded.
pub fn accumulate_flow_rewards(
    records: &mut Vec<LockRewardRecord>,
    flows: &BTreeMap<Address, FlowCounters>,
    total_flow_mb: u128,
    daily_pool: u128,
) -> u128 {
    let rate = flow_rate(total_flow_mb);
    let paying: Vec<(&Address, &FlowCounters)> =
        flows.iter().filter(|(_, c)| c.flow_value1 > 0).collect();
    let day_flow: u128 = paying.iter().map(|(_, c)| c.flow_value1 as u128).sum();
    let uncapped: u128 = day_flow.saturating_mul(rate);
    let capped = uncapped > daily_pool;

    let mut harvested = 0u128;
    for (target, counters) in paying {
        let flow = counters.flow_value1 as u128;
        let amount = if capped {
            mul_div(daily_pool, flow, day_flow)
        } else {
            flow * rate
        };
        if amount == 0 {
            continue;
        }
        harvested += flow;
        records.push(LockRewardRecord {
            target: *target,
            amount,
            kind: RewardKind::Flow,
            flow_value1: counters.flow_value1,
            flow_value2: counters.flow_value2,
        });
    }
    harvested
}
