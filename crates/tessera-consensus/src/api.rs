// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - SNAPSHOT QUERY API
//
// Read-only views over snapshots and headers, JSON-serializable for the
// embedding node's RPC layer. Recent snapshots are kept in a small
// insertion-ordered cache behind a RwLock so concurrent queries only take
// the write lock to insert; a miss replays through the engine.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use tessera_core::ful::FulState;
use tessera_core::header::{ChainHeaderReader, FlowReportRecord, Header, RewardKind};
use tessera_core::{Address, Hash};

use crate::engine::Engine;
use crate::error::ConsensusError;
use crate::flow::{FlowCounters, FlowMinerReport};
use crate::lock_profit::{LockData, PledgeItem};
use crate::snapshot::Snapshot;

pub const SNAPSHOT_CACHE_SIZE: usize = 32;

// ─────────────────────────────────────────────────────────────────
// RESPONSES
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSigner {
    pub loop_start_time: u64,
    pub signers: Vec<Address>,
    pub punished: BTreeMap<Address, u64>,
}

/// Locked rewards of one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockBalanceView {
    /// Accrued, not yet converted into pledge items
    pub reward_balance: u128,
    pub lock_balance: Vec<PledgeItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRelease {
    pub candidate_pledge: BTreeMap<Address, u128>,
    pub flow_pledge: BTreeMap<Address, u128>,
    pub reward_lock: BTreeMap<Address, LockBalanceView>,
    pub flow_lock: BTreeMap<Address, LockBalanceView>,
    pub bandwidth_lock: BTreeMap<Address, LockBalanceView>,
}

/// Selects one section of `SnapshotRelease`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePart {
    CandidatePledge,
    FlowPledge,
    Lock(RewardKind),
}

impl FromStr for ReleasePart {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candidatepledge" => Ok(ReleasePart::CandidatePledge),
            "flowminerpledge" => Ok(ReleasePart::FlowPledge),
            "rewardlock" => Ok(ReleasePart::Lock(RewardKind::Signer)),
            "flowlock" => Ok(ReleasePart::Lock(RewardKind::Flow)),
            "bandwidthlock" => Ok(ReleasePart::Lock(RewardKind::Bandwidth)),
            other => Err(ConsensusError::InvalidQuery(format!("unknown release part {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub target: Address,
    pub amount: u128,
    /// Raw flow
    pub flow_value1: u64,
    /// Verified flow
    pub flow_value2: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFlow {
    pub flow_records: Vec<FlowRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFlowMiner {
    pub flow_total: u128,
    pub flow_miner: FlowMinerReport,
    pub flow_miner_totals: BTreeMap<Address, FlowCounters>,
    pub flow_miner_prev: FlowMinerReport,
    pub flow_miner_prev_totals: BTreeMap<Address, FlowCounters>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFlowReport {
    pub flow_report: Vec<FlowReportRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressFul {
    pub balance: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFul {
    pub balances: BTreeMap<Address, u128>,
}

fn lock_view(lock: &LockData, engine: &Engine) -> Result<BTreeMap<Address, LockBalanceView>, ConsensusError> {
    let mut view: BTreeMap<Address, LockBalanceView> = BTreeMap::new();
    for (target, balance) in &lock.reward_balance {
        view.entry(*target).or_default().reward_balance = *balance;
    }
    for item in lock.outstanding_items(engine.store())? {
        view.entry(item.target).or_default().lock_balance.push(item);
    }
    Ok(view)
}

// ─────────────────────────────────────────────────────────────────
// API
// ─────────────────────────────────────────────────────────────────

pub struct SnapshotApi {
    chain: Arc<dyn ChainHeaderReader>,
    engine: Arc<Engine>,
    cache: RwLock<VecDeque<Snapshot>>,
}

impl SnapshotApi {
    pub fn new(chain: Arc<dyn ChainHeaderReader>, engine: Arc<Engine>) -> Self {
        Self {
            chain,
            engine,
            cache: RwLock::new(VecDeque::with_capacity(SNAPSHOT_CACHE_SIZE)),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    fn find_cached(&self, hash: &Hash) -> Option<Snapshot> {
        let cache = self.cache.read().ok()?;
        cache.iter().find(|s| s.hash == *hash).cloned()
    }

    fn snapshot_of(&self, header: &Header) -> Result<Snapshot, ConsensusError> {
        let hash = header.hash();
        if let Some(snap) = self.find_cached(&hash) {
            return Ok(snap);
        }
        let snap = self
            .engine
            .snapshot(self.chain.as_ref(), header.number, &hash)
            .map_err(|e| {
                warn!("⚠️ Snapshot #{} unavailable: {}", header.number, e);
                e
            })?;

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        // Another query may have inserted it meanwhile
        if !cache.iter().any(|s| s.hash == hash) {
            cache.push_back(snap.clone());
            if cache.len() > SNAPSHOT_CACHE_SIZE {
                cache.pop_front();
            }
        }
        Ok(snap)
    }

    fn header_at(&self, number: u64) -> Result<Header, ConsensusError> {
        self.chain
            .header_by_number(number)
            .ok_or_else(|| ConsensusError::UnknownBlock(format!("#{}", number)))
    }

    fn head(&self) -> Result<Header, ConsensusError> {
        self.chain
            .current_header()
            .ok_or_else(|| ConsensusError::UnknownBlock("head".to_string()))
    }

    // ─────────────────────────────────────────────────────────────────
    // SNAPSHOTS
    // ─────────────────────────────────────────────────────────────────

    /// Snapshot at `number`, or at the head when `None`
    pub fn get_snapshot(&self, number: Option<u64>) -> Result<Snapshot, ConsensusError> {
        let header = match number {
            Some(n) => self.header_at(n)?,
            None => self.head()?,
        };
        self.snapshot_of(&header)
    }

    pub fn get_snapshot_at_hash(&self, hash: &Hash) -> Result<Snapshot, ConsensusError> {
        let header = self
            .chain
            .header_by_hash(hash)
            .ok_or_else(|| ConsensusError::UnknownBlock(hash.to_string()))?;
        self.snapshot_of(&header)
    }

    pub fn get_snapshot_at_number(&self, number: u64) -> Result<Snapshot, ConsensusError> {
        self.snapshot_of(&self.header_at(number)?)
    }

    /// Snapshot of the block whose slot covers `target_time`:
    /// `header.time <= target_time < header.time + period`. A target past
    /// the head clamps to the head; a target inside a gap of skipped slots
    /// resolves to the block before the gap.
    pub fn get_snapshot_by_header_time(&self, target_time: u64) -> Result<Snapshot, ConsensusError> {
        let period = self.chain.config().period.max(1);
        let head = self.head()?;
        let target = if target_time > head.time + period {
            head.time
        } else {
            target_time
        };

        let (mut lo, mut hi) = (0u64, head.number);
        let mut header = head;
        loop {
            if header.time <= target && target < header.time + period {
                return self.snapshot_of(&header);
            }
            if header.time <= target {
                lo = lo.max(header.number);
            } else {
                hi = hi.min(header.number);
            }
            if hi <= lo + 1 {
                let floor = self.header_at(lo)?;
                if floor.time <= target {
                    return self.snapshot_of(&floor);
                }
                break;
            }

            // Interpolate assuming one block per period, bisect when the
            // estimate leaves the open interval
            let estimate = if target >= header.time {
                header.number.saturating_add((target - header.time) / period)
            } else {
                header.number.saturating_sub((header.time - target) / period + 1)
            };
            let next = if estimate > lo && estimate < hi {
                estimate
            } else {
                lo + (hi - lo) / 2
            };
            debug!("Header-time search for {}: [{}, {}] → #{}", target, lo, hi, next);
            header = self.header_at(next)?;
        }
        Err(ConsensusError::UnknownBlock(format!("time {}", target_time)))
    }

    // ─────────────────────────────────────────────────────────────────
    // VIEWS
    // ─────────────────────────────────────────────────────────────────

    pub fn get_snapshot_signer_at_number(&self, number: u64) -> Result<SnapshotSigner, ConsensusError> {
        let snap = self.get_snapshot_at_number(number)?;
        Ok(SnapshotSigner {
            loop_start_time: snap.loop_start_time,
            signers: snap.signers,
            punished: snap.punished,
        })
    }

    /// Pledges and locked rewards; `part` selects one section, empty
    /// selects everything
    pub fn get_snapshot_release_at_number(&self, number: u64, part: &str) -> Result<SnapshotRelease, ConsensusError> {
        let selected = if part.is_empty() {
            None
        } else {
            Some(part.parse::<ReleasePart>()?)
        };
        let snap = self.get_snapshot_at_number(number)?;
        let wants = |p: ReleasePart| selected.map_or(true, |s| s == p);

        let mut release = SnapshotRelease::default();
        if wants(ReleasePart::CandidatePledge) {
            release.candidate_pledge = snap.tally.clone();
        }
        if wants(ReleasePart::FlowPledge) {
            release.flow_pledge = snap.flow_pledge.clone();
        }
        for kind in RewardKind::ALL {
            if !wants(ReleasePart::Lock(kind)) {
                continue;
            }
            let view = lock_view(snap.lock.get(kind), &self.engine)?;
            match kind {
                RewardKind::Signer => release.reward_lock = view,
                RewardKind::Flow => release.flow_lock = view,
                RewardKind::Bandwidth => release.bandwidth_lock = view,
            }
        }
        Ok(release)
    }

    /// Flow rewards granted by block `number`
    pub fn get_snapshot_flow_at_number(&self, number: u64) -> Result<SnapshotFlow, ConsensusError> {
        let extra = self.header_at(number)?.decode_extra()?;
        let flow_records = extra
            .lock_reward
            .into_iter()
            .filter(|r| r.kind == RewardKind::Flow)
            .map(|r| FlowRecord {
                target: r.target,
                amount: r.amount,
                flow_value1: r.flow_value1,
                flow_value2: r.flow_value2,
            })
            .collect();
        Ok(SnapshotFlow { flow_records })
    }

    pub fn get_snapshot_flow_miner_at_number(&self, number: u64) -> Result<SnapshotFlowMiner, ConsensusError> {
        let snap = self.get_snapshot_at_number(number)?;
        Ok(SnapshotFlowMiner {
            flow_total: snap.flow_total,
            flow_miner_totals: snap.flow_miner.totals(),
            flow_miner_prev_totals: snap.flow_miner.previous_totals(),
            flow_miner: snap.flow_miner.flow_miner,
            flow_miner_prev: snap.flow_miner.flow_miner_prev,
        })
    }

    /// Flow reports carried by block `number`
    pub fn get_snapshot_flow_report_at_number(&self, number: u64) -> Result<SnapshotFlowReport, ConsensusError> {
        let extra = self.header_at(number)?.decode_extra()?;
        Ok(SnapshotFlowReport {
            flow_report: extra.flow_report,
        })
    }

    pub fn get_ful_balance_at_number(&self, address: &Address, number: u64) -> Result<AddressFul, ConsensusError> {
        let snap = self.get_snapshot_at_number(number)?;
        let state = self.engine.ful_provider().open(snap.ful_root)?;
        Ok(AddressFul {
            balance: state.get(address)?,
        })
    }

    pub fn get_ful_balance(&self, address: &Address) -> Result<AddressFul, ConsensusError> {
        let head = self.head()?;
        self.get_ful_balance_at_number(address, head.number)
    }

    /// Every FUL balance at `number`
    pub fn get_ful_bal_at_number(&self, number: u64) -> Result<SnapshotFul, ConsensusError> {
        let snap = self.get_snapshot_at_number(number)?;
        let state = self.engine.ful_provider().open(snap.ful_root)?;
        Ok(SnapshotFul {
            balances: state.get_all()?,
        })
    }
}
