// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - SNAPSHOT
//
// Consensus state after one block. Snapshot N+1 is derived from snapshot N
// and block N+1's Effect Record only:
//
//   1. loop change (new queue, forgiveness) and missing-signer punishment
//   2. governance records (pledges, stakes, bindings, bandwidth, config)
//   3. flow counters (day rollover, then this block's reports)
//   4. FUL ledger (exchanges credit, verified flow debits) → new root
//   5. lock ledger (grants, day flush, payouts, L1 save, day merge)
//
// `apply` works on a clone; on error the parent snapshot is untouched and
// the caller must not advance.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_core::config::{ConsensusConfig, LockParameter, PerKind};
use tessera_core::ful::{FulError, FulProvider, FulState};
use tessera_core::header::{BindKind, Header, HeaderExtra, RewardKind};
use tessera_core::store::{load_blob, save_blob, try_load_blob, CacheKey, KeyValueStore};
use tessera_core::{is_day_boundary, Address, Hash, WEI_PER_NFC};

use crate::error::ConsensusError;
use crate::flow::{FlowMinerSnap, FUL_PER_MB};
use crate::lock_profit::{LockProfitSnap, RevenueBinding};
use crate::signer::{apply_punishment, forgive_loop, slot_at};

/// Bandwidth a flow miner has claimed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedBandwidth {
    pub isp_qos_id: u32,
    pub bandwidth: u32,
    pub amount: u128,
}

/// Governance-controlled parameters, seeded from the consensus config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub deposit: BTreeMap<RewardKind, u128>,
    pub lock_parameters: PerKind<LockParameter>,
    pub exch_rate: u32,
    pub off_line: u32,
    /// ISP/QoS id → percentage applied to bandwidth rewards
    pub isp_qos: BTreeMap<u32, u32>,
    pub manager_address: BTreeMap<u32, Address>,
}

impl SystemConfig {
    pub fn from_config(config: &ConsensusConfig) -> Self {
        Self {
            deposit: RewardKind::ALL
                .iter()
                .map(|kind| (*kind, config.deposit.get(*kind)))
                .collect(),
            lock_parameters: config.lock.clone(),
            exch_rate: 0,
            off_line: 0,
            isp_qos: BTreeMap::new(),
            manager_address: BTreeMap::new(),
        }
    }

    /// Deposit threshold of a kind, 1 NFC when never configured
    pub fn deposit_for(&self, kind: RewardKind) -> u128 {
        self.deposit.get(&kind).copied().unwrap_or(WEI_PER_NFC)
    }
}

/// Storage and configuration a block transition runs against
pub struct ApplyContext<'a> {
    pub config: &'a ConsensusConfig,
    pub store: &'a dyn KeyValueStore,
    pub ful: &'a dyn FulProvider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub number: u64,
    pub hash: Hash,
    pub time: u64,
    /// Sealer of this block
    pub signer: Address,
    pub loop_start_time: u64,
    pub signers: Vec<Address>,
    /// Queue of the loop before the current one
    pub previous_signers: Option<Vec<Address>>,
    pub tally: BTreeMap<Address, u128>,
    pub punished: BTreeMap<Address, u64>,
    pub confirmed_number: u64,
    pub flow_pledge: BTreeMap<Address, u128>,
    pub bandwidth: BTreeMap<Address, ClaimedBandwidth>,
    /// Bindings redirecting signer rewards
    pub revenue_normal: BTreeMap<Address, RevenueBinding>,
    /// Bindings redirecting flow and bandwidth rewards
    pub revenue_flow: BTreeMap<Address, RevenueBinding>,
    pub flow_miner: FlowMinerSnap,
    /// Flow rewarded since genesis, in MB
    pub flow_total: u128,
    pub system_config: SystemConfig,
    pub lock: LockProfitSnap,
    pub ful_root: Hash,
}

impl Snapshot {
    /// State before block 1
    pub fn genesis(config: &ConsensusConfig, genesis_hash: Hash, ful: &dyn FulProvider) -> Result<Self, ConsensusError> {
        let genesis = &config.genesis;
        let mut state = ful.open(ful.empty_root())?;
        for alloc in &genesis.ful_balances {
            state.add(&alloc.address, alloc.balance)?;
        }
        let ful_root = state.commit()?;

        Ok(Self {
            number: 0,
            hash: genesis_hash,
            time: genesis.time,
            signer: Address::ZERO,
            loop_start_time: genesis.time,
            signers: genesis.signers.clone(),
            previous_signers: None,
            tally: genesis.signers.iter().map(|s| (*s, 0)).collect(),
            punished: BTreeMap::new(),
            confirmed_number: 0,
            flow_pledge: genesis
                .flow_pledges
                .iter()
                .map(|a| (*a, config.deposit.flow))
                .collect(),
            bandwidth: BTreeMap::new(),
            revenue_normal: BTreeMap::new(),
            revenue_flow: BTreeMap::new(),
            flow_miner: FlowMinerSnap::default(),
            flow_total: 0,
            system_config: SystemConfig::from_config(config),
            lock: LockProfitSnap::default(),
            ful_root,
        })
    }

    /// Signer owning the slot of `time`
    pub fn signer_at(&self, time: u64, period: u64) -> Option<Address> {
        if self.signers.is_empty() {
            return None;
        }
        Some(self.signers[slot_at(time, self.loop_start_time, period, self.signers.len())])
    }

    /// Where rewards of `kind` earned by `target` are paid
    pub fn revenue_for(&self, kind: RewardKind, target: &Address) -> RevenueBinding {
        let bindings = match kind {
            RewardKind::Signer => &self.revenue_normal,
            RewardKind::Flow | RewardKind::Bandwidth => &self.revenue_flow,
        };
        bindings
            .get(target)
            .copied()
            .unwrap_or_else(|| RevenueBinding::direct(target))
    }

    // ─────────────────────────────────────────────────────────────────
    // PERSISTENCE
    // ─────────────────────────────────────────────────────────────────

    pub fn store(&self, store: &dyn KeyValueStore) -> Result<(), ConsensusError> {
        save_blob(store, &CacheKey::Snapshot(self.hash), self)?;
        info!("📸 Snapshot #{} persisted ({})", self.number, self.hash);
        Ok(())
    }

    pub fn load(store: &dyn KeyValueStore, hash: &Hash) -> Result<Self, ConsensusError> {
        Ok(load_blob(store, &CacheKey::Snapshot(*hash))?)
    }

    pub fn try_load(store: &dyn KeyValueStore, hash: &Hash) -> Result<Option<Self>, ConsensusError> {
        Ok(try_load_blob(store, &CacheKey::Snapshot(*hash))?)
    }

    // ─────────────────────────────────────────────────────────────────
    // TRANSITION
    // ─────────────────────────────────────────────────────────────────

    /// Derive the snapshot of `header` from this one
    pub fn apply(
        &self,
        header: &Header,
        extra: &HeaderExtra,
        ctx: &ApplyContext<'_>,
    ) -> Result<Snapshot, ConsensusError> {
        let config = ctx.config;
        let number = header.number;
        let day_boundary = is_day_boundary(number, config.period);

        let mut snap = self.clone();
        snap.number = number;
        snap.hash = header.hash();
        snap.time = header.time;
        snap.signer = header.coinbase;

        if extra.loop_start_time != self.loop_start_time {
            snap.previous_signers = Some(self.signers.clone());
            snap.signers = extra.signer_queue.clone();
            snap.loop_start_time = extra.loop_start_time;
            forgive_loop(&mut snap.punished, &config.punish);
        }
        apply_punishment(&mut snap.punished, &extra.signer_missing, &header.coinbase, &config.punish);
        if !extra.signer_missing.is_empty() {
            debug!("Block #{} missing signers: {:?}", number, extra.signer_missing);
        }
        snap.confirmed_number = snap.confirmed_number.max(extra.confirmed_block_number);

        snap.apply_governance(extra);

        if day_boundary {
            snap.flow_miner.rollover();
        }
        for report in &extra.flow_report {
            snap.flow_miner.record(report);
        }

        snap.ful_root = apply_ful(self.ful_root, extra, ctx.ful)?;

        snap.apply_lock_rewards(extra, config, number);
        if day_boundary && number >= config.forks.lock_simplify_block {
            let lock = snap.system_config.lock_parameters.get(RewardKind::Signer);
            let normal = &snap.revenue_normal;
            snap.lock.signer.flush_rewards(number, lock, |target| {
                normal
                    .get(target)
                    .copied()
                    .unwrap_or_else(|| RevenueBinding::direct(target))
            });
        }

        let block_hash = snap.hash;
        for kind in RewardKind::ALL {
            snap.lock
                .get_mut(kind)
                .update_grant_profit(ctx.store, &extra.grant_profit, &block_hash)?;
        }
        if let Some(harvest) = extra.flow_harvest {
            snap.flow_total = snap.flow_total.saturating_add(harvest);
        }
        for kind in RewardKind::ALL {
            snap.lock.get_mut(kind).save_cache_l1(ctx.store, &block_hash)?;
        }
        if day_boundary {
            for kind in RewardKind::ALL {
                snap.lock.get_mut(kind).merge(ctx.store, &block_hash, config.period)?;
            }
        }
        Ok(snap)
    }

    fn apply_governance(&mut self, extra: &HeaderExtra) {
        for pledge in &extra.candidate_pledge {
            let tally = self.tally.entry(pledge.target).or_insert(0);
            *tally = tally.saturating_add(pledge.amount);
        }
        for punish in &extra.candidate_punish {
            if let Some(tally) = self.tally.get_mut(&punish.target) {
                *tally = tally.saturating_sub(punish.amount);
            }
            let counter = self.punished.entry(punish.target).or_insert(0);
            *counter = counter.saturating_add(punish.credit as u64);
        }
        for exit in &extra.candidate_exit {
            self.tally.remove(exit);
            self.punished.remove(exit);
        }

        for stake in &extra.miner_stake {
            let pledge = self.flow_pledge.entry(stake.target).or_insert(0);
            *pledge = pledge.saturating_add(stake.stake);
        }
        for exit in &extra.flow_miner_exit {
            self.flow_pledge.remove(exit);
            self.bandwidth.remove(exit);
        }

        for bind in &extra.device_bind {
            let bindings = match bind.kind {
                BindKind::Signer => &mut self.revenue_normal,
                BindKind::Flow => &mut self.revenue_flow,
            };
            if bind.bind {
                bindings.insert(
                    bind.device,
                    RevenueBinding {
                        revenue_address: bind.revenue,
                        revenue_contract: bind.contract,
                        multi_signature: bind.multi_sign,
                    },
                );
            } else {
                bindings.remove(&bind.device);
            }
        }

        for claim in &extra.claimed_bandwidth {
            self.bandwidth.insert(
                claim.target,
                ClaimedBandwidth {
                    isp_qos_id: claim.isp_qos_id,
                    bandwidth: claim.bandwidth,
                    amount: claim.amount,
                },
            );
        }
        for punish in &extra.bandwidth_punish {
            let cut = punish.punish_percent.min(100) as u64;
            let remaining = match self.bandwidth.get_mut(&punish.target) {
                Some(claim) => {
                    claim.bandwidth = (claim.bandwidth as u64 * (100 - cut) / 100) as u32;
                    claim.bandwidth
                }
                None => continue,
            };
            if remaining == 0 {
                self.bandwidth.remove(&punish.target);
            }
        }

        let system = &mut self.system_config;
        if extra.config_exch_rate != 0 {
            system.exch_rate = extra.config_exch_rate;
        }
        if extra.config_off_line != 0 {
            system.off_line = extra.config_off_line;
        }
        for deposit in &extra.config_deposit {
            system.deposit.insert(deposit.who, deposit.amount);
        }
        for qos in &extra.config_isp_qos {
            system.isp_qos.insert(qos.isp_id, qos.qos);
        }
        for params in &extra.lock_parameters {
            let lock = LockParameter {
                lock_period: params.lock_period,
                rls_period: params.rls_period,
                interval: params.interval,
            };
            match params.who {
                RewardKind::Signer => system.lock_parameters.signer = lock,
                RewardKind::Flow => system.lock_parameters.flow = lock,
                RewardKind::Bandwidth => system.lock_parameters.bandwidth = lock,
            }
        }
        for manager in &extra.manager_address {
            system.manager_address.insert(manager.who, manager.target);
        }
    }

    fn apply_lock_rewards(&mut self, extra: &HeaderExtra, config: &ConsensusConfig, number: u64) {
        for grant in &extra.lock_reward {
            let revenue = self.revenue_for(grant.kind, &grant.target);
            let deposit = self.system_config.deposit_for(grant.kind);
            let lock = self.system_config.lock_parameters.get(grant.kind);
            let simplified = grant.kind == RewardKind::Signer && number >= config.forks.lock_simplify_block;
            self.lock
                .get_mut(grant.kind)
                .add_reward(grant, number, deposit, lock, &revenue, simplified);
        }
    }
}

/// FUL effects of one block on top of `root`: exchanges credit, verified
/// flow debits its cost (draining to zero when the balance no longer covers
/// it). Returns the committed root.
pub fn apply_ful(root: Hash, extra: &HeaderExtra, provider: &dyn FulProvider) -> Result<Hash, ConsensusError> {
    let mut state = provider.open(root)?;
    for exchange in &extra.exchange_nfc {
        state.add(&exchange.target, exchange.amount)?;
    }
    for report in &extra.flow_report {
        for item in &report.report_content {
            if item.flow_value2 == 0 {
                continue;
            }
            let cost = (item.flow_value2 as u128).saturating_mul(FUL_PER_MB);
            match state.sub(&item.target, cost) {
                Ok(()) => {}
                Err(FulError::InsufficientBalance { balance, .. }) => {
                    warn!(
                        "⚠️ FUL of {} drained: balance {} below cost {}",
                        item.target, balance, cost
                    );
                    state.set(&item.target, 0)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(state.commit()?)
}
