// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - LOCK / PROFIT LEDGER
//
// Rewards are never credited directly. Per (target, kind):
//
//   Accumulating → Locked → Releasing → Settled
//
// 1. Grants add to `reward_balance` until the kind's deposit threshold
// 2. The whole balance becomes a PledgeItem keyed by the current height
// 3. From `start + lock_period` days the item vests in `rls_period /
//    interval` equal steps; `pay_profit` reports what is due
// 4. Confirmed payouts raise `playment`; a fully paid item is deleted
//
// Outstanding items live in three tiers: the in-memory map, per-block L1
// blobs and one merged L2 blob. Every block flushes memory into a new L1 blob;
// every day boundary folds L1 and L2 into a new day-bucketed L2 blob.
// A store failure aborts the operation before any field of LockData changes.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_core::config::LockParameter;
use tessera_core::header::{GrantProfitRecord, LockRewardRecord, RewardKind};
use tessera_core::store::{load_blob, save_blob, CacheKey, KeyValueStore, StoreError};
use tessera_core::{blocks_per_day, Address, Hash};

use crate::rewards::mul_div;

/// Where payouts of an item go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevenueBinding {
    pub revenue_address: Address,
    pub revenue_contract: Address,
    pub multi_signature: Address,
}

impl RevenueBinding {
    /// Unbound target: paid to itself
    pub fn direct(target: &Address) -> Self {
        Self {
            revenue_address: *target,
            revenue_contract: Address::ZERO,
            multi_signature: Address::ZERO,
        }
    }
}

/// A time-locked, partially paid reward grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PledgeItem {
    pub target: Address,
    pub revenue_address: Address,
    pub revenue_contract: Address,
    pub multi_signature: Address,
    pub amount: u128,
    /// Paid so far, never above `amount`
    pub playment: u128,
    pub lock_period: u64,
    pub rls_period: u64,
    pub interval: u64,
    pub start_high: u64,
    pub kind: RewardKind,
}

/// Identity of an item across all three tiers; payouts address items by it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ItemKey {
    pub target: Address,
    pub start_high: u64,
    pub kind: RewardKind,
    pub revenue_contract: Address,
    pub multi_signature: Address,
}

impl PledgeItem {
    pub fn key(&self) -> ItemKey {
        ItemKey {
            target: self.target,
            start_high: self.start_high,
            kind: self.kind,
            revenue_contract: self.revenue_contract,
            multi_signature: self.multi_signature,
        }
    }

    pub fn outstanding(&self) -> u128 {
        self.amount.saturating_sub(self.playment)
    }

    fn absorb(&mut self, other: &PledgeItem) {
        self.amount = self.amount.saturating_add(other.amount);
        self.playment = self.playment.saturating_add(other.playment);
    }
}

impl From<&GrantProfitRecord> for ItemKey {
    fn from(grant: &GrantProfitRecord) -> Self {
        ItemKey {
            target: grant.miner_address,
            start_high: grant.block_number,
            kind: grant.which,
            revenue_contract: grant.revenue_contract,
            multi_signature: grant.multi_signature,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// RELEASE SCHEDULE
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Lock window still closed; carries the outstanding amount
    Locked(u128),
    /// Payable now
    Due(u128),
    /// Unlocked, nothing new vested since the last payout
    Idle,
}

/// Release state of `item` at height `number`
pub fn release_at(item: &PledgeItem, number: u64, period: u64) -> Release {
    let bpd = blocks_per_day(period);
    let unlock = item
        .start_high
        .saturating_add(item.lock_period.saturating_mul(bpd));
    if number < unlock {
        return Release::Locked(item.outstanding());
    }
    let vested = if item.rls_period == 0 {
        item.amount
    } else {
        let interval = if item.interval == 0 {
            item.rls_period
        } else {
            item.interval
        };
        let steps = (item.rls_period / interval).max(1);
        let elapsed = (number - unlock) / interval.saturating_mul(bpd).max(1) + 1;
        mul_div(item.amount, elapsed.min(steps) as u128, steps as u128)
    };
    match vested.saturating_sub(item.playment) {
        0 => Release::Idle,
        due => Release::Due(due),
    }
}

/// Blocks at which kind-specific payouts run
pub fn is_payout_block(number: u64, period: u64, offset: u64) -> bool {
    number % blocks_per_day(period) == offset
}

/// Output of one payout run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayProfit {
    /// Payable now, to be declared as grant-profit records
    pub due: Vec<GrantProfitRecord>,
    /// Still locked, with the whole outstanding amount
    pub scheduled: Vec<GrantProfitRecord>,
}

fn grant_for(item: &PledgeItem, amount: u128) -> GrantProfitRecord {
    GrantProfitRecord {
        which: item.kind,
        miner_address: item.target,
        block_number: item.start_high,
        amount,
        revenue_address: item.revenue_address,
        revenue_contract: item.revenue_contract,
        multi_signature: item.multi_signature,
    }
}

// ─────────────────────────────────────────────────────────────────
// LEDGER
// ─────────────────────────────────────────────────────────────────

/// Ledger of one reward kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockData {
    pub kind: RewardKind,
    /// Grants not yet past the deposit threshold
    pub reward_balance: BTreeMap<Address, u128>,
    /// Items created since the last L1 flush, by target then start height
    pub lock_balance: BTreeMap<Address, BTreeMap<u64, PledgeItem>>,
    /// Per-block checkpoints not yet merged, oldest first
    pub cache_l1: Vec<Hash>,
    pub cache_l2: Option<Hash>,
}

impl LockData {
    pub fn new(kind: RewardKind) -> Self {
        Self {
            kind,
            reward_balance: BTreeMap::new(),
            lock_balance: BTreeMap::new(),
            cache_l1: Vec::new(),
            cache_l2: None,
        }
    }

    fn lock_item(
        &mut self,
        target: &Address,
        amount: u128,
        number: u64,
        lock: LockParameter,
        revenue: &RevenueBinding,
    ) {
        let kind = self.kind;
        self.lock_balance
            .entry(*target)
            .or_default()
            .entry(number)
            .and_modify(|item| item.amount = item.amount.saturating_add(amount))
            .or_insert_with(|| PledgeItem {
                target: *target,
                revenue_address: revenue.revenue_address,
                revenue_contract: revenue.revenue_contract,
                multi_signature: revenue.multi_signature,
                amount,
                playment: 0,
                lock_period: lock.lock_period,
                rls_period: lock.rls_period,
                interval: lock.interval,
                start_high: number,
                kind,
            });
    }

    /// Accumulate one grant.
    ///
    /// With `simplified` the grant is locked at once; otherwise it waits in
    /// `reward_balance` until the running total reaches `deposit`.
    pub fn add_reward(
        &mut self,
        grant: &LockRewardRecord,
        number: u64,
        deposit: u128,
        lock: LockParameter,
        revenue: &RevenueBinding,
        simplified: bool,
    ) {
        if grant.amount == 0 {
            return;
        }
        if simplified {
            self.lock_item(&grant.target, grant.amount, number, lock, revenue);
            return;
        }
        let balance = self.reward_balance.entry(grant.target).or_insert(0);
        *balance = balance.saturating_add(grant.amount);
        if *balance >= deposit {
            let amount = *balance;
            self.reward_balance.remove(&grant.target);
            self.lock_item(&grant.target, amount, number, lock, revenue);
        }
    }

    /// Lock every residual balance regardless of the threshold
    pub fn flush_rewards<F>(&mut self, number: u64, lock: LockParameter, revenue_of: F)
    where
        F: Fn(&Address) -> RevenueBinding,
    {
        let balances = std::mem::take(&mut self.reward_balance);
        for (target, amount) in balances {
            if amount > 0 {
                self.lock_item(&target, amount, number, lock, &revenue_of(&target));
            }
        }
    }

    /// Union of L2, L1 and memory; items sharing a key are summed
    pub fn load_items(
        &self,
        store: &dyn KeyValueStore,
    ) -> Result<BTreeMap<ItemKey, PledgeItem>, StoreError> {
        let mut union: BTreeMap<ItemKey, PledgeItem> = BTreeMap::new();
        let mut insert = |item: PledgeItem| {
            union
                .entry(item.key())
                .and_modify(|existing| existing.absorb(&item))
                .or_insert(item);
        };
        if let Some(hash) = self.cache_l2 {
            let items: Vec<PledgeItem> = load_blob(store, &CacheKey::LockL2(self.kind, hash))?;
            items.into_iter().for_each(&mut insert);
        }
        for hash in &self.cache_l1 {
            let items: Vec<PledgeItem> = load_blob(store, &CacheKey::LockL1(self.kind, *hash))?;
            items.into_iter().for_each(&mut insert);
        }
        for items in self.lock_balance.values() {
            items.values().cloned().for_each(&mut insert);
        }
        Ok(union)
    }

    /// Every outstanding item
    pub fn outstanding_items(&self, store: &dyn KeyValueStore) -> Result<Vec<PledgeItem>, StoreError> {
        Ok(self.load_items(store)?.into_values().collect())
    }

    /// Split outstanding items into payable-now and still-locked records
    pub fn pay_profit(
        &self,
        store: &dyn KeyValueStore,
        number: u64,
        period: u64,
    ) -> Result<PayProfit, StoreError> {
        let mut out = PayProfit::default();
        for item in self.load_items(store)?.values() {
            match release_at(item, number, period) {
                Release::Due(amount) => out.due.push(grant_for(item, amount)),
                Release::Locked(amount) if amount > 0 => out.scheduled.push(grant_for(item, amount)),
                _ => {}
            }
        }
        info!(
            "💰 Payout {} at #{}: {} due, {} scheduled",
            self.kind.namespace(),
            number,
            out.due.len(),
            out.scheduled.len()
        );
        Ok(out)
    }

    /// Apply confirmed payouts of this kind.
    ///
    /// Settled items are dropped and the remaining set is rewritten as the
    /// L2 checkpoint of `block_hash`; L1 and memory are then empty.
    pub fn update_grant_profit(
        &mut self,
        store: &dyn KeyValueStore,
        grants: &[GrantProfitRecord],
        block_hash: &Hash,
    ) -> Result<(), StoreError> {
        let grants: Vec<&GrantProfitRecord> = grants.iter().filter(|g| g.which == self.kind).collect();
        if grants.is_empty() {
            return Ok(());
        }
        let mut items = self.load_items(store)?;
        for grant in grants {
            let key = ItemKey::from(grant);
            let item = match items.get_mut(&key) {
                Some(item) => item,
                None => {
                    warn!(
                        "⚠️ Payout for unknown {} item {} @{}",
                        self.kind.namespace(),
                        grant.miner_address,
                        grant.block_number
                    );
                    continue;
                }
            };
            let paid = item.playment.saturating_add(grant.amount);
            if paid > item.amount {
                warn!(
                    "⚠️ Payout overshoot for {} @{}: {} > {}",
                    item.target, item.start_high, paid, item.amount
                );
            }
            item.playment = paid.min(item.amount);
            if item.playment >= item.amount {
                items.remove(&key);
            }
        }
        self.replace_with_l2(store, items.into_values().collect(), block_hash)
    }

    /// Write `items` as the L2 checkpoint of `block_hash` and empty L1 and memory
    fn replace_with_l2(
        &mut self,
        store: &dyn KeyValueStore,
        items: Vec<PledgeItem>,
        block_hash: &Hash,
    ) -> Result<(), StoreError> {
        let l2 = if items.is_empty() {
            None
        } else {
            save_blob(store, &CacheKey::LockL2(self.kind, *block_hash), &items)?;
            info!(
                "💾 {} L2 checkpoint {} ({} items)",
                self.kind.namespace(),
                block_hash,
                items.len()
            );
            Some(*block_hash)
        };
        self.cache_l2 = l2;
        self.cache_l1.clear();
        self.lock_balance.clear();
        Ok(())
    }

    /// Flush the in-memory items into the L1 checkpoint of `block_hash`
    pub fn save_cache_l1(&mut self, store: &dyn KeyValueStore, block_hash: &Hash) -> Result<(), StoreError> {
        let items: Vec<PledgeItem> = self
            .lock_balance
            .values()
            .flat_map(|by_key| by_key.values().cloned())
            .collect();
        if items.is_empty() {
            return Ok(());
        }
        save_blob(store, &CacheKey::LockL1(self.kind, *block_hash), &items)?;
        info!(
            "💾 {} L1 checkpoint {} ({} items)",
            self.kind.namespace(),
            block_hash,
            items.len()
        );
        self.cache_l1.push(*block_hash);
        self.lock_balance.clear();
        Ok(())
    }

    /// Fold every tier into one L2 checkpoint, re-bucketing items by the
    /// day of their start height
    pub fn merge(&mut self, store: &dyn KeyValueStore, block_hash: &Hash, period: u64) -> Result<(), StoreError> {
        let bpd = blocks_per_day(period);
        let mut buckets: BTreeMap<ItemKey, PledgeItem> = BTreeMap::new();
        for mut item in self.load_items(store)?.into_values() {
            item.start_high = bpd * (item.start_high / bpd) + 1;
            buckets
                .entry(item.key())
                .and_modify(|existing| existing.absorb(&item))
                .or_insert(item);
        }
        let before = self.cache_l1.len();
        self.replace_with_l2(store, buckets.into_values().collect(), block_hash)?;
        info!(
            "🗜️ {} merged {} L1 checkpoints at {}",
            self.kind.namespace(),
            before,
            block_hash
        );
        Ok(())
    }
}

/// The three per-kind ledgers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockProfitSnap {
    pub signer: LockData,
    pub flow: LockData,
    pub bandwidth: LockData,
}

impl Default for LockProfitSnap {
    fn default() -> Self {
        Self {
            signer: LockData::new(RewardKind::Signer),
            flow: LockData::new(RewardKind::Flow),
            bandwidth: LockData::new(RewardKind::Bandwidth),
        }
    }
}

impl LockProfitSnap {
    pub fn get(&self, kind: RewardKind) -> &LockData {
        match kind {
            RewardKind::Signer => &self.signer,
            RewardKind::Flow => &self.flow,
            RewardKind::Bandwidth => &self.bandwidth,
        }
    }

    pub fn get_mut(&mut self, kind: RewardKind) -> &mut LockData {
        match kind {
            RewardKind::Signer => &mut self.signer,
            RewardKind::Flow => &mut self.flow,
            RewardKind::Bandwidth => &mut self.bandwidth,
        }
    }
}
