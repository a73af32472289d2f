// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - CONSENSUS ENGINE
//
// Producer and validator run the same effect builder:
//
//   prepare_extra   parent snapshot + header + txs → Effect Record
//   seal_extra      embed the record in extra-data and sign the header
//   verify_block    check the parent link, recover signer, check its slot,
//                   rebuild the record, compare with the claim, apply,
//                   check the FUL root, then flush the staged writes
//   snapshot        load a persisted snapshot or replay headers onto the
//                   nearest persisted ancestor (or genesis)
//
// Governance records arrive pre-decoded from the host's transaction
// pipeline (`DeclaredEffects`); the engine derives rotation, rewards,
// payouts and flow reports itself.
//
// Every store write of a transition (trie nodes, ledger checkpoints, the
// persisted snapshot) goes to a `StagedStore` overlay first. A rejected
// block drops the overlay and leaves the store as it was.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use log::{debug, info, warn};
use std::sync::Arc;
use tessera_core::config::ConsensusConfig;
use tessera_core::ful::FulProvider;
use tessera_core::header::{
    encode_extra_data, BandwidthPunishRecord, CandidatePledgeRecord, CandidatePunishRecord,
    ChainHeaderReader, ClaimedBandwidthRecord, ConfigDepositRecord, DeviceBindRecord,
    ExchangeRecord, ExtraError, Header, HeaderExtra, IspQosRecord, LockParameterRecord,
    ManagerAddressRecord, MinerStakeRecord, RewardKind,
};
use tessera_core::store::{KeyValueStore, StagedStore};
use tessera_core::{is_day_boundary, Address, Hash, EXTRA_VANITY};
use tessera_crypto::SecretKey;

use crate::error::{ConsensusError, ReportRejection};
use crate::flow::{process_flow_report, CustomTx, FlowReportOutcome, FulBalanceCache, ReportContext, TxLog};
use crate::lock_profit::is_payout_block;
use crate::rewards::{accumulate_bandwidth_rewards, accumulate_block_reward, accumulate_flow_rewards};
use crate::signer::{election_seed, elect_queue, loops_elapsed, signer_missing, slot_at};
use crate::snapshot::{apply_ful, ApplyContext, Snapshot};
use crate::verify::verify_header_extra;

/// Governance records decoded by the host from the block's transactions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredEffects {
    pub exchange_nfc: Vec<ExchangeRecord>,
    pub device_bind: Vec<DeviceBindRecord>,
    pub candidate_pledge: Vec<CandidatePledgeRecord>,
    pub candidate_punish: Vec<CandidatePunishRecord>,
    pub miner_stake: Vec<MinerStakeRecord>,
    pub candidate_exit: Vec<Address>,
    pub claimed_bandwidth: Vec<ClaimedBandwidthRecord>,
    pub flow_miner_exit: Vec<Address>,
    pub bandwidth_punish: Vec<BandwidthPunishRecord>,
    pub config_exch_rate: u32,
    pub config_off_line: u32,
    pub config_deposit: Vec<ConfigDepositRecord>,
    pub config_isp_qos: Vec<IspQosRecord>,
    pub lock_parameters: Vec<LockParameterRecord>,
    pub manager_address: Vec<ManagerAddressRecord>,
}

/// A flow report payload, or one of its sub-records, that was not accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedReport {
    pub tx_hash: Hash,
    /// None when the whole payload was refused
    pub index: Option<usize>,
    pub reason: ReportRejection,
}

/// Output of the effect builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedExtra {
    pub extra: HeaderExtra,
    pub logs: Vec<TxLog>,
    pub dropped: Vec<DroppedReport>,
}

/// Latest block a loop of `signer_count` signers treats as final
pub fn confirmed_block_number(number: u64, signer_count: usize) -> u64 {
    let confirmations = (signer_count as u64) * 2 / 3 + 1;
    number.saturating_sub(confirmations)
}

pub struct Engine {
    config: ConsensusConfig,
    store: Arc<dyn KeyValueStore>,
    ful: Arc<dyn FulProvider>,
}

/// Write overlays of one block transition
struct Staging {
    store: Arc<StagedStore>,
    /// Own overlay when the FUL ledger lives in another store
    ful_store: Option<Arc<StagedStore>>,
    ful: Box<dyn FulProvider>,
}

impl Staging {
    fn context<'a>(&'a self, config: &'a ConsensusConfig) -> ApplyContext<'a> {
        ApplyContext {
            config,
            store: self.store.as_ref(),
            ful: self.ful.as_ref(),
        }
    }

    fn commit(&self) -> Result<usize, ConsensusError> {
        let mut written = 0;
        if let Some(ful_store) = &self.ful_store {
            written += ful_store.commit()?;
        }
        written += self.store.commit()?;
        Ok(written)
    }
}

impl Engine {
    pub fn new(
        config: ConsensusConfig,
        store: Arc<dyn KeyValueStore>,
        ful: Arc<dyn FulProvider>,
    ) -> Result<Self, ConsensusError> {
        config.validate().map_err(ConsensusError::Config)?;
        Ok(Self { config, store, ful })
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    pub fn ful_provider(&self) -> &dyn FulProvider {
        self.ful.as_ref()
    }

    fn stage(&self) -> Staging {
        let store = Arc::new(StagedStore::new(Arc::clone(&self.store)));
        let ful_base = self.ful.store();
        let shared = Arc::as_ptr(&ful_base) as *const u8 == Arc::as_ptr(&self.store) as *const u8;
        if shared {
            let ful = self.ful.with_store(store.clone());
            Staging {
                store,
                ful_store: None,
                ful,
            }
        } else {
            let ful_store = Arc::new(StagedStore::new(ful_base));
            let ful = self.ful.with_store(ful_store.clone());
            Staging {
                store,
                ful_store: Some(ful_store),
                ful,
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // GENESIS
    // ─────────────────────────────────────────────────────────────────

    /// Unsealed block 0 carrying the genesis queue
    pub fn genesis_header(&self) -> Result<Header, ConsensusError> {
        let genesis = &self.config.genesis;
        let extra = HeaderExtra {
            loop_start_time: genesis.time,
            signer_queue: genesis.signers.clone(),
            ..Default::default()
        };
        Ok(Header {
            parent_hash: Hash::ZERO,
            coinbase: Address::ZERO,
            number: 0,
            time: genesis.time,
            extra: encode_extra_data(&[0u8; EXTRA_VANITY], &extra)?,
        })
    }

    pub fn genesis_snapshot(&self) -> Result<Snapshot, ConsensusError> {
        let hash = self.genesis_header()?.hash();
        Snapshot::genesis(&self.config, hash, self.ful.as_ref())
    }

    // ─────────────────────────────────────────────────────────────────
    // EFFECT BUILDING
    // ─────────────────────────────────────────────────────────────────

    fn check_time(&self, parent: &Snapshot, header: &Header) -> Result<(), ConsensusError> {
        if header.number != parent.number + 1 || header.time < parent.time + self.config.period {
            return Err(ConsensusError::InvalidTimestamp {
                number: header.number,
                time: header.time,
                parent_time: parent.time,
            });
        }
        Ok(())
    }

    /// Loop start, queue and whether a new loop begins at `time`
    fn rotate(&self, parent: &Snapshot, time: u64) -> (u64, Vec<Address>, bool) {
        let config = &self.config;
        let len = parent.signers.len();
        let loops = loops_elapsed(time, parent.loop_start_time, config.period, len);
        if loops == 0 || len == 0 {
            return (parent.loop_start_time, parent.signers.clone(), false);
        }
        let start = parent.loop_start_time + loops * config.period * len as u64;
        let seed = election_seed(&parent.hash, start);
        let elected = elect_queue(
            &parent.tally,
            &parent.punished,
            config.punish.kick_threshold,
            config.max_signer_count,
            &seed,
        );
        if elected.is_empty() {
            warn!("⚠️ Election at {} found no candidate, keeping the current queue", start);
            return (start, parent.signers.clone(), true);
        }
        (start, elected, true)
    }

    /// Signer owning the slot of `time` in the child of `parent`
    pub fn in_turn_signer(&self, parent: &Snapshot, time: u64) -> Option<Address> {
        let (loop_start_time, queue, _) = self.rotate(parent, time);
        if queue.is_empty() {
            return None;
        }
        Some(queue[slot_at(time, loop_start_time, self.config.period, queue.len())])
    }

    /// Build the Effect Record of `header` on top of `parent`.
    ///
    /// Only `number`, `time` and `coinbase` of the header are read. Nothing
    /// is written to the store.
    pub fn prepare_extra(
        &self,
        parent: &Snapshot,
        header: &Header,
        txs: &[CustomTx],
        declared: &DeclaredEffects,
    ) -> Result<PreparedExtra, ConsensusError> {
        let staging = self.stage();
        self.prepare_with(parent, header, txs, declared, staging.ful.as_ref())
    }

    fn prepare_with(
        &self,
        parent: &Snapshot,
        header: &Header,
        txs: &[CustomTx],
        declared: &DeclaredEffects,
        ful: &dyn FulProvider,
    ) -> Result<PreparedExtra, ConsensusError> {
        self.check_time(parent, header)?;
        let config = &self.config;
        let period = config.period;
        let number = header.number;
        let (loop_start_time, signer_queue, new_loop) = self.rotate(parent, header.time);
        let missing = signer_missing(
            number,
            config.forks.trantor_block,
            &parent.signer,
            &header.coinbase,
            &signer_queue,
            Some(parent.signers.as_slice()),
            new_loop,
        );
        debug!("Block #{} by {}: missing {:?}", number, header.coinbase, missing);

        let mut extra = HeaderExtra {
            loop_start_time,
            confirmed_block_number: confirmed_block_number(number, signer_queue.len()),
            signer_queue,
            signer_missing: missing,
            exchange_nfc: declared.exchange_nfc.clone(),
            device_bind: declared.device_bind.clone(),
            candidate_pledge: declared.candidate_pledge.clone(),
            candidate_punish: declared.candidate_punish.clone(),
            miner_stake: declared.miner_stake.clone(),
            candidate_exit: declared.candidate_exit.clone(),
            claimed_bandwidth: declared.claimed_bandwidth.clone(),
            flow_miner_exit: declared.flow_miner_exit.clone(),
            bandwidth_punish: declared.bandwidth_punish.clone(),
            config_exch_rate: declared.config_exch_rate,
            config_off_line: declared.config_off_line,
            config_deposit: declared.config_deposit.clone(),
            config_isp_qos: declared.config_isp_qos.clone(),
            lock_parameters: declared.lock_parameters.clone(),
            manager_address: declared.manager_address.clone(),
            ..Default::default()
        };

        // Rewards
        accumulate_block_reward(&mut extra.lock_reward, &header.coinbase, number, period);
        if is_day_boundary(number, period) {
            let flows = parent.flow_miner.totals();
            let harvested = accumulate_flow_rewards(
                &mut extra.lock_reward,
                &flows,
                parent.flow_total,
                config.rewards.flow_daily_pool,
            );
            accumulate_bandwidth_rewards(
                &mut extra.lock_reward,
                &flows,
                &parent.bandwidth,
                &parent.system_config.isp_qos,
                &config.rewards.bandwidth_tiers,
                number,
                period,
            );
            if harvested > 0 {
                extra.flow_harvest = Some(harvested);
            }
        }

        // Payouts
        for kind in RewardKind::ALL {
            if is_payout_block(number, period, config.payout.get(kind)) {
                let payout = parent.lock.get(kind).pay_profit(self.store.as_ref(), number, period)?;
                extra.grant_profit.extend(payout.due);
            }
        }

        // Flow reports
        let mut logs = Vec::new();
        let mut dropped = Vec::new();
        {
            let state = ful.open(parent.ful_root)?;
            let mut cache = FulBalanceCache::new(state.as_ref());
            let ctx = ReportContext {
                number,
                time: header.time,
                period,
                flow_pledge: &parent.flow_pledge,
            };
            for tx in txs {
                match process_flow_report(tx, &ctx, &mut cache)? {
                    FlowReportOutcome::Rejected(ReportRejection::NotFlowReport) => {}
                    FlowReportOutcome::Rejected(reason) => dropped.push(DroppedReport {
                        tx_hash: tx.hash,
                        index: None,
                        reason,
                    }),
                    FlowReportOutcome::Processed {
                        record,
                        dropped: sub_dropped,
                        log,
                        ..
                    } => {
                        extra.flow_report.extend(record);
                        logs.extend(log);
                        dropped.extend(sub_dropped.into_iter().map(|(index, reason)| DroppedReport {
                            tx_hash: tx.hash,
                            index: Some(index),
                            reason,
                        }));
                    }
                }
            }
        }

        if number >= config.forks.ful_trie_block {
            extra.ful_data_root = apply_ful(parent.ful_root, &extra, ful)?;
        }
        Ok(PreparedExtra { extra, logs, dropped })
    }

    /// Embed `extra` in the header and sign it
    pub fn seal_extra(&self, header: &mut Header, extra: &HeaderExtra, key: &SecretKey) -> Result<(), ConsensusError> {
        header.extra = encode_extra_data(&[0u8; EXTRA_VANITY], extra)?;
        header.seal(key)?;
        Ok(())
    }

    /// Producer path: build, embed and seal the child of `parent`
    pub fn build_block(
        &self,
        parent: &Snapshot,
        key: &SecretKey,
        time: u64,
        txs: &[CustomTx],
        declared: &DeclaredEffects,
    ) -> Result<(Header, PreparedExtra), ConsensusError> {
        let coinbase = key.address().map_err(ExtraError::Seal)?;
        let mut header = Header {
            parent_hash: parent.hash,
            coinbase,
            number: parent.number + 1,
            time,
            extra: Vec::new(),
        };
        let prepared = self.prepare_extra(parent, &header, txs, declared)?;
        self.seal_extra(&mut header, &prepared.extra, key)?;
        Ok((header, prepared))
    }

    // ─────────────────────────────────────────────────────────────────
    // VERIFICATION
    // ─────────────────────────────────────────────────────────────────

    /// Validate `header` against `parent` and return its snapshot.
    ///
    /// On any error the store is left exactly as it was.
    pub fn verify_block(
        &self,
        parent: &Snapshot,
        header: &Header,
        txs: &[CustomTx],
        declared: &DeclaredEffects,
    ) -> Result<Snapshot, ConsensusError> {
        if header.parent_hash != parent.hash || header.number != parent.number + 1 {
            return Err(ConsensusError::ParentMismatch {
                number: header.number,
                claimed: header.parent_hash,
                parent_number: parent.number,
                parent: parent.hash,
            });
        }
        let signer = header.recover_signer()?;
        if signer != header.coinbase {
            return Err(ConsensusError::UnauthorizedSigner {
                signer,
                number: header.number,
            });
        }
        let claimed = header.decode_extra()?;
        let staging = self.stage();
        let local = self
            .prepare_with(parent, header, txs, declared, staging.ful.as_ref())?
            .extra;

        let queue = &local.signer_queue;
        let slot_owner = if queue.is_empty() {
            None
        } else {
            Some(queue[slot_at(header.time, local.loop_start_time, self.config.period, queue.len())])
        };
        if slot_owner != Some(signer) {
            return Err(ConsensusError::UnauthorizedSigner {
                signer,
                number: header.number,
            });
        }

        verify_header_extra(&local, &claimed)?;
        let snap = parent.apply(header, &claimed, &staging.context(&self.config))?;

        let expected = if header.number >= self.config.forks.ful_trie_block {
            snap.ful_root
        } else {
            Hash::ZERO
        };
        if claimed.ful_data_root != expected {
            return Err(ConsensusError::RootMismatch {
                local: expected,
                claimed: claimed.ful_data_root,
            });
        }

        if header.number % self.config.snapshot_interval == 0 {
            snap.store(staging.store.as_ref())?;
        }
        let written = staging.commit()?;
        debug!("Block #{} accepted, {} store writes", header.number, written);
        Ok(snap)
    }

    // ─────────────────────────────────────────────────────────────────
    // REPLAY
    // ─────────────────────────────────────────────────────────────────

    /// Snapshot at (`number`, `hash`), replaying already-verified headers
    pub fn snapshot(
        &self,
        chain: &dyn ChainHeaderReader,
        number: u64,
        hash: &Hash,
    ) -> Result<Snapshot, ConsensusError> {
        let mut pending: Vec<Header> = Vec::new();
        let (mut n, mut h) = (number, *hash);
        let mut snap = loop {
            if let Some(snap) = Snapshot::try_load(self.store.as_ref(), &h)? {
                break snap;
            }
            if n == 0 {
                let genesis = self.genesis_snapshot()?;
                if genesis.hash != h {
                    return Err(ConsensusError::UnknownBlock(h.to_string()));
                }
                break genesis;
            }
            let header = chain
                .header_by_hash(&h)
                .ok_or_else(|| ConsensusError::UnknownBlock(h.to_string()))?;
            if header.number != n {
                return Err(ConsensusError::UnknownBlock(format!("{} at #{}", h, n)));
            }
            h = header.parent_hash;
            n -= 1;
            pending.push(header);
        };

        for header in pending.iter().rev() {
            let extra = header.decode_extra()?;
            let staging = self.stage();
            snap = snap.apply(header, &extra, &staging.context(&self.config))?;
            if header.number % self.config.snapshot_interval == 0 {
                snap.store(staging.store.as_ref())?;
            }
            staging.commit()?;
        }
        if !pending.is_empty() {
            info!("🔁 Replayed {} headers up to #{}", pending.len(), number);
        }
        Ok(snap)
    }
}
