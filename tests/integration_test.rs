// ========================================
// INTEGRATION TESTS FOR TESSERA CONSENSUS
// ========================================
//
// Test Scenarios:
// 1. One full reward day: flow reports, bandwidth claim, exchange,
//    day-boundary rewards and per-kind payouts
// 2. Restart on the same sled store replays to the identical snapshot
// 3. A tampered Effect Record is rejected and the chain does not advance
// 4. Skipped slots are punished and visible through the query API
//
// Usage:
//   cargo test --test integration_test -- --nocapture
//
// ========================================

use std::sync::Arc;
use tempfile::TempDir;
use tessera_consensus::api::SnapshotApi;
use tessera_consensus::engine::{DeclaredEffects, Engine};
use tessera_consensus::flow::{encode_payload, sign_sub_record, CustomTx, FUL_PER_MB};
use tessera_consensus::rewards::{bandwidth_reward, block_reward, flow_rate};
use tessera_consensus::{ConsensusError, MemoryChain, Snapshot};
use tessera_core::config::{ConsensusConfig, GenesisAllocation, LockParameter, PerKind};
use tessera_core::ful::{FulProvider, FulState, TrieFulProvider};
use tessera_core::header::{ChainHeaderReader, ClaimedBandwidthRecord, ExchangeRecord, Header, RewardKind};
use tessera_core::store::{KeyValueStore, SledStore};
use tessera_core::{keccak256, Address, WEI_PER_NFC};
use tessera_crypto::SecretKey;

const GENESIS_TIME: u64 = 1_600_000_000;
// One hour slots: 24 blocks per day
const PERIOD: u64 = 3_600;
const FLOW_PER_REPORT: u64 = 100;

fn reporter() -> Address {
    Address([0x77; 20])
}

fn device_key() -> SecretKey {
    SecretKey::from_bytes(&[0x42; 32]).unwrap()
}

fn consensus_config(keys: &[SecretKey]) -> ConsensusConfig {
    let mut config = ConsensusConfig::default();
    config.period = PERIOD;
    config.max_signer_count = keys.len();
    config.snapshot_interval = 8;
    config.deposit.flow = 1;
    config.deposit.bandwidth = 1;
    let unlocked = LockParameter {
        lock_period: 0,
        rls_period: 0,
        interval: 0,
    };
    config.lock = PerKind {
        signer: unlocked,
        flow: unlocked,
        bandwidth: unlocked,
    };
    config.genesis.time = GENESIS_TIME;
    config.genesis.signers = keys.iter().map(|k| k.address().unwrap()).collect();
    config.genesis.flow_pledges = vec![reporter()];
    config.genesis.ful_balances = vec![GenesisAllocation {
        address: device_key().address().unwrap(),
        balance: 10 * WEI_PER_NFC,
    }];
    config
}

// ========================================
// TEST NODE
// ========================================

struct Node {
    keys: Vec<SecretKey>,
    engine: Arc<Engine>,
    chain: Arc<MemoryChain>,
    head: Snapshot,
    slot: u64,
}

impl Node {
    fn open(dir: &TempDir, keys: Vec<SecretKey>) -> Self {
        let config = consensus_config(&keys);
        let engine = open_engine(dir, config.clone());
        let chain = Arc::new(MemoryChain::new(config, engine.genesis_header().unwrap()));
        let head = engine.genesis_snapshot().unwrap();
        Node {
            keys,
            engine,
            chain,
            head,
            slot: 0,
        }
    }

    fn key_for(&self, address: Address) -> &SecretKey {
        self.keys.iter().find(|k| k.address().unwrap() == address).unwrap()
    }

    /// Build the block of the next free slot after skipping `skip` slots
    fn build(&self, skip: u64, txs: &[CustomTx], declared: &DeclaredEffects) -> Header {
        let time = GENESIS_TIME + (self.slot + 1 + skip) * PERIOD;
        let signer = self.engine.in_turn_signer(&self.head, time).unwrap();
        let (header, _) = self
            .engine
            .build_block(&self.head, self.key_for(signer), time, txs, declared)
            .unwrap();
        header
    }

    fn import(&mut self, header: Header, txs: &[CustomTx], declared: &DeclaredEffects) -> Result<(), ConsensusError> {
        let snap = self.engine.verify_block(&self.head, &header, txs, declared)?;
        self.slot = (header.time - GENESIS_TIME) / PERIOD;
        self.chain.insert(header)?;
        self.head = snap;
        Ok(())
    }

    fn produce(&mut self, txs: &[CustomTx], declared: &DeclaredEffects) {
        let header = self.build(0, txs, declared);
        self.import(header, txs, declared).unwrap();
    }

    fn api(&self) -> SnapshotApi {
        let reader: Arc<dyn ChainHeaderReader> = self.chain.clone();
        SnapshotApi::new(reader, self.engine.clone())
    }
}

fn open_engine(dir: &TempDir, config: ConsensusConfig) -> Arc<Engine> {
    let store: Arc<dyn KeyValueStore> = Arc::new(SledStore::open(dir.path()).unwrap());
    let ful = Arc::new(TrieFulProvider::new(store.clone()));
    Arc::new(Engine::new(config, store, ful).unwrap())
}

fn signer_keys() -> Vec<SecretKey> {
    (1..=3u8).map(|i| SecretKey::from_bytes(&[i; 32]).unwrap()).collect()
}

fn flow_report_tx(number: u64) -> CustomTx {
    let sub = sign_sub_record(&device_key(), &reporter(), number, 1, FLOW_PER_REPORT).unwrap();
    CustomTx {
        hash: keccak256(format!("report-{}", number).as_bytes()),
        sender: reporter(),
        data: encode_payload(&[sub]),
    }
}

/// Runs blocks 1..=30: reports in 2, 4 and 6, a bandwidth claim in 3, an
/// exchange in 5
fn run_day(dir: &TempDir) -> Node {
    let mut node = Node::open(dir, signer_keys());
    let device = device_key().address().unwrap();
    for number in 1..=30u64 {
        let mut declared = DeclaredEffects::default();
        let mut txs = Vec::new();
        match number {
            2 | 4 | 6 => txs.push(flow_report_tx(number)),
            3 => declared.claimed_bandwidth.push(ClaimedBandwidthRecord {
                target: reporter(),
                amount: WEI_PER_NFC,
                isp_qos_id: 1,
                bandwidth: 500,
            }),
            5 => declared.exchange_nfc.push(ExchangeRecord {
                target: device,
                amount: WEI_PER_NFC,
            }),
            _ => {}
        }
        node.produce(&txs, &declared);
    }
    node
}

// ========================================
// TEST 1: ONE REWARD DAY
// ========================================
#[test]
fn test_reward_day_end_to_end() {
    println!("\n🧪 TEST 1: One reward day");
    let dir = TempDir::new().unwrap();
    let node = run_day(&dir);
    let api = node.api();
    let device = device_key().address().unwrap();
    assert_eq!(node.head.number, 30);
    assert!(node.head.punished.is_empty());

    // Flow reports were recorded and paid for in FUL
    let reports = api.get_snapshot_flow_report_at_number(2).unwrap();
    assert_eq!(reports.flow_report.len(), 1);
    assert_eq!(reports.flow_report[0].report_content.len(), 2);
    let expected_ful = 11 * WEI_PER_NFC - 3 * FLOW_PER_REPORT as u128 * FUL_PER_MB;
    assert_eq!(api.get_ful_balance(&device).unwrap().balance, expected_ful);
    assert_eq!(
        api.get_ful_balance_at_number(&device, 1).unwrap().balance,
        10 * WEI_PER_NFC
    );
    println!("✅ FUL debited for 3 reports, credited by 1 exchange");

    // Day boundary: flow and bandwidth rewards for the reporter
    let boundary = node.chain.header_by_number(24).unwrap().decode_extra().unwrap();
    assert_eq!(boundary.flow_harvest, Some(3 * FLOW_PER_REPORT as u128));
    let flow = api.get_snapshot_flow_at_number(24).unwrap();
    assert_eq!(flow.flow_records.len(), 1);
    let flow_amount = 3 * FLOW_PER_REPORT as u128 * flow_rate(0);
    assert_eq!(flow.flow_records[0].target, reporter());
    assert_eq!(flow.flow_records[0].amount, flow_amount);
    assert_eq!(flow.flow_records[0].flow_value1, 3 * FLOW_PER_REPORT);
    let tiers = ConsensusConfig::default().rewards.bandwidth_tiers;
    let bandwidth_amount = bandwidth_reward(24, PERIOD, 500, &tiers, 100);
    assert!(boundary
        .lock_reward
        .iter()
        .any(|r| r.kind == RewardKind::Bandwidth && r.target == reporter() && r.amount == bandwidth_amount));
    assert_eq!(node.head.flow_total, 3 * FLOW_PER_REPORT as u128);
    println!("✅ Day-boundary rewards: flow {} wei, bandwidth {} wei", flow_amount, bandwidth_amount);

    // Payouts: signer at 25, flow at 26, bandwidth at 27
    let grants = |n: u64| node.chain.header_by_number(n).unwrap().decode_extra().unwrap().grant_profit;
    let signer_paid: u128 = grants(25).iter().map(|g| g.amount).sum();
    assert!(grants(25).iter().all(|g| g.which == RewardKind::Signer));
    assert_eq!(signer_paid, 24 * block_reward(1, PERIOD));
    let flow_grants = grants(26);
    assert_eq!(flow_grants.len(), 1);
    assert_eq!(flow_grants[0].which, RewardKind::Flow);
    assert_eq!(flow_grants[0].amount, flow_amount);
    let bandwidth_grants = grants(27);
    assert_eq!(bandwidth_grants.len(), 1);
    assert_eq!(bandwidth_grants[0].amount, bandwidth_amount);
    assert!(grants(28).is_empty());
    println!("✅ Payouts settled per kind");

    // Only rewards after the payout remain locked
    let release = api.get_snapshot_release_at_number(30, "").unwrap();
    assert!(release.flow_lock.is_empty());
    assert!(release.bandwidth_lock.is_empty());
    let signer_locked: u128 = release
        .reward_lock
        .values()
        .flat_map(|v| v.lock_balance.iter())
        .map(|i| i.amount - i.playment)
        .sum();
    assert_eq!(signer_locked, 6 * block_reward(1, PERIOD));
    assert_eq!(release.flow_pledge.get(&reporter()), Some(&1));

    let json = serde_json::to_string(&release).unwrap();
    assert!(json.contains(&format!("\"flow_pledge\":{{\"{}\":1}}", reporter())));
}

// ========================================
// TEST 2: RESTART AND REPLAY
// ========================================
#[test]
fn test_restart_replays_identical_snapshot() {
    println!("\n🧪 TEST 2: Restart and replay");
    let dir = TempDir::new().unwrap();
    let (chain, head) = {
        let node = run_day(&dir);
        (node.chain.clone(), node.head.clone())
    };
    // The sled handles of the first engine are gone; reopen the same path
    let engine = open_engine(&dir, consensus_config(&signer_keys()));
    let replayed = engine.snapshot(chain.as_ref(), head.number, &head.hash).unwrap();
    assert_eq!(replayed, head);
    let ful = engine.ful_provider().open(replayed.ful_root).unwrap();
    assert_eq!(ful.get_all().unwrap().len(), 1);

    let unknown = keccak256(b"not a block");
    assert!(matches!(
        engine.snapshot(chain.as_ref(), 31, &unknown),
        Err(ConsensusError::UnknownBlock(_))
    ));
    println!("✅ Replayed #{} from the last persisted snapshot", head.number);
}

// ========================================
// TEST 3: TAMPERED EFFECT RECORD
// ========================================
#[test]
fn test_tampered_block_rejected() {
    println!("\n🧪 TEST 3: Tampered Effect Record");
    let dir = TempDir::new().unwrap();
    let mut node = Node::open(&dir, signer_keys());
    let declared = DeclaredEffects::default();
    node.produce(&[], &declared);

    let honest = node.build(0, &[], &declared);
    let mut forged_extra = honest.decode_extra().unwrap();
    forged_extra.lock_reward[0].amount *= 2;
    let mut forged = honest.clone();
    let seed = node.keys.iter().position(|k| k.address().unwrap() == honest.coinbase).unwrap() as u8 + 1;
    let key = SecretKey::from_bytes(&[seed; 32]).unwrap();
    node.engine.seal_extra(&mut forged, &forged_extra, &key).unwrap();

    let err = node.import(forged, &[], &declared).unwrap_err();
    assert!(matches!(err, ConsensusError::Consistency(_)));
    assert_eq!(node.head.number, 1);
    assert_eq!(node.chain.len(), 2);

    // A record naming a report that was never sent is rejected too
    let mut phantom = honest.decode_extra().unwrap();
    phantom.flow_report.push(tessera_core::header::FlowReportRecord {
        chain_hash: keccak256(b"phantom"),
        report_time: honest.time,
        report_content: Vec::new(),
    });
    let mut forged = honest.clone();
    node.engine.seal_extra(&mut forged, &phantom, &key).unwrap();
    assert!(node.import(forged, &[], &declared).is_err());

    node.import(honest, &[], &declared).unwrap();
    assert_eq!(node.head.number, 2);
    println!("✅ Forged records rejected, honest block accepted");
}

// ========================================
// TEST 4: SKIPPED SLOTS
// ========================================
#[test]
fn test_skipped_slot_punished() {
    println!("\n🧪 TEST 4: Skipped slots");
    let dir = TempDir::new().unwrap();
    // Four signers keep slots 1 to 3 inside the first loop
    let keys = (1..=4u8).map(|i| SecretKey::from_bytes(&[i; 32]).unwrap()).collect();
    let mut node = Node::open(&dir, keys);
    let declared = DeclaredEffects::default();
    node.produce(&[], &declared);

    // Slot 2 passes without a block
    let absent = node
        .engine
        .in_turn_signer(&node.head, GENESIS_TIME + 2 * PERIOD)
        .unwrap();
    let header = node.build(1, &[], &declared);
    assert_eq!(header.decode_extra().unwrap().signer_missing, vec![absent]);
    node.import(header, &[], &declared).unwrap();

    let api = node.api();
    let view = api.get_snapshot_signer_at_number(2).unwrap();
    assert_eq!(view.punished.get(&absent), Some(&1));
    // The empty slot resolves to the block before it
    let snap = api.get_snapshot_by_header_time(GENESIS_TIME + 2 * PERIOD + 10).unwrap();
    assert_eq!(snap.number, 1);
    println!("✅ {} punished for its empty slot", absent);
}
