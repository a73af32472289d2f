// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - FLOW REPORT PROCESSOR
//
// An enrolled flow miner submits device usage in a custom transaction:
//
//   tessera:1:Flwrpt:En:<rn>,<device>,<flow>,<sig>|<rn>,<device>,<flow>,<sig>|...
//
// Each sub-record is signed by the device over
// keccak(hex(reporter) ‖ rn ‖ device ‖ flow) and costs the device
// `flow × FUL_PER_MB` FUL. A bad sub-record is dropped on its own; the rest
// of the payload still counts. Accepted indices are published in one log.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_core::ful::{FulError, FulState};
use tessera_core::header::{FlowReportItem, FlowReportRecord};
use tessera_core::{block_day, keccak256, Address, Hash, ENGINE_NAMESPACE};
use tessera_crypto::{is_canonical_signature, recover_address, SecretKey, SIGNATURE_LENGTH};

use crate::error::ReportRejection;

pub const CUSTOM_TX_VERSION: &str = "1";
pub const FLOW_REPORT_CATEGORY: &str = "Flwrpt";
pub const FLOW_REPORT_ACTION: &str = "En";
/// Event signature hashed into the log topic
pub const FLOW_REPORT_EVENT: &str = "Flwrpten(address,uint256)";

/// FUL wei charged per MB of reported flow (0.014 FUL per GB)
pub const FUL_PER_MB: u128 = 13_671_875_000_000;

/// Custom transaction as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomTx {
    pub hash: Hash,
    pub sender: Address,
    pub data: Vec<u8>,
}

/// Log emitted for a processed payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLog {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
    pub tx_hash: Hash,
    pub block_number: u64,
}

/// One parsed sub-record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSubRecord {
    pub report_number: u64,
    pub device_id: u64,
    pub flow_value: u64,
    pub signature: Vec<u8>,
}

// ─────────────────────────────────────────────────────────────────
// FLOW MINER COUNTERS
// ─────────────────────────────────────────────────────────────────

/// Raw (reporter-claimed) and verified (device-side) flow, in MB
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCounters {
    pub flow_value1: u64,
    pub flow_value2: u64,
}

impl FlowCounters {
    fn add(&mut self, item: &FlowReportItem) {
        self.flow_value1 = self.flow_value1.saturating_add(item.flow_value1);
        self.flow_value2 = self.flow_value2.saturating_add(item.flow_value2);
    }
}

/// Per-address counters of one day, keyed by report key
pub type FlowMinerReport = BTreeMap<Address, BTreeMap<Hash, FlowCounters>>;

/// Current and previous day of flow-miner counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMinerSnap {
    pub flow_miner: FlowMinerReport,
    pub flow_miner_prev: FlowMinerReport,
}

/// Key of one report inside an address's counters
pub fn report_key(chain_hash: &Hash, report_number: u64) -> Hash {
    tessera_crypto::keccak256_concat(&[chain_hash.as_bytes(), &report_number.to_be_bytes()])
}

fn totals_of(report: &FlowMinerReport) -> BTreeMap<Address, FlowCounters> {
    report
        .iter()
        .map(|(addr, entries)| {
            let mut sum = FlowCounters::default();
            for c in entries.values() {
                sum.flow_value1 = sum.flow_value1.saturating_add(c.flow_value1);
                sum.flow_value2 = sum.flow_value2.saturating_add(c.flow_value2);
            }
            (*addr, sum)
        })
        .collect()
}

impl FlowMinerSnap {
    /// Close the current day
    pub fn rollover(&mut self) {
        self.flow_miner_prev = std::mem::take(&mut self.flow_miner);
    }

    pub fn record(&mut self, report: &FlowReportRecord) {
        for item in &report.report_content {
            self.flow_miner
                .entry(item.target)
                .or_default()
                .entry(report_key(&report.chain_hash, item.report_number))
                .or_default()
                .add(item);
        }
    }

    /// Per-address sums of the current day
    pub fn totals(&self) -> BTreeMap<Address, FlowCounters> {
        totals_of(&self.flow_miner)
    }

    pub fn previous_totals(&self) -> BTreeMap<Address, FlowCounters> {
        totals_of(&self.flow_miner_prev)
    }
}

// ─────────────────────────────────────────────────────────────────
// PAYLOAD CODEC
// ─────────────────────────────────────────────────────────────────

/// Sub-record strings of a flow report payload
pub fn parse_payload(data: &[u8]) -> Result<Vec<&str>, ReportRejection> {
    let text = std::str::from_utf8(data).map_err(|_| ReportRejection::NotFlowReport)?;
    let fields: Vec<&str> = text.splitn(5, ':').collect();
    if fields.len() < 5
        || fields[0] != ENGINE_NAMESPACE
        || fields[1] != CUSTOM_TX_VERSION
        || fields[2] != FLOW_REPORT_CATEGORY
        || fields[3] != FLOW_REPORT_ACTION
    {
        return Err(ReportRejection::NotFlowReport);
    }
    Ok(fields[4].split('|').collect())
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ReportRejection> {
    value.trim().parse::<u64>().map_err(|_| ReportRejection::Malformed {
        field,
        value: value.to_string(),
    })
}

pub fn parse_sub_record(text: &str) -> Result<FlowSubRecord, ReportRejection> {
    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() != 4 {
        return Err(ReportRejection::Malformed {
            field: "record",
            value: text.to_string(),
        });
    }
    let report_number = parse_u64("report_number", parts[0])?;
    let device_id = parse_u64("device_id", parts[1])?;
    let flow_value = parse_u64("flow_value", parts[2])?;
    let sig_hex = parts[3].trim();
    let signature = hex::decode(sig_hex.strip_prefix("0x").unwrap_or(sig_hex)).map_err(|_| {
        ReportRejection::Malformed {
            field: "signature",
            value: parts[3].to_string(),
        }
    })?;
    if signature.len() != SIGNATURE_LENGTH {
        return Err(ReportRejection::Malformed {
            field: "signature",
            value: parts[3].to_string(),
        });
    }
    Ok(FlowSubRecord {
        report_number,
        device_id,
        flow_value,
        signature,
    })
}

/// Digest a device signs for one sub-record
pub fn report_message_hash(reporter: &Address, report_number: u64, device_id: u64, flow_value: u64) -> Hash {
    let message = format!("{}{}{}{}", reporter.to_hex(), report_number, device_id, flow_value);
    keccak256(message.as_bytes())
}

/// Device-side helper: one signed sub-record string
pub fn sign_sub_record(
    device_key: &SecretKey,
    reporter: &Address,
    report_number: u64,
    device_id: u64,
    flow_value: u64,
) -> Result<String, tessera_crypto::CryptoError> {
    let digest = report_message_hash(reporter, report_number, device_id, flow_value);
    let signature = device_key.sign_hash(&digest)?;
    Ok(format!(
        "{},{},{},{}",
        report_number,
        device_id,
        flow_value,
        hex::encode(signature)
    ))
}

pub fn encode_payload(sub_records: &[String]) -> Vec<u8> {
    format!(
        "{}:{}:{}:{}:{}",
        ENGINE_NAMESPACE,
        CUSTOM_TX_VERSION,
        FLOW_REPORT_CATEGORY,
        FLOW_REPORT_ACTION,
        sub_records.join("|")
    )
    .into_bytes()
}

// ─────────────────────────────────────────────────────────────────
// PROCESSOR
// ─────────────────────────────────────────────────────────────────

/// FUL balances read once per block and debited as reports are accepted
pub struct FulBalanceCache<'a> {
    state: &'a dyn FulState,
    balances: BTreeMap<Address, u128>,
}

impl<'a> FulBalanceCache<'a> {
    pub fn new(state: &'a dyn FulState) -> Self {
        Self {
            state,
            balances: BTreeMap::new(),
        }
    }

    pub fn balance(&mut self, address: &Address) -> Result<u128, FulError> {
        if let Some(balance) = self.balances.get(address) {
            return Ok(*balance);
        }
        let balance = self.state.get(address)?;
        self.balances.insert(*address, balance);
        Ok(balance)
    }

    fn debit(&mut self, address: &Address, cost: u128) -> Result<Result<(), ReportRejection>, FulError> {
        let balance = self.balance(address)?;
        if balance < cost {
            return Ok(Err(ReportRejection::InsufficientFul {
                device: *address,
                balance,
                cost,
            }));
        }
        self.balances.insert(*address, balance - cost);
        Ok(Ok(()))
    }
}

/// Block context a payload is judged against
pub struct ReportContext<'a> {
    pub number: u64,
    pub time: u64,
    pub period: u64,
    pub flow_pledge: &'a BTreeMap<Address, u128>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowReportOutcome {
    /// The payload as a whole was refused
    Rejected(ReportRejection),
    Processed {
        /// None when no sub-record was accepted
        record: Option<FlowReportRecord>,
        accepted: Vec<usize>,
        dropped: Vec<(usize, ReportRejection)>,
        log: Option<TxLog>,
    },
}

fn check_window(rn: u64, ctx: &ReportContext<'_>) -> Result<(), ReportRejection> {
    if rn > ctx.number {
        return Err(ReportRejection::FutureReport {
            report: rn,
            number: ctx.number,
        });
    }
    let report_day = block_day(rn, ctx.period);
    let today = block_day(ctx.number, ctx.period);
    if report_day != today && report_day + 1 != today {
        return Err(ReportRejection::StaleDay {
            report_day,
            block_day: today,
        });
    }
    Ok(())
}

/// Validate one sub-record and return the device address on success
fn check_sub_record(
    reporter: &Address,
    sub: &FlowSubRecord,
    ctx: &ReportContext<'_>,
) -> Result<Address, ReportRejection> {
    if sub.flow_value == 0 {
        return Err(ReportRejection::ZeroFlow);
    }
    // Report numbers count from block 1
    if sub.report_number == 0 {
        return Err(ReportRejection::Malformed {
            field: "report_number",
            value: "0".to_string(),
        });
    }
    check_window(sub.report_number, ctx)?;
    if !is_canonical_signature(&sub.signature) {
        return Err(ReportRejection::BadSignature("non-canonical".to_string()));
    }
    let digest = report_message_hash(reporter, sub.report_number, sub.device_id, sub.flow_value);
    let device = recover_address(&digest, &sub.signature)
        .map_err(|e| ReportRejection::BadSignature(e.to_string()))?;
    if device.is_zero() {
        return Err(ReportRejection::ZeroSigner);
    }
    Ok(device)
}

/// Process one custom transaction.
///
/// Only storage failures of the FUL ledger are errors; every validation
/// failure is reported in the outcome.
pub fn process_flow_report(
    tx: &CustomTx,
    ctx: &ReportContext<'_>,
    cache: &mut FulBalanceCache<'_>,
) -> Result<FlowReportOutcome, FulError> {
    let sub_records = match parse_payload(&tx.data) {
        Ok(records) => records,
        Err(reason) => return Ok(FlowReportOutcome::Rejected(reason)),
    };
    if !ctx.flow_pledge.contains_key(&tx.sender) {
        warn!("⚠️ Flow report {} from unenrolled {}", tx.hash, tx.sender);
        return Ok(FlowReportOutcome::Rejected(ReportRejection::UnenrolledReporter(tx.sender)));
    }

    let mut items = Vec::new();
    let mut accepted = Vec::new();
    let mut dropped = Vec::new();
    for (index, text) in sub_records.iter().enumerate() {
        if text.trim().is_empty() {
            continue;
        }
        let checked = parse_sub_record(text).and_then(|sub| {
            check_sub_record(&tx.sender, &sub, ctx).map(|device| (sub, device))
        });
        let (sub, device) = match checked {
            Ok(ok) => ok,
            Err(reason) => {
                warn!("⚠️ Flow report {} record {} dropped: {}", tx.hash, index, reason);
                dropped.push((index, reason));
                continue;
            }
        };
        let cost = (sub.flow_value as u128).saturating_mul(FUL_PER_MB);
        if let Err(reason) = cache.debit(&device, cost)? {
            warn!("⚠️ Flow report {} record {} dropped: {}", tx.hash, index, reason);
            dropped.push((index, reason));
            continue;
        }
        items.push(FlowReportItem {
            target: tx.sender,
            report_number: sub.report_number,
            flow_value1: sub.flow_value,
            flow_value2: 0,
        });
        items.push(FlowReportItem {
            target: device,
            report_number: sub.report_number,
            flow_value1: 0,
            flow_value2: sub.flow_value,
        });
        accepted.push(index);
    }

    if accepted.is_empty() {
        return Ok(FlowReportOutcome::Processed {
            record: None,
            accepted,
            dropped,
            log: None,
        });
    }
    accepted.sort_unstable();
    debug!("Flow report {}: accepted {:?}", tx.hash, accepted);
    let data = accepted
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let log = TxLog {
        address: tx.sender,
        topics: vec![keccak256(FLOW_REPORT_EVENT.as_bytes())],
        data: data.into_bytes(),
        tx_hash: tx.hash,
        block_number: ctx.number,
    };
    Ok(FlowReportOutcome::Processed {
        record: Some(FlowReportRecord {
            chain_hash: tx.hash,
            report_time: ctx.time,
            report_content: items,
        }),
        accepted,
        dropped,
        log: Some(log),
    })
}
