// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - CONSENSUS ERRORS
//
// Three severities:
// - ReportRejection: one flow sub-record (or payload) dropped, block goes on
// - VerifyError / RootMismatch: block rejected
// - Storage / FUL storage: the snapshot transition is abandoned
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use tessera_core::ful::FulError;
use tessera_core::header::ExtraError;
use tessera_core::store::StoreError;
use tessera_core::{Address, Hash};
use thiserror::Error;

/// Mismatch between a locally computed Effect Record and the producer's claim
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("{category}: length mismatch (current {current}, claimed {claimed})")]
    LengthMismatch {
        category: &'static str,
        current: usize,
        claimed: usize,
    },
    #[error("{category}: no match for {record}")]
    Unmatched {
        category: &'static str,
        record: String,
    },
    #[error("{category}: absent from the local record")]
    CurrentMissing { category: &'static str },
    #[error("{category}: absent from the claimed record")]
    ClaimedMissing { category: &'static str },
    #[error("{category}: current {current} != claimed {claimed}")]
    ScalarMismatch {
        category: &'static str,
        current: String,
        claimed: String,
    },
}

impl VerifyError {
    pub fn category(&self) -> &'static str {
        match self {
            VerifyError::LengthMismatch { category, .. }
            | VerifyError::Unmatched { category, .. }
            | VerifyError::CurrentMissing { category }
            | VerifyError::ClaimedMissing { category }
            | VerifyError::ScalarMismatch { category, .. } => category,
        }
    }
}

/// Why a flow report payload or one of its sub-records was dropped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportRejection {
    #[error("not a flow report payload")]
    NotFlowReport,
    #[error("reporter {0} holds no flow pledge")]
    UnenrolledReporter(Address),
    #[error("field {field} malformed: {value:?}")]
    Malformed { field: &'static str, value: String },
    #[error("flow value is zero")]
    ZeroFlow,
    #[error("report day {report_day} outside window of block day {block_day}")]
    StaleDay { report_day: u64, block_day: u64 },
    #[error("report number {report} ahead of block {number}")]
    FutureReport { report: u64, number: u64 },
    #[error("bad signature: {0}")]
    BadSignature(String),
    #[error("signature recovers the zero address")]
    ZeroSigner,
    #[error("FUL balance {balance} of {device} below cost {cost}")]
    InsufficientFul {
        device: Address,
        balance: u128,
        cost: u128,
    },
}

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("effect record mismatch: {0}")]
    Consistency(#[from] VerifyError),
    #[error("FUL root mismatch: local {local}, claimed {claimed}")]
    RootMismatch { local: Hash, claimed: Hash },
    #[error("storage: {0}")]
    Storage(#[from] StoreError),
    #[error("FUL ledger: {0}")]
    Ful(#[from] FulError),
    #[error("header extra: {0}")]
    Extra(#[from] ExtraError),
    #[error("unknown block {0}")]
    UnknownBlock(String),
    #[error("block {number} names parent {claimed}, expected #{parent_number} {parent}")]
    ParentMismatch {
        number: u64,
        claimed: Hash,
        parent_number: u64,
        parent: Hash,
    },
    #[error("signer {signer} not allowed to seal block {number}")]
    UnauthorizedSigner { signer: Address, number: u64 },
    #[error("block {number} at {time} does not follow parent at {parent_time}")]
    InvalidTimestamp {
        number: u64,
        time: u64,
        parent_time: u64,
    },
    #[error("invalid consensus config: {0}")]
    Config(String),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}
