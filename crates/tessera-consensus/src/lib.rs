// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - CONSENSUS MODULE
//
// Delegated proof-of-stake with time-sliced signer rotation. Every block
// declares its protocol effects (rewards, pledges, payouts, flow reports)
// in an Effect Record; validators rebuild the record from the parent
// Snapshot, compare it as a multiset and only then apply it.
//
// - signer:      rotation, election, missing-signer detection, punishment
// - rewards:     block, bandwidth and flow reward curves
// - lock_profit: time-locked reward ledger with L1/L2 checkpoints
// - flow:        signed flow usage reports paid in FUL
// - verify:      Effect Record comparison
// - snapshot:    per-block consensus state and its transition
// - engine:      block building, verification and replay
// - api:         read-only queries with a bounded snapshot cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod api;
pub mod chain;
pub mod engine;
pub mod error;
pub mod flow;
pub mod lock_profit;
pub mod rewards;
pub mod signer;
pub mod snapshot;
pub mod verify;

pub use api::SnapshotApi;
pub use chain::MemoryChain;
pub use engine::{DeclaredEffects, Engine, PreparedExtra};
pub use error::{ConsensusError, ReportRejection, VerifyError};
pub use snapshot::Snapshot;
