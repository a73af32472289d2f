// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - BLOCK HEADER & EFFECT RECORD
//
// Every block header embeds the producer's declared state changes:
//
//   extra-data = [32-byte vanity][bincode(HeaderExtra)][65-byte seal]
//
// The field order of HeaderExtra is part of the consensus contract: it is
// hashed into the seal and must never be reordered. New fields go at the end.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use tessera_crypto::{keccak256, recover_address, CryptoError, SecretKey};
use thiserror::Error;

use crate::config::ConsensusConfig;
use crate::{Address, Hash, EXTRA_SEAL, EXTRA_VANITY};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtraError {
    #[error("extra-data too short: {0} bytes")]
    TooShort(usize),
    #[error("extra-data decode failed: {0}")]
    Decode(String),
    #[error("extra-data encode failed: {0}")]
    Encode(String),
    #[error("seal: {0}")]
    Seal(CryptoError),
}

/// Reward categories. Each one has its own lock ledger and checkpoint namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RewardKind {
    Signer,
    Flow,
    Bandwidth,
}

impl RewardKind {
    pub const ALL: [RewardKind; 3] = [RewardKind::Signer, RewardKind::Flow, RewardKind::Bandwidth];

    pub fn namespace(&self) -> &'static str {
        match self {
            RewardKind::Signer => "reward",
            RewardKind::Flow => "flow",
            RewardKind::Bandwidth => "bandwidth",
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// EFFECT RECORDS
// ─────────────────────────────────────────────────────────────────

/// Reward grant, consumed into the lock ledger in the same block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRewardRecord {
    pub target: Address,
    pub amount: u128,
    pub kind: RewardKind,
    /// Raw (reporter-claimed) flow the reward was computed from
    pub flow_value1: u64,
    /// Device-verified flow
    pub flow_value2: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub target: Address,
    pub amount: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindKind {
    /// Redirects signer rewards
    Signer,
    /// Redirects flow and bandwidth rewards
    Flow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceBindRecord {
    pub device: Address,
    pub revenue: Address,
    pub contract: Address,
    pub multi_sign: Address,
    pub kind: BindKind,
    /// false removes the binding
    pub bind: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePledgeRecord {
    pub target: Address,
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePunishRecord {
    pub target: Address,
    pub amount: u128,
    pub credit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerStakeRecord {
    pub target: Address,
    pub stake: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedBandwidthRecord {
    pub target: Address,
    pub amount: u128,
    pub isp_qos_id: u32,
    pub bandwidth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthPunishRecord {
    pub target: Address,
    /// Percentage of the claimed bandwidth removed
    pub punish_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDepositRecord {
    pub who: RewardKind,
    pub amount: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IspQosRecord {
    pub isp_id: u32,
    /// Percentage applied to bandwidth rewards of claims under this id
    pub qos: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockParameterRecord {
    pub who: RewardKind,
    pub lock_period: u64,
    pub rls_period: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerAddressRecord {
    pub target: Address,
    pub who: u32,
}

/// A payout against one outstanding pledge item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantProfitRecord {
    pub which: RewardKind,
    pub miner_address: Address,
    /// Start height of the pledge item being paid
    pub block_number: u64,
    pub amount: u128,
    pub revenue_address: Address,
    pub revenue_contract: Address,
    pub multi_signature: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowReportItem {
    pub target: Address,
    pub report_number: u64,
    pub flow_value1: u64,
    pub flow_value2: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowReportRecord {
    pub chain_hash: Hash,
    pub report_time: u64,
    pub report_content: Vec<FlowReportItem>,
}

/// Declared state changes of one block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderExtra {
    pub loop_start_time: u64,
    pub signer_queue: Vec<Address>,
    pub signer_missing: Vec<Address>,
    pub confirmed_block_number: u64,
    pub lock_reward: Vec<LockRewardRecord>,
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
    pub flow_harvest: Option<u128>,
    pub grant_profit: Vec<GrantProfitRecord>,
    pub flow_report: Vec<FlowReportRecord>,
    pub ful_data_root: Hash,
}

impl HeaderExtra {
    pub fn encode(&self) -> Result<Vec<u8>, ExtraError> {
        bincode::serialize(self).map_err(|e| ExtraError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ExtraError> {
        bincode::deserialize(bytes).map_err(|e| ExtraError::Decode(e.to_string()))
    }
}

/// Assemble extra-data with an empty (zeroed) seal
pub fn encode_extra_data(vanity: &[u8; EXTRA_VANITY], extra: &HeaderExtra) -> Result<Vec<u8>, ExtraError> {
    let payload = extra.encode()?;
    let mut out = Vec::with_capacity(EXTRA_VANITY + payload.len() + EXTRA_SEAL);
    out.extend_from_slice(vanity);
    out.extend_from_slice(&payload);
    out.extend_from_slice(&[0u8; EXTRA_SEAL]);
    Ok(out)
}

/// Strip vanity and seal and decode the Effect Record in between
pub fn decode_extra_data(extra_data: &[u8]) -> Result<HeaderExtra, ExtraError> {
    if extra_data.len() < EXTRA_VANITY + EXTRA_SEAL {
        return Err(ExtraError::TooShort(extra_data.len()));
    }
    HeaderExtra::decode(&extra_data[EXTRA_VANITY..extra_data.len() - EXTRA_SEAL])
}

// ─────────────────────────────────────────────────────────────────
// HEADER
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub parent_hash: Hash,
    pub coinbase: Address,
    pub number: u64,
    pub time: u64,
    pub extra: Vec<u8>,
}

impl Header {
    pub fn hash(&self) -> Hash {
        // Serializing plain structs into a Vec cannot fail
        keccak256(&bincode::serialize(self).unwrap_or_default())
    }

    /// Hash signed by the producer: the header with the seal bytes removed
    pub fn seal_hash(&self) -> Result<Hash, ExtraError> {
        if self.extra.len() < EXTRA_VANITY + EXTRA_SEAL {
            return Err(ExtraError::TooShort(self.extra.len()));
        }
        let mut unsealed = self.clone();
        unsealed.extra.truncate(self.extra.len() - EXTRA_SEAL);
        Ok(unsealed.hash())
    }

    pub fn seal(&mut self, key: &SecretKey) -> Result<(), ExtraError> {
        let digest = self.seal_hash()?;
        let signature = key.sign_hash(&digest).map_err(ExtraError::Seal)?;
        let start = self.extra.len() - EXTRA_SEAL;
        self.extra[start..].copy_from_slice(&signature);
        Ok(())
    }

    pub fn recover_signer(&self) -> Result<Address, ExtraError> {
        let digest = self.seal_hash()?;
        let start = self.extra.len() - EXTRA_SEAL;
        recover_address(&digest, &self.extra[start..]).map_err(ExtraError::Seal)
    }

    pub fn decode_extra(&self) -> Result<HeaderExtra, ExtraError> {
        decode_extra_data(&self.extra)
    }
}

/// Header access the engine needs from the surrounding chain
pub trait ChainHeaderReader: Send + Sync {
    fn config(&self) -> &ConsensusConfig;
    fn current_header(&self) -> Option<Header>;
    fn header_by_number(&self, number: u64) -> Option<Header>;
    fn header_by_hash(&self, hash: &Hash) -> Option<Header>;
}
