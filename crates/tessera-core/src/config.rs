// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - CONSENSUS CONFIGURATION
//
// Protocol parameters loaded from TOML: block period, signer count,
// fork heights, reward schedule, lock parameters and genesis state.
// Amounts are u128 wei and written as strings in TOML (TOML integers
// are i64 and cannot hold them).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fs;
use std::path::Path;

use crate::header::RewardKind;
use crate::{Address, WEI_PER_NFC};

mod u128_toml {
    use super::*;

    pub fn serialize<S: Serializer>(val: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&val.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        use serde::de::{self, Visitor};
        struct U128Visitor;

        impl<'de> Visitor<'de> for U128Visitor {
            type Value = u128;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a u128 as a string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(v as u128)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
                if v >= 0 {
                    Ok(v as u128)
                } else {
                    Err(E::custom("negative value for u128"))
                }
            }
        }

        d.deserialize_any(U128Visitor)
    }
}

/// Heights at which protocol changes activate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkHeights {
    /// From this height the signer-missing search spans the previous loop's queue
    pub trantor_block: u64,
    /// From this height signer rewards lock per grant instead of per deposit
    pub lock_simplify_block: u64,
    /// From this height every block commits the FUL trie and checks its root
    pub ful_trie_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishPolicy {
    /// Added to a signer's counter for each missed slot
    pub miss_increment: u64,
    /// Subtracted from every counter when a new loop starts
    pub loop_forgiveness: u64,
    /// Counters at or above this are not elected (0 disables)
    pub kick_threshold: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthTier {
    /// Minimum claimed bandwidth for this tier
    pub bandwidth: u32,
    /// Share of the daily bandwidth pool, in per-mille
    pub per_mille: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSchedule {
    /// Cap on the flow rewards granted in one day
    #[serde(with = "u128_toml")]
    pub flow_daily_pool: u128,
    /// Ascending by bandwidth
    pub bandwidth_tiers: Vec<BandwidthTier>,
}

/// Lock schedule of a pledge item, all spans in days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockParameter {
    pub lock_period: u64,
    pub rls_period: u64,
    pub interval: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerKind<T> {
    pub signer: T,
    pub flow: T,
    pub bandwidth: T,
}

impl<T: Copy> PerKind<T> {
    pub fn get(&self, kind: RewardKind) -> T {
        match kind {
            RewardKind::Signer => self.signer,
            RewardKind::Flow => self.flow,
            RewardKind::Bandwidth => self.bandwidth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositThresholds {
    #[serde(with = "u128_toml")]
    pub signer: u128,
    #[serde(with = "u128_toml")]
    pub flow: u128,
    #[serde(with = "u128_toml")]
    pub bandwidth: u128,
}

impl DepositThresholds {
    pub fn get(&self, kind: RewardKind) -> u128 {
        match kind {
            RewardKind::Signer => self.signer,
            RewardKind::Flow => self.flow,
            RewardKind::Bandwidth => self.bandwidth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub address: Address,
    #[serde(with = "u128_toml")]
    pub balance: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub time: u64,
    pub signers: Vec<Address>,
    #[serde(default)]
    pub flow_pledges: Vec<Address>,
    #[serde(default)]
    pub ful_balances: Vec<GenesisAllocation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Seconds per block
    pub period: u64,
    pub max_signer_count: usize,
    /// Persist a snapshot every N blocks
    pub snapshot_interval: u64,
    pub forks: ForkHeights,
    pub punish: PunishPolicy,
    pub rewards: RewardSchedule,
    pub deposit: DepositThresholds,
    pub lock: PerKind<LockParameter>,
    /// Block offset within each day at which a kind's payouts run
    pub payout: PerKind<u64>,
    pub genesis: GenesisConfig,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        let lock = LockParameter {
            lock_period: 30,
            rls_period: 180,
            interval: 1,
        };
        Self {
            period: 3,
            max_signer_count: 21,
            snapshot_interval: 1024,
            forks: ForkHeights {
                trantor_block: 0,
                lock_simplify_block: 0,
                ful_trie_block: 0,
            },
            punish: PunishPolicy {
                miss_increment: 1,
                loop_forgiveness: 0,
                kick_threshold: 0,
            },
            rewards: RewardSchedule {
                flow_daily_pool: 100_000 * WEI_PER_NFC,
                bandwidth_tiers: vec![
                    BandwidthTier { bandwidth: 100, per_mille: 100 },
                    BandwidthTier { bandwidth: 400, per_mille: 200 },
                    BandwidthTier { bandwidth: 1000, per_mille: 300 },
                    BandwidthTier { bandwidth: 2000, per_mille: 400 },
                ],
            },
            deposit: DepositThresholds {
                signer: WEI_PER_NFC,
                flow: WEI_PER_NFC,
                bandwidth: WEI_PER_NFC,
            },
            lock: PerKind {
                signer: lock,
                flow: lock,
                bandwidth: lock,
            },
            payout: PerKind {
                signer: 1,
                flow: 2,
                bandwidth: 3,
            },
            genesis: GenesisConfig {
                time: 0,
                signers: Vec::new(),
                flow_pledges: Vec::new(),
                ful_balances: Vec::new(),
            },
        }
    }
}

impl ConsensusConfig {
    /// Load consensus config from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path)?;
        let config: ConsensusConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save consensus config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.period == 0 {
            return Err("period must be greater than zero".to_string());
        }
        if self.max_signer_count == 0 {
            return Err("max_signer_count must be greater than zero".to_string());
        }
        if self.snapshot_interval == 0 {
            return Err("snapshot_interval must be greater than zero".to_string());
        }
        if self.genesis.signers.is_empty() {
            return Err("genesis must name at least one signer".to_string());
        }
        let tiers = &self.rewards.bandwidth_tiers;
        if tiers.windows(2).any(|w| w[0].bandwidth >= w[1].bandwidth) {
            return Err("bandwidth tiers must be strictly ascending".to_string());
        }
        if tiers.iter().any(|t| t.per_mille > 1000) {
            return Err("bandwidth tier share exceeds 1000 per-mille".to_string());
        }
        let bpd = crate::blocks_per_day(self.period);
        for kind in RewardKind::ALL {
            if self.payout.get(kind) >= bpd {
                return Err(format!("payout offset for {:?} exceeds blocks per day", kind));
            }
        }
        Ok(())
    }
}
