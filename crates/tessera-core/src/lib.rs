// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - CORE MODULE
//
// Chain primitives shared by the consensus engine: block headers and the
// Effect Record carried in their extra-data, the opaque key-value store and
// its namespaced keys, the Merkle-Patricia trie and the FUL balance ledger
// built on it, and the TOML consensus configuration.
// All financial arithmetic uses u128 wei units (no floating-point).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod config;
pub mod ful;
pub mod header;
pub mod store;
pub mod trie;

pub use tessera_crypto::{keccak256, Address, Hash};

/// 1 NFC = 10^18 wei
pub const WEI_PER_NFC: u128 = 1_000_000_000_000_000_000;

pub const SECONDS_PER_DAY: u64 = 86_400;
pub const SECONDS_PER_YEAR: u64 = 365 * SECONDS_PER_DAY;

/// Fixed-width prefix of header extra-data reserved for signer vanity
pub const EXTRA_VANITY: usize = 32;
/// Fixed-width suffix of header extra-data holding the seal signature
pub const EXTRA_SEAL: usize = tessera_crypto::SIGNATURE_LENGTH;

/// Prefix of every store key written by the engine
pub const ENGINE_NAMESPACE: &str = "tessera";

pub fn blocks_per_day(period: u64) -> u64 {
    (SECONDS_PER_DAY / period.max(1)).max(1)
}

pub fn blocks_per_year(period: u64) -> u64 {
    (SECONDS_PER_YEAR / period.max(1)).max(1)
}

/// Day index of a block (day 0 holds blocks 0..blocks_per_day)
pub fn block_day(number: u64, period: u64) -> u64 {
    number / blocks_per_day(period)
}

/// First block of every day except genesis
pub fn is_day_boundary(number: u64, period: u64) -> bool {
    number > 0 && number % blocks_per_day(period) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_counts_for_three_second_period() {
        assert_eq!(blocks_per_day(3), 28_800);
        assert_eq!(blocks_per_year(3), 10_512_000);
    }

    #[test]
    fn test_zero_period_does_not_divide_by_zero() {
        assert_eq!(blocks_per_day(0), SECONDS_PER_DAY);
    }

    #[test]
    fn test_day_boundary() {
        let bpd = blocks_per_day(10);
        assert!(!is_day_boundary(0, 10));
        assert!(!is_day_boundary(bpd - 1, 10));
        assert!(is_day_boundary(bpd, 10));
        assert_eq!(block_day(bpd - 1, 10), 0);
        assert_eq!(block_day(bpd, 10), 1);
    }
}
