// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESSERA - CRYPTOGRAPHY MODULE
//
// Primitive types and secp256k1 signatures shared by every consensus crate.
// - 20-byte Address and 32-byte Hash with 0x-hex text form
// - Keccak-256 hashing
// - Recoverable signatures: sign, recover signer, low-S canonical check
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroize;

/// Length of a recoverable signature: r (32) || s (32) || v (1)
pub const SIGNATURE_LENGTH: usize = 65;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    InvalidKey,
    InvalidHex(String),
    InvalidLength { expected: usize, actual: usize },
    NonCanonicalSignature,
    RecoveryFailed,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CryptoError::InvalidKey => write!(f, "Invalid key format"),
            CryptoError::InvalidHex(msg) => write!(f, "Invalid hex: {}", msg),
            CryptoError::InvalidLength { expected, actual } => {
                write!(f, "Invalid length: expected {} bytes, got {}", expected, actual)
            }
            CryptoError::NonCanonicalSignature => write!(f, "Signature is not in low-S form"),
            CryptoError::RecoveryFailed => write!(f, "Signer recovery failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

// ─────────────────────────────────────────────────────────────────
// FIXED-SIZE BYTE TYPES
// ─────────────────────────────────────────────────────────────────

macro_rules! fixed_bytes {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;
            pub const ZERO: $name = $name([0u8; $len]);

            pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| CryptoError::InvalidLength {
                    expected: $len,
                    actual: bytes.len(),
                })?;
                Ok($name(arr))
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            /// Lowercase hex without the 0x prefix
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = CryptoError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let stripped = s.strip_prefix("0x").unwrap_or(s);
                let bytes =
                    hex::decode(stripped).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
                $name::from_slice(&bytes)
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                $name(bytes)
            }
        }

        // Text formats (JSON, TOML) carry 0x-hex; binary formats carry raw bytes.
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                if s.is_human_readable() {
                    s.serialize_str(&self.to_string())
                } else {
                    self.0.serialize(s)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                if d.is_human_readable() {
                    let text = String::deserialize(d)?;
                    text.parse().map_err(serde::de::Error::custom)
                } else {
                    <[u8; $len]>::deserialize(d).map($name)
                }
            }
        }
    };
}

fixed_bytes!(Address, 20);
fixed_bytes!(Hash, 32);

// ─────────────────────────────────────────────────────────────────
// HASHING
// ─────────────────────────────────────────────────────────────────

pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// Keccak-256 over the concatenation of several byte slices
pub fn keccak256_concat(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(hasher.finalize().into())
}

/// Address of an uncompressed public key: last 20 bytes of keccak(x || y)
fn verifying_key_to_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest.0[12..]);
    Address(out)
}

// ─────────────────────────────────────────────────────────────────
// SIGNING KEYS
// ─────────────────────────────────────────────────────────────────

/// secp256k1 secret key. Wiped from memory on drop.
pub struct SecretKey {
    bytes: [u8; 32],
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl SecretKey {
    pub fn random() -> Self {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        Self {
            bytes: key.to_bytes().into(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        // Rejects zero and out-of-range scalars
        let key = SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self {
            bytes: key.to_bytes().into(),
        })
    }

    fn signing_key(&self) -> Result<SigningKey, CryptoError> {
        SigningKey::from_slice(&self.bytes).map_err(|_| CryptoError::InvalidKey)
    }

    pub fn address(&self) -> Result<Address, CryptoError> {
        let key = self.signing_key()?;
        Ok(verifying_key_to_address(key.verifying_key()))
    }

    /// Sign a 32-byte digest. Output is r || s || v with v in {0, 1} and s in low-S form.
    pub fn sign_hash(&self, hash: &Hash) -> Result<[u8; SIGNATURE_LENGTH], CryptoError> {
        let key = self.signing_key()?;
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(hash.as_bytes())
            .map_err(|_| CryptoError::InvalidKey)?;
        let mut out = [0u8; SIGNATURE_LENGTH];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }
}

// ─────────────────────────────────────────────────────────────────
// SIGNATURE CHECKS
// ─────────────────────────────────────────────────────────────────

fn parse_signature(sig: &[u8]) -> Result<(Signature, u8), CryptoError> {
    if sig.len() != SIGNATURE_LENGTH {
        return Err(CryptoError::InvalidLength {
            expected: SIGNATURE_LENGTH,
            actual: sig.len(),
        });
    }
    let signature =
        Signature::from_slice(&sig[..64]).map_err(|_| CryptoError::NonCanonicalSignature)?;
    Ok((signature, sig[64]))
}

/// True when `sig` is 65 bytes with non-zero r/s inside the curve order,
/// s in the lower half, and a recovery byte of 0 or 1.
pub fn is_canonical_signature(sig: &[u8]) -> bool {
    match parse_signature(sig) {
        Ok((signature, v)) => v <= 1 && signature.normalize_s().is_none(),
        Err(_) => false,
    }
}

/// Recover the signing address from a digest and a 65-byte recoverable signature.
/// Non-canonical (high-S) signatures are rejected.
pub fn recover_address(hash: &Hash, sig: &[u8]) -> Result<Address, CryptoError> {
    let (signature, v) = parse_signature(sig)?;
    if signature.normalize_s().is_some() {
        return Err(CryptoError::NonCanonicalSignature);
    }
    if v > 1 {
        return Err(CryptoError::RecoveryFailed);
    }
    let recovery_id = RecoveryId::from_byte(v).ok_or(CryptoError::RecoveryFailed)?;
    let key = VerifyingKey::recover_from_prehash(hash.as_bytes(), &signature, recovery_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(verifying_key_to_address(&key))
}
