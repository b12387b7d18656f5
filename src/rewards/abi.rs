//! Minimal ABI encoding for the reward contract
//!
//! Only static types are needed: `address`, `bool` and `uint256`, each one
//! 32-byte word.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// `canPlayerClaim(address)`
pub const CAN_PLAYER_CLAIM: [u8; 4] = [0x76, 0xcf, 0x1c, 0xc5];
/// `getContractStats()`
pub const GET_CONTRACT_STATS: [u8; 4] = [0xdf, 0xe6, 0xb5, 0xd6];
/// `getPlayerStats(address)`
pub const GET_PLAYER_STATS: [u8; 4] = [0x4f, 0xd6, 0x6e, 0xae];
/// `claimReward()`
pub const CLAIM_REWARD: [u8; 4] = [0xb8, 0x8a, 0x80, 0x2f];

/// Custom error `ClaimTooEarly()`
pub const CLAIM_TOO_EARLY: [u8; 4] = [0x16, 0x13, 0xb7, 0xeb];
/// Custom error `InsufficientContractBalance()`
pub const INSUFFICIENT_CONTRACT_BALANCE: [u8; 4] = [0x78, 0x6e, 0x0a, 0x99];

pub type Word = [u8; 32];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid hex data: {0}")]
    InvalidHex(String),

    #[error("Expected {expected} return words, got {actual}")]
    ShortReturn { expected: usize, actual: usize },

    #[error("Value does not fit in {0}")]
    Overflow(&'static str),
}

/// 20-byte account address
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address([u8; 20]);

impl Address {
    /// Left-padded argument word
    pub fn to_word(&self) -> Word {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }
}

impl FromStr for Address {
    type Err = AbiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = strip_hex_prefix(s);
        if digits.len() != 40 {
            return Err(AbiError::InvalidAddress(s.to_string()));
        }
        let bytes = hex::decode(digits).map_err(|_| AbiError::InvalidAddress(s.to_string()))?;

        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Calldata for `selector(args...)` as a 0x-prefixed hex string
pub fn encode_call(selector: [u8; 4], args: &[Word]) -> String {
    let mut data = Vec::with_capacity(4 + 32 * args.len());
    data.extend_from_slice(&selector);
    for word in args {
        data.extend_from_slice(word);
    }
    format!("0x{}", hex::encode(data))
}

/// Split return data into words, requiring at least `expected` of them
pub fn decode_words(data: &str, expected: usize) -> Result<Vec<Word>, AbiError> {
    let bytes = hex::decode(strip_hex_prefix(data))
        .map_err(|e| AbiError::InvalidHex(e.to_string()))?;
    if bytes.len() % 32 != 0 {
        return Err(AbiError::InvalidHex(format!(
            "length {} is not a multiple of 32",
            bytes.len()
        )));
    }

    let words: Vec<Word> = bytes
        .chunks_exact(32)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word.copy_from_slice(chunk);
            word
        })
        .collect();

    if words.len() < expected {
        return Err(AbiError::ShortReturn {
            expected,
            actual: words.len(),
        });
    }
    Ok(words)
}

pub fn word_to_u128(word: &Word) -> Result<u128, AbiError> {
    if word[..16].iter().any(|&b| b != 0) {
        return Err(AbiError::Overflow("u128"));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

pub fn word_to_u64(word: &Word) -> Result<u64, AbiError> {
    u64::try_from(word_to_u128(word)?).map_err(|_| AbiError::Overflow("u64"))
}

pub fn word_to_bool(word: &Word) -> bool {
    word.iter().any(|&b| b != 0)
}

/// Parse a JSON-RPC hex quantity such as `0x1a`
pub fn parse_quantity(s: &str) -> Result<u64, AbiError> {
    let digits = strip_hex_prefix(s);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16).map_err(|e| AbiError::InvalidHex(e.to_string()))
}

/// Leading four bytes of revert data, if present
pub fn revert_selector(data: &str) -> Option<[u8; 4]> {
    let digits = strip_hex_prefix(data);
    let head = hex::decode(digits.get(..8)?).ok()?;
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&head);
    Some(selector)
}
