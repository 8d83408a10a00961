//! # sluice-types
//!
//! Shared domain types used across the sluice workspace: addresses, routing
//! actions, run snapshots and engine events.

pub mod action;
pub mod events;
pub mod snapshot;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// Position of a block in the pipeline. Index 0 is the deposit stage.
pub type BlockIndex = usize;

/// Fixed-point denominator for all percentages (100% = 10,000 bps).
pub const BASIS_POINTS: u128 = 10_000;

/// Upper bound on the performance fee a runner owner may configure (20%).
pub const MAX_PERFORMANCE_FEE_BPS: u128 = 2_000;

/// Pseudo-token used for the native currency.
pub const NATIVE_TOKEN: Address = Address([0xEE; 20]);

/// `bps` basis points of `amount`, rounded down.
///
/// Splits `amount` around [`BASIS_POINTS`] so the product never exceeds
/// `amount` for `bps <= BASIS_POINTS`. `None` only if `bps` is so large the
/// result does not fit.
pub fn bps_of(amount: u128, bps: u128) -> Option<u128> {
    let whole = (amount / BASIS_POINTS).checked_mul(bps)?;
    let part = (amount % BASIS_POINTS).checked_mul(bps)? / BASIS_POINTS;
    whole.checked_add(part)
}

/// Length of an [`Address`] in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Opaque 20-byte identifier for users, tokens, blocks and treasuries.
#[serde_as]
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(#[serde_as(as = "serde_with::hex::Hex")] pub [u8; ADDRESS_LEN]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    /// Address made of a single repeated byte. Handy for fixtures.
    pub const fn repeat_byte(byte: u8) -> Self {
        Address([byte; ADDRESS_LEN])
    }

    /// Whether this is the all-zero address.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Error returned when parsing an [`Address`] from text.
#[derive(Debug, thiserror::Error)]
pub enum AddressParseError {
    /// Input is not valid hex.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Input decodes to the wrong number of bytes.
    #[error("expected {ADDRESS_LEN} bytes, got {0}")]
    Length(usize),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits)?;
        let len = bytes.len();
        let array: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|_| AddressParseError::Length(len))?;
        Ok(Address(array))
    }
}
