//! # sluice-ledger
//!
//! Accumulator-per-share bookkeeping for a block pipeline.
//!
//! Every accumulator block keeps a single growing "yield per deposited
//! unit" value. A user's unclaimed share is derived lazily from their
//! principal and a stored debt baseline, so yield events never iterate over
//! users.
//!
//! ## Modules
//!
//! - [`ledger`] — Principal totals, yield debt and banking
//! - [`snapshots`] — Append-only per-run history

pub mod ledger;
pub mod snapshots;

pub use ledger::{BlockShareInfo, Ledger, UserInfo};
pub use snapshots::SnapshotLog;

use sluice_types::BlockIndex;

/// Error types for ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Arithmetic overflow in accumulator calculation.
    #[error("arithmetic overflow")]
    Overflow,

    /// Block index outside the pipeline.
    #[error("invalid block index {0}")]
    InvalidBlock(BlockIndex),

    /// Precision factor must be non-zero.
    #[error("precision for block {0} must be non-zero")]
    InvalidPrecision(BlockIndex),

    /// Accrual attempted while no principal is deposited.
    #[error("no deposits to accrue yield against")]
    NoDeposits,

    /// Withdrawal exceeds the user's principal.
    #[error("insufficient principal: requested {requested}, deposited {deposited}")]
    InsufficientPrincipal {
        /// Amount requested.
        requested: u128,
        /// Principal on record.
        deposited: u128,
    },
}

/// Convenience result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
