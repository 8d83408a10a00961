//! # sluice-block
//!
//! Capability interfaces the engine consumes from pipeline blocks and from
//! the asset layer, plus in-memory implementations of both.
//!
//! ## Modules
//!
//! - [`assets`] — Asset movement capability and an in-memory book
//! - [`capability`] — `Block` and `Vault` capability traits
//! - [`stub`] — Reference blocks for tests and local simulation

pub mod assets;
pub mod capability;
pub mod stub;

pub use assets::{Assets, MemoryAssets};
pub use capability::{Block, CallContext, Vault, WithdrawalInput};

use sluice_types::Address;

/// Error types for block and asset operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    /// Holder does not have enough of a token.
    #[error("insufficient balance of {token} at {holder}: need {needed}, have {available}")]
    InsufficientBalance {
        /// Token being moved.
        token: Address,
        /// Account being debited.
        holder: Address,
        /// Amount requested.
        needed: u128,
        /// Amount held.
        available: u128,
    },

    /// Spender is not authorized to move enough of the owner's token.
    #[error(
        "insufficient allowance of {token} from {owner} to {spender}: \
         need {needed}, have {available}"
    )]
    InsufficientAllowance {
        /// Token being moved.
        token: Address,
        /// Account being debited.
        owner: Address,
        /// Account performing the move.
        spender: Address,
        /// Amount requested.
        needed: u128,
        /// Remaining allowance.
        available: u128,
    },

    /// Received less than the caller's minimum.
    #[error("slippage: received {received}, minimum {min_out}")]
    Slippage {
        /// Amount actually produced.
        received: u128,
        /// Caller-supplied minimum.
        min_out: u128,
    },

    /// Block does not accept this token.
    #[error("unsupported token {0}")]
    UnsupportedToken(Address),

    /// Block does not implement this capability.
    #[error("operation not supported by block: {0}")]
    Unsupported(&'static str),

    /// Block-specific failure with a human-readable reason.
    #[error("reverted: {0}")]
    Reverted(String),
}

/// Convenience result type for block operations.
pub type Result<T> = std::result::Result<T, BlockError>;
