//! # sluice-engine
//!
//! Runner for a block pipeline: one-shot wiring, deposits into stage 0,
//! periodic runs that harvest and route yield, and withdrawals of principal
//! and accumulated earnings.
//!
//! ## Modules
//!
//! - [`runner`] — Lifecycle, admin and queries
//! - [`settings`] — Routing rule validation
//! - [`flows`] — Deposit and withdraw
//! - [`run`] — Harvest, fee skim and routing pass
//! - [`events`] — Event bus
//! - [`config`] — TOML configuration
//! - [`clock`] — Time source

pub mod clock;
pub mod config;
pub mod events;
pub mod flows;
pub mod run;
pub mod runner;
pub mod settings;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::RunnerConfig;
pub use events::EventBus;
pub use flows::WithdrawAllReport;
pub use run::{ActionFailure, RoutedAction, RunReport};
pub use runner::{Phase, Runner};

use sluice_block::BlockError;
use sluice_ledger::LedgerError;
use sluice_types::{Address, BlockIndex};

/// Routing rule violations, detected before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// One action list per block is required.
    #[error("settings for {settings} blocks, pipeline has {blocks}")]
    LengthMismatch {
        /// Number of blocks.
        blocks: usize,
        /// Number of action lists.
        settings: usize,
    },

    /// Destination is not a block of this pipeline.
    #[error("block {block} action {action}: destination {destination} out of range")]
    InvalidDestination {
        /// Source block.
        block: BlockIndex,
        /// Action position.
        action: usize,
        /// Offending destination.
        destination: BlockIndex,
    },

    /// Stage 0 may only reinvest.
    #[error("stage 0 action {action} must be reinvest")]
    Stage0NotReinvest {
        /// Action position.
        action: usize,
    },

    /// A reinvest may not target its own block.
    #[error("block {block} action {action} routes into itself")]
    SelfRouting {
        /// Source block.
        block: BlockIndex,
        /// Action position.
        action: usize,
    },

    /// Accumulator stages carry at most one hold action at 100%.
    #[error("block {block} is an accumulator and may only hold 100%")]
    AccumulatorNotLeaf {
        /// Offending block.
        block: BlockIndex,
    },

    /// A contiguous token group does not sum to 100%.
    #[error("block {block} token {token}: group sums to {total} bps")]
    GroupPercentMismatch {
        /// Offending block.
        block: BlockIndex,
        /// Group token.
        token: Address,
        /// Actual sum in basis points.
        total: u128,
    },

    /// A token reappears after its group was closed.
    #[error("block {block} token {token} appears in more than one group")]
    TokenRegrouped {
        /// Offending block.
        block: BlockIndex,
        /// Repeated token.
        token: Address,
    },
}

/// Error types for runner operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Pipeline wiring was already performed.
    #[error("already initialized")]
    AlreadyInitialized,

    /// Operation requires a different lifecycle phase.
    #[error("invalid phase: expected {expected:?}, current {actual:?}")]
    InvalidPhase {
        /// Required phase.
        expected: Phase,
        /// Current phase.
        actual: Phase,
    },

    /// A pipeline needs at least the deposit stage.
    #[error("pipeline has no blocks")]
    EmptyPipeline,

    /// Per-block inputs of different lengths.
    #[error("{what}: expected {expected} entries, got {actual}")]
    LengthMismatch {
        /// Which input.
        what: &'static str,
        /// Number of blocks.
        expected: usize,
        /// Number supplied.
        actual: usize,
    },

    /// Rejected routing rules.
    #[error("invalid settings: {0}")]
    Settings(#[from] SettingsError),

    /// Accounting failure.
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),

    /// A block capability call failed.
    #[error("block {block}: {source}")]
    Block {
        /// Failing block.
        block: BlockIndex,
        /// Underlying failure.
        #[source]
        source: BlockError,
    },

    /// Stage 0 rejected a deposit and part of it could not be returned.
    #[error("block {block} rejected deposit, {stranded} not refunded: {source}")]
    DepositStranded {
        /// Failing block.
        block: BlockIndex,
        /// Amount the depositor did not get back.
        stranded: u128,
        /// Underlying failure.
        #[source]
        source: BlockError,
    },

    /// Harvest failed; the run was aborted.
    #[error("harvest of block {block} failed: {source}")]
    Harvest {
        /// Failing block.
        block: BlockIndex,
        /// Underlying failure.
        #[source]
        source: BlockError,
    },

    /// Caller is not the owner.
    #[error("unauthorized caller {0}")]
    Unauthorized(Address),

    /// Owner address must be non-zero.
    #[error("invalid owner address")]
    InvalidOwner,

    /// Zero amount.
    #[error("amount is zero")]
    ZeroAmount,

    /// Block index outside the pipeline, or not allowed for this operation.
    #[error("invalid block index {0}")]
    InvalidBlock(BlockIndex),

    /// Token does not match the stage-0 deposit token.
    #[error("wrong token: expected {expected}, got {actual}")]
    WrongToken {
        /// Stage-0 deposit token.
        expected: Address,
        /// Token supplied.
        actual: Address,
    },

    /// Performance fee above the allowed maximum.
    #[error("performance fee {bps} bps exceeds maximum {max}")]
    FeeTooHigh {
        /// Requested fee.
        bps: u128,
        /// Maximum fee.
        max: u128,
    },

    /// Operation intentionally not implemented by this runner.
    #[error("not supported: {0}")]
    NotSupported(&'static str),
}

/// Convenience result type for runner operations.
pub type Result<T> = std::result::Result<T, EngineError>;
