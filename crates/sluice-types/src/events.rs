//! Event types emitted by a runner.
//!
//! Failures the run engine isolates (routing, fee skims) and failed
//! withdrawals are reported here instead of being propagated.

use serde::{Deserialize, Serialize};

use crate::{Address, BlockIndex};

/// Envelope for all runner events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number assigned by the event bus.
    pub sequence: u64,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    pub body: EngineEvent,
}

/// All runner events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    // Lifecycle
    PipelineInitialized {
        blocks: usize,
        tag: String,
    },
    VaultInitialized {
        owner: Address,
    },

    // Ledger
    Deposited {
        user: Address,
        block: BlockIndex,
        amount: u128,
    },
    Withdrawn {
        user: Address,
        block: BlockIndex,
        amount: u128,
    },
    WithdrawFailed {
        user: Address,
        block: BlockIndex,
        reason: String,
    },

    // Run
    Routed {
        block: BlockIndex,
        destination: BlockIndex,
        token: Address,
        amount: u128,
        shares: u128,
    },
    ActionFailed {
        block: BlockIndex,
        action: usize,
        destination: BlockIndex,
        token: Address,
        amount: u128,
        reason: String,
    },
    FeeSkimmed {
        block: BlockIndex,
        token: Address,
        amount: u128,
        treasury: Address,
    },
    FeeFailed {
        block: BlockIndex,
        token: Address,
        amount: u128,
        reason: String,
    },
    RunCompleted {
        run: u64,
        snapshot: usize,
        failures: usize,
    },

    // Admin
    PerformanceFeeSet {
        bps: u128,
    },
    TreasurySet {
        treasury: Address,
    },
}

impl EngineEvent {
    /// Whether this event reports a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EngineEvent::WithdrawFailed { .. }
                | EngineEvent::ActionFailed { .. }
                | EngineEvent::FeeFailed { .. }
        )
    }

    /// Coarse category used for subscription filtering.
    pub fn category(&self) -> &'static str {
        match self {
            EngineEvent::PipelineInitialized { .. } | EngineEvent::VaultInitialized { .. } => {
                "lifecycle"
            }
            EngineEvent::Deposited { .. }
            | EngineEvent::Withdrawn { .. }
            | EngineEvent::WithdrawFailed { .. } => "ledger",
            EngineEvent::Routed { .. }
            | EngineEvent::ActionFailed { .. }
            | EngineEvent::FeeSkimmed { .. }
            | EngineEvent::FeeFailed { .. }
            | EngineEvent::RunCompleted { .. } => "run",
            EngineEvent::PerformanceFeeSet { .. } | EngineEvent::TreasurySet { .. } => "admin",
        }
    }
}
