//! Post-harvest routing rules attached to each block.

use serde::{Deserialize, Serialize};

use crate::{Address, BlockIndex, BASIS_POINTS};

/// What an action does with its share of a block's token balance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Leave the balance where it is.
    #[default]
    None,
    TakeProfit,
    Autocompound,
    /// Move the balance into the destination block.
    Reinvest,
}

/// One routing rule: send `percent` of the block's `token` balance to
/// `destination` after a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Token the action applies to.
    pub token: Address,
    /// Action kind.
    pub kind: ActionKind,
    /// Share of the group's balance, in basis points.
    pub percent: u128,
    /// Destination block index.
    pub destination: BlockIndex,
}

impl Action {
    /// Reinvest `percent` bps of `token` into `destination`.
    pub fn reinvest(token: Address, percent: u128, destination: BlockIndex) -> Self {
        Self {
            token,
            kind: ActionKind::Reinvest,
            percent,
            destination,
        }
    }

    /// The only action an accumulator stage may carry: keep 100%.
    pub fn hold(token: Address) -> Self {
        Self {
            token,
            kind: ActionKind::None,
            percent: BASIS_POINTS,
            destination: 0,
        }
    }
}

/// Fallback routing for a failed action. Stored for interface parity; the
/// run engine never consults it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailAction {
    pub kind: ActionKind,
    pub destination: BlockIndex,
}
