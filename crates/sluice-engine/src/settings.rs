//! Routing rule validation.
//!
//! Rules per block:
//!
//! - stage 0 only reinvests, never into itself, so harvested value always
//!   moves forward and never lands on top of user principal;
//! - every other stage is a leaf: at most one action, a hold at 100%;
//! - consecutive actions on the same token form a group, a token change
//!   closes the group, each group sums to exactly 10,000 bps, and a closed
//!   token may not open a second group.

use std::collections::HashSet;
use std::ops::Range;

use sluice_block::{Block, CallContext};
use sluice_types::action::{Action, ActionKind};
use sluice_types::{Address, BlockIndex, BASIS_POINTS};

use crate::{EngineError, SettingsError};

/// Split an action list into contiguous same-token groups.
pub fn groups(actions: &[Action]) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut start = 0;
    for i in 1..=actions.len() {
        if i == actions.len() || actions[i].token != actions[start].token {
            if start < i {
                out.push(start..i);
            }
            start = i;
        }
    }
    out
}

/// Validate the action lists of a whole pipeline.
///
/// # Errors
///
/// Returns the first [`SettingsError`] found; nothing is written either way.
pub fn validate(settings: &[Vec<Action>], block_count: usize) -> Result<(), SettingsError> {
    if settings.len() != block_count {
        return Err(SettingsError::LengthMismatch {
            blocks: block_count,
            settings: settings.len(),
        });
    }

    for (block, actions) in settings.iter().enumerate() {
        for (action, a) in actions.iter().enumerate() {
            if a.destination >= block_count {
                return Err(SettingsError::InvalidDestination {
                    block,
                    action,
                    destination: a.destination,
                });
            }
        }

        if block == 0 {
            validate_deposit_stage(actions)?;
        } else {
            validate_accumulator(block, actions)?;
        }

        validate_groups(block, actions)?;
    }

    Ok(())
}

fn validate_deposit_stage(actions: &[Action]) -> Result<(), SettingsError> {
    for (action, a) in actions.iter().enumerate() {
        if a.kind != ActionKind::Reinvest {
            return Err(SettingsError::Stage0NotReinvest { action });
        }
        if a.destination == 0 {
            return Err(SettingsError::SelfRouting { block: 0, action });
        }
    }
    Ok(())
}

fn validate_accumulator(block: BlockIndex, actions: &[Action]) -> Result<(), SettingsError> {
    match actions {
        [] => Ok(()),
        [only] if only.kind == ActionKind::None && only.percent == BASIS_POINTS => Ok(()),
        _ => Err(SettingsError::AccumulatorNotLeaf { block }),
    }
}

fn validate_groups(block: BlockIndex, actions: &[Action]) -> Result<(), SettingsError> {
    let mut closed: HashSet<Address> = HashSet::new();
    for group in groups(actions) {
        let token = actions[group.start].token;
        if !closed.insert(token) {
            return Err(SettingsError::TokenRegrouped { block, token });
        }
        let total = actions[group]
            .iter()
            .try_fold(0u128, |acc, a| acc.checked_add(a.percent))
            .unwrap_or(u128::MAX);
        if total != BASIS_POINTS {
            return Err(SettingsError::GroupPercentMismatch {
                block,
                token,
                total,
            });
        }
    }
    Ok(())
}

/// Let every reinvest source pull-authorize its destination, so routing
/// calls during a run need no per-call approval.
pub(crate) fn authorize_routes(
    blocks: &mut [Box<dyn Block>],
    settings: &[Vec<Action>],
    ctx: &mut CallContext<'_>,
) -> Result<(), EngineError> {
    for (index, actions) in settings.iter().enumerate() {
        for a in actions.iter().filter(|a| a.kind == ActionKind::Reinvest) {
            let spender = blocks[a.destination].address();
            blocks[index]
                .approve_spend_if_no_allowance(ctx, spender, a.token, u128::MAX)
                .map_err(|source| EngineError::Block {
                    block: index,
                    source,
                })?;
            tracing::debug!(
                block = index,
                destination = a.destination,
                token = %a.token,
                "route pre-authorized"
            );
        }
    }
    Ok(())
}
