//! Harvest, fee skim and routing pass.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use sluice_block::{Assets, Block, CallContext};
use sluice_types::action::ActionKind;
use sluice_types::events::EngineEvent;
use sluice_types::{bps_of, Address, BlockIndex};

use crate::runner::Runner;
use crate::{settings, EngineError, Result};

/// A routing transfer that landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedAction {
    pub block: BlockIndex,
    pub action: usize,
    pub destination: BlockIndex,
    pub token: Address,
    pub amount: u128,
    /// Share balance growth of the destination.
    pub shares: u128,
}

/// Something that went wrong during a run without aborting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub block: BlockIndex,
    /// Action position; `None` for a failed fee skim.
    pub action: Option<usize>,
    pub reason: String,
    /// Tokens that left the source block and could not be returned.
    pub stranded: u128,
}

/// Result of [`Runner::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// 1-based run number.
    pub run: u64,
    pub timestamp: u64,
    /// Index of the snapshot recorded for this run.
    pub snapshot: usize,
    pub routed: Vec<RoutedAction>,
    pub failures: Vec<ActionFailure>,
}

struct Route {
    block: BlockIndex,
    action: usize,
    destination: BlockIndex,
    token: Address,
    amount: u128,
}

impl<A: Assets> Runner<A> {
    /// Harvest every block, then route harvested tokens along the
    /// configured actions and record a snapshot.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidPhase`] unless operational
    /// - [`EngineError::Harvest`] if any block fails to harvest; nothing has
    ///   been routed or recorded in that case
    ///
    /// Individual routing and fee failures do not abort the run; they are
    /// collected in [`RunReport::failures`].
    pub fn run(&mut self) -> Result<RunReport> {
        self.require_operational()?;
        let runner = self.address;

        for (block, b) in self.blocks.iter_mut().enumerate() {
            let mut ctx = CallContext::new(runner, &mut self.assets);
            b.run(&mut ctx).map_err(|source| {
                tracing::warn!(block, error = %source, "harvest failed, run aborted");
                EngineError::Harvest { block, source }
            })?;
        }

        let mut routed = Vec::new();
        let mut failures = Vec::new();

        for block in 0..self.blocks.len() {
            let actions = self.settings[block].clone();
            let source = self.blocks[block].address();

            for group in settings::groups(&actions) {
                let members = &actions[group.clone()];
                if !members.iter().any(|a| a.kind == ActionKind::Reinvest) {
                    continue;
                }
                let token = members[0].token;

                if let Some(failure) = self.skim_fee(block, source, token) {
                    failures.push(failure);
                }
                let basis = self.assets.balance_of(token, source);
                let mut allocated = 0u128;

                for (offset, action) in members.iter().enumerate() {
                    let index = group.start + offset;
                    let share = if offset + 1 == members.len() {
                        Some(basis.saturating_sub(allocated))
                    } else {
                        bps_of(basis, action.percent)
                    };
                    let Some(share) = share else {
                        let reason =
                            format!("share of {basis} at {} bps overflows", action.percent);
                        tracing::warn!(block, action = index, %reason, "action skipped");
                        failures.push(ActionFailure {
                            block,
                            action: Some(index),
                            reason,
                            stranded: 0,
                        });
                        continue;
                    };
                    allocated = allocated.saturating_add(share);

                    if action.kind != ActionKind::Reinvest {
                        continue;
                    }
                    let amount = share.min(self.assets.balance_of(token, source));
                    if amount == 0 {
                        continue;
                    }

                    let route = Route {
                        block,
                        action: index,
                        destination: action.destination,
                        token,
                        amount,
                    };
                    match self.route(source, &route) {
                        Ok(done) => routed.push(done),
                        Err((reason, stranded)) => {
                            self.emit(EngineEvent::ActionFailed {
                                block,
                                action: index,
                                destination: route.destination,
                                token,
                                amount,
                                reason: reason.clone(),
                            });
                            failures.push(ActionFailure {
                                block,
                                action: Some(index),
                                reason,
                                stranded,
                            });
                        }
                    }
                }
            }
        }

        let timestamp = self.clock.now();
        let balances = self
            .blocks
            .iter()
            .map(|b| b.balance(&self.assets))
            .collect();
        let ledger = self.operational_ledger()?;
        let deposits = ledger.running_deposits().to_vec();
        let withdrawals = ledger.running_withdrawals().to_vec();
        let snapshot = self
            .snapshots
            .record(timestamp, balances, &deposits, &withdrawals);

        self.last_run = timestamp;
        self.run_count += 1;

        tracing::info!(
            run = self.run_count,
            routed = routed.len(),
            failures = failures.len(),
            snapshot,
            "run completed"
        );
        self.emit(EngineEvent::RunCompleted {
            run: self.run_count,
            snapshot,
            failures: failures.len(),
        });

        Ok(RunReport {
            run: self.run_count,
            timestamp,
            snapshot,
            routed,
            failures,
        })
    }

    /// Move the performance fee on `token` from `source` to the treasury.
    fn skim_fee(
        &mut self,
        block: BlockIndex,
        source: Address,
        token: Address,
    ) -> Option<ActionFailure> {
        let treasury = self.treasury?;
        if self.performance_fee_bps == 0 {
            return None;
        }
        let balance = self.assets.balance_of(token, source);
        let Some(fee) = bps_of(balance, self.performance_fee_bps) else {
            let reason = format!("fee of {} bps on {balance} overflows", self.performance_fee_bps);
            self.emit(EngineEvent::FeeFailed {
                block,
                token,
                amount: 0,
                reason: reason.clone(),
            });
            return Some(ActionFailure {
                block,
                action: None,
                reason,
                stranded: 0,
            });
        };
        if fee == 0 {
            return None;
        }

        match self
            .assets
            .transfer_from(token, self.address, source, treasury, fee)
        {
            Ok(()) => {
                tracing::debug!(block, %token, fee, %treasury, "performance fee skimmed");
                self.emit(EngineEvent::FeeSkimmed {
                    block,
                    token,
                    amount: fee,
                    treasury,
                });
                None
            }
            Err(e) => {
                let reason = e.to_string();
                self.emit(EngineEvent::FeeFailed {
                    block,
                    token,
                    amount: fee,
                    reason: reason.clone(),
                });
                Some(ActionFailure {
                    block,
                    action: None,
                    reason,
                    stranded: 0,
                })
            }
        }
    }

    /// Deposit `route.amount` from `source` into the destination and credit
    /// the share growth to depositors. On failure returns the reason and the
    /// amount left stranded in the destination.
    fn route(
        &mut self,
        source: Address,
        route: &Route,
    ) -> std::result::Result<RoutedAction, (String, u128)> {
        let ready = self
            .operational_ledger()
            .map(|l| l.can_accrue())
            .map_err(|e| (e.to_string(), 0))?;
        if !ready {
            return Err(("no principal deposited".to_string(), 0));
        }

        let runner = self.address;
        let dest = route.destination;
        let before = share_balance(self.blocks[dest].as_ref(), &self.assets);
        let source_before = self.assets.balance_of(route.token, source);

        let outcome = {
            let target = &mut self.blocks[dest];
            let mut ctx = CallContext::new(runner, &mut self.assets);
            panic::catch_unwind(AssertUnwindSafe(|| {
                target.deposit_pull_from(&mut ctx, source, route.token, route.amount, 0)
            }))
        };
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_reason(payload.as_ref())),
        };
        if let Some(reason) = failure {
            return Err(self.reconcile_route(source, route, source_before, before, reason));
        }

        let shares =
            share_balance(self.blocks[dest].as_ref(), &self.assets).saturating_sub(before);
        let increment = self
            .ledger_mut()
            .and_then(|l| l.accrue(dest, shares).map_err(EngineError::from))
            .map_err(|e| (e.to_string(), 0))?;

        tracing::debug!(
            block = route.block,
            action = route.action,
            destination = dest,
            token = %route.token,
            amount = route.amount,
            shares,
            increment,
            "routed"
        );
        self.emit(EngineEvent::Routed {
            block: route.block,
            destination: dest,
            token: route.token,
            amount: route.amount,
            shares,
        });
        Ok(RoutedAction {
            block: route.block,
            action: route.action,
            destination: dest,
            token: route.token,
            amount: route.amount,
            shares,
        })
    }
}

impl<A: Assets> Runner<A> {
    /// Settle a destination that failed after it may have moved tokens.
    ///
    /// Share growth is credited to depositors. Otherwise whatever left the
    /// source is pulled back through the destination's allowance to the
    /// runner. Returns the reason and the amount still stranded.
    fn reconcile_route(
        &mut self,
        source: Address,
        route: &Route,
        source_before: u128,
        shares_before: u128,
        reason: String,
    ) -> (String, u128) {
        let moved = source_before.saturating_sub(self.assets.balance_of(route.token, source));
        if moved == 0 {
            return (reason, 0);
        }

        let dest = route.destination;
        let grown =
            share_balance(self.blocks[dest].as_ref(), &self.assets).saturating_sub(shares_before);
        if grown > 0 {
            let accrued = self
                .ledger_mut()
                .and_then(|l| l.accrue(dest, grown).map_err(EngineError::from));
            return match accrued {
                Ok(_) => (format!("{reason}; {grown} shares credited"), 0),
                Err(e) => {
                    tracing::error!(destination = dest, moved, error = %e, "route stranded");
                    (format!("{reason}; {moved} stranded: {e}"), moved)
                }
            };
        }

        let dest_addr = self.blocks[dest].address();
        match self
            .assets
            .transfer_from(route.token, self.address, dest_addr, source, moved)
        {
            Ok(()) => {
                tracing::warn!(destination = dest, moved, "failed route reversed");
                (format!("{reason}; {moved} returned"), 0)
            }
            Err(e) => {
                tracing::error!(destination = dest, moved, error = %e, "route stranded");
                (format!("{reason}; {moved} stranded: {e}"), moved)
            }
        }
    }
}

fn share_balance(block: &dyn Block, assets: &dyn Assets) -> u128 {
    match block.vault() {
        Some(vault) => vault.share_balance(assets),
        None => block.balance(assets),
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
