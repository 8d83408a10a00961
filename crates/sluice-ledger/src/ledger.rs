//! Principal totals, yield debt and banking.
//!
//! ## Formula
//!
//! ```text
//! earnings(user, b) = deposits[user] * acc[b] / precision[b] - debt[b][user]   (floored at 0)
//! acc[b]           += shares_increase * precision[b] / total_deposits
//! ```
//!
//! Earnings are banked and debts reset inside every principal mutation, so
//! yield already reflected in `acc` is neither forfeited nor counted twice
//! when the principal moves. Each mutation is computed in full before any
//! field is written.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sluice_types::{Address, BlockIndex};

use crate::{LedgerError, Result};

/// Global accumulator state of one block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockShareInfo {
    /// Yield per deposited unit, scaled by `precision`.
    pub acc_yield_per_token: u128,
    /// Fixed-point scale for `acc_yield_per_token`.
    pub precision: u128,
}

/// Per-user, per-block accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Accumulated value already attributed as of the last principal change.
    pub yield_debt: u128,
    /// Realized yield held until withdrawn.
    pub banked_amount: u128,
}

/// Accounting store owned by one runner.
#[derive(Clone, Debug)]
pub struct Ledger {
    total_deposits: u128,
    user_deposits: HashMap<Address, u128>,
    running_deposits: Vec<u128>,
    running_withdrawals: Vec<u128>,
    shares: Vec<BlockShareInfo>,
    users: Vec<HashMap<Address, UserInfo>>,
}

impl Ledger {
    /// Create a ledger for a pipeline with one precision factor per block.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidPrecision`] if any factor is zero
    pub fn new(precisions: &[u128]) -> Result<Self> {
        if let Some(block) = precisions.iter().position(|p| *p == 0) {
            return Err(LedgerError::InvalidPrecision(block));
        }
        let n = precisions.len();
        Ok(Self {
            total_deposits: 0,
            user_deposits: HashMap::new(),
            running_deposits: vec![0; n],
            running_withdrawals: vec![0; n],
            shares: precisions
                .iter()
                .map(|&precision| BlockShareInfo {
                    acc_yield_per_token: 0,
                    precision,
                })
                .collect(),
            users: vec![HashMap::new(); n],
        })
    }

    pub fn block_count(&self) -> usize {
        self.shares.len()
    }

    pub fn total_deposits(&self) -> u128 {
        self.total_deposits
    }

    /// Principal on record for `user`.
    pub fn user_deposits(&self, user: &Address) -> u128 {
        self.user_deposits.get(user).copied().unwrap_or(0)
    }

    /// All users with a principal entry.
    pub fn depositors(&self) -> impl Iterator<Item = (&Address, &u128)> {
        self.user_deposits.iter()
    }

    /// Cumulative amount credited to each block.
    pub fn running_deposits(&self) -> &[u128] {
        &self.running_deposits
    }

    /// Cumulative amount released from each block.
    pub fn running_withdrawals(&self) -> &[u128] {
        &self.running_withdrawals
    }

    pub fn share_info(&self, block: BlockIndex) -> Option<&BlockShareInfo> {
        self.shares.get(block)
    }

    /// Accounting entry for `user` on `block`; zeroed if none exists.
    pub fn user_info(&self, block: BlockIndex, user: &Address) -> UserInfo {
        self.users
            .get(block)
            .and_then(|m| m.get(user))
            .copied()
            .unwrap_or_default()
    }

    /// `deposits * acc / precision` for an arbitrary principal.
    fn accumulated_for(&self, principal: u128, block: BlockIndex) -> Result<u128> {
        let info = self
            .shares
            .get(block)
            .ok_or(LedgerError::InvalidBlock(block))?;
        principal
            .checked_mul(info.acc_yield_per_token)
            .map(|v| v / info.precision)
            .ok_or(LedgerError::Overflow)
    }

    /// Unbanked earnings of `user` on `block`, floored at zero.
    pub fn block_earnings(&self, user: &Address, block: BlockIndex) -> Result<u128> {
        let accumulated = self.accumulated_for(self.user_deposits(user), block)?;
        Ok(accumulated.saturating_sub(self.user_info(block, user).yield_debt))
    }

    /// Earnings plus banked amount: what a withdrawal from `block` pays out.
    pub fn claimable(&self, user: &Address, block: BlockIndex) -> Result<u128> {
        self.block_earnings(user, block)?
            .checked_add(self.user_info(block, user).banked_amount)
            .ok_or(LedgerError::Overflow)
    }

    /// Fold current earnings on every accumulator block into the banked
    /// amount. Returns the total newly banked.
    ///
    /// Must be followed by a debt reset before earnings are read again,
    /// otherwise the same yield is banked twice.
    pub fn bank_earnings(&mut self, user: &Address) -> Result<u128> {
        let plan = self.plan_banking(user)?;
        Ok(self.apply_banking(user, &plan))
    }

    /// Set the yield debt on `block` to the user's current accumulated value.
    pub fn reset_user_yield_debt(&mut self, user: &Address, block: BlockIndex) -> Result<()> {
        let debt = self.accumulated_for(self.user_deposits(user), block)?;
        self.entry(block, user).yield_debt = debt;
        Ok(())
    }

    /// Reset the yield debt of `user` on every block.
    pub fn reset_all_debts(&mut self, user: &Address) -> Result<()> {
        let debts = self.plan_debts(self.user_deposits(user))?;
        self.apply_debts(user, &debts);
        Ok(())
    }

    /// Credit `amount` of principal on stage 0 to `user`.
    ///
    /// Banks outstanding earnings, grows principal and totals, then resets
    /// debts on every block.
    pub fn credit_deposit(&mut self, user: &Address, amount: u128) -> Result<()> {
        let principal = self
            .user_deposits(user)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let total = self
            .total_deposits
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let running = self.running_deposits[0]
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let banking = self.plan_banking(user)?;
        let debts = self.plan_debts(principal)?;

        self.apply_banking(user, &banking);
        self.user_deposits.insert(*user, principal);
        self.total_deposits = total;
        self.running_deposits[0] = running;
        self.apply_debts(user, &debts);

        tracing::debug!(%user, amount, principal, total, "ledger: deposit credited");
        Ok(())
    }

    /// Reject a stage-0 withdrawal request larger than the user's principal.
    pub fn check_withdrawable(&self, user: &Address, requested: u128) -> Result<()> {
        let deposited = self.user_deposits(user);
        if requested > deposited {
            return Err(LedgerError::InsufficientPrincipal {
                requested,
                deposited,
            });
        }
        Ok(())
    }

    /// Debit `released` principal from `user` after stage 0 paid it out.
    ///
    /// Principal and totals are floored at zero. Returns the new principal.
    pub fn debit_withdrawal(&mut self, user: &Address, released: u128) -> Result<u128> {
        let principal = self.user_deposits(user).saturating_sub(released);
        let debit = self.user_deposits(user) - principal;
        let running = self.running_withdrawals[0]
            .checked_add(released)
            .ok_or(LedgerError::Overflow)?;
        let banking = self.plan_banking(user)?;
        let debts = self.plan_debts(principal)?;

        self.apply_banking(user, &banking);
        if principal == 0 {
            self.user_deposits.remove(user);
        } else {
            self.user_deposits.insert(*user, principal);
        }
        self.total_deposits = self.total_deposits.saturating_sub(debit);
        self.running_withdrawals[0] = running;
        self.apply_debts(user, &debts);

        tracing::debug!(
            %user,
            released,
            principal,
            total = self.total_deposits,
            "ledger: withdrawal debited"
        );
        Ok(principal)
    }

    /// Close out a payout of the user's full claimable amount on `block`:
    /// banked amount goes to zero and the debt on `block` is reset.
    pub fn settle_claim(
        &mut self,
        user: &Address,
        block: BlockIndex,
        released: u128,
    ) -> Result<()> {
        let debt = self.accumulated_for(self.user_deposits(user), block)?;
        let running = self.running_withdrawals[block]
            .checked_add(released)
            .ok_or(LedgerError::Overflow)?;

        let entry = self.entry(block, user);
        entry.banked_amount = 0;
        entry.yield_debt = debt;
        self.running_withdrawals[block] = running;

        tracing::debug!(%user, block, released, "ledger: claim settled");
        Ok(())
    }

    /// Whether an accrual would be accepted.
    pub fn can_accrue(&self) -> bool {
        self.total_deposits > 0
    }

    /// Spread `shares_increase` over all principal on `block`'s accumulator.
    /// Returns the accumulator increment.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NoDeposits`] if no principal is deposited
    /// - [`LedgerError::Overflow`] on arithmetic overflow
    pub fn accrue(&mut self, block: BlockIndex, shares_increase: u128) -> Result<u128> {
        if self.total_deposits == 0 {
            return Err(LedgerError::NoDeposits);
        }
        let total = self.total_deposits;
        let info = self
            .shares
            .get_mut(block)
            .ok_or(LedgerError::InvalidBlock(block))?;
        let increment = shares_increase
            .checked_mul(info.precision)
            .ok_or(LedgerError::Overflow)?
            / total;
        info.acc_yield_per_token = info
            .acc_yield_per_token
            .checked_add(increment)
            .ok_or(LedgerError::Overflow)?;

        tracing::trace!(
            block,
            shares_increase,
            increment,
            acc = info.acc_yield_per_token,
            "ledger: accrued"
        );
        Ok(increment)
    }

    fn entry(&mut self, block: BlockIndex, user: &Address) -> &mut UserInfo {
        self.users[block].entry(*user).or_default()
    }

    fn plan_banking(&self, user: &Address) -> Result<Vec<(BlockIndex, u128)>> {
        let mut plan = Vec::new();
        for block in 1..self.block_count() {
            let earned = self.block_earnings(user, block)?;
            if earned > 0 {
                self.user_info(block, user)
                    .banked_amount
                    .checked_add(earned)
                    .ok_or(LedgerError::Overflow)?;
                plan.push((block, earned));
            }
        }
        Ok(plan)
    }

    fn apply_banking(&mut self, user: &Address, plan: &[(BlockIndex, u128)]) -> u128 {
        let mut total = 0u128;
        for &(block, earned) in plan {
            let entry = self.entry(block, user);
            entry.banked_amount += earned;
            total = total.saturating_add(earned);
        }
        total
    }

    fn plan_debts(&self, principal: u128) -> Result<Vec<u128>> {
        (0..self.block_count())
            .map(|block| self.accumulated_for(principal, block))
            .collect()
    }

    fn apply_debts(&mut self, user: &Address, debts: &[u128]) {
        for (block, &debt) in debts.iter().enumerate() {
            if debt == 0 && !self.users[block].contains_key(user) {
                continue;
            }
            self.entry(block, user).yield_debt = debt;
        }
    }
}
