//! Asset movement capability.
//!
//! Token transfers are an external primitive. Blocks and the runner move
//! funds only through [`Assets`]; [`MemoryAssets`] keeps balances and
//! allowances in maps.

use std::collections::HashMap;

use sluice_types::Address;

use crate::{BlockError, Result};

/// Reliable asset movement with balance queries.
pub trait Assets {
    /// Balance of `token` held by `holder`.
    fn balance_of(&self, token: Address, holder: Address) -> u128;

    /// Move `amount` of `token` out of `from`, which is the acting party.
    fn transfer(&mut self, token: Address, from: Address, to: Address, amount: u128) -> Result<()>;

    /// Set the amount `spender` may move out of `owner`.
    fn approve(&mut self, token: Address, owner: Address, spender: Address, amount: u128);

    /// Remaining amount `spender` may move out of `owner`.
    fn allowance(&self, token: Address, owner: Address, spender: Address) -> u128;

    /// Move `amount` of `token` from `from` to `to` on behalf of `spender`,
    /// consuming allowance. An allowance of `u128::MAX` is never consumed.
    fn transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<()>;
}

/// In-memory asset book.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssets {
    balances: HashMap<(Address, Address), u128>,
    allowances: HashMap<(Address, Address, Address), u128>,
}

impl MemoryAssets {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` of `token` to `to` out of thin air.
    pub fn mint(&mut self, token: Address, to: Address, amount: u128) {
        let balance = self.balances.entry((token, to)).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Sum of all balances of `token`.
    pub fn supply(&self, token: Address) -> u128 {
        self.balances
            .iter()
            .filter(|((t, _), _)| *t == token)
            .fold(0u128, |acc, (_, v)| acc.saturating_add(*v))
    }
}

impl Assets for MemoryAssets {
    fn balance_of(&self, token: Address, holder: Address) -> u128 {
        self.balances.get(&(token, holder)).copied().unwrap_or(0)
    }

    fn transfer(&mut self, token: Address, from: Address, to: Address, amount: u128) -> Result<()> {
        let available = self.balance_of(token, from);
        if available < amount {
            return Err(BlockError::InsufficientBalance {
                token,
                holder: from,
                needed: amount,
                available,
            });
        }
        if amount == 0 || from == to {
            return Ok(());
        }
        self.balances.insert((token, from), available - amount);
        self.mint(token, to, amount);

        tracing::trace!(%token, %from, %to, amount, "asset transfer");
        Ok(())
    }

    fn approve(&mut self, token: Address, owner: Address, spender: Address, amount: u128) {
        self.allowances.insert((token, owner, spender), amount);
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> u128 {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or(0)
    }

    fn transfer_from(
        &mut self,
        token: Address,
        spender: Address,
        from: Address,
        to: Address,
        amount: u128,
    ) -> Result<()> {
        let allowed = self.allowance(token, from, spender);
        if spender != from && allowed < amount {
            return Err(BlockError::InsufficientAllowance {
                token,
                owner: from,
                spender,
                needed: amount,
                available: allowed,
            });
        }
        self.transfer(token, from, to, amount)?;
        if spender != from && allowed != u128::MAX {
            self.approve(token, from, spender, allowed - amount);
        }
        Ok(())
    }
}
