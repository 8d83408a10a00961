//! Reference blocks backed by an [`Assets`] book.
//!
//! [`StubBlock`] is a plain pool that holds its deposit token and harvests a
//! fixed reward from a faucet account each run. [`StubVault`] is a share
//! based accumulator. Both can be told to fail through a shared [`Faults`]
//! handle, which stays usable after the block is boxed into a pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sluice_types::{Address, NATIVE_TOKEN};

use crate::assets::Assets;
use crate::capability::{Block, CallContext, Vault, WithdrawalInput};
use crate::{BlockError, Result};

/// Shared failure switches for a stub block.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    deposit: Arc<AtomicBool>,
    withdraw: Arc<AtomicBool>,
    run: Arc<AtomicBool>,
    late: Arc<AtomicBool>,
}

impl Faults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every deposit entry point fail.
    pub fn fail_deposits(&self, fail: bool) {
        self.deposit.store(fail, Ordering::SeqCst);
    }

    /// Make withdrawals fail.
    pub fn fail_withdrawals(&self, fail: bool) {
        self.withdraw.store(fail, Ordering::SeqCst);
    }

    /// Make harvesting fail.
    pub fn fail_runs(&self, fail: bool) {
        self.run.store(fail, Ordering::SeqCst);
    }

    /// Make deposits fail after the payer's tokens have already moved.
    pub fn fail_after_transfer(&self, fail: bool) {
        self.late.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(BlockError::Reverted(format!("{what} disabled")));
        }
        Ok(())
    }
}

/// Plain pool block.
#[derive(Debug)]
pub struct StubBlock {
    address: Address,
    deposit_token: Address,
    reward: Option<Reward>,
    tag: String,
    adaptors: Vec<Address>,
    faults: Faults,
}

#[derive(Debug, Clone, Copy)]
struct Reward {
    token: Address,
    faucet: Address,
    per_run: u128,
}

impl StubBlock {
    /// A pool at `address` accepting `deposit_token`.
    pub fn new(address: Address, deposit_token: Address) -> Self {
        Self {
            address,
            deposit_token,
            reward: None,
            tag: String::new(),
            adaptors: Vec::new(),
            faults: Faults::default(),
        }
    }

    /// Harvest `per_run` of `token` from `faucet` on every run. The faucet
    /// must be funded in the asset book.
    pub fn with_reward(mut self, token: Address, faucet: Address, per_run: u128) -> Self {
        self.reward = Some(Reward {
            token,
            faucet,
            per_run,
        });
        self
    }

    /// Attach a failure handle.
    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn adaptors(&self) -> &[Address] {
        &self.adaptors
    }

    fn pull(
        &mut self,
        ctx: &mut CallContext<'_>,
        payer: Address,
        token: Address,
        amount: u128,
        min_out: u128,
    ) -> Result<()> {
        Faults::check(&self.faults.deposit, "deposit")?;
        if token != self.deposit_token {
            return Err(BlockError::UnsupportedToken(token));
        }
        if amount < min_out {
            return Err(BlockError::Slippage {
                received: amount,
                min_out,
            });
        }
        ctx.assets
            .transfer_from(token, self.address, payer, self.address, amount)?;
        Faults::check(&self.faults.late, "deposit settlement")
    }
}

impl Block for StubBlock {
    fn address(&self) -> Address {
        self.address
    }

    fn deposit_token(&self) -> Address {
        self.deposit_token
    }

    fn out_tokens(&self) -> Vec<Address> {
        self.reward.iter().map(|r| r.token).collect()
    }

    fn deposit_pull(
        &mut self,
        ctx: &mut CallContext<'_>,
        token: Address,
        amount: u128,
        min_out: u128,
    ) -> Result<()> {
        let payer = ctx.caller;
        self.pull(ctx, payer, token, amount, min_out)
    }

    fn deposit_pull_from(
        &mut self,
        ctx: &mut CallContext<'_>,
        payer: Address,
        token: Address,
        amount: u128,
        min_out: u128,
    ) -> Result<()> {
        self.pull(ctx, payer, token, amount, min_out)
    }

    fn deposit_native(
        &mut self,
        ctx: &mut CallContext<'_>,
        amount: u128,
        min_out: u128,
    ) -> Result<()> {
        Faults::check(&self.faults.deposit, "deposit")?;
        if self.deposit_token != NATIVE_TOKEN {
            return Err(BlockError::Unsupported("deposit_native"));
        }
        if amount < min_out {
            return Err(BlockError::Slippage {
                received: amount,
                min_out,
            });
        }
        ctx.assets
            .transfer(NATIVE_TOKEN, ctx.caller, self.address, amount)?;
        Faults::check(&self.faults.late, "deposit settlement")
    }

    fn withdraw(&mut self, ctx: &mut CallContext<'_>, amount: u128) -> Result<()> {
        Faults::check(&self.faults.withdraw, "withdraw")?;
        ctx.assets
            .transfer(self.deposit_token, self.address, ctx.caller, amount)
    }

    fn withdraw_all(&mut self, ctx: &mut CallContext<'_>) -> Result<()> {
        let all = self.balance(&*ctx.assets);
        self.withdraw(ctx, all)
    }

    fn balance(&self, assets: &dyn Assets) -> u128 {
        assets.balance_of(self.deposit_token, self.address)
    }

    fn run(&mut self, ctx: &mut CallContext<'_>) -> Result<()> {
        Faults::check(&self.faults.run, "run")?;
        if let Some(reward) = self.reward {
            if reward.per_run > 0 {
                ctx.assets
                    .transfer(reward.token, reward.faucet, self.address, reward.per_run)?;
            }
        }
        Ok(())
    }

    fn approve_tokens(&mut self, ctx: &mut CallContext<'_>) -> Result<()> {
        ctx.assets
            .approve(self.deposit_token, self.address, ctx.caller, u128::MAX);
        for token in self.out_tokens() {
            ctx.assets.approve(token, self.address, ctx.caller, u128::MAX);
        }
        Ok(())
    }

    fn approve_spend_if_no_allowance(
        &mut self,
        ctx: &mut CallContext<'_>,
        spender: Address,
        token: Address,
        amount: u128,
    ) -> Result<()> {
        if ctx.assets.allowance(token, self.address, spender) == 0 {
            ctx.assets.approve(token, self.address, spender, amount);
        }
        Ok(())
    }

    fn set_tag(&mut self, tag: &str) {
        self.tag = tag.to_string();
    }

    fn set_deposit_adaptors(&mut self, adaptors: Vec<Address>) -> Result<()> {
        self.adaptors = adaptors;
        Ok(())
    }
}

/// Share-based accumulator block.
///
/// Shares are minted at a fixed `want_per_share` rate expressed as a
/// fraction `numerator / denominator`.
#[derive(Debug)]
pub struct StubVault {
    address: Address,
    want: Address,
    shares: u128,
    rate_numerator: u128,
    rate_denominator: u128,
    input: WithdrawalInput,
    tag: String,
    faults: Faults,
}

impl StubVault {
    /// A 1:1 vault at `address` over `want`.
    pub fn new(address: Address, want: Address) -> Self {
        Self {
            address,
            want,
            shares: 0,
            rate_numerator: 1,
            rate_denominator: 1,
            input: WithdrawalInput::Want,
            tag: String::new(),
            faults: Faults::default(),
        }
    }

    /// Set the want-per-share rate. A zero part leaves the rate unchanged.
    pub fn with_rate(mut self, numerator: u128, denominator: u128) -> Self {
        if numerator > 0 && denominator > 0 {
            self.rate_numerator = numerator;
            self.rate_denominator = denominator;
        }
        self
    }

    /// Select the unit [`Block::withdraw`] expects.
    pub fn with_input(mut self, input: WithdrawalInput) -> Self {
        self.input = input;
        self
    }

    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    fn to_want(&self, shares: u128) -> u128 {
        shares.saturating_mul(self.rate_numerator) / self.rate_denominator
    }

    fn to_shares(&self, want: u128) -> u128 {
        want.saturating_mul(self.rate_denominator) / self.rate_numerator
    }

    fn pull(
        &mut self,
        ctx: &mut CallContext<'_>,
        payer: Address,
        token: Address,
        amount: u128,
        min_out: u128,
    ) -> Result<()> {
        Faults::check(&self.faults.deposit, "deposit")?;
        if token != self.want {
            return Err(BlockError::UnsupportedToken(token));
        }
        let minted = self.to_shares(amount);
        if minted < min_out {
            return Err(BlockError::Slippage {
                received: minted,
                min_out,
            });
        }
        ctx.assets
            .transfer_from(token, self.address, payer, self.address, amount)?;
        // Late failures leave the want behind without minting.
        Faults::check(&self.faults.late, "deposit settlement")?;
        self.shares = self.shares.saturating_add(minted);
        tracing::trace!(vault = %self.address, amount, minted, "stub vault deposit");
        Ok(())
    }
}

impl Block for StubVault {
    fn address(&self) -> Address {
        self.address
    }

    fn deposit_token(&self) -> Address {
        self.want
    }

    fn out_tokens(&self) -> Vec<Address> {
        vec![self.want]
    }

    fn deposit_pull(
        &mut self,
        ctx: &mut CallContext<'_>,
        token: Address,
        amount: u128,
        min_out: u128,
    ) -> Result<()> {
        let payer = ctx.caller;
        self.pull(ctx, payer, token, amount, min_out)
    }

    fn deposit_pull_from(
        &mut self,
        ctx: &mut CallContext<'_>,
        payer: Address,
        token: Address,
        amount: u128,
        min_out: u128,
    ) -> Result<()> {
        self.pull(ctx, payer, token, amount, min_out)
    }

    fn withdraw(&mut self, ctx: &mut CallContext<'_>, amount: u128) -> Result<()> {
        Faults::check(&self.faults.withdraw, "withdraw")?;
        let shares = match self.input {
            WithdrawalInput::Shares => amount,
            WithdrawalInput::Want => self.to_shares(amount),
        };
        if shares > self.shares {
            return Err(BlockError::Reverted(format!(
                "burn exceeds shares: {shares} > {}",
                self.shares
            )));
        }
        let want = self.to_want(shares);
        ctx.assets
            .transfer(self.want, self.address, ctx.caller, want)?;
        self.shares -= shares;
        Ok(())
    }

    fn withdraw_all(&mut self, ctx: &mut CallContext<'_>) -> Result<()> {
        let amount = match self.input {
            WithdrawalInput::Shares => self.shares,
            WithdrawalInput::Want => self.to_want(self.shares),
        };
        self.withdraw(ctx, amount)
    }

    fn balance(&self, assets: &dyn Assets) -> u128 {
        assets.balance_of(self.want, self.address)
    }

    fn run(&mut self, _ctx: &mut CallContext<'_>) -> Result<()> {
        Faults::check(&self.faults.run, "run")
    }

    fn approve_tokens(&mut self, ctx: &mut CallContext<'_>) -> Result<()> {
        ctx.assets.approve(self.want, self.address, ctx.caller, u128::MAX);
        Ok(())
    }

    fn approve_spend_if_no_allowance(
        &mut self,
        ctx: &mut CallContext<'_>,
        spender: Address,
        token: Address,
        amount: u128,
    ) -> Result<()> {
        if ctx.assets.allowance(token, self.address, spender) == 0 {
            ctx.assets.approve(token, self.address, spender, amount);
        }
        Ok(())
    }

    fn set_tag(&mut self, tag: &str) {
        self.tag = tag.to_string();
    }

    fn set_deposit_adaptors(&mut self, adaptors: Vec<Address>) -> Result<()> {
        if adaptors.is_empty() {
            Ok(())
        } else {
            Err(BlockError::Unsupported("deposit adaptors"))
        }
    }

    fn vault(&self) -> Option<&dyn Vault> {
        Some(self)
    }
}

impl Vault for StubVault {
    fn withdrawal_input_type(&self) -> WithdrawalInput {
        self.input
    }

    fn want_balance(&self, assets: &dyn Assets) -> u128 {
        assets.balance_of(self.want, self.address)
    }

    fn share_balance(&self, _assets: &dyn Assets) -> u128 {
        self.shares
    }

    fn shares_to_want(&self, _assets: &dyn Assets, shares: u128) -> u128 {
        self.to_want(shares)
    }

    fn want_to_shares(&self, _assets: &dyn Assets, want: u128) -> u128 {
        self.to_shares(want)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssets;

    const RUNNER: Address = Address::repeat_byte(0x01);
    const POOL: Address = Address::repeat_byte(0x10);
    const VAULT: Address = Address::repeat_byte(0x20);
    const FAUCET: Address = Address::repeat_byte(0xFA);
    const DEPOSIT: Address = Address::repeat_byte(0xD0);
    const REWARD: Address = Address::repeat_byte(0xE0);

    #[test]
    fn test_pool_deposit_and_withdraw() {
        let mut assets = MemoryAssets::new();
        assets.mint(DEPOSIT, RUNNER, 500);
        assets.approve(DEPOSIT, RUNNER, POOL, u128::MAX);

        let mut pool = StubBlock::new(POOL, DEPOSIT);
        let mut ctx = CallContext::new(RUNNER, &mut assets);
        pool.deposit_pull(&mut ctx, DEPOSIT, 300, 300).expect("deposit");
        assert_eq!(pool.balance(&*ctx.assets), 300);

        pool.withdraw(&mut ctx, 100).expect("withdraw");
        assert_eq!(ctx.assets.balance_of(DEPOSIT, RUNNER), 300);
        assert_eq!(pool.balance(&*ctx.assets), 200);
    }

    #[test]
    fn test_pool_rejects_foreign_token() {
        let mut assets = MemoryAssets::new();
        let mut pool = StubBlock::new(POOL, DEPOSIT);
        let mut ctx = CallContext::new(RUNNER, &mut assets);
        let err = pool
            .deposit_pull(&mut ctx, REWARD, 1, 0)
            .expect_err("foreign token");
        assert_eq!(err, BlockError::UnsupportedToken(REWARD));
    }

    #[test]
    fn test_pool_harvests_from_faucet() {
        let mut assets = MemoryAssets::new();
        assets.mint(REWARD, FAUCET, 1_000);
        let mut pool = StubBlock::new(POOL, DEPOSIT).with_reward(REWARD, FAUCET, 100);
        let mut ctx = CallContext::new(RUNNER, &mut assets);
        pool.run(&mut ctx).expect("run");
        pool.run(&mut ctx).expect("run");
        assert_eq!(ctx.assets.balance_of(REWARD, POOL), 200);
        assert_eq!(pool.out_tokens(), vec![REWARD]);
    }

    #[test]
    fn test_faults_toggle_after_construction() {
        let mut assets = MemoryAssets::new();
        let faults = Faults::new();
        let mut pool = StubBlock::new(POOL, DEPOSIT).with_faults(faults.clone());
        let mut ctx = CallContext::new(RUNNER, &mut assets);

        faults.fail_runs(true);
        assert!(pool.run(&mut ctx).is_err());
        faults.fail_runs(false);
        assert!(pool.run(&mut ctx).is_ok());
    }

    #[test]
    fn test_pool_slippage_checked_before_transfer() {
        let mut assets = MemoryAssets::new();
        assets.mint(DEPOSIT, RUNNER, 500);
        assets.approve(DEPOSIT, RUNNER, POOL, u128::MAX);

        let mut pool = StubBlock::new(POOL, DEPOSIT);
        let mut ctx = CallContext::new(RUNNER, &mut assets);
        let err = pool
            .deposit_pull(&mut ctx, DEPOSIT, 100, 200)
            .expect_err("below minimum");
        assert_eq!(
            err,
            BlockError::Slippage {
                received: 100,
                min_out: 200
            }
        );
        assert_eq!(ctx.assets.balance_of(DEPOSIT, RUNNER), 500);
        assert_eq!(pool.balance(&*ctx.assets), 0);
    }

    #[test]
    fn test_late_failure_keeps_transferred_tokens() {
        let mut assets = MemoryAssets::new();
        assets.mint(REWARD, POOL, 100);
        assets.approve(REWARD, POOL, VAULT, u128::MAX);
        let faults = Faults::new();
        faults.fail_after_transfer(true);

        let mut vault = StubVault::new(VAULT, REWARD).with_faults(faults);
        let mut ctx = CallContext::new(RUNNER, &mut assets);
        assert!(vault.deposit_pull_from(&mut ctx, POOL, REWARD, 100, 0).is_err());
        assert_eq!(ctx.assets.balance_of(REWARD, VAULT), 100);
        assert_eq!(vault.share_balance(&*ctx.assets), 0);
    }

    #[test]
    fn test_vault_share_accounting() {
        let mut assets = MemoryAssets::new();
        assets.mint(REWARD, POOL, 400);
        assets.approve(REWARD, POOL, VAULT, u128::MAX);

        // 2 want per share
        let mut vault = StubVault::new(VAULT, REWARD).with_rate(2, 1);
        let mut ctx = CallContext::new(RUNNER, &mut assets);
        vault
            .deposit_pull_from(&mut ctx, POOL, REWARD, 400, 0)
            .expect("deposit");
        assert_eq!(vault.share_balance(&*ctx.assets), 200);
        assert_eq!(vault.want_balance(&*ctx.assets), 400);

        vault.withdraw(&mut ctx, 100).expect("withdraw want");
        assert_eq!(vault.share_balance(&*ctx.assets), 150);
        assert_eq!(ctx.assets.balance_of(REWARD, RUNNER), 100);
    }

    #[test]
    fn test_vault_share_input_withdraw() {
        let mut assets = MemoryAssets::new();
        assets.mint(REWARD, RUNNER, 90);
        assets.approve(REWARD, RUNNER, VAULT, u128::MAX);
        let mut vault = StubVault::new(VAULT, REWARD).with_input(WithdrawalInput::Shares);
        let mut ctx = CallContext::new(RUNNER, &mut assets);
        vault.deposit_pull(&mut ctx, REWARD, 90, 0).expect("deposit");

        let err = vault.withdraw(&mut ctx, 91).expect_err("too many shares");
        assert!(matches!(err, BlockError::Reverted(_)));
        vault.withdraw_all(&mut ctx).expect("withdraw all");
        assert_eq!(ctx.assets.balance_of(REWARD, RUNNER), 90);
        assert_eq!(vault.share_balance(&*ctx.assets), 0);
    }
}
