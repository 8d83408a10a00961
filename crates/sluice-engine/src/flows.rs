//! Deposit and withdraw.
//!
//! External calls come first and are measured by balance deltas; the
//! ledger is only touched once they have succeeded. When stage 0 rejects a
//! deposit, whatever it kept is pulled back and the depositor is refunded
//! before the error is returned.

use sluice_block::{Assets, BlockError, CallContext, WithdrawalInput};
use sluice_types::events::EngineEvent;
use sluice_types::{Address, BlockIndex, NATIVE_TOKEN};

use crate::runner::Runner;
use crate::{EngineError, Result};

/// Outcome of [`Runner::withdraw_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WithdrawAllReport {
    /// Amount paid out per block.
    pub released: Vec<(BlockIndex, u128)>,
    /// Blocks whose release failed, with the reason.
    pub failed: Vec<(BlockIndex, String)>,
}

impl WithdrawAllReport {
    pub fn total_released(&self) -> u128 {
        self.released
            .iter()
            .fold(0u128, |acc, (_, v)| acc.saturating_add(*v))
    }
}

#[derive(Clone, Copy)]
enum Funding {
    Token(Address),
    Native,
}

impl<A: Assets> Runner<A> {
    /// Deposit `amount` of `token` from `user` into stage 0.
    ///
    /// Returns the principal credited, which is the increase of stage 0's
    /// reported balance and may be lower than `amount`.
    pub fn deposit(
        &mut self,
        user: Address,
        block: BlockIndex,
        token: Address,
        amount: u128,
        min_out: u128,
    ) -> Result<u128> {
        self.deposit_funds(user, block, Funding::Token(token), amount, min_out)
    }

    /// Deposit `amount` of the native currency from `user` into stage 0.
    pub fn deposit_native(
        &mut self,
        user: Address,
        block: BlockIndex,
        amount: u128,
        min_out: u128,
    ) -> Result<u128> {
        self.deposit_funds(user, block, Funding::Native, amount, min_out)
    }

    fn deposit_funds(
        &mut self,
        user: Address,
        block: BlockIndex,
        funding: Funding,
        amount: u128,
        min_out: u128,
    ) -> Result<u128> {
        self.require_operational()?;
        if block != 0 {
            return Err(EngineError::InvalidBlock(block));
        }
        if amount == 0 {
            return Err(EngineError::ZeroAmount);
        }
        let expected = self.blocks[0].deposit_token();
        let token = match funding {
            Funding::Token(token) => token,
            Funding::Native => NATIVE_TOKEN,
        };
        if token != expected {
            return Err(EngineError::WrongToken {
                expected,
                actual: token,
            });
        }

        let runner = self.address;
        let held = self.assets.balance_of(token, runner);
        let pulled = match funding {
            Funding::Token(_) => self
                .assets
                .transfer_from(token, runner, user, runner, amount),
            Funding::Native => self.assets.transfer(token, user, runner, amount),
        };
        pulled.map_err(|source| EngineError::Block { block: 0, source })?;
        let received = self.assets.balance_of(token, runner).saturating_sub(held);

        let before = self.blocks[0].balance(&self.assets);
        let forwarded = {
            let mut ctx = CallContext::new(runner, &mut self.assets);
            match funding {
                Funding::Token(_) => {
                    self.blocks[0].deposit_pull(&mut ctx, token, received, min_out)
                }
                Funding::Native => self.blocks[0].deposit_native(&mut ctx, received, min_out),
            }
        };
        if let Err(source) = forwarded {
            return Err(self.unwind_deposit(user, token, held, before, received, source));
        }
        let credited = self.blocks[0].balance(&self.assets).saturating_sub(before);

        self.ledger_mut()?.credit_deposit(&user, credited)?;

        tracing::info!(%user, amount, received, credited, "deposit credited");
        self.emit(EngineEvent::Deposited {
            user,
            block: 0,
            amount: credited,
        });
        Ok(credited)
    }

    /// Undo a deposit stage 0 rejected. A rejection does not guarantee the
    /// block left the tokens alone, so anything it gained is withdrawn first
    /// and the runner's excess over `held` goes back to `user`.
    fn unwind_deposit(
        &mut self,
        user: Address,
        token: Address,
        held: u128,
        before: u128,
        received: u128,
        source: BlockError,
    ) -> EngineError {
        let runner = self.address;
        let taken = self.blocks[0].balance(&self.assets).saturating_sub(before);
        if taken > 0 {
            let units = self.withdraw_units(0, taken);
            let mut ctx = CallContext::new(runner, &mut self.assets);
            if let Err(error) = self.blocks[0].withdraw(&mut ctx, units) {
                tracing::error!(%user, taken, %error, "could not recover rejected deposit");
            }
        }

        let refundable = self.assets.balance_of(token, runner).saturating_sub(held);
        let refunded = match self.assets.transfer(token, runner, user, refundable) {
            Ok(()) => refundable,
            Err(error) => {
                tracing::error!(%user, refundable, %error, "deposit refund failed");
                0
            }
        };

        let stranded = received.saturating_sub(refunded);
        if stranded > 0 {
            tracing::error!(%user, received, refunded, error = %source, "deposit stranded");
            return EngineError::DepositStranded {
                block: 0,
                stranded,
                source,
            };
        }
        tracing::warn!(%user, received, error = %source, "stage 0 rejected deposit");
        EngineError::Block { block: 0, source }
    }

    /// Withdraw from `block`.
    ///
    /// On stage 0, `amount` of principal is released. On any other block
    /// `amount` is ignored and the user's full claimable share is paid out.
    /// Returns the amount paid to the user.
    pub fn withdraw(&mut self, user: Address, block: BlockIndex, amount: u128) -> Result<u128> {
        self.require_operational()?;
        if block >= self.blocks.len() {
            return Err(EngineError::InvalidBlock(block));
        }
        if block == 0 {
            self.withdraw_principal(user, amount)
        } else {
            self.withdraw_earnings(user, block)
        }
    }

    /// Withdraw all principal, then every block's claimable share.
    ///
    /// A failing block is reported in the result and the remaining blocks
    /// are still processed.
    pub fn withdraw_all(&mut self, user: Address) -> Result<WithdrawAllReport> {
        let mut report = WithdrawAllReport::default();

        let principal = self.operational_ledger()?.user_deposits(&user);
        if principal > 0 {
            collect(&mut report, 0, self.withdraw_principal(user, principal))?;
        }
        for block in 1..self.blocks.len() {
            if self.operational_ledger()?.claimable(&user, block)? == 0 {
                continue;
            }
            collect(&mut report, block, self.withdraw_earnings(user, block))?;
        }

        tracing::info!(
            %user,
            released = report.total_released(),
            failed = report.failed.len(),
            "withdraw all finished"
        );
        Ok(report)
    }

    fn withdraw_principal(&mut self, user: Address, amount: u128) -> Result<u128> {
        if amount == 0 {
            return Err(EngineError::ZeroAmount);
        }
        self.operational_ledger()?.check_withdrawable(&user, amount)?;

        let units = self.withdraw_units(0, amount);
        let released = match self.release(0, user, units) {
            Ok(released) => released,
            Err(source) => return Err(self.withdraw_failed(user, 0, source)),
        };

        let principal = self.ledger_mut()?.debit_withdrawal(&user, released)?;

        tracing::info!(%user, amount, released, principal, "principal withdrawn");
        self.emit(EngineEvent::Withdrawn {
            user,
            block: 0,
            amount: released,
        });
        Ok(released)
    }

    fn withdraw_earnings(&mut self, user: Address, block: BlockIndex) -> Result<u128> {
        let shares = self.operational_ledger()?.claimable(&user, block)?;
        if shares == 0 {
            return Err(EngineError::ZeroAmount);
        }

        let units = match self.blocks[block].vault() {
            Some(vault) if vault.withdrawal_input_type() == WithdrawalInput::Want => {
                vault.shares_to_want(&self.assets, shares)
            }
            _ => shares,
        };
        let released = match self.release(block, user, units) {
            Ok(released) => released,
            Err(source) => return Err(self.withdraw_failed(user, block, source)),
        };

        self.ledger_mut()?.settle_claim(&user, block, released)?;

        tracing::info!(%user, block, shares, released, "earnings withdrawn");
        self.emit(EngineEvent::Withdrawn {
            user,
            block,
            amount: released,
        });
        Ok(released)
    }

    /// Principal `amount` expressed in the unit `block` expects.
    fn withdraw_units(&self, block: BlockIndex, amount: u128) -> u128 {
        match self.blocks[block].vault() {
            Some(vault) if vault.withdrawal_input_type() == WithdrawalInput::Shares => {
                vault.want_to_shares(&self.assets, amount)
            }
            _ => amount,
        }
    }

    /// Have `block` release `units` to the runner and forward what actually
    /// arrived to `user`.
    fn release(
        &mut self,
        block: BlockIndex,
        user: Address,
        units: u128,
    ) -> sluice_block::Result<u128> {
        let runner = self.address;
        let token = self.blocks[block].deposit_token();
        let held = self.assets.balance_of(token, runner);
        {
            let mut ctx = CallContext::new(runner, &mut self.assets);
            self.blocks[block].withdraw(&mut ctx, units)?;
        }
        let released = self.assets.balance_of(token, runner).saturating_sub(held);
        self.assets.transfer(token, runner, user, released)?;
        Ok(released)
    }

    fn withdraw_failed(
        &self,
        user: Address,
        block: BlockIndex,
        source: BlockError,
    ) -> EngineError {
        tracing::warn!(%user, block, error = %source, "withdrawal failed");
        self.emit(EngineEvent::WithdrawFailed {
            user,
            block,
            reason: source.to_string(),
        });
        EngineError::Block { block, source }
    }
}

fn collect(
    report: &mut WithdrawAllReport,
    block: BlockIndex,
    result: Result<u128>,
) -> Result<()> {
    match result {
        Ok(released) => report.released.push((block, released)),
        Err(EngineError::Block { source, .. }) => report.failed.push((block, source.to_string())),
        Err(other) => return Err(other),
    }
    Ok(())
}
