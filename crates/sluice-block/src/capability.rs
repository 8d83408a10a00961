//! Block and vault capability traits.
//!
//! A block is an external yield source or sink. The runner only talks to it
//! through [`Block`]; accumulator targets additionally expose [`Vault`],
//! discovered through [`Block::vault`].

use serde::{Deserialize, Serialize};
use sluice_types::Address;

use crate::assets::Assets;
use crate::{BlockError, Result};

/// Execution context handed to every mutating block call.
///
/// `caller` is the party invoking the block (normally the runner). Blocks
/// never receive a handle to the runner itself.
pub struct CallContext<'a> {
    /// Address of the invoking party.
    pub caller: Address,
    /// Asset movement capability.
    pub assets: &'a mut dyn Assets,
}

impl<'a> CallContext<'a> {
    /// Create a context for `caller`.
    pub fn new(caller: Address, assets: &'a mut dyn Assets) -> Self {
        Self { caller, assets }
    }
}

/// Unit expected by [`Block::withdraw`] on a vault.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalInput {
    /// Amount is in the underlying (principal) token.
    #[default]
    Want,
    /// Amount is in vault shares.
    Shares,
}

/// Capability set of one pipeline stage.
pub trait Block: Send {
    /// Address holding this block's funds.
    fn address(&self) -> Address;

    /// Token accepted by deposits.
    fn deposit_token(&self) -> Address;

    /// Tokens the block produces when run.
    fn out_tokens(&self) -> Vec<Address>;

    /// Pull `amount` of `token` from the caller.
    fn deposit_pull(
        &mut self,
        ctx: &mut CallContext<'_>,
        token: Address,
        amount: u128,
        min_out: u128,
    ) -> Result<()>;

    /// Pull `amount` of `token` from `payer`, who must have authorized
    /// this block beforehand.
    fn deposit_pull_from(
        &mut self,
        ctx: &mut CallContext<'_>,
        payer: Address,
        token: Address,
        amount: u128,
        min_out: u128,
    ) -> Result<()>;

    /// Accept `amount` of the native currency from the caller.
    fn deposit_native(
        &mut self,
        _ctx: &mut CallContext<'_>,
        _amount: u128,
        _min_out: u128,
    ) -> Result<()> {
        Err(BlockError::Unsupported("deposit_native"))
    }

    /// Release `amount` to the caller. Units depend on
    /// [`Vault::withdrawal_input_type`] for vaults, principal otherwise.
    fn withdraw(&mut self, ctx: &mut CallContext<'_>, amount: u128) -> Result<()>;

    /// Release everything to the caller.
    fn withdraw_all(&mut self, ctx: &mut CallContext<'_>) -> Result<()>;

    /// Total value held, in the block's accounting unit.
    fn balance(&self, assets: &dyn Assets) -> u128;

    /// Harvest and compound.
    fn run(&mut self, ctx: &mut CallContext<'_>) -> Result<()>;

    /// Authorize the caller to move every token this block handles.
    fn approve_tokens(&mut self, ctx: &mut CallContext<'_>) -> Result<()>;

    /// Authorize `spender` to pull `token` unless some allowance exists.
    fn approve_spend_if_no_allowance(
        &mut self,
        ctx: &mut CallContext<'_>,
        spender: Address,
        token: Address,
        amount: u128,
    ) -> Result<()>;

    fn set_tag(&mut self, tag: &str);

    fn set_deposit_adaptors(&mut self, adaptors: Vec<Address>) -> Result<()>;

    /// Vault capability, if this block is an accumulator target.
    fn vault(&self) -> Option<&dyn Vault> {
        None
    }
}

/// Share/want conversion for accumulator blocks.
pub trait Vault {
    fn withdrawal_input_type(&self) -> WithdrawalInput;

    /// Underlying tokens held.
    fn want_balance(&self, assets: &dyn Assets) -> u128;

    /// Shares held.
    fn share_balance(&self, assets: &dyn Assets) -> u128;

    fn shares_to_want(&self, assets: &dyn Assets, shares: u128) -> u128;

    fn want_to_shares(&self, assets: &dyn Assets, want: u128) -> u128;
}
