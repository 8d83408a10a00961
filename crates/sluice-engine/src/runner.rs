//! Runner lifecycle, admin operations and queries.
//!
//! A runner moves through `Uninitialized → PipelineWired → Operational`.
//! Each transition happens once; there is no way back. Every public
//! operation takes `&mut self`, and blocks only ever see a
//! [`CallContext`], never the runner, so operations cannot interleave or
//! re-enter.

use serde::{Deserialize, Serialize};
use sluice_block::{Assets, Block, CallContext};
use sluice_ledger::{BlockShareInfo, Ledger, SnapshotLog, UserInfo};
use sluice_types::action::{Action, FailAction};
use sluice_types::events::EngineEvent;
use sluice_types::snapshot::RunSnapshot;
use sluice_types::{Address, BlockIndex, MAX_PERFORMANCE_FEE_BPS, NATIVE_TOKEN};

use crate::clock::Clock;
use crate::config::RunnerConfig;
use crate::events::EventBus;
use crate::{settings, EngineError, Result};

/// Lifecycle phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    /// Blocks and settings are fixed.
    PipelineWired,
    /// Owner and precisions are set; deposits, withdrawals and runs accepted.
    Operational,
}

/// Pipeline runner.
pub struct Runner<A: Assets> {
    pub(crate) address: Address,
    pub(crate) assets: A,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) events: EventBus,
    pub(crate) phase: Phase,
    pub(crate) owner: Option<Address>,
    pub(crate) tag: String,
    pub(crate) blocks: Vec<Box<dyn Block>>,
    pub(crate) settings: Vec<Vec<Action>>,
    pub(crate) fail_actions: Vec<Vec<FailAction>>,
    pub(crate) ledger: Option<Ledger>,
    pub(crate) snapshots: SnapshotLog,
    pub(crate) performance_fee_bps: u128,
    pub(crate) treasury: Option<Address>,
    pub(crate) snapshot_query_limit: usize,
    pub(crate) run_count: u64,
    pub(crate) last_run: u64,
}

impl<A: Assets> Runner<A> {
    /// Create an uninitialized runner holding funds at `address`.
    pub fn new(address: Address, assets: A, clock: Box<dyn Clock>) -> Self {
        let config = RunnerConfig::default();
        Self {
            address,
            assets,
            clock,
            events: EventBus::new(config.event_capacity),
            phase: Phase::Uninitialized,
            owner: None,
            tag: String::new(),
            blocks: Vec::new(),
            settings: Vec::new(),
            fail_actions: Vec::new(),
            ledger: None,
            snapshots: SnapshotLog::new(0),
            performance_fee_bps: 0,
            treasury: None,
            snapshot_query_limit: config.snapshot_query_limit,
            run_count: 0,
            last_run: 0,
        }
    }

    /// Create an uninitialized runner with deploy-time parameters.
    ///
    /// # Errors
    ///
    /// - [`EngineError::FeeTooHigh`] if the configured fee exceeds the maximum
    pub fn with_config(
        address: Address,
        assets: A,
        clock: Box<dyn Clock>,
        config: &RunnerConfig,
    ) -> Result<Self> {
        let fee = u128::from(config.performance_fee_bps);
        check_fee(fee)?;
        let mut runner = Self::new(address, assets, clock);
        runner.events = EventBus::new(config.event_capacity);
        runner.performance_fee_bps = fee;
        runner.treasury = config.treasury;
        runner.snapshot_query_limit = config.snapshot_query_limit;
        Ok(runner)
    }

    /// Fix the block list and routing rules.
    ///
    /// Validates everything first, then configures each block (tag, deposit
    /// adaptors). Approvals are written to a staged copy of the asset book:
    /// each block's approvals to the runner, every reinvest route, and stage
    /// 0 pulling its deposit token from the runner. The copy replaces the
    /// book only once all of them succeed, so on error the runner and its
    /// assets are untouched.
    pub fn initialize_pipeline(
        &mut self,
        mut blocks: Vec<Box<dyn Block>>,
        adaptors: Vec<Vec<Address>>,
        settings: Vec<Vec<Action>>,
        tag: &str,
    ) -> Result<()>
    where
        A: Clone,
    {
        if self.phase != Phase::Uninitialized {
            return Err(EngineError::AlreadyInitialized);
        }
        if blocks.is_empty() {
            return Err(EngineError::EmptyPipeline);
        }
        let n = blocks.len();
        if adaptors.len() != n {
            return Err(EngineError::LengthMismatch {
                what: "deposit adaptors",
                expected: n,
                actual: adaptors.len(),
            });
        }
        settings::validate(&settings, n)?;

        for (index, (block, list)) in blocks.iter_mut().zip(adaptors).enumerate() {
            block.set_tag(tag);
            block
                .set_deposit_adaptors(list)
                .map_err(|source| EngineError::Block {
                    block: index,
                    source,
                })?;
        }

        let mut staged = self.assets.clone();
        let mut ctx = CallContext::new(self.address, &mut staged);
        for (index, block) in blocks.iter_mut().enumerate() {
            block
                .approve_tokens(&mut ctx)
                .map_err(|source| EngineError::Block {
                    block: index,
                    source,
                })?;
        }
        settings::authorize_routes(&mut blocks, &settings, &mut ctx)?;

        let deposit_token = blocks[0].deposit_token();
        if deposit_token != NATIVE_TOKEN {
            staged.approve(deposit_token, self.address, blocks[0].address(), u128::MAX);
        }
        self.assets = staged;

        self.blocks = blocks;
        self.settings = settings;
        self.fail_actions = vec![Vec::new(); n];
        self.snapshots = SnapshotLog::new(n);
        self.tag = tag.to_string();
        self.phase = Phase::PipelineWired;

        tracing::info!(blocks = n, tag, runner = %self.address, "pipeline initialized");
        self.emit(EngineEvent::PipelineInitialized {
            blocks: n,
            tag: tag.to_string(),
        });
        Ok(())
    }

    /// Set the owner and the per-block precision factors.
    pub fn initialize_vault(&mut self, owner: Address, precisions: Vec<u128>) -> Result<()> {
        if self.phase != Phase::PipelineWired {
            return Err(EngineError::InvalidPhase {
                expected: Phase::PipelineWired,
                actual: self.phase,
            });
        }
        if owner.is_zero() {
            return Err(EngineError::InvalidOwner);
        }
        if precisions.len() != self.blocks.len() {
            return Err(EngineError::LengthMismatch {
                what: "precisions",
                expected: self.blocks.len(),
                actual: precisions.len(),
            });
        }
        let ledger = Ledger::new(&precisions)?;

        self.ledger = Some(ledger);
        self.owner = Some(owner);
        self.phase = Phase::Operational;

        tracing::info!(%owner, "runner operational");
        self.emit(EngineEvent::VaultInitialized { owner });
        Ok(())
    }

    /// Set the performance fee (owner only).
    pub fn set_performance_fee(&mut self, caller: Address, bps: u128) -> Result<()> {
        self.require_owner(caller)?;
        check_fee(bps)?;
        self.performance_fee_bps = bps;
        tracing::info!(bps, "performance fee set");
        self.emit(EngineEvent::PerformanceFeeSet { bps });
        Ok(())
    }

    /// Set the fee recipient (owner only).
    pub fn set_treasury(&mut self, caller: Address, treasury: Address) -> Result<()> {
        self.require_owner(caller)?;
        self.treasury = Some(treasury);
        tracing::info!(%treasury, "treasury set");
        self.emit(EngineEvent::TreasurySet { treasury });
        Ok(())
    }

    /// Replacing routing rules after wiring is not supported.
    pub fn set_settings(&mut self, _settings: Vec<Vec<Action>>) -> Result<()> {
        Err(EngineError::NotSupported("set_settings"))
    }

    /// Profit withdrawal is not supported; yield is paid out per user.
    pub fn withdraw_profit(&mut self, _block: BlockIndex) -> Result<()> {
        Err(EngineError::NotSupported("withdraw_profit"))
    }

    pub fn set_fail_actions(&mut self, _fail_actions: Vec<Vec<FailAction>>) -> Result<()> {
        Err(EngineError::NotSupported("set_fail_actions"))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn owner(&self) -> Option<Address> {
        self.owner
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, index: BlockIndex) -> Option<&dyn Block> {
        self.blocks.get(index).map(|b| b.as_ref())
    }

    /// Validated routing rules, one list per block.
    pub fn settings(&self) -> &[Vec<Action>] {
        &self.settings
    }

    pub fn fail_actions(&self) -> &[Vec<FailAction>] {
        &self.fail_actions
    }

    pub fn performance_fee(&self) -> u128 {
        self.performance_fee_bps
    }

    pub fn treasury(&self) -> Option<Address> {
        self.treasury
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Timestamp of the last completed run; 0 before the first.
    pub fn last_run(&self) -> u64 {
        self.last_run
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn assets(&self) -> &A {
        &self.assets
    }

    /// Direct access to the asset layer, for funding and inspection.
    pub fn assets_mut(&mut self) -> &mut A {
        &mut self.assets
    }

    pub fn ledger(&self) -> Option<&Ledger> {
        self.ledger.as_ref()
    }

    pub fn total_deposits(&self) -> u128 {
        self.ledger.as_ref().map_or(0, |l| l.total_deposits())
    }

    /// Balances of `user`: index 0 is principal, index `b > 0` is the
    /// claimable share of block `b`.
    pub fn user_balances(&self, user: &Address) -> Result<Vec<u128>> {
        let ledger = self.operational_ledger()?;
        let mut out = Vec::with_capacity(self.blocks.len());
        out.push(ledger.user_deposits(user));
        for block in 1..self.blocks.len() {
            out.push(ledger.claimable(user, block)?);
        }
        Ok(out)
    }

    pub fn running_deposits(&self) -> &[u128] {
        self.ledger
            .as_ref()
            .map(|l| l.running_deposits())
            .unwrap_or(&[])
    }

    pub fn running_withdrawals(&self) -> &[u128] {
        self.ledger
            .as_ref()
            .map(|l| l.running_withdrawals())
            .unwrap_or(&[])
    }

    pub fn block_share_info(&self, block: BlockIndex) -> Option<&BlockShareInfo> {
        self.ledger.as_ref().and_then(|l| l.share_info(block))
    }

    pub fn user_info(&self, block: BlockIndex, user: &Address) -> UserInfo {
        self.ledger
            .as_ref()
            .map(|l| l.user_info(block, user))
            .unwrap_or_default()
    }

    /// The most recent `limit` snapshots, oldest first, capped by the
    /// configured query limit.
    pub fn snapshots(&self, limit: usize) -> &[RunSnapshot] {
        self.snapshots.last(limit.min(self.snapshot_query_limit))
    }

    /// [`Runner::snapshots`] as a JSON array.
    pub fn snapshots_json(&self, limit: usize) -> serde_json::Result<String> {
        serde_json::to_string(self.snapshots(limit))
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    pub(crate) fn require_operational(&self) -> Result<()> {
        if self.phase != Phase::Operational {
            return Err(EngineError::InvalidPhase {
                expected: Phase::Operational,
                actual: self.phase,
            });
        }
        Ok(())
    }

    pub(crate) fn operational_ledger(&self) -> Result<&Ledger> {
        self.require_operational()?;
        self.ledger.as_ref().ok_or(EngineError::InvalidPhase {
            expected: Phase::Operational,
            actual: self.phase,
        })
    }

    pub(crate) fn ledger_mut(&mut self) -> Result<&mut Ledger> {
        let phase = self.phase;
        self.ledger.as_mut().ok_or(EngineError::InvalidPhase {
            expected: Phase::Operational,
            actual: phase,
        })
    }

    pub(crate) fn emit(&self, body: EngineEvent) {
        self.events.emit(self.clock.now(), body);
    }

    fn require_owner(&self, caller: Address) -> Result<()> {
        match self.owner {
            Some(owner) if owner == caller => Ok(()),
            _ => Err(EngineError::Unauthorized(caller)),
        }
    }
}

fn check_fee(bps: u128) -> Result<()> {
    if bps > MAX_PERFORMANCE_FEE_BPS {
        return Err(EngineError::FeeTooHigh {
            bps,
            max: MAX_PERFORMANCE_FEE_BPS,
        });
    }
    Ok(())
}
