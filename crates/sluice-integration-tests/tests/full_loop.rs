//! Integration test: deposit, run, claim and exit across a whole pipeline.
//!
//! Exercises the complete runner lifecycle:
//! 1. Wire a pool feeding one or two share vaults
//! 2. Deposit principal from several users
//! 3. Run: harvest, optional fee skim, route, accrue, snapshot
//! 4. Claim accumulated earnings and withdraw principal
//! 5. Verify isolation of failing blocks during runs and exits
//!
//! Uses sluice-engine over sluice-block's in-memory asset book and stubs.

use sluice_block::stub::{Faults, StubBlock, StubVault};
use sluice_block::{Assets, Block, MemoryAssets, WithdrawalInput};
use sluice_engine::events::EventFilter;
use sluice_engine::{EngineError, ManualClock, Phase, Runner, RunnerConfig};
use sluice_types::action::Action;
use sluice_types::events::EngineEvent;
use sluice_types::{Address, NATIVE_TOKEN};

const RUNNER: Address = Address::repeat_byte(0x01);
const OWNER: Address = Address::repeat_byte(0x0A);
const ALICE: Address = Address::repeat_byte(0xA1);
const BOB: Address = Address::repeat_byte(0xB0);
const POOL: Address = Address::repeat_byte(0x10);
const VAULT_A: Address = Address::repeat_byte(0x20);
const VAULT_B: Address = Address::repeat_byte(0x21);
const TREASURY: Address = Address::repeat_byte(0x7E);
const FAUCET: Address = Address::repeat_byte(0xFA);
const DEPOSIT: Address = Address::repeat_byte(0xD0);
const REWARD: Address = Address::repeat_byte(0xE0);

/// Base timestamp for test scenarios.
const BASE_TIME: u64 = 1_700_000_000;
const PRECISION: u128 = 1_000_000_000_000;

/// Helper: asset book with funded users and a reward faucet.
fn funded_assets(deposit_token: Address) -> MemoryAssets {
    let mut assets = MemoryAssets::new();
    for user in [ALICE, BOB] {
        assets.mint(deposit_token, user, 1_000_000);
        assets.approve(deposit_token, user, RUNNER, u128::MAX);
    }
    assets.mint(REWARD, FAUCET, 1_000_000_000);
    assets
}

/// Helper: wire and initialize a runner over `blocks`.
fn operational(
    assets: MemoryAssets,
    clock: ManualClock,
    blocks: Vec<Box<dyn Block>>,
    settings: Vec<Vec<Action>>,
) -> Runner<MemoryAssets> {
    let n = blocks.len();
    let mut runner = Runner::new(RUNNER, assets, Box::new(clock));
    runner
        .initialize_pipeline(blocks, vec![vec![]; n], settings, "it")
        .expect("wire pipeline");
    let mut precisions = vec![PRECISION; n];
    precisions[0] = 1;
    runner
        .initialize_vault(OWNER, precisions)
        .expect("initialize vault");
    runner
}

/// Helper: pool harvesting `yield_per_run` reward into one 1:1 vault.
fn pool_and_vault(yield_per_run: u128) -> Runner<MemoryAssets> {
    operational(
        funded_assets(DEPOSIT),
        ManualClock::new(BASE_TIME),
        vec![
            Box::new(StubBlock::new(POOL, DEPOSIT).with_reward(REWARD, FAUCET, yield_per_run)),
            Box::new(StubVault::new(VAULT_A, REWARD)),
        ],
        vec![
            vec![Action::reinvest(REWARD, 10_000, 1)],
            vec![Action::hold(REWARD)],
        ],
    )
}

#[test]
fn basic_accrual() {
    let mut runner = pool_and_vault(100);
    assert_eq!(runner.phase(), Phase::Operational);

    runner
        .deposit(ALICE, 0, DEPOSIT, 1_000, 0)
        .expect("deposit");
    let report = runner.run().expect("run");
    assert!(report.failures.is_empty());

    let info = runner.block_share_info(1).expect("share info");
    assert_eq!(info.acc_yield_per_token, 100 * PRECISION / 1_000);

    let balances = runner.user_balances(&ALICE).expect("balances");
    assert_eq!(balances[0], 1_000);
    assert!(balances[1] > 0);
    assert_eq!(balances[1], 100);
}

#[test]
fn yield_is_split_by_principal() {
    let mut runner = pool_and_vault(100);
    runner.deposit(ALICE, 0, DEPOSIT, 3_000, 0).expect("alice");
    runner.deposit(BOB, 0, DEPOSIT, 1_000, 0).expect("bob");
    runner.run().expect("run");

    assert_eq!(runner.user_balances(&ALICE).expect("alice")[1], 75);
    assert_eq!(runner.user_balances(&BOB).expect("bob")[1], 25);
}

#[test]
fn late_depositor_does_not_take_earlier_yield() {
    let mut runner = pool_and_vault(100);
    runner.deposit(ALICE, 0, DEPOSIT, 1_000, 0).expect("alice");
    runner.run().expect("first run");

    runner.deposit(BOB, 0, DEPOSIT, 1_000, 0).expect("bob");
    assert_eq!(runner.user_balances(&BOB).expect("bob")[1], 0);
    assert_eq!(runner.user_balances(&ALICE).expect("alice")[1], 100);

    runner.run().expect("second run");
    assert_eq!(runner.user_balances(&ALICE).expect("alice")[1], 150);
    assert_eq!(runner.user_balances(&BOB).expect("bob")[1], 50);
}

#[test]
fn topping_up_keeps_earned_yield() {
    let mut runner = pool_and_vault(100);
    runner.deposit(ALICE, 0, DEPOSIT, 1_000, 0).expect("deposit");
    runner.run().expect("run");

    runner.deposit(ALICE, 0, DEPOSIT, 1_000, 0).expect("top up");
    let balances = runner.user_balances(&ALICE).expect("balances");
    assert_eq!(balances, vec![2_000, 100]);
    assert_eq!(runner.user_info(1, &ALICE).banked_amount, 100);
}

#[test]
fn failed_route_is_isolated() {
    let faults = Faults::new();
    let mut runner = operational(
        funded_assets(DEPOSIT),
        ManualClock::new(BASE_TIME),
        vec![
            Box::new(StubBlock::new(POOL, DEPOSIT).with_reward(REWARD, FAUCET, 200)),
            Box::new(StubVault::new(VAULT_A, REWARD).with_faults(faults.clone())),
            Box::new(StubVault::new(VAULT_B, REWARD)),
        ],
        vec![
            vec![
                Action::reinvest(REWARD, 5_000, 1),
                Action::reinvest(REWARD, 5_000, 2),
            ],
            vec![Action::hold(REWARD)],
            vec![Action::hold(REWARD)],
        ],
    );
    runner.deposit(ALICE, 0, DEPOSIT, 1_000, 0).expect("deposit");
    faults.fail_deposits(true);
    let mut rx = runner.events().subscribe();

    let report = runner.run().expect("run survives");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].block, 0);
    assert_eq!(report.routed.len(), 1);
    assert_eq!(runner.snapshot_count(), 2);

    assert_eq!(
        runner.block_share_info(1).expect("a").acc_yield_per_token,
        0
    );
    assert_eq!(
        runner.block_share_info(2).expect("b").acc_yield_per_token,
        100 * PRECISION / 1_000
    );
    assert_eq!(runner.user_balances(&ALICE).expect("balances"), vec![1_000, 0, 100]);

    let filter = EventFilter::failures();
    let mut signals = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if filter.matches(&event) {
            signals.push(event.body);
        }
    }
    assert_eq!(signals.len(), 1);
    assert!(matches!(
        signals[0],
        EngineEvent::ActionFailed {
            block: 0,
            action: 0,
            destination: 1,
            ..
        }
    ));
}

#[test]
fn routing_conserves_harvest() {
    let mut runner = operational(
        funded_assets(DEPOSIT),
        ManualClock::new(BASE_TIME),
        vec![
            Box::new(StubBlock::new(POOL, DEPOSIT).with_reward(REWARD, FAUCET, 997)),
            Box::new(StubVault::new(VAULT_A, REWARD)),
            Box::new(StubVault::new(VAULT_B, REWARD)),
        ],
        vec![
            vec![
                Action::reinvest(REWARD, 3_000, 1),
                Action::reinvest(REWARD, 7_000, 2),
            ],
            vec![Action::hold(REWARD)],
            vec![Action::hold(REWARD)],
        ],
    );
    runner.deposit(ALICE, 0, DEPOSIT, 10_000, 0).expect("deposit");
    let report = runner.run().expect("run");

    let routed: u128 = report.routed.iter().map(|r| r.amount).sum();
    assert_eq!(routed, 997);
    let assets = runner.assets();
    assert_eq!(assets.balance_of(REWARD, POOL), 0);
    assert_eq!(
        assets.balance_of(REWARD, VAULT_A) + assets.balance_of(REWARD, VAULT_B),
        997
    );
}

#[test]
fn withdraw_all_with_nothing_deposited() {
    let mut runner = pool_and_vault(100);
    let report = runner.withdraw_all(BOB).expect("withdraw all");
    assert!(report.released.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(runner.assets().balance_of(DEPOSIT, BOB), 1_000_000);
}

#[test]
fn full_exit_after_runs() {
    let mut runner = pool_and_vault(100);
    runner.deposit(ALICE, 0, DEPOSIT, 1_000, 0).expect("deposit");
    runner.run().expect("run 1");
    runner.run().expect("run 2");

    let report = runner.withdraw_all(ALICE).expect("exit");
    assert_eq!(report.released, vec![(0, 1_000), (1, 200)]);
    assert!(report.failed.is_empty());

    let assets = runner.assets();
    assert_eq!(assets.balance_of(DEPOSIT, ALICE), 1_000_000);
    assert_eq!(assets.balance_of(REWARD, ALICE), 200);
    assert_eq!(runner.total_deposits(), 0);
    assert_eq!(runner.user_balances(&ALICE).expect("balances"), vec![0, 0]);
}

#[test]
fn withdraw_all_continues_past_failing_block() {
    let faults = Faults::new();
    let mut runner = operational(
        funded_assets(DEPOSIT),
        ManualClock::new(BASE_TIME),
        vec![
            Box::new(StubBlock::new(POOL, DEPOSIT).with_reward(REWARD, FAUCET, 100)),
            Box::new(StubVault::new(VAULT_A, REWARD).with_faults(faults.clone())),
        ],
        vec![
            vec![Action::reinvest(REWARD, 10_000, 1)],
            vec![Action::hold(REWARD)],
        ],
    );
    runner.deposit(ALICE, 0, DEPOSIT, 1_000, 0).expect("deposit");
    runner.run().expect("run");
    faults.fail_withdrawals(true);

    let report = runner.withdraw_all(ALICE).expect("exit");
    assert_eq!(report.released, vec![(0, 1_000)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 1);

    // Earnings survive the failed payout as banked yield.
    assert_eq!(runner.user_balances(&ALICE).expect("balances"), vec![0, 100]);

    faults.fail_withdrawals(false);
    let paid = runner.withdraw(ALICE, 1, 0).expect("retry claim");
    assert_eq!(paid, 100);
}

#[test]
fn invalid_stage0_settings_rejected() {
    let mut runner = Runner::new(
        RUNNER,
        funded_assets(DEPOSIT),
        Box::new(ManualClock::new(BASE_TIME)),
    );
    let err = runner
        .initialize_pipeline(
            vec![
                Box::new(StubBlock::new(POOL, DEPOSIT)),
                Box::new(StubVault::new(VAULT_A, REWARD)),
            ],
            vec![vec![], vec![]],
            vec![vec![Action::hold(REWARD)], vec![Action::hold(REWARD)]],
            "bad",
        )
        .expect_err("stage 0 hold");
    assert!(matches!(err, EngineError::Settings(_)));
    assert_eq!(runner.phase(), Phase::Uninitialized);
    assert!(matches!(
        runner.deposit(ALICE, 0, DEPOSIT, 1, 0),
        Err(EngineError::InvalidPhase { .. })
    ));
}

#[test]
fn round_trip_returns_principal() {
    let mut runner = pool_and_vault(0);
    let before = runner.assets().balance_of(DEPOSIT, ALICE);
    runner.deposit(ALICE, 0, DEPOSIT, 4_321, 0).expect("deposit");
    let released = runner.withdraw(ALICE, 0, 4_321).expect("withdraw");
    assert_eq!(released, 4_321);
    assert_eq!(runner.assets().balance_of(DEPOSIT, ALICE), before);
    assert_eq!(runner.total_deposits(), 0);
}

#[test]
fn native_deposit_pipeline() {
    let mut runner = operational(
        funded_assets(NATIVE_TOKEN),
        ManualClock::new(BASE_TIME),
        vec![
            Box::new(StubBlock::new(POOL, NATIVE_TOKEN).with_reward(REWARD, FAUCET, 10)),
            Box::new(StubVault::new(VAULT_A, REWARD)),
        ],
        vec![
            vec![Action::reinvest(REWARD, 10_000, 1)],
            vec![Action::hold(REWARD)],
        ],
    );
    assert!(matches!(
        runner.deposit(ALICE, 0, DEPOSIT, 500, 0),
        Err(EngineError::WrongToken { .. })
    ));
    let credited = runner.deposit_native(ALICE, 0, 500, 0).expect("native");
    assert_eq!(credited, 500);
    assert_eq!(runner.assets().balance_of(NATIVE_TOKEN, POOL), 500);

    runner.run().expect("run");
    let released = runner.withdraw(ALICE, 0, 500).expect("withdraw");
    assert_eq!(released, 500);
    assert_eq!(runner.assets().balance_of(NATIVE_TOKEN, ALICE), 1_000_000);
}

#[test]
fn share_input_vault_claim() {
    let mut runner = operational(
        funded_assets(DEPOSIT),
        ManualClock::new(BASE_TIME),
        vec![
            Box::new(StubBlock::new(POOL, DEPOSIT).with_reward(REWARD, FAUCET, 100)),
            Box::new(
                StubVault::new(VAULT_A, REWARD)
                    .with_rate(2, 1)
                    .with_input(WithdrawalInput::Shares),
            ),
        ],
        vec![
            vec![Action::reinvest(REWARD, 10_000, 1)],
            vec![Action::hold(REWARD)],
        ],
    );
    runner.deposit(ALICE, 0, DEPOSIT, 1_000, 0).expect("deposit");
    let report = runner.run().expect("run");
    assert_eq!(report.routed[0].shares, 50);

    // Claimable is denominated in vault shares.
    assert_eq!(runner.user_balances(&ALICE).expect("balances")[1], 50);
    let paid = runner.withdraw(ALICE, 1, 0).expect("claim");
    assert_eq!(paid, 100);
    assert_eq!(runner.assets().balance_of(REWARD, ALICE), 100);
}

#[test]
fn fee_from_config_file() {
    let doc = format!(
        "performance_fee_bps = 500\ntreasury = \"{}\"\n",
        "7e".repeat(20)
    );
    let config = RunnerConfig::from_toml_str(&doc).expect("config");
    let mut runner = Runner::with_config(
        RUNNER,
        funded_assets(DEPOSIT),
        Box::new(ManualClock::new(BASE_TIME)),
        &config,
    )
    .expect("runner");
    runner
        .initialize_pipeline(
            vec![
                Box::new(StubBlock::new(POOL, DEPOSIT).with_reward(REWARD, FAUCET, 1_000)),
                Box::new(StubVault::new(VAULT_A, REWARD)),
            ],
            vec![vec![], vec![]],
            vec![
                vec![Action::reinvest(REWARD, 10_000, 1)],
                vec![Action::hold(REWARD)],
            ],
            "fees",
        )
        .expect("wire");
    runner
        .initialize_vault(OWNER, vec![1, PRECISION])
        .expect("vault");
    runner.deposit(ALICE, 0, DEPOSIT, 1_000, 0).expect("deposit");

    let report = runner.run().expect("run");
    assert_eq!(runner.assets().balance_of(REWARD, TREASURY), 50);
    assert_eq!(report.routed[0].amount, 950);
    assert_eq!(runner.user_balances(&ALICE).expect("balances")[1], 950);
}

#[test]
fn snapshots_track_period_flows() {
    let clock = ManualClock::new(BASE_TIME);
    let mut runner = operational(
        funded_assets(DEPOSIT),
        clock.clone(),
        vec![
            Box::new(StubBlock::new(POOL, DEPOSIT).with_reward(REWARD, FAUCET, 100)),
            Box::new(StubVault::new(VAULT_A, REWARD)),
        ],
        vec![
            vec![Action::reinvest(REWARD, 10_000, 1)],
            vec![Action::hold(REWARD)],
        ],
    );

    runner.deposit(ALICE, 0, DEPOSIT, 2_000, 0).expect("deposit");
    runner.run().expect("run 1");
    clock.advance(3_600);
    runner.withdraw(ALICE, 1, 0).expect("claim");
    runner.withdraw(ALICE, 0, 500).expect("withdraw");
    runner.run().expect("run 2");

    let history = runner.snapshots(2);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].timestamp, BASE_TIME);
    assert_eq!(history[1].timestamp, BASE_TIME + 3_600);
    assert_eq!(history[1].deposits, vec![0, 0]);
    assert_eq!(history[1].withdrawals, vec![500, 100]);
    assert_eq!(history[1].running_deposits, vec![2_000, 0]);
    assert_eq!(runner.last_run(), BASE_TIME + 3_600);

    let json: serde_json::Value =
        serde_json::from_str(&runner.snapshots_json(1).expect("json")).expect("parse");
    assert_eq!(json.as_array().map(|a| a.len()), Some(1));
}

#[test]
fn event_stream_follows_lifecycle() {
    let mut runner = pool_and_vault(100);
    let mut rx = runner.events().subscribe();

    runner.deposit(ALICE, 0, DEPOSIT, 1_000, 0).expect("deposit");
    runner.run().expect("run");

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        let json = serde_json::to_value(&event.body).expect("serialize");
        kinds.push(json["type"].as_str().unwrap_or_default().to_string());
    }
    assert_eq!(kinds, vec!["deposited", "routed", "run_completed"]);
}
