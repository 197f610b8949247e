#![cfg(test)]

use super::*;
use promptpot_leaderboard::Leaderboard;
use promptpot_prize_distribution::{PrizeDistribution, ResultStatus};
use promptpot_round_engine::{GateVerdict, RoundEngine, RoundStatus};
use promptpot_scoring::{ScoreParams, ScoringEngine, ScoringEngineClient};
use soroban_sdk::{
    testutils::{Address as _, Ledger},
    token::{StellarAssetClient, TokenClient},
    Address, Env, String,
};

const DURATION: u64 = 3_600;
const GRACE: u64 = 300;
const STAKE: i128 = 5_000_000;

struct Setup<'a> {
    env: Env,
    client: RoundSchedulerClient<'a>,
    engine: RoundEngineClient<'a>,
    dist: PrizeDistributionClient<'a>,
    board: LeaderboardClient<'a>,
    admin: Address,
    oracle: Address,
    platform: Address,
    token: TokenClient<'a>,
    asset: StellarAssetClient<'a>,
}

fn config(min_participants: u32, max_rounds_per_day: u32) -> SchedulerConfig {
    SchedulerConfig {
        enabled: true,
        round_duration_secs: DURATION,
        min_stake: STAKE,
        max_participants: 16,
        min_participants,
        max_rounds_per_day,
        auto_transitions: true,
    }
}

fn setup_with<'a>(cfg: SchedulerConfig) -> Setup<'a> {
    let env = Env::default();
    env.mock_all_auths();
    env.ledger().with_mut(|l| l.timestamp = 100_000);

    let admin = Address::generate(&env);
    let gate = Address::generate(&env);
    let oracle = Address::generate(&env);
    let platform = Address::generate(&env);

    let sac = env.register_stellar_asset_contract_v2(admin.clone());
    let token = TokenClient::new(&env, &sac.address());
    let asset = StellarAssetClient::new(&env, &sac.address());

    let scoring_id = env.register(ScoringEngine, ());
    ScoringEngineClient::new(&env, &scoring_id).init(
        &admin,
        &ScoreParams {
            early_window_minutes: 0,
            early_bonus_per_minute: 0,
            semantic_blend_enabled: false,
        },
    );

    let engine_id = env.register(RoundEngine, ());
    let dist_id = env.register(PrizeDistribution, ());
    let sched_id = env.register(RoundScheduler, ());

    let engine = RoundEngineClient::new(&env, &engine_id);
    engine.init(&admin, &sac.address(), &dist_id, &gate, &scoring_id, &GRACE);
    engine.set_operator(&admin, &sched_id);

    let dist = PrizeDistributionClient::new(&env, &dist_id);
    dist.init(&admin, &sac.address(), &engine_id, &platform, &500u32);
    dist.set_operator(&admin, &sched_id);

    let client = RoundSchedulerClient::new(&env, &sched_id);
    client.init(&admin, &engine_id, &dist_id, &oracle, &cfg);

    let board_id = env.register(Leaderboard, ());
    let board = LeaderboardClient::new(&env, &board_id);
    board.init(&admin);
    board.set_authorized(&admin, &engine_id, &true);
    board.set_authorized(&admin, &sched_id, &true);
    engine.set_leaderboard(&admin, &board_id);
    client.set_leaderboard(&admin, &board_id);

    Setup {
        env,
        client,
        engine,
        dist,
        board,
        admin,
        oracle,
        platform,
        token,
        asset,
    }
}

fn setup<'a>() -> Setup<'a> {
    setup_with(config(1, 5))
}

fn stage(s: &Setup) {
    s.client.stage_content(
        &s.oracle,
        &String::from_str(&s.env, "a red fox"),
        &String::from_str(&s.env, "asset://round"),
    );
}

fn submit(s: &Setup, round_id: u64, guess: &str) -> Address {
    let player = Address::generate(&s.env);
    s.asset.mint(&player, &STAKE);
    s.engine.submit_guess(
        &round_id,
        &player,
        &String::from_str(&s.env, guess),
        &STAKE,
        &GateVerdict {
            allowed: true,
            risk_score: 0,
        },
        &None,
    );
    player
}

fn expire_round(s: &Setup) {
    let now = s.env.ledger().timestamp();
    s.env.ledger().with_mut(|l| l.timestamp = now + DURATION);
}

fn detail(s: &Setup, text: &str) -> String {
    String::from_str(&s.env, text)
}

// ---------------------------------------------------------------------------
// config / staging
// ---------------------------------------------------------------------------

#[test]
fn init_rejects_bad_config() {
    let s = setup();
    let mut bad = config(1, 5);
    bad.min_participants = 99;
    let res = s.client.try_set_config(&s.admin, &bad);
    assert_eq!(res, Err(Ok(Error::InvalidConfig)));

    let res = s.client.try_init(
        &s.admin,
        &s.engine.address,
        &s.dist.address,
        &s.oracle,
        &config(1, 5),
    );
    assert_eq!(res, Err(Ok(Error::AlreadyInitialized)));
}

#[test]
fn only_the_oracle_stages_content() {
    let s = setup();
    let stranger = Address::generate(&s.env);
    let res = s.client.try_stage_content(
        &stranger,
        &String::from_str(&s.env, "a red fox"),
        &String::from_str(&s.env, "asset://round"),
    );
    assert_eq!(res, Err(Ok(Error::NotAuthorized)));

    stage(&s);
    let staged = s.client.get_staged_content();
    assert_eq!(staged.target_text, String::from_str(&s.env, "a red fox"));
}

#[test]
fn tick_requires_admin_or_keeper() {
    let s = setup();
    let keeper = Address::generate(&s.env);
    let res = s.client.try_tick(&keeper);
    assert_eq!(res, Err(Ok(Error::NotAuthorized)));

    s.client.set_keeper(&s.admin, &keeper);
    let run = s.client.tick(&keeper);
    assert_eq!(run.outcome, RunOutcome::Failed);
}

// ---------------------------------------------------------------------------
// starting rounds
// ---------------------------------------------------------------------------

#[test]
fn disabled_scheduler_skips() {
    let s = setup();
    let mut cfg = config(1, 5);
    cfg.enabled = false;
    s.client.set_config(&s.admin, &cfg);

    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Skipped);
    assert_eq!(run.detail, detail(&s, "scheduler disabled"));
    assert_eq!(run.round_id, None);
}

#[test]
fn tick_without_staged_content_fails() {
    let s = setup();
    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Failed);
    assert_eq!(run.detail, detail(&s, "no staged content"));
    assert_eq!(s.client.get_stats().failures, 1);
}

#[test]
fn tick_starts_a_staged_round() {
    let s = setup();
    stage(&s);

    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Success);
    assert_eq!(run.round_id, Some(1));
    assert_eq!(run.detail, detail(&s, "round started"));

    // Round is live and the staged content was consumed.
    assert_eq!(s.engine.get_active_round(), Some(1));
    let round = s.engine.get_round(&1);
    assert_eq!(round.target_text, String::from_str(&s.env, "a red fox"));
    assert_eq!(round.min_stake, STAKE);
    let res = s.client.try_get_staged_content();
    assert_eq!(res, Err(Ok(Error::NoStagedContent)));

    assert_eq!(s.client.get_day_count(&s.env.ledger().timestamp()), 1);
    assert_eq!(s.client.get_stats().rounds_started, 1);
}

#[test]
fn running_round_is_left_alone() {
    let s = setup();
    stage(&s);
    s.client.tick(&s.admin);

    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Skipped);
    assert_eq!(run.detail, detail(&s, "round in progress"));
    assert_eq!(run.round_id, Some(1));
}

#[test]
fn daily_limit_blocks_new_rounds() {
    let s = setup_with(config(1, 1));
    stage(&s);
    s.client.tick(&s.admin);

    // Free the active slot, then try to start another round today.
    s.engine.transition_phase(
        &s.admin,
        &1,
        &Phase::Completed,
        &TriggeredBy::Manual,
        &String::from_str(&s.env, "test"),
    );
    stage(&s);
    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Skipped);
    assert_eq!(run.detail, detail(&s, "daily round limit reached"));

    // The next day the limit resets.
    let now = s.env.ledger().timestamp();
    s.env.ledger().with_mut(|l| l.timestamp = now + SECONDS_PER_DAY);
    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Success);
    assert_eq!(run.round_id, Some(2));
}

// ---------------------------------------------------------------------------
// finalizing rounds
// ---------------------------------------------------------------------------

#[test]
fn starved_round_stays_pending() {
    let s = setup_with(config(2, 5));
    stage(&s);
    s.client.tick(&s.admin);
    let player = submit(&s, 1, "a red fox");

    expire_round(&s);
    // First tick after expiry only moves the timer into grace.
    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Skipped);
    assert_eq!(run.detail, detail(&s, "round in progress"));

    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Skipped);
    assert_eq!(run.detail, detail(&s, "below minimum participation"));

    // Not finalized: no result, no payout, round still pending in the
    // scoring phase. Further ticks keep skipping.
    assert!(s.dist.try_get_result(&1).is_err());
    assert_eq!(s.engine.get_round(&1).status, RoundStatus::Open);
    assert_eq!(s.engine.get_timer(&1).phase, Phase::Scoring);
    assert_eq!(s.token.balance(&player), 0);
    assert_eq!(s.token.balance(&s.dist.address), STAKE);
    assert_eq!(s.engine.get_active_round(), Some(1));

    let run = s.client.tick(&s.admin);
    assert_eq!(run.detail, detail(&s, "below minimum participation"));

    // Manual resolution frees the active slot.
    s.engine.complete_round(&s.admin, &1, &None, &0u32);
    s.engine.transition_phase(
        &s.admin,
        &1,
        &Phase::Completed,
        &TriggeredBy::Manual,
        &String::from_str(&s.env, "operator resolution"),
    );
    assert_eq!(s.engine.get_active_round(), None);
}

#[test]
fn expired_round_is_scored_paid_and_completed() {
    let s = setup();
    stage(&s);
    s.client.tick(&s.admin);
    let first = submit(&s, 1, "a red fox");
    let second = submit(&s, 1, "A RED FOX!");

    expire_round(&s);
    s.client.tick(&s.admin); // into grace
    let run = s.client.tick(&s.admin); // scoring + finalize
    assert_eq!(run.outcome, RunOutcome::Success);
    assert_eq!(run.detail, detail(&s, "round finalized"));

    // Pot 10_000_000 at 5%: 4_750_000 per tied winner, 500_000 platform.
    assert_eq!(s.token.balance(&first), 4_750_000);
    assert_eq!(s.token.balance(&second), 4_750_000);
    assert_eq!(s.token.balance(&s.platform), 500_000);

    let round = s.engine.get_round(&1);
    assert_eq!(round.status, RoundStatus::Completed);
    assert_eq!(round.winner, Some(first));
    assert_eq!(round.top_score, 10_000);
    assert_eq!(s.engine.get_active_round(), None);
    assert_eq!(s.dist.get_result(&1).status, ResultStatus::Distributed);
    assert_eq!(s.engine.get_timer(&1).phase, Phase::Completed);

    // With the slot free, a new staged round can start.
    stage(&s);
    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Success);
    assert_eq!(run.round_id, Some(2));
}

#[test]
fn finalized_round_lands_on_the_leaderboard() {
    let s = setup();
    stage(&s);
    s.client.tick(&s.admin);
    let first = submit(&s, 1, "a red fox");
    let second = submit(&s, 1, "zzzz");

    // Scores landed at submission time, wins only at payout.
    assert_eq!(s.board.player_rank(&1, &first), 1);
    assert_eq!(s.board.player_rank(&1, &second), 2);
    assert_eq!(s.board.get_player_stats(&first).wins, 0);

    expire_round(&s);
    s.client.tick(&s.admin); // into grace
    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Success);

    // Sole winner: pot 10_000_000 at 5% leaves a 9_500_000 prize.
    let stats = s.board.get_player_stats(&first);
    assert_eq!(stats.wins, 1);
    assert_eq!(stats.total_won, 9_500_000);
    assert_eq!(stats.rounds_entered, 1);
    assert_eq!(stats.best_score, 10_000);
    assert_eq!(s.board.get_player_stats(&second).wins, 0);
}

#[test]
fn failed_payout_leaves_round_resumable() {
    let s = setup();
    stage(&s);
    s.client.tick(&s.admin);
    let first = submit(&s, 1, "a red fox");
    let second = submit(&s, 1, "A RED FOX!");

    // Drain the treasury so every prize transfer fails.
    let sink = Address::generate(&s.env);
    s.dist.withdraw(&s.admin, &sink, &10_000_000);

    expire_round(&s);
    s.client.tick(&s.admin); // into grace
    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Failed);
    assert_eq!(run.detail, detail(&s, "distribution failed"));
    assert_eq!(s.engine.get_timer(&1).phase, Phase::Distribution);
    assert_eq!(s.dist.get_result(&1).status, ResultStatus::Failed);

    // Refund the treasury; the next tick resumes from distribution.
    s.dist.fund(&sink, &10_000_000);
    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Success);
    assert_eq!(s.token.balance(&first), 4_750_000);
    assert_eq!(s.token.balance(&second), 4_750_000);
    assert_eq!(s.engine.get_round(&1).status, RoundStatus::Completed);
    assert_eq!(s.dist.get_result(&1).status, ResultStatus::Distributed);
}

#[test]
fn operator_closed_round_does_not_wedge_the_tick() {
    let s = setup();
    stage(&s);
    s.client.tick(&s.admin);
    let first = submit(&s, 1, "a red fox");

    let sink = Address::generate(&s.env);
    s.dist.withdraw(&s.admin, &sink, &5_000_000);

    expire_round(&s);
    s.client.tick(&s.admin); // into grace
    let run = s.client.tick(&s.admin);
    assert_eq!(run.detail, detail(&s, "distribution failed"));

    // An operator closes the round record by hand between ticks but
    // leaves the phase alone. The resumed tick pays out and still gets
    // the round to COMPLETED instead of failing on the closed record.
    s.engine
        .complete_round(&s.admin, &1, &Some(first.clone()), &10_000u32);
    s.dist.fund(&sink, &5_000_000);

    let run = s.client.tick(&s.admin);
    assert_eq!(run.outcome, RunOutcome::Success);
    assert_eq!(run.detail, detail(&s, "round finalized"));
    assert_eq!(s.token.balance(&first), 4_750_000);
    assert_eq!(s.engine.get_timer(&1).phase, Phase::Completed);
    assert_eq!(s.engine.get_active_round(), None);
}

// ---------------------------------------------------------------------------
// history / stats
// ---------------------------------------------------------------------------

#[test]
fn every_tick_leaves_a_run_record() {
    let s = setup();
    s.client.tick(&s.admin); // failed: nothing staged
    stage(&s);
    s.client.tick(&s.admin); // success: round started
    s.client.tick(&s.admin); // skipped: round in progress

    let runs = s.client.get_run_history();
    assert_eq!(runs.len(), 3);
    assert_eq!(runs.get(0).unwrap().outcome, RunOutcome::Failed);
    assert_eq!(runs.get(1).unwrap().outcome, RunOutcome::Success);
    assert_eq!(runs.get(2).unwrap().outcome, RunOutcome::Skipped);
    assert_eq!(runs.get(2).unwrap().run_id, 3);

    let stats = s.client.get_stats();
    assert_eq!(stats.total_runs, 3);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.skips, 1);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.rounds_started, 1);
    assert_eq!(stats.last_run_at, s.env.ledger().timestamp());
}
