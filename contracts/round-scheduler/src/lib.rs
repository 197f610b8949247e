//! PromptPot Round Scheduler Contract
//!
//! Drives the whole round lifecycle from a single keeper entry point.
//! Each `tick` inspects the current state and performs exactly one step of
//! work: start a staged round, let a running round keep running, or walk a
//! finished round through scoring, results, distribution, and completion.
//!
//! Every tick leaves a run record (success / skipped / failed with a
//! reason), so operators can audit what the automation did and why. A
//! failed finalization leaves the round where it stopped; the next tick
//! picks it up from there.
//!
//! Round content (the hidden target text and its generated visual asset)
//! is staged ahead of time by the content oracle; a tick with nothing
//! staged records a failed run instead of creating an empty round.
#![no_std]
#![allow(unexpected_cfgs)]

use soroban_sdk::{
    contract, contracterror, contractevent, contractimpl, contracttype, Address, Env, String, Vec,
};

use promptpot_leaderboard::LeaderboardClient;
use promptpot_prize_distribution::{
    DistributionOutcome, Error as DistributionError, PrizeDistributionClient, RoundResult,
};
use promptpot_round_engine::{Error as EngineError, Phase, RoundEngineClient, TriggeredBy};

/// Persistent storage TTL in ledgers (~30 days at 5 s/ledger).
pub const PERSISTENT_BUMP_LEDGERS: u32 = 518_400;

/// Run records kept before the oldest is dropped.
pub const MAX_RUN_HISTORY: u32 = 100;

const SECONDS_PER_DAY: u64 = 86_400;

// ---------------------------------------------------------------------------
// Error Types
// ---------------------------------------------------------------------------

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    AlreadyInitialized = 1,
    NotInitialized = 2,
    NotAuthorized = 3,
    InvalidConfig = 4,
    NoStagedContent = 5,
}

// ---------------------------------------------------------------------------
// Storage Types
// ---------------------------------------------------------------------------

#[contracttype]
pub enum DataKey {
    // --- instance() ---
    Admin,
    /// Address allowed to call `tick` besides the admin.
    Keeper,
    RoundEngine,
    PrizeDistribution,
    /// Optional leaderboard credited with wins at payout.
    Leaderboard,
    /// Address allowed to stage round content.
    ContentOracle,
    Config,
    Staged,
    Stats,
    RunCount,
    // --- persistent() ---
    Runs,
    /// Rounds started on a given day index (timestamp / 86_400).
    DayCount(u64),
}

/// Knobs for automated round creation. Applied to rounds the scheduler
/// starts; manually created rounds are not affected.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub round_duration_secs: u64,
    pub min_stake: i128,
    pub max_participants: u32,
    /// Rounds that end with fewer participants are completed without
    /// scoring or payout.
    pub min_participants: u32,
    pub max_rounds_per_day: u32,
    pub auto_transitions: bool,
}

/// Content for the next round, staged by the content oracle.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StagedContent {
    pub target_text: String,
    pub asset_ref: String,
    pub staged_at: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RunOutcome {
    Success,
    Skipped,
    Failed,
}

/// What one tick did, and to which round.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunRecord {
    pub run_id: u64,
    pub run_at: u64,
    pub outcome: RunOutcome,
    pub round_id: Option<u64>,
    pub detail: String,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SchedulerStats {
    pub total_runs: u64,
    pub successes: u64,
    pub skips: u64,
    pub failures: u64,
    pub rounds_started: u64,
    pub last_run_at: u64,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[contractevent]
pub struct ContentStaged {
    pub staged_at: u64,
}

#[contractevent]
pub struct TickFinished {
    #[topic]
    pub run_id: u64,
    pub outcome: RunOutcome,
    pub round_id: Option<u64>,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[contract]
pub struct RoundScheduler;

#[contractimpl]
impl RoundScheduler {
    /// Initialize the scheduler. May only be called once.
    ///
    /// The scheduler must be registered as the operator of both the round
    /// engine and the prize-distribution contract before its first tick.
    pub fn init(
        env: Env,
        admin: Address,
        round_engine: Address,
        prize_distribution: Address,
        content_oracle: Address,
        config: SchedulerConfig,
    ) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(Error::AlreadyInitialized);
        }
        admin.require_auth();
        validate_config(&config)?;

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::RoundEngine, &round_engine);
        env.storage()
            .instance()
            .set(&DataKey::PrizeDistribution, &prize_distribution);
        env.storage()
            .instance()
            .set(&DataKey::ContentOracle, &content_oracle);
        env.storage().instance().set(&DataKey::Config, &config);
        env.storage().instance().set(&DataKey::RunCount, &0u64);
        env.storage().instance().set(
            &DataKey::Stats,
            &SchedulerStats {
                total_runs: 0,
                successes: 0,
                skips: 0,
                failures: 0,
                rounds_started: 0,
                last_run_at: 0,
            },
        );
        Ok(())
    }

    /// Authorize an address to call `tick`.
    pub fn set_keeper(env: Env, admin: Address, keeper: Address) -> Result<(), Error> {
        require_admin(&env, &admin)?;
        env.storage().instance().set(&DataKey::Keeper, &keeper);
        Ok(())
    }

    /// Point the scheduler at a leaderboard to credit wins on. Admin
    /// only; this contract must be authorized there.
    pub fn set_leaderboard(env: Env, admin: Address, leaderboard: Address) -> Result<(), Error> {
        require_admin(&env, &admin)?;
        env.storage()
            .instance()
            .set(&DataKey::Leaderboard, &leaderboard);
        Ok(())
    }

    /// Replace the scheduler configuration. Admin only.
    pub fn set_config(env: Env, admin: Address, config: SchedulerConfig) -> Result<(), Error> {
        require_admin(&env, &admin)?;
        validate_config(&config)?;
        env.storage().instance().set(&DataKey::Config, &config);
        Ok(())
    }

    /// Stage the next round's content. Content oracle only; restaging
    /// before the content is consumed replaces it.
    pub fn stage_content(
        env: Env,
        oracle: Address,
        target_text: String,
        asset_ref: String,
    ) -> Result<(), Error> {
        require_initialized(&env)?;
        let configured: Address = env
            .storage()
            .instance()
            .get(&DataKey::ContentOracle)
            .ok_or(Error::NotInitialized)?;
        oracle.require_auth();
        if oracle != configured {
            return Err(Error::NotAuthorized);
        }

        let staged_at = env.ledger().timestamp();
        env.storage().instance().set(
            &DataKey::Staged,
            &StagedContent {
                target_text,
                asset_ref,
                staged_at,
            },
        );
        ContentStaged { staged_at }.publish(&env);
        Ok(())
    }

    /// One scheduler step. Admin or keeper.
    ///
    /// With no round in flight, starts a staged round (subject to the
    /// daily limit). With a round in flight, updates its timer and, once
    /// the round reaches scoring, drives it through results, payout, and
    /// completion. A round below the participation minimum is never
    /// finalized automatically; each tick records a skipped run until an
    /// operator resolves it.
    pub fn tick(env: Env, caller: Address) -> Result<RunRecord, Error> {
        require_initialized(&env)?;
        require_admin_or_keeper(&env, &caller)?;

        let config: SchedulerConfig = env
            .storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(Error::NotInitialized)?;

        if !config.enabled {
            return Ok(record_run(
                &env,
                RunOutcome::Skipped,
                None,
                "scheduler disabled",
            ));
        }

        let engine = engine_client(&env)?;
        match engine.get_active_round() {
            Some(round_id) => Ok(drive_round(&env, &engine, round_id, &config)),
            None => Ok(start_round(&env, &engine, &config)),
        }
    }

    // -----------------------------------------------------------------------
    // views
    // -----------------------------------------------------------------------

    pub fn get_config(env: Env) -> Result<SchedulerConfig, Error> {
        env.storage()
            .instance()
            .get(&DataKey::Config)
            .ok_or(Error::NotInitialized)
    }

    pub fn get_staged_content(env: Env) -> Result<StagedContent, Error> {
        env.storage()
            .instance()
            .get(&DataKey::Staged)
            .ok_or(Error::NoStagedContent)
    }

    pub fn get_stats(env: Env) -> Result<SchedulerStats, Error> {
        env.storage()
            .instance()
            .get(&DataKey::Stats)
            .ok_or(Error::NotInitialized)
    }

    pub fn get_run_history(env: Env) -> Vec<RunRecord> {
        env.storage()
            .persistent()
            .get(&DataKey::Runs)
            .unwrap_or(Vec::new(&env))
    }

    /// Rounds started on the day containing `timestamp`.
    pub fn get_day_count(env: Env, timestamp: u64) -> u32 {
        env.storage()
            .persistent()
            .get(&DataKey::DayCount(timestamp / SECONDS_PER_DAY))
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tick steps
// ---------------------------------------------------------------------------

/// No round in flight: start one from staged content.
fn start_round(env: &Env, engine: &RoundEngineClient, config: &SchedulerConfig) -> RunRecord {
    let now = env.ledger().timestamp();
    let day_key = DataKey::DayCount(now / SECONDS_PER_DAY);
    let started_today: u32 = env.storage().persistent().get(&day_key).unwrap_or(0);
    if started_today >= config.max_rounds_per_day {
        return record_run(env, RunOutcome::Skipped, None, "daily round limit reached");
    }

    let Some(content) = env
        .storage()
        .instance()
        .get::<_, StagedContent>(&DataKey::Staged)
    else {
        return record_run(env, RunOutcome::Failed, None, "no staged content");
    };

    let this = env.current_contract_address();
    let Ok(Ok(round_id)) = engine.try_create_round(
        &this,
        &content.target_text,
        &content.asset_ref,
        &config.min_stake,
        &config.max_participants,
        &config.round_duration_secs,
        &config.auto_transitions,
    ) else {
        return record_run(env, RunOutcome::Failed, None, "round creation failed");
    };
    let Ok(Ok(_)) = engine.try_transition_phase(
        &this,
        &round_id,
        &Phase::Active,
        &TriggeredBy::Condition,
        &String::from_str(env, "scheduled start"),
    ) else {
        return record_run(env, RunOutcome::Failed, Some(round_id), "round activation failed");
    };

    env.storage().instance().remove(&DataKey::Staged);
    env.storage()
        .persistent()
        .set(&day_key, &(started_today + 1));
    env.storage()
        .persistent()
        .extend_ttl(&day_key, PERSISTENT_BUMP_LEDGERS, PERSISTENT_BUMP_LEDGERS);

    bump_rounds_started(env);
    record_run(env, RunOutcome::Success, Some(round_id), "round started")
}

/// A round is in flight: refresh its timer and act on the phase.
fn drive_round(
    env: &Env,
    engine: &RoundEngineClient,
    round_id: u64,
    config: &SchedulerConfig,
) -> RunRecord {
    let Ok(Ok(timer)) = engine.try_update_timer(&round_id) else {
        return record_run(env, RunOutcome::Failed, Some(round_id), "timer update failed");
    };

    match timer.phase {
        Phase::Waiting | Phase::Active | Phase::GracePeriod => {
            record_run(env, RunOutcome::Skipped, Some(round_id), "round in progress")
        }
        Phase::Scoring => {
            let Ok(Ok(round)) = engine.try_get_round(&round_id) else {
                return record_run(env, RunOutcome::Failed, Some(round_id), "round lookup failed");
            };
            if round.total_participants < config.min_participants {
                // Below the participation minimum the round is left
                // unfinalized; the operator resolves it manually.
                record_run(
                    env,
                    RunOutcome::Skipped,
                    Some(round_id),
                    "below minimum participation",
                )
            } else {
                finalize_round(env, engine, round_id, timer.phase)
            }
        }
        Phase::Results | Phase::Distribution => finalize_round(env, engine, round_id, timer.phase),
        Phase::Completed => {
            record_run(env, RunOutcome::Skipped, Some(round_id), "round already completed")
        }
    }
}

/// Walk the round from its current phase through results, payout, and
/// completion. Resumable: a rerun after a mid-flight failure picks up
/// whatever is already done.
fn finalize_round(
    env: &Env,
    engine: &RoundEngineClient,
    round_id: u64,
    mut phase: Phase,
) -> RunRecord {
    let this = env.current_contract_address();
    let dist = match distribution_client(env) {
        Ok(client) => client,
        Err(_) => {
            return record_run(env, RunOutcome::Failed, Some(round_id), "not initialized");
        }
    };

    let _ = engine.try_mark_ended(&this, &round_id);

    // The result is write-once; a resumed run reads the stored one.
    let result: RoundResult = match dist.try_calculate_results(&this, &round_id) {
        Ok(Ok(result)) => result,
        Err(Ok(DistributionError::AlreadyCalculated)) => match dist.try_get_result(&round_id) {
            Ok(Ok(result)) => result,
            _ => {
                return record_run(env, RunOutcome::Failed, Some(round_id), "result lookup failed");
            }
        },
        _ => {
            return record_run(
                env,
                RunOutcome::Failed,
                Some(round_id),
                "result calculation failed",
            );
        }
    };

    if phase == Phase::Scoring {
        let Ok(Ok(timer)) = engine.try_transition_phase(
            &this,
            &round_id,
            &Phase::Results,
            &TriggeredBy::Condition,
            &String::from_str(env, "results calculated"),
        ) else {
            return record_run(env, RunOutcome::Failed, Some(round_id), "phase advance failed");
        };
        phase = timer.phase;
    }
    // Nothing to pay out: the round completes straight from RESULTS.
    if result.winners.is_empty() {
        if !complete_round(env, engine, round_id, &None, result.top_score) {
            return record_run(env, RunOutcome::Failed, Some(round_id), "round completion failed");
        }
        let Ok(Ok(_)) = engine.try_transition_phase(
            &this,
            &round_id,
            &Phase::Completed,
            &TriggeredBy::Condition,
            &String::from_str(env, "no winners"),
        ) else {
            return record_run(env, RunOutcome::Failed, Some(round_id), "round completion failed");
        };
        return record_run(env, RunOutcome::Success, Some(round_id), "round finalized");
    }

    if phase == Phase::Results {
        let Ok(Ok(_)) = engine.try_transition_phase(
            &this,
            &round_id,
            &Phase::Distribution,
            &TriggeredBy::Condition,
            &String::from_str(env, "distribution started"),
        ) else {
            return record_run(env, RunOutcome::Failed, Some(round_id), "phase advance failed");
        };
    }

    // A rerun after the payout already went through resumes from the
    // stored summary instead of re-executing.
    let (summary, paid_now) = match dist.try_execute_distribution(&this, &round_id) {
        Ok(Ok(summary)) => (summary, true),
        Err(Ok(DistributionError::AlreadyDistributed)) => match dist.try_get_summary(&round_id) {
            Ok(Ok(summary)) => (summary, false),
            _ => {
                return record_run(env, RunOutcome::Failed, Some(round_id), "summary lookup failed");
            }
        },
        _ => {
            return record_run(
                env,
                RunOutcome::Failed,
                Some(round_id),
                "distribution execution failed",
            );
        }
    };
    if summary.outcome != DistributionOutcome::Completed {
        // Any unpaid transfer leaves the round in DISTRIBUTION; the next
        // tick retries the payout, skipping what already cleared.
        return record_run(env, RunOutcome::Failed, Some(round_id), "distribution failed");
    }

    // Wins land on the leaderboard best-effort, once per payout; the
    // round still closes if the board call falls over.
    if paid_now {
        if let Some(board) = env
            .storage()
            .instance()
            .get::<_, Address>(&DataKey::Leaderboard)
        {
            let lb = LeaderboardClient::new(env, &board);
            for winner in result.winners.iter() {
                let _ = lb.try_record_win(&this, &round_id, &winner.address, &winner.prize);
            }
        }
    }

    let winner = result.winners.first().map(|w| w.address);
    if !complete_round(env, engine, round_id, &winner, result.top_score) {
        return record_run(env, RunOutcome::Failed, Some(round_id), "round completion failed");
    }
    let Ok(Ok(_)) = engine.try_transition_phase(
        &this,
        &round_id,
        &Phase::Completed,
        &TriggeredBy::Condition,
        &String::from_str(env, "prizes distributed"),
    ) else {
        return record_run(env, RunOutcome::Failed, Some(round_id), "round completion failed");
    };

    record_run(env, RunOutcome::Success, Some(round_id), "round finalized")
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Close out the round's engine record. A round that was already closed
/// (say, by an operator between ticks) counts as done, not as a failure.
fn complete_round(
    env: &Env,
    engine: &RoundEngineClient,
    round_id: u64,
    winner: &Option<Address>,
    top_score: u32,
) -> bool {
    let this = env.current_contract_address();
    matches!(
        engine.try_complete_round(&this, &round_id, winner, &top_score),
        Ok(Ok(())) | Err(Ok(EngineError::RoundClosed))
    )
}

/// Append a run record, roll the stats, and publish the tick event.
fn record_run(env: &Env, outcome: RunOutcome, round_id: Option<u64>, detail: &str) -> RunRecord {
    let run_id: u64 = env
        .storage()
        .instance()
        .get(&DataKey::RunCount)
        .unwrap_or(0)
        + 1;
    env.storage().instance().set(&DataKey::RunCount, &run_id);

    let record = RunRecord {
        run_id,
        run_at: env.ledger().timestamp(),
        outcome: outcome.clone(),
        round_id,
        detail: String::from_str(env, detail),
    };

    let mut runs: Vec<RunRecord> = env
        .storage()
        .persistent()
        .get(&DataKey::Runs)
        .unwrap_or(Vec::new(env));
    if runs.len() >= MAX_RUN_HISTORY {
        runs.pop_front();
    }
    runs.push_back(record.clone());
    env.storage().persistent().set(&DataKey::Runs, &runs);
    env.storage()
        .persistent()
        .extend_ttl(&DataKey::Runs, PERSISTENT_BUMP_LEDGERS, PERSISTENT_BUMP_LEDGERS);

    if let Some(mut stats) = env
        .storage()
        .instance()
        .get::<_, SchedulerStats>(&DataKey::Stats)
    {
        stats.total_runs += 1;
        match outcome {
            RunOutcome::Success => stats.successes += 1,
            RunOutcome::Skipped => stats.skips += 1,
            RunOutcome::Failed => stats.failures += 1,
        }
        stats.last_run_at = record.run_at;
        env.storage().instance().set(&DataKey::Stats, &stats);
    }

    TickFinished {
        run_id,
        outcome,
        round_id,
    }
    .publish(env);

    record
}

fn bump_rounds_started(env: &Env) {
    if let Some(mut stats) = env
        .storage()
        .instance()
        .get::<_, SchedulerStats>(&DataKey::Stats)
    {
        stats.rounds_started += 1;
        env.storage().instance().set(&DataKey::Stats, &stats);
    }
}

fn validate_config(config: &SchedulerConfig) -> Result<(), Error> {
    if config.round_duration_secs == 0
        || config.min_stake <= 0
        || config.max_participants == 0
        || config.min_participants > config.max_participants
        || config.max_rounds_per_day == 0
    {
        return Err(Error::InvalidConfig);
    }
    Ok(())
}

fn engine_client(env: &Env) -> Result<RoundEngineClient, Error> {
    let addr: Address = env
        .storage()
        .instance()
        .get(&DataKey::RoundEngine)
        .ok_or(Error::NotInitialized)?;
    Ok(RoundEngineClient::new(env, &addr))
}

fn distribution_client(env: &Env) -> Result<PrizeDistributionClient, Error> {
    let addr: Address = env
        .storage()
        .instance()
        .get(&DataKey::PrizeDistribution)
        .ok_or(Error::NotInitialized)?;
    Ok(PrizeDistributionClient::new(env, &addr))
}

fn require_initialized(env: &Env) -> Result<(), Error> {
    if !env.storage().instance().has(&DataKey::Admin) {
        return Err(Error::NotInitialized);
    }
    Ok(())
}

fn require_admin(env: &Env, caller: &Address) -> Result<(), Error> {
    let admin: Address = env
        .storage()
        .instance()
        .get(&DataKey::Admin)
        .ok_or(Error::NotInitialized)?;
    caller.require_auth();
    if caller != &admin {
        return Err(Error::NotAuthorized);
    }
    Ok(())
}

fn require_admin_or_keeper(env: &Env, caller: &Address) -> Result<(), Error> {
    caller.require_auth();
    let admin: Address = env
        .storage()
        .instance()
        .get(&DataKey::Admin)
        .ok_or(Error::NotInitialized)?;
    if caller == &admin {
        return Ok(());
    }
    if let Some(keeper) = env.storage().instance().get::<_, Address>(&DataKey::Keeper) {
        if caller == &keeper {
            return Ok(());
        }
    }
    Err(Error::NotAuthorized)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test;
