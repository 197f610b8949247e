//! PromptPot Round Engine Contract
//!
//! Owns the round lifecycle: round records, staked guess submissions, the
//! per-round timer, and the phase state machine that drives a round from
//! WAITING through COMPLETED. Scoring is delegated to the scoring engine
//! contract; stakes are forwarded to the prize-distribution treasury.
//!
//! ## Phase machine
//! WAITING → ACTIVE → GRACE_PERIOD → SCORING → RESULTS → DISTRIBUTION →
//! COMPLETED, with every phase also allowed to bail out to COMPLETED
//! (except COMPLETED itself, which is terminal). Transitions outside the
//! table are rejected with no mutation; a same-phase request is a no-op
//! success so concurrent finalizers cannot trip each other.
//!
//! ## Storage Strategy
//! - `instance()`: admin, collaborator addresses, thresholds, round
//!   counter, and the single-active-round marker.
//! - `persistent()`: per-round entries (round, submissions, timer,
//!   transition history, per-address submission markers), each bumped on
//!   every write.
#![no_std]
#![allow(unexpected_cfgs)]

use soroban_sdk::{
    contract, contracterror, contractevent, contractimpl, contracttype, token::TokenClient,
    Address, Env, String, Vec,
};

use promptpot_leaderboard::LeaderboardClient;
use promptpot_scoring::ScoringEngineClient;
use promptpot_shared::SCORE_MAX;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Persistent storage TTL in ledgers (~30 days at 5 s/ledger).
pub const PERSISTENT_BUMP_LEDGERS: u32 = 518_400;

/// Longest accepted guess, in bytes. Mirrors the scoring engine's buffer.
pub const MAX_GUESS_LEN: u32 = 256;

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
    RoundNotFound = 4,
    TimerNotFound = 5,
    InvalidTransition = 6,
    AnotherRoundActive = 7,
    NotAcceptingGuesses = 8,
    SubmissionRejected = 9,
    AlreadySubmitted = 10,
    RoundFull = 11,
    StakeTooLow = 12,
    InvalidAmount = 13,
    InvalidDuration = 14,
    GuessTooLong = 15,
    RoundClosed = 16,
    InvalidScore = 17,
    Overflow = 18,
}

// ---------------------------------------------------------------------------
// Storage Types
// ---------------------------------------------------------------------------

#[contracttype]
pub enum DataKey {
    // --- instance() ---
    Admin,
    /// Contract authorized for lifecycle calls (the round scheduler).
    Operator,
    Token,
    /// Recipient of submitted stakes (the prize-distribution contract).
    Treasury,
    /// Anti-fraud gate address whose signed verdict accompanies guesses.
    Gate,
    ScoringContract,
    /// Optional leaderboard fed on every accepted submission.
    Leaderboard,
    GraceThresholdSecs,
    NextRoundId,
    /// Present iff a round is currently ACTIVE (single-active invariant).
    ActiveRound,
    // --- persistent() ---
    Round(u64),
    Submissions(u64),
    Timer(u64),
    Transitions(u64),
    Submitted(u64, Address),
}

/// Round lifecycle phase. See the transition table in `is_valid_transition`.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Waiting,
    Active,
    GracePeriod,
    Scoring,
    Results,
    Distribution,
    Completed,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TriggeredBy {
    Timer,
    Manual,
    Condition,
}

/// Append-only record of one successful phase transition.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub triggered_at: u64,
    pub triggered_by: TriggeredBy,
    pub reason: String,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RoundStatus {
    Open,
    Ended,
    Completed,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Round {
    pub id: u64,
    /// The hidden target the guesses are scored against.
    pub target_text: String,
    /// Reference to the generated visual asset shown to players.
    pub asset_ref: String,
    pub status: RoundStatus,
    pub pot: i128,
    pub min_stake: i128,
    pub max_participants: u32,
    pub start_time: u64,
    pub end_time: u64,
    pub created_at: u64,
    pub total_participants: u32,
    /// Running average score in centipoints, kept in step with the pot.
    pub average_score: u32,
    pub winner: Option<Address>,
    pub top_score: u32,
}

/// One participant's staked guess. Immutable once created.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Submission {
    pub round_id: u64,
    pub submitter: Address,
    pub guess: String,
    pub stake: i128,
    pub score: u32,
    pub submitted_at: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoundTimer {
    pub round_id: u64,
    pub phase: Phase,
    pub start_time: u64,
    pub end_time: u64,
    pub remaining_secs: u64,
    pub is_active: bool,
    pub auto_transitions: bool,
}

/// The anti-fraud gate's verdict, co-signed by the gate address.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GateVerdict {
    pub allowed: bool,
    pub risk_score: u32,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[contractevent]
pub struct RoundCreated {
    #[topic]
    pub round_id: u64,
    pub min_stake: i128,
    pub max_participants: u32,
    pub end_time: u64,
}

#[contractevent]
pub struct PhaseChanged {
    #[topic]
    pub round_id: u64,
    pub from: Phase,
    pub to: Phase,
    pub triggered_by: TriggeredBy,
}

#[contractevent]
pub struct SubmissionReceived {
    #[topic]
    pub round_id: u64,
    #[topic]
    pub submitter: Address,
    pub score: u32,
    pub stake: i128,
    pub pot: i128,
}

#[contractevent]
pub struct RoundEnded {
    #[topic]
    pub round_id: u64,
}

#[contractevent]
pub struct RoundCompleted {
    #[topic]
    pub round_id: u64,
    pub winner: Option<Address>,
    pub top_score: u32,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[contract]
pub struct RoundEngine;

#[contractimpl]
impl RoundEngine {
    // -----------------------------------------------------------------------
    // init / config
    // -----------------------------------------------------------------------

    /// Initialize the round engine. May only be called once.
    ///
    /// `treasury` receives submitted stakes (the prize-distribution
    /// contract); `gate` is the anti-fraud gate whose signature must cover
    /// every submission's verdict; `scoring` is the scoring engine.
    pub fn init(
        env: Env,
        admin: Address,
        token: Address,
        treasury: Address,
        gate: Address,
        scoring: Address,
        grace_threshold_secs: u64,
    ) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(Error::AlreadyInitialized);
        }
        admin.require_auth();

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::Token, &token);
        env.storage().instance().set(&DataKey::Treasury, &treasury);
        env.storage().instance().set(&DataKey::Gate, &gate);
        env.storage().instance().set(&DataKey::ScoringContract, &scoring);
        env.storage()
            .instance()
            .set(&DataKey::GraceThresholdSecs, &grace_threshold_secs);
        env.storage().instance().set(&DataKey::NextRoundId, &0u64);
        Ok(())
    }

    /// Authorize a contract (the round scheduler) for lifecycle calls.
    pub fn set_operator(env: Env, admin: Address, operator: Address) -> Result<(), Error> {
        require_admin(&env, &admin)?;
        env.storage().instance().set(&DataKey::Operator, &operator);
        Ok(())
    }

    /// Point the engine at a leaderboard to feed with accepted
    /// submissions. Admin only; this contract must be authorized there.
    pub fn set_leaderboard(env: Env, admin: Address, leaderboard: Address) -> Result<(), Error> {
        require_admin(&env, &admin)?;
        env.storage()
            .instance()
            .set(&DataKey::Leaderboard, &leaderboard);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // round creation
    // -----------------------------------------------------------------------

    /// Create a new round in WAITING with a fresh timer. Admin or operator.
    ///
    /// The round does not accept guesses until it is transitioned to
    /// ACTIVE, which also re-anchors its start/end times.
    #[allow(clippy::too_many_arguments)]
    pub fn create_round(
        env: Env,
        caller: Address,
        target_text: String,
        asset_ref: String,
        min_stake: i128,
        max_participants: u32,
        duration_secs: u64,
        auto_transitions: bool,
    ) -> Result<u64, Error> {
        require_initialized(&env)?;
        require_admin_or_operator(&env, &caller)?;

        if min_stake <= 0 || max_participants == 0 {
            return Err(Error::InvalidAmount);
        }
        if duration_secs == 0 {
            return Err(Error::InvalidDuration);
        }
        if target_text.len() > MAX_GUESS_LEN {
            return Err(Error::GuessTooLong);
        }

        let next: u64 = env
            .storage()
            .instance()
            .get(&DataKey::NextRoundId)
            .unwrap_or(0);
        let round_id = next.checked_add(1).ok_or(Error::Overflow)?;
        env.storage().instance().set(&DataKey::NextRoundId, &round_id);

        let now = env.ledger().timestamp();
        let end_time = now.checked_add(duration_secs).ok_or(Error::Overflow)?;
        let round = Round {
            id: round_id,
            target_text,
            asset_ref,
            status: RoundStatus::Open,
            pot: 0,
            min_stake,
            max_participants,
            start_time: now,
            end_time,
            created_at: now,
            total_participants: 0,
            average_score: 0,
            winner: None,
            top_score: 0,
        };
        set_persistent(&env, DataKey::Round(round_id), &round);
        set_persistent(
            &env,
            DataKey::Submissions(round_id),
            &Vec::<Submission>::new(&env),
        );
        set_persistent(
            &env,
            DataKey::Transitions(round_id),
            &Vec::<PhaseTransition>::new(&env),
        );
        ensure_timer(&env, round_id, duration_secs, auto_transitions);

        RoundCreated {
            round_id,
            min_stake,
            max_participants,
            end_time,
        }
        .publish(&env);

        Ok(round_id)
    }

    // -----------------------------------------------------------------------
    // timer
    // -----------------------------------------------------------------------

    /// Initialize the round's timer. Idempotent: an existing timer is
    /// returned unchanged and no history entry is written.
    pub fn init_timer(
        env: Env,
        caller: Address,
        round_id: u64,
        duration_secs: u64,
        auto_transitions: bool,
    ) -> Result<RoundTimer, Error> {
        require_initialized(&env)?;
        require_admin_or_operator(&env, &caller)?;
        if duration_secs == 0 {
            return Err(Error::InvalidDuration);
        }
        get_round(&env, round_id)?;
        Ok(ensure_timer(&env, round_id, duration_secs, auto_transitions))
    }

    /// Recompute remaining time from the clock and, when auto transitions
    /// are enabled, apply at most one threshold rule:
    /// ACTIVE → GRACE_PERIOD once remaining <= grace threshold,
    /// GRACE_PERIOD → SCORING once remaining reaches zero.
    pub fn update_timer(env: Env, round_id: u64) -> Result<RoundTimer, Error> {
        require_initialized(&env)?;
        let mut timer = get_timer(&env, round_id)?;

        let now = env.ledger().timestamp();
        timer.remaining_secs = timer.end_time.saturating_sub(now);

        if timer.auto_transitions && timer.is_active {
            let grace_threshold: u64 = env
                .storage()
                .instance()
                .get(&DataKey::GraceThresholdSecs)
                .unwrap_or(0);
            match timer.phase {
                Phase::Active if timer.remaining_secs <= grace_threshold => {
                    do_transition(
                        &env,
                        &mut timer,
                        Phase::GracePeriod,
                        TriggeredBy::Timer,
                        String::from_str(&env, "grace period threshold reached"),
                    )?;
                }
                Phase::GracePeriod if timer.remaining_secs == 0 => {
                    do_transition(
                        &env,
                        &mut timer,
                        Phase::Scoring,
                        TriggeredBy::Timer,
                        String::from_str(&env, "round time expired"),
                    )?;
                }
                _ => {}
            }
        }

        set_persistent(&env, DataKey::Timer(round_id), &timer);
        Ok(timer)
    }

    /// Request a phase transition. Same-phase requests are a no-op
    /// success; pairs outside the table fail with no mutation.
    pub fn transition_phase(
        env: Env,
        caller: Address,
        round_id: u64,
        new_phase: Phase,
        triggered_by: TriggeredBy,
        reason: String,
    ) -> Result<RoundTimer, Error> {
        require_initialized(&env)?;
        require_admin_or_operator(&env, &caller)?;

        let mut timer = get_timer(&env, round_id)?;
        if timer.phase == new_phase {
            return Ok(timer);
        }
        do_transition(&env, &mut timer, new_phase, triggered_by, reason)?;
        set_persistent(&env, DataKey::Timer(round_id), &timer);
        Ok(timer)
    }

    // -----------------------------------------------------------------------
    // submissions
    // -----------------------------------------------------------------------

    /// Accept a staked guess. The gate's signed verdict must accompany the
    /// call; a rejection never reaches the scorer and mutates nothing.
    ///
    /// The stake transfer, the submission append, and the round aggregate
    /// update (pot, participant count, average score) happen in one
    /// invocation, so concurrent submissions cannot lose updates.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_guess(
        env: Env,
        round_id: u64,
        submitter: Address,
        guess: String,
        stake: i128,
        verdict: GateVerdict,
        semantic: Option<u32>,
    ) -> Result<u32, Error> {
        require_initialized(&env)?;

        let gate: Address = env
            .storage()
            .instance()
            .get(&DataKey::Gate)
            .ok_or(Error::NotInitialized)?;
        gate.require_auth();
        submitter.require_auth();

        if !verdict.allowed {
            return Err(Error::SubmissionRejected);
        }

        let timer = get_timer(&env, round_id)?;
        if timer.phase != Phase::Active && timer.phase != Phase::GracePeriod {
            return Err(Error::NotAcceptingGuesses);
        }

        let mut round = get_round(&env, round_id)?;
        if round.status != RoundStatus::Open {
            return Err(Error::RoundClosed);
        }
        if stake <= 0 {
            return Err(Error::InvalidAmount);
        }
        if stake < round.min_stake {
            return Err(Error::StakeTooLow);
        }
        if round.total_participants >= round.max_participants {
            return Err(Error::RoundFull);
        }
        if guess.len() > MAX_GUESS_LEN {
            return Err(Error::GuessTooLong);
        }
        if let Some(s) = semantic {
            if s > SCORE_MAX {
                return Err(Error::InvalidScore);
            }
        }

        let submitted_key = DataKey::Submitted(round_id, submitter.clone());
        if env.storage().persistent().has(&submitted_key) {
            return Err(Error::AlreadySubmitted);
        }

        let now = env.ledger().timestamp();
        let scoring_addr: Address = env
            .storage()
            .instance()
            .get(&DataKey::ScoringContract)
            .ok_or(Error::NotInitialized)?;
        let score = ScoringEngineClient::new(&env, &scoring_addr).score(
            &guess,
            &round.target_text,
            &now,
            &round.start_time,
            &semantic,
        );

        // Stake moves into the treasury before the round's accounting is
        // updated; a failed transfer aborts the whole invocation.
        let token: Address = env
            .storage()
            .instance()
            .get(&DataKey::Token)
            .ok_or(Error::NotInitialized)?;
        let treasury: Address = env
            .storage()
            .instance()
            .get(&DataKey::Treasury)
            .ok_or(Error::NotInitialized)?;
        TokenClient::new(&env, &token).transfer(&submitter, &treasury, &stake);

        let submission = Submission {
            round_id,
            submitter: submitter.clone(),
            guess,
            stake,
            score,
            submitted_at: now,
        };
        let mut submissions: Vec<Submission> = env
            .storage()
            .persistent()
            .get(&DataKey::Submissions(round_id))
            .unwrap_or(Vec::new(&env));
        submissions.push_back(submission);
        set_persistent(&env, DataKey::Submissions(round_id), &submissions);
        env.storage().persistent().set(&submitted_key, &true);
        extend_persistent_ttl(&env, &submitted_key);

        let old_count = round.total_participants as u64;
        let new_count = round
            .total_participants
            .checked_add(1)
            .ok_or(Error::Overflow)?;
        round.average_score =
            ((round.average_score as u64 * old_count + score as u64) / new_count as u64) as u32;
        round.total_participants = new_count;
        round.pot = round.pot.checked_add(stake).ok_or(Error::Overflow)?;
        set_persistent(&env, DataKey::Round(round_id), &round);

        // Board updates are best-effort; a leaderboard hiccup must never
        // bounce an accepted (and already paid-for) guess.
        if let Some(board) = env
            .storage()
            .instance()
            .get::<_, Address>(&DataKey::Leaderboard)
        {
            let this = env.current_contract_address();
            let _ = LeaderboardClient::new(&env, &board)
                .try_record_score(&this, &round_id, &submitter, &score, &stake, &now);
        }

        SubmissionReceived {
            round_id,
            submitter,
            score,
            stake,
            pot: round.pot,
        }
        .publish(&env);

        Ok(score)
    }

    // -----------------------------------------------------------------------
    // round closure
    // -----------------------------------------------------------------------

    /// Mark the round as ended (no longer accepting anything). Idempotent
    /// while the round is not yet completed.
    pub fn mark_ended(env: Env, caller: Address, round_id: u64) -> Result<(), Error> {
        require_initialized(&env)?;
        require_admin_or_operator(&env, &caller)?;

        let mut round = get_round(&env, round_id)?;
        match round.status {
            RoundStatus::Completed => Err(Error::RoundClosed),
            RoundStatus::Ended => Ok(()),
            RoundStatus::Open => {
                round.status = RoundStatus::Ended;
                set_persistent(&env, DataKey::Round(round_id), &round);
                RoundEnded { round_id }.publish(&env);
                Ok(())
            }
        }
    }

    /// Record the final winner information and close the round record.
    pub fn complete_round(
        env: Env,
        caller: Address,
        round_id: u64,
        winner: Option<Address>,
        top_score: u32,
    ) -> Result<(), Error> {
        require_initialized(&env)?;
        require_admin_or_operator(&env, &caller)?;

        let mut round = get_round(&env, round_id)?;
        if round.status == RoundStatus::Completed {
            return Err(Error::RoundClosed);
        }
        round.winner = winner.clone();
        round.top_score = top_score;
        round.status = RoundStatus::Completed;
        set_persistent(&env, DataKey::Round(round_id), &round);

        RoundCompleted {
            round_id,
            winner,
            top_score,
        }
        .publish(&env);
        Ok(())
    }

    /// Force the round's clock to zero. Admin only. The next timer update
    /// (or the scheduler) takes it from there.
    pub fn force_end(env: Env, admin: Address, round_id: u64) -> Result<RoundTimer, Error> {
        require_admin(&env, &admin)?;

        let now = env.ledger().timestamp();
        let mut round = get_round(&env, round_id)?;
        round.end_time = now;
        set_persistent(&env, DataKey::Round(round_id), &round);

        let mut timer = get_timer(&env, round_id)?;
        timer.end_time = now;
        timer.remaining_secs = 0;
        set_persistent(&env, DataKey::Timer(round_id), &timer);
        Ok(timer)
    }

    /// Push the round's end time out by `extra_secs`. Admin only.
    pub fn extend_round(
        env: Env,
        admin: Address,
        round_id: u64,
        extra_secs: u64,
    ) -> Result<RoundTimer, Error> {
        require_admin(&env, &admin)?;
        if extra_secs == 0 {
            return Err(Error::InvalidDuration);
        }

        let mut round = get_round(&env, round_id)?;
        round.end_time = round.end_time.checked_add(extra_secs).ok_or(Error::Overflow)?;
        set_persistent(&env, DataKey::Round(round_id), &round);

        let mut timer = get_timer(&env, round_id)?;
        timer.end_time = timer.end_time.checked_add(extra_secs).ok_or(Error::Overflow)?;
        timer.remaining_secs = timer
            .end_time
            .saturating_sub(env.ledger().timestamp());
        set_persistent(&env, DataKey::Timer(round_id), &timer);
        Ok(timer)
    }

    // -----------------------------------------------------------------------
    // views
    // -----------------------------------------------------------------------

    pub fn get_round(env: Env, round_id: u64) -> Result<Round, Error> {
        get_round(&env, round_id)
    }

    /// The currently ACTIVE round, if any.
    pub fn get_active_round(env: Env) -> Option<u64> {
        env.storage().instance().get(&DataKey::ActiveRound)
    }

    pub fn get_timer(env: Env, round_id: u64) -> Result<RoundTimer, Error> {
        get_timer(&env, round_id)
    }

    pub fn get_transitions(env: Env, round_id: u64) -> Result<Vec<PhaseTransition>, Error> {
        get_round(&env, round_id)?;
        Ok(env
            .storage()
            .persistent()
            .get(&DataKey::Transitions(round_id))
            .unwrap_or(Vec::new(&env)))
    }

    pub fn get_submissions(env: Env, round_id: u64) -> Result<Vec<Submission>, Error> {
        get_round(&env, round_id)?;
        Ok(env
            .storage()
            .persistent()
            .get(&DataKey::Submissions(round_id))
            .unwrap_or(Vec::new(&env)))
    }

    pub fn get_submission_count(env: Env, round_id: u64) -> Result<u32, Error> {
        Ok(get_round(&env, round_id)?.total_participants)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// WAITING → {ACTIVE, COMPLETED}; ACTIVE → {GRACE_PERIOD, SCORING,
/// COMPLETED}; GRACE_PERIOD → {SCORING, COMPLETED}; SCORING → {RESULTS,
/// COMPLETED}; RESULTS → {DISTRIBUTION, COMPLETED}; DISTRIBUTION →
/// {COMPLETED}; COMPLETED is terminal.
fn is_valid_transition(from: &Phase, to: &Phase) -> bool {
    use Phase::*;
    matches!(
        (from, to),
        (Waiting, Active)
            | (Waiting, Completed)
            | (Active, GracePeriod)
            | (Active, Scoring)
            | (Active, Completed)
            | (GracePeriod, Scoring)
            | (GracePeriod, Completed)
            | (Scoring, Results)
            | (Scoring, Completed)
            | (Results, Distribution)
            | (Results, Completed)
            | (Distribution, Completed)
    )
}

/// Validate and apply a transition on the in-memory timer: mutates phase
/// and activity flags, maintains the single-active-round marker, appends
/// the history record, and publishes the phase-change notification.
/// The caller persists the timer afterwards.
fn do_transition(
    env: &Env,
    timer: &mut RoundTimer,
    new_phase: Phase,
    triggered_by: TriggeredBy,
    reason: String,
) -> Result<(), Error> {
    let from = timer.phase.clone();
    if !is_valid_transition(&from, &new_phase) {
        return Err(Error::InvalidTransition);
    }

    let round_id = timer.round_id;
    let now = env.ledger().timestamp();

    match new_phase {
        Phase::Active => {
            if let Some(active) = env
                .storage()
                .instance()
                .get::<_, u64>(&DataKey::ActiveRound)
            {
                if active != round_id {
                    return Err(Error::AnotherRoundActive);
                }
            }
            env.storage().instance().set(&DataKey::ActiveRound, &round_id);

            // Re-anchor the clock: the configured duration starts counting
            // from activation, not from round creation.
            let duration = timer.end_time.saturating_sub(timer.start_time);
            timer.start_time = now;
            timer.end_time = now.checked_add(duration).ok_or(Error::Overflow)?;
            timer.remaining_secs = duration;
            timer.is_active = true;

            let mut round = get_round(env, round_id)?;
            round.start_time = now;
            round.end_time = timer.end_time;
            set_persistent(env, DataKey::Round(round_id), &round);
        }
        Phase::Completed => {
            timer.is_active = false;
            if let Some(active) = env
                .storage()
                .instance()
                .get::<_, u64>(&DataKey::ActiveRound)
            {
                if active == round_id {
                    env.storage().instance().remove(&DataKey::ActiveRound);
                }
            }
            let mut round = get_round(env, round_id)?;
            round.status = RoundStatus::Completed;
            set_persistent(env, DataKey::Round(round_id), &round);
        }
        _ => {}
    }

    timer.phase = new_phase.clone();

    let mut transitions: Vec<PhaseTransition> = env
        .storage()
        .persistent()
        .get(&DataKey::Transitions(round_id))
        .unwrap_or(Vec::new(env));
    transitions.push_back(PhaseTransition {
        from: from.clone(),
        to: new_phase.clone(),
        triggered_at: now,
        triggered_by: triggered_by.clone(),
        reason,
    });
    set_persistent(env, DataKey::Transitions(round_id), &transitions);

    PhaseChanged {
        round_id,
        from,
        to: new_phase,
        triggered_by,
    }
    .publish(env);

    Ok(())
}

/// Create the timer if it does not exist; otherwise return it unchanged.
fn ensure_timer(env: &Env, round_id: u64, duration_secs: u64, auto_transitions: bool) -> RoundTimer {
    let key = DataKey::Timer(round_id);
    if let Some(existing) = env.storage().persistent().get(&key) {
        return existing;
    }
    let now = env.ledger().timestamp();
    let timer = RoundTimer {
        round_id,
        phase: Phase::Waiting,
        start_time: now,
        end_time: now + duration_secs,
        remaining_secs: duration_secs,
        is_active: false,
        auto_transitions,
    };
    set_persistent(env, key, &timer);
    timer
}

fn require_initialized(env: &Env) -> Result<(), Error> {
    if !env.storage().instance().has(&DataKey::Admin) {
        return Err(Error::NotInitialized);
    }
    Ok(())
}

fn get_admin(env: &Env) -> Result<Address, Error> {
    env.storage()
        .instance()
        .get(&DataKey::Admin)
        .ok_or(Error::NotInitialized)
}

fn require_admin(env: &Env, caller: &Address) -> Result<(), Error> {
    let admin = get_admin(env)?;
    caller.require_auth();
    if caller != &admin {
        return Err(Error::NotAuthorized);
    }
    Ok(())
}

/// Lifecycle calls are open to the admin and the configured operator
/// contract (the scheduler, authorized via invoker auth).
fn require_admin_or_operator(env: &Env, caller: &Address) -> Result<(), Error> {
    caller.require_auth();
    let admin = get_admin(env)?;
    if caller == &admin {
        return Ok(());
    }
    if let Some(operator) = env
        .storage()
        .instance()
        .get::<_, Address>(&DataKey::Operator)
    {
        if caller == &operator {
            return Ok(());
        }
    }
    Err(Error::NotAuthorized)
}

fn get_round(env: &Env, round_id: u64) -> Result<Round, Error> {
    env.storage()
        .persistent()
        .get(&DataKey::Round(round_id))
        .ok_or(Error::RoundNotFound)
}

fn get_timer(env: &Env, round_id: u64) -> Result<RoundTimer, Error> {
    env.storage()
        .persistent()
        .get(&DataKey::Timer(round_id))
        .ok_or(Error::TimerNotFound)
}

fn set_persistent<T>(env: &Env, key: DataKey, value: &T)
where
    T: soroban_sdk::IntoVal<Env, soroban_sdk::Val>,
{
    env.storage().persistent().set(&key, value);
    extend_persistent_ttl(env, &key);
}

fn extend_persistent_ttl(env: &Env, key: &DataKey) {
    env.storage()
        .persistent()
        .extend_ttl(key, PERSISTENT_BUMP_LEDGERS, PERSISTENT_BUMP_LEDGERS);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
