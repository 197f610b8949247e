//! PromptPot Prize Distribution Contract
//!
//! Holds the staked pot for each round, derives the round's final result
//! (winners, prize split, platform fee) from the round engine's submission
//! log, and pays the prizes out with per-transfer failure isolation.
//!
//! A single failed payout never aborts the batch: every transfer gets its
//! own record, the batch is summarized as completed / partial / failed,
//! and a totally failed batch gets one fallback pass that splits whatever
//! the treasury still holds equally across the winners.
//!
//! Result records are write-once. A result is DISTRIBUTED only when every
//! transfer in the batch cleared; anything less marks it FAILED with a
//! retained error string, and a FAILED result can be re-executed. Retries
//! skip transfers that already confirmed.
#![no_std]
#![allow(unexpected_cfgs)]

use soroban_sdk::{
    contract, contracterror, contractevent, contractimpl, contracttype, token::TokenClient,
    Address, Env, String, Vec,
};

use promptpot_round_engine::{RoundEngineClient, Submission};
use promptpot_shared::{calculate_fee, share_bps, BASIS_POINTS_DIVISOR};

/// Persistent storage TTL in ledgers (~30 days at 5 s/ledger).
pub const PERSISTENT_BUMP_LEDGERS: u32 = 518_400;

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
    InvalidFeeRate = 4,
    InvalidAmount = 5,
    RoundNotFound = 6,
    AlreadyCalculated = 7,
    ResultNotFound = 8,
    AlreadyDistributed = 9,
    Overflow = 10,
}

// ---------------------------------------------------------------------------
// Storage Types
// ---------------------------------------------------------------------------

#[contracttype]
pub enum DataKey {
    // --- instance() ---
    Admin,
    Operator,
    Token,
    RoundEngine,
    /// Recipient of the platform's cut of each pot.
    Platform,
    FeeBps,
    // --- persistent() ---
    Result(u64),
    Transfers(u64),
    Summary(u64),
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResultStatus {
    Calculated,
    Distributed,
    Failed,
}

/// One ranked winner. Ranks are 1-based; tied scores rank by earliest
/// submission.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WinnerEntry {
    pub address: Address,
    pub rank: u32,
    pub score: u32,
    pub prize: i128,
    /// Share of the total pot, in basis points (4_750 == 47.5%).
    pub percentage_bps: u32,
}

/// Final outcome of a round: who won and how the pot splits.
///
/// Every address whose score ties the round's top score is a winner; the
/// pot net of the platform fee splits equally between them, with integer
/// division remainders staying in the platform's cut.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RoundResult {
    pub round_id: u64,
    pub status: ResultStatus,
    pub pot: i128,
    pub platform_fee: i128,
    pub prize_per_winner: i128,
    pub winners: Vec<WinnerEntry>,
    pub top_score: u32,
    pub average_score: u32,
    pub total_participants: u32,
    pub calculated_at: u64,
    /// Set when the result is marked failed, for operator review.
    pub error: Option<String>,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransferStatus {
    Pending,
    Confirmed,
    Failed,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransferKind {
    Prize,
    PlatformFee,
}

/// One payout attempt. Kept per recipient so a retry pass can target
/// exactly the transfers that failed.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TransferRecord {
    pub recipient: Address,
    pub amount: i128,
    pub kind: TransferKind,
    pub status: TransferStatus,
    pub attempted_at: u64,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DistributionOutcome {
    Completed,
    Partial,
    Failed,
}

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DistributionSummary {
    pub round_id: u64,
    pub total: u32,
    pub confirmed: u32,
    pub failed: u32,
    pub outcome: DistributionOutcome,
    pub fallback_used: bool,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[contractevent]
pub struct ResultsCalculated {
    #[topic]
    pub round_id: u64,
    pub winner_count: u32,
    pub prize_per_winner: i128,
    pub platform_fee: i128,
}

#[contractevent]
pub struct PayoutSent {
    #[topic]
    pub round_id: u64,
    #[topic]
    pub recipient: Address,
    pub amount: i128,
}

#[contractevent]
pub struct DistributionFinished {
    #[topic]
    pub round_id: u64,
    pub outcome: DistributionOutcome,
    pub confirmed: u32,
    pub failed: u32,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[contract]
pub struct PrizeDistribution;

#[contractimpl]
impl PrizeDistribution {
    /// Initialize the distribution contract. May only be called once.
    ///
    /// This contract's own address is the treasury the round engine
    /// forwards stakes to; `platform` receives the fee cut.
    pub fn init(
        env: Env,
        admin: Address,
        token: Address,
        round_engine: Address,
        platform: Address,
        fee_bps: u32,
    ) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(Error::AlreadyInitialized);
        }
        admin.require_auth();
        if fee_bps > BASIS_POINTS_DIVISOR {
            return Err(Error::InvalidFeeRate);
        }

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::Token, &token);
        env.storage().instance().set(&DataKey::RoundEngine, &round_engine);
        env.storage().instance().set(&DataKey::Platform, &platform);
        env.storage().instance().set(&DataKey::FeeBps, &fee_bps);
        Ok(())
    }

    /// Authorize a contract (the round scheduler) for lifecycle calls.
    pub fn set_operator(env: Env, admin: Address, operator: Address) -> Result<(), Error> {
        require_admin(&env, &admin)?;
        env.storage().instance().set(&DataKey::Operator, &operator);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // result calculation
    // -----------------------------------------------------------------------

    /// Derive the round's final result from the engine's submission log.
    /// Write-once: recalculating an existing result is an error.
    ///
    /// A round with no submissions still gets a result: no winners, no
    /// prizes, and the (empty) pot accrues entirely to the platform.
    pub fn calculate_results(env: Env, caller: Address, round_id: u64) -> Result<RoundResult, Error> {
        require_initialized(&env)?;
        require_admin_or_operator(&env, &caller)?;

        if env.storage().persistent().has(&DataKey::Result(round_id)) {
            return Err(Error::AlreadyCalculated);
        }

        let engine = engine_client(&env)?;
        let round = match engine.try_get_round(&round_id) {
            Ok(Ok(round)) => round,
            _ => return Err(Error::RoundNotFound),
        };
        let submissions = match engine.try_get_submissions(&round_id) {
            Ok(Ok(subs)) => subs,
            _ => return Err(Error::RoundNotFound),
        };

        let fee_bps: u32 = env
            .storage()
            .instance()
            .get(&DataKey::FeeBps)
            .ok_or(Error::NotInitialized)?;

        let (winning_subs, top_score) = pick_winners(&env, &submissions);
        let (prize_per_winner, platform_fee) =
            split_pot(round.pot, fee_bps, winning_subs.len())?;

        let mut winners: Vec<WinnerEntry> = Vec::new(&env);
        for (i, sub) in winning_subs.iter().enumerate() {
            winners.push_back(WinnerEntry {
                address: sub.submitter.clone(),
                rank: i as u32 + 1,
                score: sub.score,
                prize: prize_per_winner,
                percentage_bps: share_bps(prize_per_winner, round.pot)
                    .map_err(|_| Error::Overflow)?,
            });
        }

        let result = RoundResult {
            round_id,
            status: ResultStatus::Calculated,
            pot: round.pot,
            platform_fee,
            prize_per_winner,
            winners: winners.clone(),
            top_score,
            average_score: round.average_score,
            total_participants: round.total_participants,
            calculated_at: env.ledger().timestamp(),
            error: None,
        };
        set_persistent(&env, DataKey::Result(round_id), &result);

        ResultsCalculated {
            round_id,
            winner_count: winners.len(),
            prize_per_winner,
            platform_fee,
        }
        .publish(&env);

        Ok(result)
    }

    // -----------------------------------------------------------------------
    // distribution
    // -----------------------------------------------------------------------

    /// Pay out a calculated result. Each winner transfer is attempted
    /// independently; one failure never aborts the rest. When every
    /// transfer fails, one fallback pass splits the treasury's live
    /// balance equally across the winners before the result is marked
    /// failed.
    ///
    /// The result becomes DISTRIBUTED only when the whole batch clears.
    /// Anything less marks it FAILED with a retained error string; a
    /// FAILED result can be re-executed (after a treasury top-up, say),
    /// and the retry skips transfers that already confirmed.
    pub fn execute_distribution(
        env: Env,
        caller: Address,
        round_id: u64,
    ) -> Result<DistributionSummary, Error> {
        require_initialized(&env)?;
        require_admin_or_operator(&env, &caller)?;

        let mut result = get_result(&env, round_id)?;
        if result.status == ResultStatus::Distributed {
            return Err(Error::AlreadyDistributed);
        }

        let token = token_client(&env)?;
        let this = env.current_contract_address();
        let now = env.ledger().timestamp();

        // The plan: one prize entry per winner plus the platform's cut,
        // attempted in order. A failed entry never blocks the next one.
        let mut transfers: Vec<TransferRecord> = Vec::new(&env);
        for winner in result.winners.iter() {
            transfers.push_back(TransferRecord {
                recipient: winner.address.clone(),
                amount: winner.prize,
                kind: TransferKind::Prize,
                status: TransferStatus::Pending,
                attempted_at: now,
            });
        }
        if !result.winners.is_empty() && result.platform_fee > 0 {
            let platform: Address = env
                .storage()
                .instance()
                .get(&DataKey::Platform)
                .ok_or(Error::NotInitialized)?;
            transfers.push_back(TransferRecord {
                recipient: platform,
                amount: result.platform_fee,
                kind: TransferKind::PlatformFee,
                status: TransferStatus::Pending,
                attempted_at: now,
            });
        }

        // Records from a previous attempt, if any. A transfer that already
        // confirmed stays confirmed and is never re-sent.
        let prior: Vec<TransferRecord> = env
            .storage()
            .persistent()
            .get(&DataKey::Transfers(round_id))
            .unwrap_or(Vec::new(&env));

        let mut attempted_plan: Vec<TransferRecord> = Vec::new(&env);
        let mut confirmed = 0u32;
        let mut fresh = 0u32;
        for mut record in transfers.iter() {
            if let Some(done) = prior_confirmed(&prior, &record) {
                confirmed += 1;
                attempted_plan.push_back(done);
                continue;
            }
            fresh += 1;
            if attempt_transfer(&token, &this, &record.recipient, record.amount) {
                record.status = TransferStatus::Confirmed;
                confirmed += 1;
                PayoutSent {
                    round_id,
                    recipient: record.recipient.clone(),
                    amount: record.amount,
                }
                .publish(&env);
            } else {
                record.status = TransferStatus::Failed;
            }
            attempted_plan.push_back(record);
        }
        let mut transfers = attempted_plan;

        let attempted = transfers.len();
        let mut fallback_used = false;

        // When every fresh attempt failed, one simplified fallback pass:
        // split whatever the treasury still holds equally across the
        // winners and pay that instead of the planned prizes. The platform
        // waits for a manual retry.
        if fresh > 0 && confirmed == 0 {
            fallback_used = true;
            let share = token
                .balance(&this)
                .checked_div(result.winners.len() as i128)
                .unwrap_or(0);
            let mut retried: Vec<TransferRecord> = Vec::new(&env);
            for mut record in transfers.iter() {
                if record.kind == TransferKind::Prize
                    && attempt_transfer(&token, &this, &record.recipient, share)
                {
                    record.amount = share;
                    record.status = TransferStatus::Confirmed;
                    record.attempted_at = env.ledger().timestamp();
                    confirmed += 1;
                    PayoutSent {
                        round_id,
                        recipient: record.recipient.clone(),
                        amount: share,
                    }
                    .publish(&env);
                }
                retried.push_back(record);
            }
            transfers = retried;
        }

        let failed = attempted - confirmed;
        let outcome = if failed == 0 {
            DistributionOutcome::Completed
        } else if confirmed > 0 {
            DistributionOutcome::Partial
        } else {
            DistributionOutcome::Failed
        };

        // Distributed only when the whole batch cleared; a partial batch
        // is a failed result too, so it stays retryable.
        match outcome {
            DistributionOutcome::Completed => {
                result.status = ResultStatus::Distributed;
                result.error = None;
            }
            DistributionOutcome::Partial => {
                result.status = ResultStatus::Failed;
                result.error = Some(String::from_str(&env, "some transfers failed"));
            }
            DistributionOutcome::Failed => {
                result.status = ResultStatus::Failed;
                result.error = Some(String::from_str(&env, "all transfers failed"));
            }
        }
        set_persistent(&env, DataKey::Result(round_id), &result);
        set_persistent(&env, DataKey::Transfers(round_id), &transfers);

        let summary = DistributionSummary {
            round_id,
            total: attempted,
            confirmed,
            failed,
            outcome: outcome.clone(),
            fallback_used,
        };
        set_persistent(&env, DataKey::Summary(round_id), &summary);

        DistributionFinished {
            round_id,
            outcome,
            confirmed,
            failed,
        }
        .publish(&env);

        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // treasury
    // -----------------------------------------------------------------------

    /// Move funds into the treasury (top-ups, sponsored pots).
    pub fn fund(env: Env, from: Address, amount: i128) -> Result<(), Error> {
        require_initialized(&env)?;
        if amount <= 0 {
            return Err(Error::InvalidAmount);
        }
        from.require_auth();
        token_client(&env)?.transfer(&from, &env.current_contract_address(), &amount);
        Ok(())
    }

    /// Move funds out of the treasury. Admin only.
    pub fn withdraw(env: Env, admin: Address, to: Address, amount: i128) -> Result<(), Error> {
        require_admin(&env, &admin)?;
        if amount <= 0 {
            return Err(Error::InvalidAmount);
        }
        token_client(&env)?.transfer(&env.current_contract_address(), &to, &amount);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // views
    // -----------------------------------------------------------------------

    pub fn get_result(env: Env, round_id: u64) -> Result<RoundResult, Error> {
        get_result(&env, round_id)
    }

    pub fn get_transfers(env: Env, round_id: u64) -> Result<Vec<TransferRecord>, Error> {
        get_result(&env, round_id)?;
        Ok(env
            .storage()
            .persistent()
            .get(&DataKey::Transfers(round_id))
            .unwrap_or(Vec::new(&env)))
    }

    pub fn get_summary(env: Env, round_id: u64) -> Result<DistributionSummary, Error> {
        env.storage()
            .persistent()
            .get(&DataKey::Summary(round_id))
            .ok_or(Error::ResultNotFound)
    }

    pub fn get_fee_bps(env: Env) -> Result<u32, Error> {
        env.storage()
            .instance()
            .get(&DataKey::FeeBps)
            .ok_or(Error::NotInitialized)
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Every submission tying the maximum score, earliest first. The
/// submission log is append-only and time ordered, so a single in-order
/// pass yields the tie-break ranking.
fn pick_winners(env: &Env, submissions: &Vec<Submission>) -> (Vec<Submission>, u32) {
    let mut top_score = 0u32;
    for sub in submissions.iter() {
        if sub.score > top_score {
            top_score = sub.score;
        }
    }
    let mut winners: Vec<Submission> = Vec::new(env);
    if submissions.is_empty() {
        return (winners, top_score);
    }
    for sub in submissions.iter() {
        if sub.score == top_score {
            winners.push_back(sub.clone());
        }
    }
    (winners, top_score)
}

/// Equal split of the pot net of the fee. The platform's cut absorbs the
/// division remainder so the split never overpays the pot.
fn split_pot(pot: i128, fee_bps: u32, winner_count: u32) -> Result<(i128, i128), Error> {
    if winner_count == 0 {
        return Ok((0, pot));
    }
    let fee = calculate_fee(pot, fee_bps).map_err(|_| Error::Overflow)?;
    let distributable = pot.checked_sub(fee).ok_or(Error::Overflow)?;
    let prize_per_winner = distributable
        .checked_div(winner_count as i128)
        .ok_or(Error::Overflow)?;
    let paid = prize_per_winner
        .checked_mul(winner_count as i128)
        .ok_or(Error::Overflow)?;
    let platform_fee = pot.checked_sub(paid).ok_or(Error::Overflow)?;
    Ok((prize_per_winner, platform_fee))
}

/// Fire one transfer; a failure is contained and reported as `false`.
fn attempt_transfer(token: &TokenClient, from: &Address, to: &Address, amount: i128) -> bool {
    if amount <= 0 {
        return false;
    }
    matches!(token.try_transfer(from, to, &amount), Ok(Ok(())))
}

/// A confirmed record for the same recipient and kind from an earlier
/// attempt, if one exists.
fn prior_confirmed(
    prior: &Vec<TransferRecord>,
    record: &TransferRecord,
) -> Option<TransferRecord> {
    for p in prior.iter() {
        if p.status == TransferStatus::Confirmed
            && p.recipient == record.recipient
            && p.kind == record.kind
        {
            return Some(p);
        }
    }
    None
}

fn engine_client(env: &Env) -> Result<RoundEngineClient, Error> {
    let addr: Address = env
        .storage()
        .instance()
        .get(&DataKey::RoundEngine)
        .ok_or(Error::NotInitialized)?;
    Ok(RoundEngineClient::new(env, &addr))
}

fn token_client(env: &Env) -> Result<TokenClient, Error> {
    let addr: Address = env
        .storage()
        .instance()
        .get(&DataKey::Token)
        .ok_or(Error::NotInitialized)?;
    Ok(TokenClient::new(env, &addr))
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

fn require_admin_or_operator(env: &Env, caller: &Address) -> Result<(), Error> {
    caller.require_auth();
    let admin: Address = env
        .storage()
        .instance()
        .get(&DataKey::Admin)
        .ok_or(Error::NotInitialized)?;
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

fn get_result(env: &Env, round_id: u64) -> Result<RoundResult, Error> {
    env.storage()
        .persistent()
        .get(&DataKey::Result(round_id))
        .ok_or(Error::ResultNotFound)
}

fn set_persistent<T>(env: &Env, key: DataKey, value: &T)
where
    T: soroban_sdk::IntoVal<Env, soroban_sdk::Val>,
{
    env.storage().persistent().set(&key, value);
    env.storage()
        .persistent()
        .extend_ttl(&key, PERSISTENT_BUMP_LEDGERS, PERSISTENT_BUMP_LEDGERS);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
