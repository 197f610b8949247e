//! PromptPot Leaderboard Contract
//!
//! Keeps a ranked board per round and running per-player aggregates
//! across rounds. The contract is permissioned: only the admin or
//! authorized contracts (the round engine for scores, the scheduler for
//! wins) may record entries.
//!
//! Board order is score descending; tied scores keep submission order,
//! so the earliest guess ranks first.
#![no_std]
#![allow(unexpected_cfgs)]

use soroban_sdk::{
    contract, contracterror, contractevent, contractimpl, contracttype, Address, Env, Vec,
};

use promptpot_shared::SCORE_MAX;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Entries kept per round board before the lowest is dropped.
pub const MAX_BOARD_SIZE: u32 = 100;

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
    InvalidLimit = 4,
    InvalidScore = 5,
    InvalidAmount = 6,
    Overflow = 7,
}

// ---------------------------------------------------------------------------
// Storage Types
// ---------------------------------------------------------------------------

/// One row of a round's board.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BoardEntry {
    pub player: Address,
    pub score: u32,
    pub stake: i128,
    pub submitted_at: u64,
}

/// Running aggregates for one player across all rounds.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlayerStats {
    pub rounds_entered: u32,
    pub wins: u32,
    pub best_score: u32,
    pub total_staked: i128,
    pub total_won: i128,
}

#[contracttype]
pub enum DataKey {
    // --- instance() ---
    Admin,
    Authorized(Address),
    // --- persistent() ---
    Board(u64),
    Stats(Address),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[contractevent]
pub struct ScoreRecorded {
    #[topic]
    pub round_id: u64,
    #[topic]
    pub player: Address,
    pub score: u32,
}

#[contractevent]
pub struct WinRecorded {
    #[topic]
    pub round_id: u64,
    #[topic]
    pub player: Address,
    pub prize: i128,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[contract]
pub struct Leaderboard;

#[contractimpl]
impl Leaderboard {
    /// Initialize the leaderboard with an admin. May only be called once.
    pub fn init(env: Env, admin: Address) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(Error::AlreadyInitialized);
        }
        admin.require_auth();
        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage()
            .instance()
            .set(&DataKey::Authorized(admin), &true);
        Ok(())
    }

    /// Authorize or deauthorize a recorder (the round engine, the
    /// scheduler). Admin only.
    pub fn set_authorized(
        env: Env,
        admin: Address,
        addr: Address,
        auth: bool,
    ) -> Result<(), Error> {
        require_admin(&env, &admin)?;
        env.storage()
            .instance()
            .set(&DataKey::Authorized(addr), &auth);
        Ok(())
    }

    /// Record one scored submission on the round's board and roll the
    /// player's aggregates. Authorized callers only.
    pub fn record_score(
        env: Env,
        caller: Address,
        round_id: u64,
        player: Address,
        score: u32,
        stake: i128,
        submitted_at: u64,
    ) -> Result<(), Error> {
        require_authorized(&env, &caller)?;
        if score > SCORE_MAX {
            return Err(Error::InvalidScore);
        }
        if stake <= 0 {
            return Err(Error::InvalidAmount);
        }

        let fresh = insert_entry(
            &env,
            round_id,
            BoardEntry {
                player: player.clone(),
                score,
                stake,
                submitted_at,
            },
        );

        let mut stats = player_stats(&env, &player);
        if fresh {
            stats.rounds_entered = stats.rounds_entered.checked_add(1).ok_or(Error::Overflow)?;
            stats.total_staked = stats.total_staked.checked_add(stake).ok_or(Error::Overflow)?;
        }
        if score > stats.best_score {
            stats.best_score = score;
        }
        set_persistent(&env, DataKey::Stats(player.clone()), &stats);

        ScoreRecorded {
            round_id,
            player,
            score,
        }
        .publish(&env);
        Ok(())
    }

    /// Credit a paid prize to the player's aggregates. Authorized
    /// callers only.
    pub fn record_win(
        env: Env,
        caller: Address,
        round_id: u64,
        player: Address,
        prize: i128,
    ) -> Result<(), Error> {
        require_authorized(&env, &caller)?;
        if prize < 0 {
            return Err(Error::InvalidAmount);
        }

        let mut stats = player_stats(&env, &player);
        stats.wins = stats.wins.checked_add(1).ok_or(Error::Overflow)?;
        stats.total_won = stats.total_won.checked_add(prize).ok_or(Error::Overflow)?;
        set_persistent(&env, DataKey::Stats(player.clone()), &stats);

        WinRecorded {
            round_id,
            player,
            prize,
        }
        .publish(&env);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // views
    // -----------------------------------------------------------------------

    /// The round's board, best first, up to `limit` entries.
    pub fn top_entries(env: Env, round_id: u64, limit: u32) -> Result<Vec<BoardEntry>, Error> {
        if limit == 0 || limit > MAX_BOARD_SIZE {
            return Err(Error::InvalidLimit);
        }

        let board = get_board(&env, round_id);
        let mut result = Vec::new(&env);
        let take = core::cmp::min(limit, board.len());
        for i in 0..take {
            result.push_back(board.get_unchecked(i));
        }
        Ok(result)
    }

    /// A player's 1-indexed rank on the round's board; 0 if absent.
    pub fn player_rank(env: Env, round_id: u64, player: Address) -> u32 {
        let board = get_board(&env, round_id);
        for i in 0..board.len() {
            if board.get_unchecked(i).player == player {
                return i + 1;
            }
        }
        0
    }

    /// Cross-round aggregates; all zeroes for an unseen player.
    pub fn get_player_stats(env: Env, player: Address) -> PlayerStats {
        player_stats(&env, &player)
    }
}

// ---------------------------------------------------------------------------
// Internal Helpers
// ---------------------------------------------------------------------------

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

fn require_authorized(env: &Env, caller: &Address) -> Result<(), Error> {
    if !env.storage().instance().has(&DataKey::Admin) {
        return Err(Error::NotInitialized);
    }
    caller.require_auth();
    if !env
        .storage()
        .instance()
        .get(&DataKey::Authorized(caller.clone()))
        .unwrap_or(false)
    {
        return Err(Error::NotAuthorized);
    }
    Ok(())
}

/// Insert a board row at its rank. Returns false when the player already
/// had a row on this round (the old row is replaced).
fn insert_entry(env: &Env, round_id: u64, entry: BoardEntry) -> bool {
    let key = DataKey::Board(round_id);
    let mut board = get_board(env, round_id);

    let mut existing: Option<u32> = None;
    for i in 0..board.len() {
        if board.get_unchecked(i).player == entry.player {
            existing = Some(i);
            break;
        }
    }
    if let Some(idx) = existing {
        board.remove(idx);
    }

    // Strictly-greater insertion keeps earlier equal scores ahead.
    let mut inserted = false;
    for i in 0..board.len() {
        if entry.score > board.get_unchecked(i).score {
            board.insert(i, entry.clone());
            inserted = true;
            break;
        }
    }
    if !inserted && board.len() < MAX_BOARD_SIZE {
        board.push_back(entry);
    }
    while board.len() > MAX_BOARD_SIZE {
        board.pop_back();
    }

    set_persistent(env, key, &board);
    existing.is_none()
}

fn get_board(env: &Env, round_id: u64) -> Vec<BoardEntry> {
    env.storage()
        .persistent()
        .get(&DataKey::Board(round_id))
        .unwrap_or(Vec::new(env))
}

fn player_stats(env: &Env, player: &Address) -> PlayerStats {
    env.storage()
        .persistent()
        .get(&DataKey::Stats(player.clone()))
        .unwrap_or(PlayerStats {
            rounds_entered: 0,
            wins: 0,
            best_score: 0,
            total_staked: 0,
            total_won: 0,
        })
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
