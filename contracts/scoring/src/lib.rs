//! PromptPot Scoring Engine Contract
//!
//! Scores a guess against the round's hidden target text. The score is a
//! deterministic function of the two strings and the submission timing; an
//! optional semantic-similarity signal from an off-chain text-comparison
//! oracle can be blended in.
//!
//! Scores are integer centipoints (10_000 == 100.00) — this target has no
//! floating point, and two-decimal precision is exactly what the results
//! pipeline reports.
//!
//! ## Score composition
//! 1. Both strings are normalized: ASCII lowercased, trimmed, whitespace
//!    runs collapsed, ASCII punctuation stripped. Bytes >= 0x80 are kept
//!    verbatim so non-Latin scripts survive normalization.
//! 2. Equal normalized forms score 10_000 outright.
//! 3. Otherwise base = (max_len - levenshtein) * 10_000 / max_len.
//! 4. Word-overlap bonus: up to 10.00 points for guess words that contain
//!    or are contained in a target word.
//! 5. Early-submission bonus: (window_minutes - elapsed_minutes) *
//!    per-minute centipoints, only while elapsed < window.
//! 6. Optional semantic blend: 70% oracle signal, 30% heuristic.
//! 7. Clamped to [0, 10_000].
#![no_std]
#![allow(unexpected_cfgs)]

use soroban_sdk::{contract, contracterror, contractimpl, contracttype, Address, Env, String};

use promptpot_shared::SCORE_MAX;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Longest accepted guess/target, in UTF-8 bytes. Targets are short
/// generated prompts; anything longer is rejected before scoring.
pub const MAX_TEXT_LEN: usize = 256;

/// Word-overlap bonus ceiling: 10.00 points.
const WORD_BONUS_MAX: u32 = 1_000;

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
    GuessTooLong = 4,
    TargetTooLong = 5,
    InvalidSemanticScore = 6,
    InvalidParams = 7,
}

// ---------------------------------------------------------------------------
// Storage Types
// ---------------------------------------------------------------------------

#[contracttype]
pub enum DataKey {
    Admin,
    Params,
}

/// Tunable scoring parameters, set at init and adjustable by the admin.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScoreParams {
    /// Early-submission bonus window from round start, in minutes.
    pub early_window_minutes: u64,
    /// Bonus per full minute of earliness, in centipoints (300 == 3.00).
    pub early_bonus_per_minute: u32,
    /// Blend an oracle-supplied semantic similarity when present.
    pub semantic_blend_enabled: bool,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[contract]
pub struct ScoringEngine;

#[contractimpl]
impl ScoringEngine {
    /// Initialize the scoring engine. May only be called once.
    pub fn init(env: Env, admin: Address, params: ScoreParams) -> Result<(), Error> {
        if env.storage().instance().has(&DataKey::Admin) {
            return Err(Error::AlreadyInitialized);
        }
        admin.require_auth();
        validate_params(&params)?;

        env.storage().instance().set(&DataKey::Admin, &admin);
        env.storage().instance().set(&DataKey::Params, &params);
        Ok(())
    }

    /// Replace the scoring parameters. Admin only.
    pub fn set_params(env: Env, admin: Address, params: ScoreParams) -> Result<(), Error> {
        require_admin(&env, &admin)?;
        validate_params(&params)?;
        env.storage().instance().set(&DataKey::Params, &params);
        Ok(())
    }

    pub fn get_params(env: Env) -> Result<ScoreParams, Error> {
        env.storage()
            .instance()
            .get(&DataKey::Params)
            .ok_or(Error::NotInitialized)
    }

    /// Score a guess against the target. Pure with respect to contract
    /// state apart from the configured parameters; no mutation.
    ///
    /// `semantic`: optional similarity signal in centipoints from the
    /// text-comparison oracle, blended at 70/30 when enabled.
    pub fn score(
        env: Env,
        guess: String,
        target: String,
        submitted_at: u64,
        round_start: u64,
        semantic: Option<u32>,
    ) -> Result<u32, Error> {
        let params: ScoreParams = env
            .storage()
            .instance()
            .get(&DataKey::Params)
            .ok_or(Error::NotInitialized)?;

        let mut guess_buf = [0u8; MAX_TEXT_LEN];
        let mut target_buf = [0u8; MAX_TEXT_LEN];
        let guess_len = copy_text(&guess, &mut guess_buf).ok_or(Error::GuessTooLong)?;
        let target_len = copy_text(&target, &mut target_buf).ok_or(Error::TargetTooLong)?;

        if let Some(s) = semantic {
            if s > SCORE_MAX {
                return Err(Error::InvalidSemanticScore);
            }
        }

        Ok(score_guess(
            &guess_buf[..guess_len],
            &target_buf[..target_len],
            submitted_at,
            round_start,
            &params,
            semantic,
        ))
    }
}

// ---------------------------------------------------------------------------
// Scoring core
// ---------------------------------------------------------------------------

/// Score normalized-comparable raw bytes. Deterministic; no side effects.
fn score_guess(
    guess: &[u8],
    target: &[u8],
    submitted_at: u64,
    round_start: u64,
    params: &ScoreParams,
    semantic: Option<u32>,
) -> u32 {
    let mut guess_norm = [0u8; MAX_TEXT_LEN];
    let mut target_norm = [0u8; MAX_TEXT_LEN];
    let gn_len = normalize(guess, &mut guess_norm);
    let tn_len = normalize(target, &mut target_norm);
    let gn = &guess_norm[..gn_len];
    let tn = &target_norm[..tn_len];

    // An exact normalized match is a perfect score no matter when it was
    // submitted or what the oracle thinks. Also covers both-empty.
    if gn == tn {
        return SCORE_MAX;
    }

    let max_len = core::cmp::max(gn.len(), tn.len()) as u32;
    let dist = levenshtein(gn, tn);
    let base = (max_len - dist) * SCORE_MAX / max_len;

    let mut total = core::cmp::min(base + word_overlap_bonus(gn, tn), SCORE_MAX);
    total = core::cmp::min(
        total.saturating_add(early_bonus(submitted_at, round_start, params)),
        SCORE_MAX,
    );

    if params.semantic_blend_enabled {
        if let Some(sem) = semantic {
            total = (sem * 7 + total * 3) / 10;
        }
    }

    core::cmp::min(total, SCORE_MAX)
}

/// Copy a soroban String into a fixed buffer; None if it does not fit.
fn copy_text(s: &String, buf: &mut [u8; MAX_TEXT_LEN]) -> Option<usize> {
    let len = s.len() as usize;
    if len > MAX_TEXT_LEN {
        return None;
    }
    s.copy_into_slice(&mut buf[..len]);
    Some(len)
}

/// Lowercase, trim, collapse whitespace, strip ASCII punctuation.
/// Returns the normalized length; never longer than the input.
fn normalize(src: &[u8], dst: &mut [u8; MAX_TEXT_LEN]) -> usize {
    let mut n = 0usize;
    let mut pending_space = false;
    for &b in src {
        let c = if b.is_ascii_uppercase() { b + 32 } else { b };
        if c == b' ' || c == b'\t' || c == b'\n' || c == b'\r' {
            if n > 0 {
                pending_space = true;
            }
            continue;
        }
        // ASCII punctuation is dropped; multi-byte UTF-8 (>= 0x80) is a
        // word character in any script.
        if c.is_ascii() && !c.is_ascii_alphanumeric() {
            continue;
        }
        if pending_space {
            dst[n] = b' ';
            n += 1;
            pending_space = false;
        }
        dst[n] = c;
        n += 1;
    }
    n
}

/// Classic two-row Levenshtein over byte strings.
fn levenshtein(a: &[u8], b: &[u8]) -> u32 {
    let (m, n) = (a.len(), b.len());
    if m == 0 {
        return n as u32;
    }
    if n == 0 {
        return m as u32;
    }

    let mut prev = [0u32; MAX_TEXT_LEN + 1];
    let mut cur = [0u32; MAX_TEXT_LEN + 1];
    for (j, slot) in prev.iter_mut().enumerate().take(n + 1) {
        *slot = j as u32;
    }
    for i in 1..=m {
        cur[0] = i as u32;
        for j in 1..=n {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            let mut v = prev[j - 1] + cost;
            if prev[j] + 1 < v {
                v = prev[j] + 1;
            }
            if cur[j - 1] + 1 < v {
                v = cur[j - 1] + 1;
            }
            cur[j] = v;
        }
        prev[..=n].copy_from_slice(&cur[..=n]);
    }
    prev[n]
}

/// Words of a normalized buffer (single-space separated, no empties).
fn words(buf: &[u8]) -> impl Iterator<Item = &[u8]> {
    buf.split(|&b| b == b' ').filter(|w| !w.is_empty())
}

fn word_count(buf: &[u8]) -> u32 {
    words(buf).count() as u32
}

fn contains_sub(hay: &[u8], needle: &[u8]) -> bool {
    needle.len() <= hay.len() && hay.windows(needle.len()).any(|w| w == needle)
}

/// Bonus for guess words that contain, or are contained in, a target word.
fn word_overlap_bonus(guess: &[u8], target: &[u8]) -> u32 {
    let max_words = core::cmp::max(word_count(guess), word_count(target));
    if max_words == 0 {
        return 0;
    }
    let mut matches = 0u32;
    for gw in words(guess) {
        if words(target).any(|tw| contains_sub(tw, gw) || contains_sub(gw, tw)) {
            matches += 1;
        }
    }
    matches * WORD_BONUS_MAX / max_words
}

/// Bonus for submitting within the early window after round start.
fn early_bonus(submitted_at: u64, round_start: u64, params: &ScoreParams) -> u32 {
    let window_secs = params.early_window_minutes * 60;
    if window_secs == 0 {
        return 0;
    }
    let elapsed = submitted_at.saturating_sub(round_start);
    if elapsed >= window_secs {
        return 0;
    }
    let remaining_minutes = params.early_window_minutes - elapsed / 60;
    (remaining_minutes as u32).saturating_mul(params.early_bonus_per_minute)
}

fn validate_params(params: &ScoreParams) -> Result<(), Error> {
    // Keep the maximum possible early bonus representable in centipoints.
    if params.early_window_minutes > 24 * 60 || params.early_bonus_per_minute > SCORE_MAX {
        return Err(Error::InvalidParams);
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

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use soroban_sdk::{testutils::Address as _, Address, Env, String};

    const NO_BONUS: ScoreParams = ScoreParams {
        early_window_minutes: 0,
        early_bonus_per_minute: 0,
        semantic_blend_enabled: false,
    };

    fn score_plain(guess: &[u8], target: &[u8]) -> u32 {
        score_guess(guess, target, 0, 0, &NO_BONUS, None)
    }

    // ------------------------------------------------------------------
    // Normalization
    // ------------------------------------------------------------------

    #[test]
    fn normalize_lowercases_trims_and_collapses() {
        let mut buf = [0u8; MAX_TEXT_LEN];
        let n = normalize(b"  A  Red,  FOX!  ", &mut buf);
        assert_eq!(&buf[..n], b"a red fox");
    }

    #[test]
    fn normalize_keeps_non_ascii_bytes() {
        let mut buf = [0u8; MAX_TEXT_LEN];
        let src = "こんにちは 世界!".as_bytes();
        let n = normalize(src, &mut buf);
        assert_eq!(&buf[..n], "こんにちは 世界".as_bytes());
    }

    // ------------------------------------------------------------------
    // Base score
    // ------------------------------------------------------------------

    #[test]
    fn exact_match_after_normalization_is_perfect() {
        // Scenario B: messy guess normalizes identically to the target.
        assert_eq!(score_plain(b"  A Red FOX! ", b"a red fox"), SCORE_MAX);
    }

    #[test]
    fn both_empty_is_perfect() {
        assert_eq!(score_plain(b"", b""), SCORE_MAX);
        assert_eq!(score_plain(b" !!! ", b"  "), SCORE_MAX);
    }

    #[test]
    fn empty_guess_against_target_scores_zero() {
        assert_eq!(score_plain(b"", b"abcd"), 0);
    }

    #[test]
    fn score_decreases_with_edit_distance() {
        // Same length, increasing distance from the target.
        let target = b"aaaa";
        let s1 = score_plain(b"aaab", target);
        let s2 = score_plain(b"aabb", target);
        let s3 = score_plain(b"abbb", target);
        let s4 = score_plain(b"bbbb", target);
        assert!(s1 >= s2 && s2 >= s3 && s3 >= s4);
        assert_eq!(s4, 0);
    }

    #[test]
    fn score_always_within_bounds() {
        let cases: &[(&[u8], &[u8])] = &[
            (b"", b""),
            (b"x", b""),
            (b"", b"y"),
            (b"completely different", b"nothing alike at all"),
            (b"a red fox", b"a red box"),
            (b"short", b"a much much much longer target string"),
        ];
        for (g, t) in cases {
            let s = score_plain(g, t);
            assert!(s <= SCORE_MAX);
        }
    }

    // ------------------------------------------------------------------
    // Word overlap
    // ------------------------------------------------------------------

    #[test]
    fn word_overlap_counts_substrings_both_ways() {
        // "fox" is a word of the target; "foxes" contains it.
        let mut g = [0u8; MAX_TEXT_LEN];
        let mut t = [0u8; MAX_TEXT_LEN];
        let gn = normalize(b"red foxes", &mut g);
        let tn = normalize(b"red fox jumps", &mut t);
        // matches = 2 ("red" exact, "foxes" contains "fox"), max words 3.
        assert_eq!(word_overlap_bonus(&g[..gn], &t[..tn]), 2 * 1_000 / 3);
    }

    #[test]
    fn word_overlap_bonus_caps_total_at_max() {
        // Near-identical long strings with full word overlap must not
        // push past 100.00.
        let s = score_plain(b"the quick brown fox jumps", b"the quick brown fox jumped");
        assert!(s <= SCORE_MAX);
    }

    // ------------------------------------------------------------------
    // Early-submission bonus
    // ------------------------------------------------------------------

    #[test]
    fn early_bonus_scenario() {
        // Scenario C: window 5 minutes, 3.00 points per minute, submitted
        // at elapsed 2 minutes => +9.00 points over the base score.
        let params = ScoreParams {
            early_window_minutes: 5,
            early_bonus_per_minute: 300,
            semantic_blend_enabled: false,
        };
        let base = score_plain(b"red fox", b"red box");
        let timed = score_guess(b"red fox", b"red box", 1_120, 1_000, &params, None);
        assert_eq!(timed, base + 900);
    }

    #[test]
    fn no_bonus_at_or_after_window() {
        let params = ScoreParams {
            early_window_minutes: 5,
            early_bonus_per_minute: 300,
            semantic_blend_enabled: false,
        };
        let base = score_plain(b"red fox", b"red box");
        assert_eq!(
            score_guess(b"red fox", b"red box", 1_300, 1_000, &params, None),
            base
        );
        assert_eq!(
            score_guess(b"red fox", b"red box", 9_999, 1_000, &params, None),
            base
        );
    }

    #[test]
    fn exact_match_ignores_timing() {
        let params = ScoreParams {
            early_window_minutes: 5,
            early_bonus_per_minute: 300,
            semantic_blend_enabled: false,
        };
        assert_eq!(
            score_guess(b"red fox", b"Red Fox", 0, 0, &params, None),
            SCORE_MAX
        );
        assert_eq!(
            score_guess(b"red fox", b"Red Fox", 999_999, 0, &params, None),
            SCORE_MAX
        );
    }

    // ------------------------------------------------------------------
    // Semantic blend
    // ------------------------------------------------------------------

    #[test]
    fn semantic_blend_weighs_oracle_signal() {
        let params = ScoreParams {
            early_window_minutes: 0,
            early_bonus_per_minute: 0,
            semantic_blend_enabled: true,
        };
        let heuristic = score_plain(b"red fox", b"red box");
        let blended = score_guess(b"red fox", b"red box", 0, 0, &params, Some(5_000));
        assert_eq!(blended, (5_000 * 7 + heuristic * 3) / 10);
    }

    #[test]
    fn semantic_signal_ignored_when_blend_disabled() {
        let heuristic = score_plain(b"red fox", b"red box");
        assert_eq!(
            score_guess(b"red fox", b"red box", 0, 0, &NO_BONUS, Some(0)),
            heuristic
        );
    }

    #[test]
    fn semantic_blend_cannot_dilute_exact_match() {
        let params = ScoreParams {
            early_window_minutes: 0,
            early_bonus_per_minute: 0,
            semantic_blend_enabled: true,
        };
        assert_eq!(
            score_guess(b"red fox", b"red fox", 0, 0, &params, Some(0)),
            SCORE_MAX
        );
    }

    // ------------------------------------------------------------------
    // Contract surface
    // ------------------------------------------------------------------

    fn setup(env: &Env) -> (ScoringEngineClient<'_>, Address) {
        let admin = Address::generate(env);
        let contract_id = env.register(ScoringEngine, ());
        let client = ScoringEngineClient::new(env, &contract_id);
        env.mock_all_auths();
        client.init(
            &admin,
            &ScoreParams {
                early_window_minutes: 5,
                early_bonus_per_minute: 300,
                semantic_blend_enabled: false,
            },
        );
        (client, admin)
    }

    #[test]
    fn contract_scores_strings() {
        let env = Env::default();
        let (client, _) = setup(&env);

        let guess = String::from_str(&env, "A Red Fox!");
        let target = String::from_str(&env, "a red fox");
        assert_eq!(
            client.score(&guess, &target, &1_000u64, &1_000u64, &None),
            SCORE_MAX
        );
    }

    #[test]
    fn contract_rejects_reinit_and_bad_semantic() {
        let env = Env::default();
        let (client, admin) = setup(&env);

        let reinit = client.try_init(
            &admin,
            &ScoreParams {
                early_window_minutes: 5,
                early_bonus_per_minute: 300,
                semantic_blend_enabled: false,
            },
        );
        assert_eq!(reinit, Err(Ok(Error::AlreadyInitialized)));

        let g = String::from_str(&env, "a");
        let t = String::from_str(&env, "b");
        let bad = client.try_score(&g, &t, &0u64, &0u64, &Some(SCORE_MAX + 1));
        assert_eq!(bad, Err(Ok(Error::InvalidSemanticScore)));
    }

    #[test]
    fn contract_rejects_oversized_text() {
        let env = Env::default();
        let (client, _) = setup(&env);

        // Build a String one byte longer than the scoring buffer.
        let raw = [b'a'; MAX_TEXT_LEN + 1];
        let long_str = String::from_bytes(&env, &raw);
        let t = String::from_str(&env, "target");
        let res = client.try_score(&long_str, &t, &0u64, &0u64, &None);
        assert_eq!(res, Err(Ok(Error::GuessTooLong)));
    }

    #[test]
    fn set_params_requires_admin() {
        let env = Env::default();
        let (client, _) = setup(&env);
        let stranger = Address::generate(&env);
        let res = client.try_set_params(
            &stranger,
            &ScoreParams {
                early_window_minutes: 1,
                early_bonus_per_minute: 100,
                semantic_blend_enabled: true,
            },
        );
        assert_eq!(res, Err(Ok(Error::NotAuthorized)));
    }
}
