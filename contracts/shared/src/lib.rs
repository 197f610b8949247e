//! Shared utilities and constants for the PromptPot contracts.
#![no_std]
#![allow(unexpected_cfgs)]

use soroban_sdk::contracterror;

/// Common error codes used across the suite's arithmetic helpers.
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum Error {
    InvalidAmount = 1,
    InvalidFeeRate = 2,
    Overflow = 3,
}

/// Constant for basis points divisor.
pub const BASIS_POINTS_DIVISOR: u32 = 10_000;

/// Scores are integer centipoints: 10_000 == 100.00.
pub const SCORE_MAX: u32 = 10_000;

/// Helper to calculate the platform fee from an amount and a rate in
/// basis points (e.g., 500 = 5%).
pub fn calculate_fee(amount: i128, fee_bps: u32) -> Result<i128, Error> {
    if amount < 0 {
        return Err(Error::InvalidAmount);
    }
    if fee_bps > BASIS_POINTS_DIVISOR {
        return Err(Error::InvalidFeeRate);
    }
    amount
        .checked_mul(fee_bps as i128)
        .and_then(|v| v.checked_div(BASIS_POINTS_DIVISOR as i128))
        .ok_or(Error::Overflow)
}

/// Share of `total` taken by `part`, in basis points. Zero when `total`
/// is zero.
pub fn share_bps(part: i128, total: i128) -> Result<u32, Error> {
    if part < 0 || total < 0 {
        return Err(Error::InvalidAmount);
    }
    if total == 0 {
        return Ok(0);
    }
    let bps = part
        .checked_mul(BASIS_POINTS_DIVISOR as i128)
        .and_then(|v| v.checked_div(total))
        .ok_or(Error::Overflow)?;
    Ok(bps as u32)
}
