//! # LMS Z-score Transform
//!
//! Converts a raw MUAC measurement into a standardized MUAC-for-age Z-score
//! using the WHO LMS method. This is a pure function over the measurement and
//! the loaded growth reference; it performs no I/O and holds no state.
//!
//! The computation operates in centimeters. Callers holding millimeters (the
//! usual wire unit) must convert explicitly via [`crate::types::Measurement::muac_cm`];
//! there is no implicit rescaling here.

use crate::reference::LmsTable;
use crate::types::Sex;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ZscoreError {
    #[error(
        "No growth-reference entry for age {age_months} months (sex {sex}). The reference covers a fixed age range and is never extrapolated."
    )]
    OutOfRange { age_months: i32, sex: Sex },
    #[error("MUAC must be a positive length in cm, got {muac_cm}.")]
    NonPositiveMuac { muac_cm: f64 },
}

/// Computes the MUAC-for-age Z-score for a child of the given age and sex.
///
/// With (L, M, S) taken from the reference row for (age, sex):
///
/// - L != 0:  Z = ((muac/M)^L - 1) / (L * S)
/// - L == 0:  Z = ln(muac/M) / S
///
/// The result is rounded to 2 decimal places, half away from zero (the
/// `f64::round` rule). Clinical thresholds compare against the rounded value,
/// so the rounding rule is part of the observable contract and is pinned by
/// tests.
pub fn compute_zscore(
    muac_cm: f64,
    age_months: i32,
    sex: Sex,
    table: &LmsTable,
) -> Result<f64, ZscoreError> {
    if !muac_cm.is_finite() || muac_cm <= 0.0 {
        return Err(ZscoreError::NonPositiveMuac { muac_cm });
    }
    let entry = table
        .lookup(age_months, sex)
        .ok_or(ZscoreError::OutOfRange { age_months, sex })?;

    let ratio = muac_cm / entry.m;
    let z = if entry.l != 0.0 {
        (ratio.powf(entry.l) - 1.0) / (entry.l * entry.s)
    } else {
        ratio.ln() / entry.s
    };
    Ok(round_half_away(z))
}

/// Rounds to 2 decimal places, ties away from zero.
fn round_half_away(z: f64) -> f64 {
    (z * 100.0).round() / 100.0
}
