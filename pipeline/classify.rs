//! # Severity and Pathway Classification
//!
//! Maps a validated measurement plus its MUAC-for-age Z-score to a clinical
//! status and treatment pathway. This is a total, deterministic function:
//! every input combination yields exactly one status, and identical inputs
//! always yield identical output. Malformed Z-scores or edema grades are the
//! quality gate's problem; this module assumes validated input.
//!
//! Decision order:
//!
//! 1. `SAM` if Z < -3.0 OR edema >= 1 (nutritional edema is severe by
//!    definition regardless of MUAC).
//! 2. `MAM` if -3.0 <= Z < -2.0.
//! 3. `Healthy` otherwise.
//!
//! Within SAM the pathway splits on complication markers: inpatient
//! stabilization (SC-ITP) when edema >= 2, the appetite test failed, or
//! danger signs are present; outpatient therapeutic care (OTP) otherwise.
//! MAM always routes to supplementary feeding (TSFP); Healthy to no
//! treatment.
//!
//! No statistical model backs this decision, so the confidence is a fixed
//! distance-from-threshold heuristic: base 0.80, plus 0.05 per full SD the
//! Z-score sits beyond the governing threshold, capped at 0.99. Edema-driven
//! SAM (where the Z-score alone would not qualify) is reported at 0.95. The
//! exact policy is observable behavior and pinned by tests.

use crate::types::{Appetite, ClassificationResult, ClinicalStatus, Measurement, Pathway};

const SAM_THRESHOLD: f64 = -3.0;
const MAM_THRESHOLD: f64 = -2.0;

const CONFIDENCE_BASE: f64 = 0.80;
const CONFIDENCE_PER_SD: f64 = 0.05;
const CONFIDENCE_CAP: f64 = 0.99;
const CONFIDENCE_EDEMA_SAM: f64 = 0.95;

/// Assigns clinical status, treatment pathway, and a deterministic
/// confidence from a measurement and its rounded Z-score.
pub fn classify_pathway(measurement: &Measurement, zscore: f64) -> ClassificationResult {
    let edema_positive = measurement.edema >= 1;

    let (clinical_status, confidence) = if zscore < SAM_THRESHOLD {
        (
            ClinicalStatus::Sam,
            threshold_confidence(SAM_THRESHOLD - zscore),
        )
    } else if edema_positive {
        (ClinicalStatus::Sam, CONFIDENCE_EDEMA_SAM)
    } else if zscore < MAM_THRESHOLD {
        // Distance to the nearer of the two MAM boundaries.
        let margin = (zscore - SAM_THRESHOLD).min(MAM_THRESHOLD - zscore);
        (ClinicalStatus::Mam, threshold_confidence(margin))
    } else {
        (
            ClinicalStatus::Healthy,
            threshold_confidence(zscore - MAM_THRESHOLD),
        )
    };

    let recommended_pathway = match clinical_status {
        ClinicalStatus::Sam => {
            let complicated = measurement.edema >= 2
                || measurement.appetite == Appetite::Failed
                || measurement.danger_signs;
            if complicated {
                Pathway::ScItp
            } else {
                Pathway::Otp
            }
        }
        ClinicalStatus::Mam => Pathway::Tsfp,
        ClinicalStatus::Healthy => Pathway::None,
    };

    ClassificationResult {
        clinical_status,
        recommended_pathway,
        confidence,
    }
}

fn threshold_confidence(distance_sd: f64) -> f64 {
    (CONFIDENCE_BASE + CONFIDENCE_PER_SD * distance_sd).min(CONFIDENCE_CAP)
}
