// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used
// in one file.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Biological sex as recorded on the growth-reference tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sex::Male => write!(f, "M"),
            Sex::Female => write!(f, "F"),
        }
    }
}

pub fn parse_sex_label(label: &str) -> Result<Sex, String> {
    let trimmed = label.trim();
    if trimmed.eq_ignore_ascii_case("M") || trimmed.eq_ignore_ascii_case("male") {
        return Ok(Sex::Male);
    }
    if trimmed.eq_ignore_ascii_case("F") || trimmed.eq_ignore_ascii_case("female") {
        return Ok(Sex::Female);
    }
    Err(format!(
        "Invalid sex label '{}'. Expected 'M', 'F', 'male', or 'female'.",
        trimmed
    ))
}

/// Outcome of the appetite test administered during intake.
///
/// `Unknown` preserves out-of-vocabulary field values so the quality gate can
/// flag them instead of the parser rejecting the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Appetite {
    Good,
    Poor,
    Failed,
    Unknown,
}

impl Appetite {
    /// Numeric code used in the quality-model feature vector. Unrecognized
    /// values share the code of the most severe outcome.
    pub fn feature_code(self) -> f64 {
        match self {
            Appetite::Good => 0.0,
            Appetite::Poor => 1.0,
            Appetite::Failed | Appetite::Unknown => 2.0,
        }
    }
}

impl fmt::Display for Appetite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Appetite::Good => "good",
            Appetite::Poor => "poor",
            Appetite::Failed => "failed",
            Appetite::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

pub fn parse_appetite_label(label: &str) -> Appetite {
    match label.trim().to_ascii_lowercase().as_str() {
        "good" => Appetite::Good,
        "poor" => Appetite::Poor,
        "failed" => Appetite::Failed,
        _ => Appetite::Unknown,
    }
}

/// A single anthropometric intake record, as captured in the field.
///
/// Constructed once at intake time and consumed by the pipeline; the core
/// never mutates or persists it. `edema` is kept as a raw integer because
/// untrusted input may carry out-of-domain grades the quality gate must see.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub age_months: i32,
    pub sex: Sex,
    pub muac_mm: i32,
    pub edema: i32,
    pub appetite: Appetite,
    pub danger_signs: bool,
}

impl Measurement {
    /// MUAC in centimeters, the unit the LMS computation operates in. The
    /// mm-to-cm conversion lives here so it is a visible, single step rather
    /// than an implicit scaling buried in the math.
    pub fn muac_cm(&self) -> f64 {
        f64::from(self.muac_mm) / 10.0
    }
}

/// Clinical severity category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClinicalStatus {
    Sam,
    Mam,
    Healthy,
}

impl fmt::Display for ClinicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ClinicalStatus::Sam => "SAM",
            ClinicalStatus::Mam => "MAM",
            ClinicalStatus::Healthy => "Healthy",
        };
        write!(f, "{label}")
    }
}

pub fn parse_status_label(label: &str) -> Result<ClinicalStatus, String> {
    match label.trim() {
        s if s.eq_ignore_ascii_case("SAM") => Ok(ClinicalStatus::Sam),
        s if s.eq_ignore_ascii_case("MAM") => Ok(ClinicalStatus::Mam),
        s if s.eq_ignore_ascii_case("Healthy") => Ok(ClinicalStatus::Healthy),
        other => Err(format!(
            "Invalid clinical status '{}'. Expected 'SAM', 'MAM', or 'Healthy'.",
            other
        )),
    }
}

/// Treatment pathway recommended for a classified child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pathway {
    /// Stabilization Centre / Inpatient Therapeutic Programme.
    ScItp,
    /// Outpatient Therapeutic Programme.
    Otp,
    /// Targeted Supplementary Feeding Programme.
    Tsfp,
    /// No treatment required.
    None,
}

impl fmt::Display for Pathway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Pathway::ScItp => "SC_ITP",
            Pathway::Otp => "OTP",
            Pathway::Tsfp => "TSFP",
            Pathway::None => "None",
        };
        write!(f, "{label}")
    }
}

/// Severity and pathway assigned by the classifier, with a deterministic
/// confidence in (0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub clinical_status: ClinicalStatus,
    pub recommended_pathway: Pathway,
    pub confidence: f64,
}
