//! # Measurement Quality Gate
//!
//! Decides whether an intake measurement is trustworthy enough to classify,
//! catching transcription and unit errors before they can produce a false
//! clinical verdict. The gate is a pure decision function over the
//! measurement plus an optional, injected, read-only statistical model.
//!
//! Two decision providers sit behind one interface:
//!
//! - [`RuleProvider`] runs a fixed set of independent plausibility checks and
//!   always participates.
//! - [`ModelProvider`] wraps an opaque classifier behind the
//!   [`QualityModel`] trait and participates only when an artifact was
//!   injected at construction.
//!
//! A fixed merge policy combines them: the verdict is SUSPICIOUS when any
//! rule flag fired or the model predicts suspicious. There is no inheritance
//! between the two and no hidden global model singleton; the artifact is
//! loaded once at process start and handed in, which makes testing with a
//! stubbed or absent model trivial.

use crate::types::{Appetite, Measurement, Sex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Width of the model feature vector. Fixed contract with the artifact.
pub const QUALITY_FEATURE_COUNT: usize = 9;

/// Feature layout, in order:
/// `[muac_mm, age_months, sex (M=1, F=0), edema, appetite code,
///   danger_signs, near_threshold, unit_suspect, age_suspect]`
pub type FeatureVector = [f64; QUALITY_FEATURE_COUNT];

const MUAC_PLAUSIBLE_MM: (i32, i32) = (50, 200);
const AGE_PROGRAMME_MONTHS: (i32, i32) = (6, 59);
/// MUAC band around the SAM admission cutoff where transcription slips
/// change the verdict; the model treats it as its own signal.
const NEAR_THRESHOLD_MM: (i32, i32) = (113, 117);

/// Named plausibility failure. Flags form a set; several may fire at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityFlag {
    UnitError,
    AgeOutOfRange,
    InvalidAppetite,
    InvalidEdema,
    ImpossibleCombo,
}

impl QualityFlag {
    pub fn code(self) -> &'static str {
        match self {
            QualityFlag::UnitError => "unit_error",
            QualityFlag::AgeOutOfRange => "age_out_of_range",
            QualityFlag::InvalidAppetite => "invalid_appetite",
            QualityFlag::InvalidEdema => "invalid_edema",
            QualityFlag::ImpossibleCombo => "impossible_combo",
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QualityStatus {
    Ok,
    Suspicious,
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityStatus::Ok => write!(f, "OK"),
            QualityStatus::Suspicious => write!(f, "SUSPICIOUS"),
        }
    }
}

/// The gate's final answer for one measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityVerdict {
    pub status: QualityStatus,
    pub confidence: f64,
    pub flags: Vec<QualityFlag>,
    pub recommendation: String,
    /// Whether a statistical classifier contributed to this verdict, as
    /// opposed to rules only.
    pub model_used: bool,
}

/// Errors internal to a statistical quality model. Always recovered locally
/// by the gate's rule-only fallback; never surfaced to callers as a failure.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Model produced a non-finite probability ({probability}).")]
    NonFiniteOutput { probability: f64 },
    #[error("Quality model evaluation failed: {0}")]
    Evaluation(String),
}

/// A binary prediction over the 9-feature vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrediction {
    pub suspicious: bool,
    /// Probability of the predicted class, in (0, 1).
    pub probability: f64,
}

/// Contract for the opaque quality-model artifact. Implementations must be
/// safe to share read-only across request-handling threads.
pub trait QualityModel: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<ModelPrediction, ModelError>;
}

/// Builds the fixed feature vector the model contract is defined over.
/// Derived features are recomputed from raw values so the model provider
/// stays independent of the rule provider.
pub fn feature_vector(m: &Measurement) -> FeatureVector {
    let near_threshold = m.muac_mm >= NEAR_THRESHOLD_MM.0 && m.muac_mm <= NEAR_THRESHOLD_MM.1;
    let unit_suspect = m.muac_mm < MUAC_PLAUSIBLE_MM.0 || m.muac_mm > MUAC_PLAUSIBLE_MM.1;
    let age_suspect = m.age_months < AGE_PROGRAMME_MONTHS.0 || m.age_months > AGE_PROGRAMME_MONTHS.1;
    [
        f64::from(m.muac_mm),
        f64::from(m.age_months),
        if m.sex == Sex::Male { 1.0 } else { 0.0 },
        f64::from(m.edema),
        m.appetite.feature_code(),
        if m.danger_signs { 1.0 } else { 0.0 },
        if near_threshold { 1.0 } else { 0.0 },
        if unit_suspect { 1.0 } else { 0.0 },
        if age_suspect { 1.0 } else { 0.0 },
    ]
}

/// What one decision provider concluded about a measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderVerdict {
    pub status: QualityStatus,
    pub confidence: f64,
    pub flags: Vec<QualityFlag>,
}

/// The shared interface both stages of the gate implement. Rule evaluation
/// is infallible; a model stage may fail internally, and the gate recovers.
pub trait DecisionProvider {
    fn evaluate(&self, measurement: &Measurement) -> Result<ProviderVerdict, ModelError>;
}

/// The always-on, rule-based stage. Each check is independent and appends
/// one named flag when triggered.
pub struct RuleProvider;

impl RuleProvider {
    /// Infallible rule evaluation; the trait impl wraps this.
    fn verdict(measurement: &Measurement) -> ProviderVerdict {
        let flags = Self::flags(measurement);
        let (status, confidence) = if flags.is_empty() {
            (QualityStatus::Ok, 0.7)
        } else {
            (QualityStatus::Suspicious, 0.3)
        };
        ProviderVerdict {
            status,
            confidence,
            flags,
        }
    }

    fn flags(measurement: &Measurement) -> Vec<QualityFlag> {
        let mut flags = Vec::new();
        if measurement.muac_mm < MUAC_PLAUSIBLE_MM.0 || measurement.muac_mm > MUAC_PLAUSIBLE_MM.1 {
            flags.push(QualityFlag::UnitError);
        }
        if measurement.age_months < AGE_PROGRAMME_MONTHS.0
            || measurement.age_months > AGE_PROGRAMME_MONTHS.1
        {
            flags.push(QualityFlag::AgeOutOfRange);
        }
        if measurement.appetite == Appetite::Unknown {
            flags.push(QualityFlag::InvalidAppetite);
        }
        if !(0..=3).contains(&measurement.edema) {
            flags.push(QualityFlag::InvalidEdema);
        }
        // Severe edema should not co-occur with a non-wasted MUAC.
        if measurement.muac_mm > 130 && measurement.edema >= 2 {
            flags.push(QualityFlag::ImpossibleCombo);
        }
        flags
    }
}

impl DecisionProvider for RuleProvider {
    fn evaluate(&self, measurement: &Measurement) -> Result<ProviderVerdict, ModelError> {
        Ok(Self::verdict(measurement))
    }
}

/// The optional statistical stage, wrapping an injected artifact.
pub struct ModelProvider<'a> {
    model: &'a dyn QualityModel,
}

impl<'a> ModelProvider<'a> {
    pub fn new(model: &'a dyn QualityModel) -> Self {
        Self { model }
    }
}

impl DecisionProvider for ModelProvider<'_> {
    fn evaluate(&self, measurement: &Measurement) -> Result<ProviderVerdict, ModelError> {
        let prediction = self.model.predict(&feature_vector(measurement))?;
        let status = if prediction.suspicious {
            QualityStatus::Suspicious
        } else {
            QualityStatus::Ok
        };
        Ok(ProviderVerdict {
            status,
            confidence: prediction.probability,
            flags: Vec::new(),
        })
    }
}

/// The combined gate. Construct once at process start and share read-only.
pub struct QualityGate {
    model: Option<Box<dyn QualityModel>>,
}

impl QualityGate {
    /// A gate running rule checks only.
    pub fn rule_based() -> Self {
        Self { model: None }
    }

    /// A gate with the statistical stage enabled.
    pub fn with_model(model: Box<dyn QualityModel>) -> Self {
        Self { model: Some(model) }
    }

    /// Evaluates one measurement. Never fails: a model that errors
    /// internally is dropped from the merge and the rule stage alone
    /// determines the verdict.
    pub fn check(&self, measurement: &Measurement) -> QualityVerdict {
        let rules = RuleProvider::verdict(measurement);

        let model_verdict = self.model.as_deref().and_then(|model| {
            match ModelProvider::new(model).evaluate(measurement) {
                Ok(verdict) => Some(verdict),
                Err(error) => {
                    log::warn!("Quality model unavailable, falling back to rules: {error}");
                    None
                }
            }
        });

        // Fixed merge policy: suspicious if either provider says so; the
        // model's class probability wins as the confidence when it ran.
        let (status, confidence, model_used) = match model_verdict {
            Some(model) => {
                let status = if rules.status == QualityStatus::Suspicious
                    || model.status == QualityStatus::Suspicious
                {
                    QualityStatus::Suspicious
                } else {
                    QualityStatus::Ok
                };
                (status, model.confidence, true)
            }
            None => (rules.status, rules.confidence, false),
        };

        let recommendation = recommendation_for(status, &rules.flags);
        if status == QualityStatus::Suspicious {
            log::debug!(
                "Suspicious measurement (flags: [{}])",
                rules
                    .flags
                    .iter()
                    .map(|f| f.code())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        QualityVerdict {
            status,
            confidence,
            flags: rules.flags,
            recommendation,
            model_used,
        }
    }
}

/// Picks exactly one recommendation by flag priority; the first matching
/// flag wins even when several fired.
fn recommendation_for(status: QualityStatus, flags: &[QualityFlag]) -> String {
    if status == QualityStatus::Ok {
        return "Measurement appears valid".to_string();
    }
    let text = if flags.contains(&QualityFlag::UnitError) {
        "Please verify MUAC unit (mm vs cm)"
    } else if flags.contains(&QualityFlag::AgeOutOfRange) {
        "Please verify child age (6-59 months)"
    } else if flags.contains(&QualityFlag::InvalidAppetite) {
        "Please verify appetite assessment"
    } else if flags.contains(&QualityFlag::ImpossibleCombo) {
        "High MUAC with severe edema is unusual - please re-check"
    } else {
        "Please re-measure MUAC carefully"
    };
    text.to_string()
}

// --- The Bundled Artifact Format ---

/// A logistic classifier over the 9-feature vector, persisted as a
/// human-readable TOML file. This is the artifact format the project trains
/// offline; any other artifact can be plugged in through [`QualityModel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub bias: f64,
    pub weights: [f64; QUALITY_FEATURE_COUNT],
}

impl LogisticModel {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let content = fs::read_to_string(path.as_ref())?;
        let model: LogisticModel = toml::from_str(&content)?;
        log::info!("Loaded quality model '{}'", path.as_ref().display());
        Ok(model)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ModelError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

impl QualityModel for LogisticModel {
    fn predict(&self, features: &FeatureVector) -> Result<ModelPrediction, ModelError> {
        let logit: f64 = self.bias
            + self
                .weights
                .iter()
                .zip(features.iter())
                .map(|(w, x)| w * x)
                .sum::<f64>();
        let p_suspicious = 1.0 / (1.0 + (-logit).exp());
        if !p_suspicious.is_finite() {
            return Err(ModelError::NonFiniteOutput {
                probability: p_suspicious,
            });
        }
        let suspicious = p_suspicious >= 0.5;
        Ok(ModelPrediction {
            suspicious,
            probability: if suspicious {
                p_suspicious
            } else {
                1.0 - p_suspicious
            },
        })
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::NamedTempFile;

    fn clean_measurement() -> Measurement {
        Measurement {
            age_months: 24,
            sex: Sex::Male,
            muac_mm: 114,
            edema: 0,
            appetite: Appetite::Good,
            danger_signs: false,
        }
    }

    /// Stub that always answers with a fixed prediction.
    struct FixedModel(ModelPrediction);

    impl QualityModel for FixedModel {
        fn predict(&self, _features: &FeatureVector) -> Result<ModelPrediction, ModelError> {
            Ok(self.0)
        }
    }

    /// Stub that always fails internally.
    struct BrokenModel;

    impl QualityModel for BrokenModel {
        fn predict(&self, _features: &FeatureVector) -> Result<ModelPrediction, ModelError> {
            Err(ModelError::Evaluation("artifact corrupted".to_string()))
        }
    }

    #[test]
    fn clean_measurement_passes_rules_only() {
        let verdict = QualityGate::rule_based().check(&clean_measurement());
        assert_eq!(verdict.status, QualityStatus::Ok);
        assert!(verdict.flags.is_empty());
        assert_abs_diff_eq!(verdict.confidence, 0.7);
        assert!(!verdict.model_used);
        assert_eq!(verdict.recommendation, "Measurement appears valid");
    }

    #[test]
    fn cm_value_in_mm_field_raises_unit_error() {
        // A CHW entered 11.4 cm into the mm field.
        let measurement = Measurement {
            muac_mm: 11,
            ..clean_measurement()
        };
        let verdict = QualityGate::rule_based().check(&measurement);
        assert_eq!(verdict.status, QualityStatus::Suspicious);
        assert!(verdict.flags.contains(&QualityFlag::UnitError));
        assert_abs_diff_eq!(verdict.confidence, 0.3);
        assert_eq!(verdict.recommendation, "Please verify MUAC unit (mm vs cm)");
    }

    #[test]
    fn high_muac_with_severe_edema_is_impossible() {
        let measurement = Measurement {
            muac_mm: 145,
            edema: 3,
            ..clean_measurement()
        };
        let verdict = QualityGate::rule_based().check(&measurement);
        assert_eq!(verdict.status, QualityStatus::Suspicious);
        assert!(verdict.flags.contains(&QualityFlag::ImpossibleCombo));
    }

    #[test]
    fn age_outside_programme_range_is_flagged_on_both_sides() {
        for age in [4, 60] {
            let measurement = Measurement {
                age_months: age,
                ..clean_measurement()
            };
            let verdict = QualityGate::rule_based().check(&measurement);
            assert!(verdict.flags.contains(&QualityFlag::AgeOutOfRange));
            assert_eq!(
                verdict.recommendation,
                "Please verify child age (6-59 months)"
            );
        }
    }

    #[test]
    fn invalid_edema_and_appetite_are_flagged() {
        let measurement = Measurement {
            edema: 5,
            appetite: Appetite::Unknown,
            ..clean_measurement()
        };
        let verdict = QualityGate::rule_based().check(&measurement);
        assert!(verdict.flags.contains(&QualityFlag::InvalidEdema));
        assert!(verdict.flags.contains(&QualityFlag::InvalidAppetite));
        // Appetite outranks edema in the recommendation order.
        assert_eq!(verdict.recommendation, "Please verify appetite assessment");
    }

    #[test]
    fn multiple_flags_keep_the_highest_priority_recommendation() {
        let measurement = Measurement {
            muac_mm: 10,
            age_months: 72,
            edema: 7,
            ..clean_measurement()
        };
        let verdict = QualityGate::rule_based().check(&measurement);
        assert!(verdict.flags.len() >= 3);
        assert_eq!(verdict.recommendation, "Please verify MUAC unit (mm vs cm)");
    }

    #[test]
    fn model_can_overrule_a_rule_clean_measurement() {
        let gate = QualityGate::with_model(Box::new(FixedModel(ModelPrediction {
            suspicious: true,
            probability: 0.91,
        })));
        let verdict = gate.check(&clean_measurement());
        assert_eq!(verdict.status, QualityStatus::Suspicious);
        assert!(verdict.flags.is_empty());
        assert_abs_diff_eq!(verdict.confidence, 0.91);
        assert!(verdict.model_used);
        // No flags fired, so only the generic advice applies.
        assert_eq!(verdict.recommendation, "Please re-measure MUAC carefully");
    }

    #[test]
    fn rule_flags_overrule_a_model_that_says_ok() {
        let gate = QualityGate::with_model(Box::new(FixedModel(ModelPrediction {
            suspicious: false,
            probability: 0.88,
        })));
        let measurement = Measurement {
            muac_mm: 11,
            ..clean_measurement()
        };
        let verdict = gate.check(&measurement);
        assert_eq!(verdict.status, QualityStatus::Suspicious);
        assert!(verdict.flags.contains(&QualityFlag::UnitError));
        assert_abs_diff_eq!(verdict.confidence, 0.88);
        assert!(verdict.model_used);
    }

    #[test]
    fn broken_model_falls_back_to_rule_confidences() {
        let gate = QualityGate::with_model(Box::new(BrokenModel));

        let verdict = gate.check(&clean_measurement());
        assert_eq!(verdict.status, QualityStatus::Ok);
        assert_abs_diff_eq!(verdict.confidence, 0.7);
        assert!(!verdict.model_used);

        let flagged = Measurement {
            muac_mm: 11,
            ..clean_measurement()
        };
        let verdict = gate.check(&flagged);
        assert_eq!(verdict.status, QualityStatus::Suspicious);
        assert_abs_diff_eq!(verdict.confidence, 0.3);
        assert!(!verdict.model_used);
    }

    #[test]
    fn feature_vector_layout_matches_the_contract() {
        let measurement = Measurement {
            age_months: 72,
            sex: Sex::Male,
            muac_mm: 115,
            edema: 1,
            appetite: Appetite::Poor,
            danger_signs: true,
        };
        let features = feature_vector(&measurement);
        assert_eq!(
            features,
            [115.0, 72.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 1.0]
        );
    }

    #[test]
    fn logistic_model_round_trips_through_toml() {
        let model = LogisticModel {
            bias: -2.5,
            weights: [0.01, -0.02, 0.1, 0.4, 0.3, 0.2, 0.6, 2.0, 1.5],
        };
        let file = NamedTempFile::new().unwrap();
        model.save(file.path()).unwrap();
        let loaded = LogisticModel::load(file.path()).unwrap();
        assert_abs_diff_eq!(loaded.bias, model.bias);
        for (a, b) in loaded.weights.iter().zip(model.weights.iter()) {
            assert_abs_diff_eq!(*a, *b);
        }
    }

    #[test]
    fn logistic_probability_is_a_valid_class_probability() {
        let model = LogisticModel {
            bias: -2.5,
            weights: [0.0, 0.0, 0.0, 0.5, 0.3, 0.2, 0.6, 2.0, 1.5],
        };
        let prediction = model.predict(&feature_vector(&clean_measurement())).unwrap();
        assert!(prediction.probability > 0.5 && prediction.probability < 1.0);
        // bias -2.5 with all suspect features at zero: confidently not suspicious.
        assert!(!prediction.suspicious);
    }
}
