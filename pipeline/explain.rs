//! # Verdict Explanation
//!
//! Produces a ranked, human-readable account of why a classification came
//! out the way it did. This is decision support, not decision making: the
//! narratives are fixed templates, the ranking comes from externally
//! supplied importance weights, and nothing here can alter a verdict.
//!
//! Pure and side-effect free; depends only on its inputs.

use crate::types::{Appetite, ClassificationResult, ClinicalStatus, Measurement, Pathway};
use itertools::Itertools;
use serde::Serialize;

/// Relative importance of each feature, normally exported from the offline
/// classifier. The defaults are the weights shipped with the current
/// artifact; callers with a retrained model supply their own.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ImportanceWeights {
    pub muac: f64,
    pub edema: f64,
    pub appetite: f64,
    pub danger_signs: f64,
    pub age: f64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            muac: 0.42,
            edema: 0.23,
            appetite: 0.18,
            danger_signs: 0.11,
            age: 0.06,
        }
    }
}

/// One contributing factor: what was observed, how much it matters, and
/// whether it pushed toward the assigned status.
#[derive(Debug, Clone, Serialize)]
pub struct FactorContribution {
    pub feature: &'static str,
    pub observed: String,
    pub weight: f64,
    /// Impact sign: true when the observed value argues for the assigned
    /// clinical status, false when it argues against it.
    pub supports_verdict: bool,
    pub reasons: Vec<&'static str>,
}

/// The full narrative for one classified record.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    /// Factors in descending order of importance weight.
    pub factors: Vec<FactorContribution>,
    /// One fixed interpretation sentence keyed by the recommended pathway.
    pub interpretation: &'static str,
}

/// Builds the ranked explanation for a classified measurement.
pub fn explain(
    measurement: &Measurement,
    result: &ClassificationResult,
    weights: &ImportanceWeights,
) -> Explanation {
    let severe = matches!(
        result.clinical_status,
        ClinicalStatus::Sam | ClinicalStatus::Mam
    );

    let factors = vec![
        muac_factor(measurement, result, weights.muac),
        edema_factor(measurement, result, weights.edema),
        appetite_factor(measurement, severe, weights.appetite),
        danger_factor(measurement, severe, weights.danger_signs),
        age_factor(measurement, severe, weights.age),
    ];

    let factors = factors
        .into_iter()
        .sorted_by(|a, b| b.weight.total_cmp(&a.weight))
        .collect();

    Explanation {
        factors,
        interpretation: interpretation_for(result.recommended_pathway),
    }
}

fn interpretation_for(pathway: Pathway) -> &'static str {
    match pathway {
        Pathway::ScItp => {
            "Severe acute malnutrition with complications - refer to a stabilization centre for inpatient therapeutic care immediately."
        }
        Pathway::Otp => {
            "Severe acute malnutrition without complications - enrol in the outpatient therapeutic programme with weekly RUTF follow-up."
        }
        Pathway::Tsfp => {
            "Moderate acute malnutrition - enrol in targeted supplementary feeding and re-screen at the next scheduled visit."
        }
        Pathway::None => {
            "Measurements are within the healthy range - continue routine growth monitoring."
        }
    }
}

fn muac_factor(
    measurement: &Measurement,
    result: &ClassificationResult,
    weight: f64,
) -> FactorContribution {
    // The MUAC cutoffs the programme screens against (mm).
    let wasted = match result.clinical_status {
        ClinicalStatus::Sam => measurement.muac_mm < 115,
        ClinicalStatus::Mam => measurement.muac_mm < 125,
        ClinicalStatus::Healthy => false,
    };
    let supports_verdict = match result.clinical_status {
        ClinicalStatus::Healthy => !wasted,
        _ => wasted,
    };
    let mut reasons = vec![
        "MUAC is the primary anthropometric indicator of acute wasting",
        "The tape reading drives the MUAC-for-age Z-score directly",
    ];
    if wasted {
        reasons.push("The circumference falls below the programme screening cutoff");
    }
    FactorContribution {
        feature: "muac",
        observed: format!("{} mm", measurement.muac_mm),
        weight,
        supports_verdict,
        reasons,
    }
}

fn edema_factor(
    measurement: &Measurement,
    result: &ClassificationResult,
    weight: f64,
) -> FactorContribution {
    let present = measurement.edema >= 1;
    let supports_verdict = match result.clinical_status {
        ClinicalStatus::Sam => present,
        _ => !present,
    };
    let mut reasons = vec![
        "Bilateral pitting edema is an independent criterion for severe malnutrition",
        "Any edema grade overrides the Z-score classification",
    ];
    if measurement.edema >= 2 {
        reasons.push("Grade 2+ edema routes the child to inpatient stabilization");
    }
    FactorContribution {
        feature: "edema",
        observed: format!("grade {}", measurement.edema),
        weight,
        supports_verdict,
        reasons,
    }
}

fn appetite_factor(measurement: &Measurement, severe: bool, weight: f64) -> FactorContribution {
    let poor = matches!(measurement.appetite, Appetite::Poor | Appetite::Failed);
    let mut reasons = vec![
        "The appetite test screens for metabolic complications",
        "A failed test indicates the child cannot be treated with RUTF at home",
    ];
    if measurement.appetite == Appetite::Failed {
        reasons.push("Failed appetite is an inpatient admission criterion");
    }
    FactorContribution {
        feature: "appetite",
        observed: measurement.appetite.to_string(),
        weight,
        supports_verdict: poor == severe,
        reasons,
    }
}

fn danger_factor(measurement: &Measurement, severe: bool, weight: f64) -> FactorContribution {
    FactorContribution {
        feature: "danger_signs",
        observed: if measurement.danger_signs {
            "present".to_string()
        } else {
            "absent".to_string()
        },
        weight,
        supports_verdict: measurement.danger_signs == severe,
        reasons: vec![
            "IMCI danger signs mark children needing urgent clinical attention",
            "Any danger sign complicates severe malnutrition and forces inpatient referral",
        ],
    }
}

fn age_factor(measurement: &Measurement, severe: bool, weight: f64) -> FactorContribution {
    let high_risk_age = measurement.age_months < 24;
    FactorContribution {
        feature: "age",
        observed: format!("{} months", measurement.age_months),
        weight,
        supports_verdict: high_risk_age == severe,
        reasons: vec![
            "Age selects the growth-reference row the Z-score is computed against",
            "Children under two carry the highest relapse and mortality risk",
        ],
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sex;

    fn sam_case() -> (Measurement, ClassificationResult) {
        let measurement = Measurement {
            age_months: 18,
            sex: Sex::Female,
            muac_mm: 102,
            edema: 2,
            appetite: Appetite::Failed,
            danger_signs: true,
        };
        let result = ClassificationResult {
            clinical_status: ClinicalStatus::Sam,
            recommended_pathway: Pathway::ScItp,
            confidence: 0.9,
        };
        (measurement, result)
    }

    #[test]
    fn factors_are_ranked_by_descending_weight() {
        let (measurement, result) = sam_case();
        let explanation = explain(&measurement, &result, &ImportanceWeights::default());
        let weights: Vec<f64> = explanation.factors.iter().map(|f| f.weight).collect();
        assert!(weights.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(explanation.factors[0].feature, "muac");
        assert_eq!(explanation.factors.len(), 5);
    }

    #[test]
    fn custom_weights_reorder_the_ranking() {
        let (measurement, result) = sam_case();
        let weights = ImportanceWeights {
            muac: 0.1,
            edema: 0.6,
            appetite: 0.1,
            danger_signs: 0.1,
            age: 0.1,
        };
        let explanation = explain(&measurement, &result, &weights);
        assert_eq!(explanation.factors[0].feature, "edema");
    }

    #[test]
    fn complicated_sam_factors_all_support_the_verdict() {
        let (measurement, result) = sam_case();
        let explanation = explain(&measurement, &result, &ImportanceWeights::default());
        for factor in &explanation.factors {
            assert!(
                factor.supports_verdict,
                "factor {} should support the verdict",
                factor.feature
            );
        }
    }

    #[test]
    fn every_factor_carries_two_or_three_reasons() {
        let (measurement, result) = sam_case();
        let explanation = explain(&measurement, &result, &ImportanceWeights::default());
        for factor in &explanation.factors {
            assert!((2..=3).contains(&factor.reasons.len()), "{}", factor.feature);
        }
    }

    #[test]
    fn each_pathway_gets_a_distinct_interpretation() {
        let texts: Vec<&str> = [Pathway::ScItp, Pathway::Otp, Pathway::Tsfp, Pathway::None]
            .iter()
            .map(|p| interpretation_for(*p))
            .collect();
        for (i, a) in texts.iter().enumerate() {
            for b in texts.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert!(texts[0].contains("stabilization centre"));
        assert!(texts[2].contains("supplementary feeding"));
    }

    #[test]
    fn healthy_child_muac_argues_for_the_healthy_verdict() {
        let measurement = Measurement {
            age_months: 36,
            sex: Sex::Male,
            muac_mm: 150,
            edema: 0,
            appetite: Appetite::Good,
            danger_signs: false,
        };
        let result = ClassificationResult {
            clinical_status: ClinicalStatus::Healthy,
            recommended_pathway: Pathway::None,
            confidence: 0.9,
        };
        let explanation = explain(&measurement, &result, &ImportanceWeights::default());
        let muac = explanation
            .factors
            .iter()
            .find(|f| f.feature == "muac")
            .unwrap();
        assert!(muac.supports_verdict);
        let edema = explanation
            .factors
            .iter()
            .find(|f| f.feature == "edema")
            .unwrap();
        assert!(edema.supports_verdict);
    }
}
