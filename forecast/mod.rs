//! # Caseload Trend Forecasting
//!
//! Aggregates classified records into monthly counts and projects the next
//! three months per severity category with an ordinary-least-squares line,
//! then derives trend percentages, threshold alerts, and programme resource
//! estimates. The forecast is advisory: every failure mode degrades to a
//! payload carrying a warning string, never an error return or a panic.
//!
//! Results are recomputed from the caller's snapshot on every request and
//! never cached; the caller is responsible for snapshot consistency.
//!
//! The trend percentage deliberately mixes window sizes: the "recent" side
//! averages the last 3 points only once 3 exist, and the "older" side
//! averages the first 3 only once 6 exist, falling back to the single
//! latest/earliest point otherwise. Changing that would silently change
//! observable trend figures, so the policy is preserved as-is.

use crate::types::ClinicalStatus;
use chrono::{Datelike, Days, Months, NaiveDate};
use ndarray::Array1;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// How many future periods every projection covers.
const FORECAST_PERIODS: usize = 3;
/// Minimum points before a regression line is trusted over a flat mean.
const MIN_POINTS_FOR_REGRESSION: usize = 3;
/// Minimum historical months for a "medium" confidence label.
const MIN_MONTHS_FOR_MEDIUM: usize = 6;

const SAM_ALERT_TREND_PERCENT: f64 = 10.0;
const MAM_ALERT_TREND_PERCENT: f64 = 15.0;

/// RUTF sachets per SAM child over a standard 8-week course.
const RUTF_SACHETS_PER_SAM: f64 = 92.0;
/// Supplementary food (CSB+) kg per MAM child per month.
const CSB_KG_PER_MAM: f64 = 15.0;
/// Caseload one community health worker can carry.
const CASES_PER_CHW: f64 = 50.0;
/// Share of SAM cases expected to need inpatient stabilization.
const SC_ITP_SHARE: f64 = 0.3;
/// Share of SAM cases expected to be managed as outpatients.
const OTP_SHARE: f64 = 0.7;

/// A persisted record reduced to what forecasting needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifiedRecord {
    pub status: ClinicalStatus,
    pub recorded_at: NaiveDate,
}

/// Read-only summary of one calendar month of classified records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MonthlyAggregate {
    /// First day of the month this bucket covers.
    pub month: NaiveDate,
    pub sam: u32,
    pub mam: u32,
    pub healthy: u32,
    pub total: u32,
}

impl MonthlyAggregate {
    pub fn label(&self) -> String {
        self.month.format("%Y-%m").to_string()
    }
}

#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct SeriesSet {
    pub months: Vec<String>,
    pub sam: Vec<u32>,
    pub mam: Vec<u32>,
    pub total: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    High,
    Medium,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub kind: &'static str,
    pub message: String,
    pub recommendation: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq)]
pub struct TrendSummary {
    /// Percentage change, rounded to 1 decimal place.
    pub sam_trend: f64,
    pub mam_trend: f64,
    pub sam_direction: &'static str,
    pub mam_direction: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq)]
pub struct ResourceEstimate {
    pub rutf_sachets: u64,
    pub csb_kg: u64,
    pub chw_needed: u64,
    pub sc_itp_beds: u64,
    pub otp_capacity: u64,
}

/// The full advisory payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ForecastResult {
    pub historical: SeriesSet,
    pub forecast: SeriesSet,
    pub trends: TrendSummary,
    pub alerts: Vec<Alert>,
    pub resources: ResourceEstimate,
    /// "medium" with >= 6 months of history, "low" otherwise.
    pub confidence: &'static str,
    /// Present only when the computation degraded.
    pub warning: Option<String>,
}

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error(
        "Aggregate for {month} is inconsistent: SAM ({sam}) + MAM ({mam}) exceeds total ({total})."
    )]
    InconsistentAggregate {
        month: String,
        sam: u32,
        mam: u32,
        total: u32,
    },
    #[error("Regression produced a non-finite projection.")]
    NonFiniteProjection,
    #[error("Regression input is degenerate (zero variance in the time index).")]
    DegenerateRegression,
}

/// Buckets classified records into calendar months over the trailing 12
/// months ending at `as_of`, in chronological order. Single pass; records
/// outside the window are ignored.
pub fn aggregate_monthly(records: &[ClassifiedRecord], as_of: NaiveDate) -> Vec<MonthlyAggregate> {
    let window_start = as_of - Days::new(365);
    let mut buckets: BTreeMap<NaiveDate, (u32, u32, u32)> = BTreeMap::new();

    for record in records {
        if record.recorded_at < window_start || record.recorded_at > as_of {
            continue;
        }
        let anchor = record
            .recorded_at
            .with_day(1)
            .unwrap_or(record.recorded_at);
        let entry = buckets.entry(anchor).or_default();
        match record.status {
            ClinicalStatus::Sam => entry.0 += 1,
            ClinicalStatus::Mam => entry.1 += 1,
            ClinicalStatus::Healthy => entry.2 += 1,
        }
    }

    buckets
        .into_iter()
        .map(|(month, (sam, mam, healthy))| MonthlyAggregate {
            month,
            sam,
            mam,
            healthy,
            total: sam + mam + healthy,
        })
        .collect()
}

/// Counts and prevalence percentages over a set of classified records.
#[derive(Debug, Clone, Copy, Serialize, Default, PartialEq)]
pub struct PrevalenceSummary {
    pub total: u64,
    pub sam_count: u64,
    pub mam_count: u64,
    pub healthy_count: u64,
    /// Percent of all records classified SAM, rounded to 1 decimal place.
    pub sam_prevalence: f64,
    pub mam_prevalence: f64,
}

pub fn prevalence_summary(records: &[ClassifiedRecord]) -> PrevalenceSummary {
    let mut summary = PrevalenceSummary::default();
    for record in records {
        summary.total += 1;
        match record.status {
            ClinicalStatus::Sam => summary.sam_count += 1,
            ClinicalStatus::Mam => summary.mam_count += 1,
            ClinicalStatus::Healthy => summary.healthy_count += 1,
        }
    }
    if summary.total > 0 {
        let total = summary.total as f64;
        summary.sam_prevalence = round1(summary.sam_count as f64 / total * 100.0);
        summary.mam_prevalence = round1(summary.mam_count as f64 / total * 100.0);
    }
    summary
}

/// Projects the next 3 months from historical monthly aggregates. Never
/// fails: an internal computation error degrades to an empty projection with
/// a `warning` message.
pub fn forecast(aggregates: &[MonthlyAggregate]) -> ForecastResult {
    match compute(aggregates) {
        Ok(result) => result,
        Err(error) => {
            log::warn!("Forecast degraded: {error}");
            ForecastResult {
                historical: historical_series(aggregates),
                forecast: SeriesSet::default(),
                trends: TrendSummary {
                    sam_trend: 0.0,
                    mam_trend: 0.0,
                    sam_direction: "decreasing",
                    mam_direction: "decreasing",
                },
                alerts: Vec::new(),
                resources: ResourceEstimate::default(),
                confidence: "low",
                warning: Some(error.to_string()),
            }
        }
    }
}

fn compute(aggregates: &[MonthlyAggregate]) -> Result<ForecastResult, ForecastError> {
    for aggregate in aggregates {
        if aggregate.sam + aggregate.mam > aggregate.total {
            return Err(ForecastError::InconsistentAggregate {
                month: aggregate.label(),
                sam: aggregate.sam,
                mam: aggregate.mam,
                total: aggregate.total,
            });
        }
    }

    let sam_series: Vec<u32> = aggregates.iter().map(|a| a.sam).collect();
    let mam_series: Vec<u32> = aggregates.iter().map(|a| a.mam).collect();
    let total_series: Vec<u32> = aggregates.iter().map(|a| a.total).collect();

    let sam_projection = project_series(&sam_series)?;
    let mam_projection = project_series(&mam_series)?;
    let total_projection = project_series(&total_series)?;

    let sam_trend = trend_percent(&sam_series);
    let mam_trend = trend_percent(&mam_series);

    let mut alerts = Vec::new();
    if sam_trend > SAM_ALERT_TREND_PERCENT {
        alerts.push(Alert {
            severity: AlertSeverity::High,
            kind: "SAM_INCREASE",
            message: format!(
                "SAM cases projected to increase by {sam_trend:.1}% in next 3 months"
            ),
            recommendation: "Increase RUTF stock and SC-ITP capacity",
        });
    }
    if mam_trend > MAM_ALERT_TREND_PERCENT {
        alerts.push(Alert {
            severity: AlertSeverity::Medium,
            kind: "MAM_INCREASE",
            message: format!(
                "MAM cases projected to increase by {mam_trend:.1}% in next 3 months"
            ),
            recommendation: "Prepare additional TSFP resources",
        });
    }

    log::info!(
        "Forecast generated from {} months of history ({} alert(s))",
        aggregates.len(),
        alerts.len()
    );

    Ok(ForecastResult {
        historical: historical_series(aggregates),
        forecast: SeriesSet {
            months: future_month_labels(aggregates),
            sam: truncate_counts(&sam_projection),
            mam: truncate_counts(&mam_projection),
            total: truncate_counts(&total_projection),
        },
        trends: TrendSummary {
            sam_trend,
            mam_trend,
            sam_direction: direction(sam_trend),
            mam_direction: direction(mam_trend),
        },
        alerts,
        resources: resource_estimate(&sam_projection, &mam_projection),
        confidence: if aggregates.len() >= MIN_MONTHS_FOR_MEDIUM {
            "medium"
        } else {
            "low"
        },
        warning: None,
    })
}

fn historical_series(aggregates: &[MonthlyAggregate]) -> SeriesSet {
    SeriesSet {
        months: aggregates.iter().map(MonthlyAggregate::label).collect(),
        sam: aggregates.iter().map(|a| a.sam).collect(),
        mam: aggregates.iter().map(|a| a.mam).collect(),
        total: aggregates.iter().map(|a| a.total).collect(),
    }
}

/// Labels for the 3 projected periods: 30-day steps from the end of the last
/// historical month. Empty when there is no history to anchor to.
fn future_month_labels(aggregates: &[MonthlyAggregate]) -> Vec<String> {
    let Some(last) = aggregates.last() else {
        return Vec::new();
    };
    let window_end = (last.month + Months::new(1)) - Days::new(1);
    (1..=FORECAST_PERIODS as u64)
        .map(|i| (window_end + Days::new(30 * i)).format("%Y-%m").to_string())
        .collect()
}

/// OLS projection when at least 3 points exist, otherwise a flat mean
/// projection (zero for an empty series). Projections are clamped at zero:
/// a negative caseload is not a thing.
fn project_series(series: &[u32]) -> Result<Vec<f64>, ForecastError> {
    let y = Array1::from_iter(series.iter().map(|&v| f64::from(v)));

    if series.len() < MIN_POINTS_FOR_REGRESSION {
        let mean = y.mean().unwrap_or(0.0);
        return Ok(vec![mean; FORECAST_PERIODS]);
    }

    let n = y.len();
    let x = Array1::from_iter((0..n).map(|i| i as f64));
    let x_mean = x.mean().unwrap_or(0.0);
    let y_mean = y.mean().unwrap_or(0.0);

    let x_centered = &x - x_mean;
    let denominator = x_centered.mapv(|v| v * v).sum();
    if denominator == 0.0 {
        return Err(ForecastError::DegenerateRegression);
    }
    let slope = (&x_centered * &(&y - y_mean)).sum() / denominator;
    let intercept = y_mean - slope * x_mean;

    let mut projection = Vec::with_capacity(FORECAST_PERIODS);
    for period in 0..FORECAST_PERIODS {
        let future_x = (n + period) as f64;
        let value = slope * future_x + intercept;
        if !value.is_finite() {
            return Err(ForecastError::NonFiniteProjection);
        }
        projection.push(value.max(0.0));
    }
    Ok(projection)
}

/// Percentage change between the early and late ends of the series.
///
/// Windowing is asymmetric on purpose (see the module docs): last-3 average
/// needs >= 3 points, first-3 average needs >= 6, otherwise the single
/// endpoint is used. A zero baseline yields 0%.
fn trend_percent(series: &[u32]) -> f64 {
    if series.len() < 2 {
        return 0.0;
    }
    let values: Vec<f64> = series.iter().map(|&v| f64::from(v)).collect();
    let recent = if values.len() >= 3 {
        values[values.len() - 3..].iter().sum::<f64>() / 3.0
    } else {
        values[values.len() - 1]
    };
    let older = if values.len() >= 6 {
        values[..3].iter().sum::<f64>() / 3.0
    } else {
        values[0]
    };
    if older == 0.0 {
        return 0.0;
    }
    round1((recent - older) / older * 100.0)
}

fn direction(trend: f64) -> &'static str {
    if trend > 0.0 { "increasing" } else { "decreasing" }
}

fn truncate_counts(projection: &[f64]) -> Vec<u32> {
    projection.iter().map(|&v| v as u32).collect()
}

/// Programme resource needs derived from the summed 3-period projections.
/// Truncation (not rounding) matches the planning convention downstream
/// consumers already rely on.
fn resource_estimate(sam_projection: &[f64], mam_projection: &[f64]) -> ResourceEstimate {
    let total_sam: f64 = sam_projection.iter().sum();
    let total_mam: f64 = mam_projection.iter().sum();

    ResourceEstimate {
        rutf_sachets: (total_sam * RUTF_SACHETS_PER_SAM) as u64,
        csb_kg: (total_mam * CSB_KG_PER_MAM) as u64,
        chw_needed: ((total_sam + total_mam) / CASES_PER_CHW) as u64 + 1,
        sc_itp_beds: (total_sam * SC_ITP_SHARE) as u64,
        otp_capacity: (total_sam * OTP_SHARE) as u64,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
