//! # Batch Intake and Reporting
//!
//! Reads field measurement batches from TSV, drives each record through the
//! quality gate, Z-score transform, and pathway classifier, and writes a
//! TSV report. This is the only module that owns a file format; the core
//! decision functions stay plain-data in, plain-data out.
//!
//! A SUSPICIOUS quality verdict does not suppress classification: the
//! downstream reviewer sees both the verdict and the provisional
//! classification side by side and decides whether to re-measure. An age
//! with no growth-reference row, by contrast, leaves the Z-score and
//! classification columns empty, because there is nothing defensible to
//! print.

use crate::classify::classify_pathway;
use crate::forecast::ClassifiedRecord;
use crate::quality::{QualityGate, QualityVerdict};
use crate::reference::LmsTable;
use crate::types::{
    ClassificationResult, Measurement, parse_appetite_label, parse_sex_label, parse_status_label,
};
use crate::zscore::compute_zscore;
use chrono::NaiveDate;
use serde::Deserialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed intake row: {0}")]
    Csv(#[from] csv::Error),
    #[error("Row {row}: {message}")]
    InvalidField { row: usize, message: String },
}

#[derive(Debug, Deserialize)]
struct IntakeRow {
    child_id: String,
    sex: String,
    age_months: i32,
    muac_mm: i32,
    edema: i32,
    appetite: String,
    danger_signs: u8,
}

/// One intake record with its field identifier. The core never persists
/// this; the identifier exists purely to label report rows.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeRecord {
    pub child_id: String,
    pub measurement: Measurement,
}

/// Reads an intake batch from TSV with a
/// `child_id\tsex\tage_months\tmuac_mm\tedema\tappetite\tdanger_signs` header.
///
/// Sex must parse (there is no growth reference without it); appetite is
/// deliberately lenient, because unknown appetite labels are a data-quality
/// signal the gate wants to see, not a parse failure.
pub fn read_measurements<R: Read>(reader: R) -> Result<Vec<IntakeRecord>, IntakeError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for (index, row) in csv_reader.deserialize::<IntakeRow>().enumerate() {
        let row_number = index + 2;
        let parsed = row?;
        let sex = parse_sex_label(&parsed.sex).map_err(|message| IntakeError::InvalidField {
            row: row_number,
            message,
        })?;
        records.push(IntakeRecord {
            child_id: parsed.child_id,
            measurement: Measurement {
                age_months: parsed.age_months,
                sex,
                muac_mm: parsed.muac_mm,
                edema: parsed.edema,
                appetite: parse_appetite_label(&parsed.appetite),
                danger_signs: parsed.danger_signs != 0,
            },
        });
    }
    Ok(records)
}

pub fn read_measurements_path<P: AsRef<Path>>(path: P) -> Result<Vec<IntakeRecord>, IntakeError> {
    let file = File::open(path.as_ref())?;
    let records = read_measurements(file)?;
    log::info!(
        "Read {} intake record(s) from '{}'",
        records.len(),
        path.as_ref().display()
    );
    Ok(records)
}

/// Everything the pipeline produced for one intake record.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub child_id: String,
    pub verdict: QualityVerdict,
    pub zscore: Option<f64>,
    pub classification: Option<ClassificationResult>,
}

/// Runs quality gate, Z-score, and classifier over a batch.
pub fn run_pipeline(
    records: &[IntakeRecord],
    gate: &QualityGate,
    table: &LmsTable,
) -> Vec<PipelineOutcome> {
    records
        .iter()
        .map(|record| {
            let measurement = &record.measurement;
            let verdict = gate.check(measurement);
            let zscore = match compute_zscore(
                measurement.muac_cm(),
                measurement.age_months,
                measurement.sex,
                table,
            ) {
                Ok(z) => Some(z),
                Err(error) => {
                    log::warn!("Child '{}': {}", record.child_id, error);
                    None
                }
            };
            let classification = zscore.map(|z| classify_pathway(measurement, z));
            PipelineOutcome {
                child_id: record.child_id.clone(),
                verdict,
                zscore,
                classification,
            }
        })
        .collect()
}

/// Writes the batch report as TSV. Columns without a value (no reference
/// row for the age) are left empty rather than filled with sentinels.
pub fn write_report<W: Write>(writer: W, outcomes: &[PipelineOutcome]) -> Result<(), IntakeError> {
    let mut csv_writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(writer);
    csv_writer.write_record([
        "child_id",
        "quality_status",
        "quality_confidence",
        "flags",
        "recommendation",
        "muac_zscore",
        "clinical_status",
        "recommended_pathway",
        "confidence",
    ])?;

    for outcome in outcomes {
        let flags = outcome
            .verdict
            .flags
            .iter()
            .map(|f| f.code())
            .collect::<Vec<_>>()
            .join(",");
        let zscore = outcome.zscore.map(|z| format!("{z:.2}")).unwrap_or_default();
        let (status, pathway, confidence) = match &outcome.classification {
            Some(c) => (
                c.clinical_status.to_string(),
                c.recommended_pathway.to_string(),
                format!("{:.3}", c.confidence),
            ),
            None => (String::new(), String::new(), String::new()),
        };
        csv_writer.write_record([
            outcome.child_id.as_str(),
            &outcome.verdict.status.to_string(),
            &format!("{:.2}", outcome.verdict.confidence),
            &flags,
            &outcome.verdict.recommendation,
            &zscore,
            &status,
            &pathway,
            &confidence,
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ClassifiedRow {
    status: String,
    date: String,
}

/// Reads already-classified records (for forecasting) from TSV with a
/// `status\tdate` header, dates in `YYYY-MM-DD`.
pub fn read_classified_records<R: Read>(reader: R) -> Result<Vec<ClassifiedRecord>, IntakeError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for (index, row) in csv_reader.deserialize::<ClassifiedRow>().enumerate() {
        let row_number = index + 2;
        let parsed = row?;
        let status =
            parse_status_label(&parsed.status).map_err(|message| IntakeError::InvalidField {
                row: row_number,
                message,
            })?;
        let recorded_at = NaiveDate::parse_from_str(parsed.date.trim(), "%Y-%m-%d").map_err(
            |error| IntakeError::InvalidField {
                row: row_number,
                message: format!("Invalid date '{}': {}", parsed.date, error),
            },
        )?;
        records.push(ClassifiedRecord {
            status,
            recorded_at,
        });
    }
    Ok(records)
}

pub fn read_classified_records_path<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<ClassifiedRecord>, IntakeError> {
    let file = File::open(path.as_ref())?;
    let records = read_classified_records(file)?;
    log::info!(
        "Read {} classified record(s) from '{}'",
        records.len(),
        path.as_ref().display()
    );
    Ok(records)
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::QualityStatus;
    use crate::types::{Appetite, ClinicalStatus, Pathway, Sex};

    fn fixture_table() -> LmsTable {
        let content = "month\tsex\tl\tm\ts\n\
                       24\tM\t1.0\t16.0\t0.25\n\
                       24\tF\t1.0\t15.5\t0.25\n";
        LmsTable::from_reader(content.as_bytes()).unwrap()
    }

    #[test]
    fn reads_a_batch_and_tolerates_unknown_appetite() {
        let content = "child_id\tsex\tage_months\tmuac_mm\tedema\tappetite\tdanger_signs\n\
                       C-001\tM\t24\t114\t0\tgood\t0\n\
                       C-002\tF\t24\t102\t1\travenous\t1\n";
        let records = read_measurements(content.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].child_id, "C-001");
        assert_eq!(records[0].measurement.sex, Sex::Male);
        assert_eq!(records[1].measurement.appetite, Appetite::Unknown);
        assert!(records[1].measurement.danger_signs);
    }

    #[test]
    fn bad_sex_label_reports_the_row() {
        let content = "child_id\tsex\tage_months\tmuac_mm\tedema\tappetite\tdanger_signs\n\
                       C-001\tZ\t24\t114\t0\tgood\t0\n";
        let err = read_measurements(content.as_bytes()).unwrap_err();
        match err {
            IntakeError::InvalidField { row, .. } => assert_eq!(row, 2),
            other => panic!("Expected InvalidField, got {:?}", other),
        }
    }

    #[test]
    fn pipeline_classifies_in_range_records_and_skips_unknown_ages() {
        let records = vec![
            IntakeRecord {
                child_id: "C-001".to_string(),
                measurement: Measurement {
                    age_months: 24,
                    sex: Sex::Male,
                    muac_mm: 102, // 10.2 cm -> z = ((10.2/16)-1)/0.25 = -1.45
                    edema: 0,
                    appetite: Appetite::Good,
                    danger_signs: false,
                },
            },
            IntakeRecord {
                child_id: "C-002".to_string(),
                measurement: Measurement {
                    age_months: 48, // no reference row in the fixture
                    sex: Sex::Male,
                    muac_mm: 140,
                    edema: 0,
                    appetite: Appetite::Good,
                    danger_signs: false,
                },
            },
        ];
        let gate = QualityGate::rule_based();
        let table = fixture_table();
        let outcomes = run_pipeline(&records, &gate, &table);

        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].verdict.status, QualityStatus::Ok);
        assert_eq!(outcomes[0].zscore, Some(-1.45));
        assert_eq!(
            outcomes[0].classification.unwrap().clinical_status,
            ClinicalStatus::Healthy
        );

        assert!(outcomes[1].zscore.is_none());
        assert!(outcomes[1].classification.is_none());
    }

    #[test]
    fn report_round_trips_through_the_writer() {
        let records = vec![IntakeRecord {
            child_id: "C-010".to_string(),
            measurement: Measurement {
                age_months: 24,
                sex: Sex::Female,
                muac_mm: 100, // 10.0 cm -> z = ((10.0/15.5)-1)/0.25 = -1.42
                edema: 2,
                appetite: Appetite::Failed,
                danger_signs: false,
            },
        }];
        let gate = QualityGate::rule_based();
        let table = fixture_table();
        let outcomes = run_pipeline(&records, &gate, &table);

        let mut buffer = Vec::new();
        write_report(&mut buffer, &outcomes).unwrap();
        let report = String::from_utf8(buffer).unwrap();

        let mut lines = report.lines();
        assert!(lines.next().unwrap().starts_with("child_id\tquality_status"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("C-010\tOK"));
        // Edema 2 forces SAM with inpatient referral.
        assert!(row.contains("SAM"));
        assert!(row.contains(&Pathway::ScItp.to_string()));
    }

    #[test]
    fn classified_records_parse_status_and_date() {
        let content = "status\tdate\nSAM\t2026-07-14\nHealthy\t2026-06-02\n";
        let records = read_classified_records(content.as_bytes()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, ClinicalStatus::Sam);
        assert_eq!(
            records[0].recorded_at,
            NaiveDate::from_ymd_opt(2026, 7, 14).unwrap()
        );

        let bad = "status\tdate\nSAM\tJuly 14\n";
        assert!(matches!(
            read_classified_records(bad.as_bytes()).unwrap_err(),
            IntakeError::InvalidField { row: 2, .. }
        ));
    }
}
