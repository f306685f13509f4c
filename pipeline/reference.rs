//! # Growth-Reference Table Loading
//!
//! This module is the exclusive entry point for the WHO arm-circumference-for-age
//! growth reference. It reads a tabular file (TSV), validates it against a
//! strict, predefined schema, and exposes an immutable in-memory lookup keyed
//! by (age-in-months, sex).
//!
//! - Strict Schema: column names are not configurable. The module enforces
//!   `month`, `sex`, `l`, `m`, `s`. This eliminates a class of configuration
//!   errors at the cost of flexibility nobody asked for.
//! - One entry per key: a reference with two rows for the same (month, sex)
//!   is corrupt, and loading fails loudly rather than letting one row shadow
//!   the other.
//! - No extrapolation: a lookup outside the table's age range returns `None`.
//!   Callers must treat that as an explicit error, never interpolate.
//!
//! The table is loaded once at process start and shared read-only for the
//! process lifetime; concurrent readers need no locking.

use crate::types::{Sex, parse_sex_label};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// The (L, M, S) triple for one (age, sex) cell of the reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmsEntry {
    /// Box-Cox power.
    pub l: f64,
    /// Reference median (cm).
    pub m: f64,
    /// Coefficient of variation.
    pub s: f64,
}

/// A comprehensive error type for all reference loading and validation failures.
#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("IO error while reading reference table: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed reference row: {0}")]
    Csv(#[from] csv::Error),
    #[error("Row {row}: {message}")]
    InvalidField { row: usize, message: String },
    #[error("Duplicate reference entry for month {month}, sex {sex}. Exactly one row per (month, sex) is required.")]
    DuplicateEntry { month: i32, sex: Sex },
    #[error(
        "Row {row}: non-finite or non-positive LMS parameters (L={l}, M={m}, S={s}). M and S must be positive and all values finite."
    )]
    InvalidParameters {
        row: usize,
        l: f64,
        m: f64,
        s: f64,
    },
    #[error("Reference table contains no data rows.")]
    EmptyTable,
}

#[derive(Debug, Deserialize)]
struct LmsRow {
    month: i32,
    sex: String,
    l: f64,
    m: f64,
    s: f64,
}

/// The in-memory growth reference. Immutable after construction.
#[derive(Debug, Clone)]
pub struct LmsTable {
    entries: HashMap<(i32, Sex), LmsEntry>,
}

impl LmsTable {
    /// Loads and validates a reference table from a TSV file on disk.
    pub fn from_tsv_path<P: AsRef<Path>>(path: P) -> Result<Self, ReferenceError> {
        let file = File::open(path.as_ref())?;
        let table = Self::from_reader(file)?;
        log::info!(
            "Loaded growth reference '{}' ({} entries)",
            path.as_ref().display(),
            table.len()
        );
        Ok(table)
    }

    /// Loads and validates a reference table from any reader producing TSV
    /// with a `month\tsex\tl\tm\ts` header.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ReferenceError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(reader);

        let mut entries = HashMap::new();
        for (index, record) in csv_reader.deserialize::<LmsRow>().enumerate() {
            // Header is row 1; first data row is row 2.
            let row = index + 2;
            let parsed = record?;
            let sex = parse_sex_label(&parsed.sex)
                .map_err(|message| ReferenceError::InvalidField { row, message })?;

            let valid = parsed.l.is_finite()
                && parsed.m.is_finite()
                && parsed.s.is_finite()
                && parsed.m > 0.0
                && parsed.s > 0.0;
            if !valid {
                return Err(ReferenceError::InvalidParameters {
                    row,
                    l: parsed.l,
                    m: parsed.m,
                    s: parsed.s,
                });
            }

            let entry = LmsEntry {
                l: parsed.l,
                m: parsed.m,
                s: parsed.s,
            };
            if entries.insert((parsed.month, sex), entry).is_some() {
                return Err(ReferenceError::DuplicateEntry {
                    month: parsed.month,
                    sex,
                });
            }
        }

        if entries.is_empty() {
            return Err(ReferenceError::EmptyTable);
        }
        Ok(LmsTable { entries })
    }

    /// Exact-row lookup. `None` means the age is outside the supported range
    /// for that sex; there is deliberately no nearest-row fallback.
    pub fn lookup(&self, age_months: i32, sex: Sex) -> Option<&LmsEntry> {
        self.entries.get(&(age_months, sex))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
