use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DataQualityReport {
    /// Rows kept after dropping invalid closes and duplicate dates.
    pub rows: usize,
    pub duplicates: usize,
    pub out_of_order: usize,
    pub invalid_close: usize,
    /// Rows dropped for an unparseable or non-finite open/high/low/volume.
    pub invalid_numeric: usize,
    /// Rows dropped because the date could not be parsed.
    pub invalid_date: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub first_duplicate: Option<NaiveDate>,
    pub first_invalid_close: Option<NaiveDate>,
    pub first_invalid_numeric: Option<NaiveDate>,
}

impl DataQualityReport {
    /// Rows that were dropped for any reason other than a duplicate date.
    pub fn rejected(&self) -> usize {
        self.invalid_close + self.invalid_numeric + self.invalid_date
    }
}

/// Scores raw `(date, close)` observations of one ticker in file order.
pub fn data_quality_from_rows(rows: &[(NaiveDate, f64)]) -> DataQualityReport {
    let mut report = DataQualityReport::default();
    let mut seen = BTreeSet::new();
    let mut last_date: Option<NaiveDate> = None;

    for &(date, close) in rows {
        if !close.is_finite() || close <= 0.0 {
            report.invalid_close += 1;
            report.first_invalid_close.get_or_insert(date);
            continue;
        }

        if let Some(prev) = last_date {
            if date < prev {
                report.out_of_order += 1;
            }
        }
        last_date = Some(date);

        if !seen.insert(date) {
            report.duplicates += 1;
            report.first_duplicate.get_or_insert(date);
        }
    }

    report.rows = seen.len();
    report.first_date = seen.first().copied();
    report.last_date = seen.last().copied();
    report
}
