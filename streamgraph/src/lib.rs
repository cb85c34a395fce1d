//! Streamgraph layout library: CSV ingestion, wiggle stacking, scales,
//! smoothed layer geometry, legend and hover detail.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod config;
pub mod curve;
pub mod hover;
pub mod render;
pub mod scale;
pub mod session;
pub mod stack;

pub use config::{palette_color, parse_hex_color, ChartConfig, HoverConfig, LegendConfig, Margins};
pub use curve::{PathCommand, Point};
pub use hover::{compute_hover_series, Bar, HoverChart, HoverEvent, HoverState};
pub use render::{build_chart, render_layers, render_legend, AxisTick, Chart, LayerShape, LegendEntry};
pub use scale::{make_scales, BandScale, LinearScale, Scales, TimeScale};
pub use session::{ChartSession, LoadedChart, UploadTicket};
pub use stack::{
    build_stack, layers_csv, stack_extent, wiggle_offsets, write_layer_rows, Layer, StackPoint,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseErrorKind {
    #[error("missing header row")]
    MissingHeader,
    #[error("header has no category columns")]
    NoCategories,
    #[error("column {index} has a blank name")]
    BlankColumn { index: usize },
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    #[error("expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("unparseable date '{0}'")]
    InvalidDate(String),
    #[error("missing value for '{column}'")]
    MissingValue { column: String },
    #[error("non-numeric value '{value}' for '{column}'")]
    NonNumeric { column: String, value: String },
    #[error("{0}")]
    Csv(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    pub line: u64,
    pub kind: ParseErrorKind,
}

impl ParseError {
    fn new(line: u64, kind: ParseErrorKind) -> Self {
        Self { line, kind }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SgError {
    #[error("failed to parse CSV: {0}")]
    Parse(#[from] ParseError),
    #[error("dataset has no records")]
    EmptyDataset,
    #[error("upload {generation} superseded by upload {latest}")]
    StaleUpload { generation: u64, latest: u64 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to write layer rows: {0}")]
    Export(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub values: HashMap<String, f64>,
}

impl Record {
    /// Value for `key`; absent or non-finite values read as zero.
    pub fn value(&self, key: &str) -> f64 {
        self.values
            .get(key)
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub date_column: String,
    pub keys: Vec<String>,
    pub records: Vec<Record>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn key_index(&self, key: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == key)
    }

    /// Earliest and latest timestamps; rows need not be sorted.
    pub fn date_extent(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.records.first()?.timestamp;
        Some(self.records.iter().fold((first, first), |(lo, hi), r| {
            (lo.min(r.timestamp), hi.max(r.timestamp))
        }))
    }

    /// Records x keys matrix of normalized values.
    pub fn value_matrix(&self, keys: &[String]) -> Array2<f64> {
        Array2::from_shape_fn((self.records.len(), keys.len()), |(row, col)| {
            self.records[row].value(&keys[col])
        })
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Parse the date forms accepted in the first CSV column. Values without an
/// offset are taken as UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    let month_only = format!("{value}-01");
    for (candidate, fmt) in DATE_FORMATS
        .iter()
        .map(|fmt| (value, *fmt))
        .chain(std::iter::once((month_only.as_str(), "%Y-%m-%d")))
    {
        if let Ok(date) = NaiveDate::parse_from_str(candidate, fmt) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

fn parse_number(cell: &str) -> Option<f64> {
    cell.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn csv_error(err: &csv::Error) -> ParseError {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    ParseError::new(line, ParseErrorKind::Csv(err.to_string()))
}

/// Parse CSV text with a date column followed by numeric category columns.
/// The first bad row aborts the parse; no partial dataset is returned.
pub fn parse_csv(text: &str) -> Result<Dataset, SgError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers().map_err(|e| csv_error(&e))?.clone();
    if headers.is_empty() || headers.iter().all(str::is_empty) {
        return Err(ParseError::new(1, ParseErrorKind::MissingHeader).into());
    }

    let date_column = headers.get(0).unwrap_or_default().to_string();
    let keys: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
    if keys.is_empty() {
        return Err(ParseError::new(1, ParseErrorKind::NoCategories).into());
    }
    let mut seen = HashSet::new();
    for (index, name) in headers.iter().enumerate() {
        if index > 0 && name.is_empty() {
            return Err(ParseError::new(1, ParseErrorKind::BlankColumn { index }).into());
        }
        if !seen.insert(name) {
            return Err(ParseError::new(1, ParseErrorKind::DuplicateColumn(name.to_string())).into());
        }
    }

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result.map_err(|e| csv_error(&e))?;
        let line = row.position().map(|p| p.line()).unwrap_or(0);
        if row.len() != headers.len() {
            return Err(ParseError::new(
                line,
                ParseErrorKind::FieldCount {
                    expected: headers.len(),
                    found: row.len(),
                },
            )
            .into());
        }

        let raw_date = row.get(0).unwrap_or_default();
        let timestamp = parse_date(raw_date).ok_or_else(|| {
            ParseError::new(line, ParseErrorKind::InvalidDate(raw_date.to_string()))
        })?;

        let mut values = HashMap::with_capacity(keys.len());
        for (key, cell) in keys.iter().zip(row.iter().skip(1)) {
            if cell.is_empty() {
                return Err(ParseError::new(
                    line,
                    ParseErrorKind::MissingValue { column: key.clone() },
                )
                .into());
            }
            let value = parse_number(cell).ok_or_else(|| {
                ParseError::new(
                    line,
                    ParseErrorKind::NonNumeric {
                        column: key.clone(),
                        value: cell.to_string(),
                    },
                )
            })?;
            values.insert(key.clone(), value);
        }
        records.push(Record { timestamp, values });
    }

    debug!(records = records.len(), keys = keys.len(), "parsed CSV dataset");
    Ok(Dataset {
        date_column,
        keys,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn parses_rows_in_file_order() {
        let ds = parse_csv("Date,A,B\n2024-01-01,1,2\n2024-02-01,3,4\n").unwrap();
        assert_eq!(ds.date_column, "Date");
        assert_eq!(ds.keys, vec!["A", "B"]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.records[0].timestamp, ymd(2024, 1, 1));
        assert_eq!(ds.records[0].value("A"), 1.0);
        assert_eq!(ds.records[0].value("B"), 2.0);
        assert_eq!(ds.records[1].timestamp, ymd(2024, 2, 1));
        assert_eq!(ds.records[1].value("A"), 3.0);
        assert_eq!(ds.records[1].value("B"), 4.0);
    }

    #[test]
    fn keeps_unsorted_rows_and_reports_extent() {
        let ds = parse_csv("when,x\n2024-03-01,1\n2024-01-01,2\n2024-02-01,3\n").unwrap();
        assert_eq!(ds.records[0].timestamp, ymd(2024, 3, 1));
        assert_eq!(ds.date_extent(), Some((ymd(2024, 1, 1), ymd(2024, 3, 1))));
    }

    #[test]
    fn header_only_is_an_empty_dataset() {
        let ds = parse_csv("Date,A\n").unwrap();
        assert!(ds.is_empty());
        assert_eq!(ds.date_extent(), None);
    }

    #[test]
    fn tolerates_bom_whitespace_and_blank_lines() {
        let ds = parse_csv("\u{feff}Date, A ,B\n\n 2024-01-01 , 1.5 ,-2\n").unwrap();
        assert_eq!(ds.keys, vec!["A", "B"]);
        assert_eq!(ds.records[0].value("A"), 1.5);
        assert_eq!(ds.records[0].value("B"), -2.0);
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = parse_csv("Date,A,B\n2024-01-01,1,2\n2024-02-01,3\n").unwrap_err();
        match err {
            SgError::Parse(ParseError { line, kind }) => {
                assert_eq!(line, 3);
                assert_eq!(kind, ParseErrorKind::FieldCount { expected: 3, found: 2 });
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_non_numeric_values() {
        let err = parse_csv("Date,A,B\n2024-01-01,1,two\n").unwrap_err();
        assert!(matches!(
            err,
            SgError::Parse(ParseError {
                kind: ParseErrorKind::NonNumeric { .. },
                ..
            })
        ));
        let err = parse_csv("Date,A\n2024-01-01,NaN\n").unwrap_err();
        assert!(matches!(err, SgError::Parse(_)));
    }

    #[test]
    fn rejects_missing_values_and_bad_dates() {
        let err = parse_csv("Date,A,B\n2024-01-01,,2\n").unwrap_err();
        assert!(matches!(
            err,
            SgError::Parse(ParseError {
                kind: ParseErrorKind::MissingValue { .. },
                ..
            })
        ));
        let err = parse_csv("Date,A\nnot-a-date,1\n").unwrap_err();
        assert!(matches!(
            err,
            SgError::Parse(ParseError {
                line: 2,
                kind: ParseErrorKind::InvalidDate(_),
            })
        ));
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(
            parse_csv("").unwrap_err(),
            SgError::Parse(ParseError {
                kind: ParseErrorKind::MissingHeader,
                ..
            })
        ));
        assert!(matches!(
            parse_csv("Date\n2024-01-01\n").unwrap_err(),
            SgError::Parse(ParseError {
                kind: ParseErrorKind::NoCategories,
                ..
            })
        ));
        assert!(matches!(
            parse_csv("Date,A,A\n").unwrap_err(),
            SgError::Parse(ParseError {
                kind: ParseErrorKind::DuplicateColumn(_),
                ..
            })
        ));
    }

    #[test]
    fn date_forms() {
        assert_eq!(parse_date("2024-01-15"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date("2024/01/15"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date("01/15/2024"), Some(ymd(2024, 1, 15)));
        assert_eq!(parse_date("2024-01"), Some(ymd(2024, 1, 1)));
        assert_eq!(
            parse_date("2024-01-15T06:30:00Z"),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 6, 30, 0).unwrap())
        );
        assert_eq!(
            parse_date("2024-01-15 06:30"),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 6, 30, 0).unwrap())
        );
        assert_eq!(parse_date("2024-13-01"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn missing_keys_read_as_zero() {
        let record = Record {
            timestamp: ymd(2024, 1, 1),
            values: HashMap::from([("A".to_string(), f64::NAN)]),
        };
        assert_eq!(record.value("A"), 0.0);
        assert_eq!(record.value("B"), 0.0);
    }
}
