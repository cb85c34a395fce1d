// Wiggle-offset stacking (Byron & Wattenberg). Layers are stacked in key order
// on top of a per-record offset chosen to minimize the weighted squared slope
// of every layer's midline.

use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Dataset, SgError};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct StackPoint {
    pub timestamp: DateTime<Utc>,
    pub baseline: f64,
    pub topline: f64,
}

impl StackPoint {
    pub fn thickness(&self) -> f64 {
        self.topline - self.baseline
    }

    pub fn midline(&self) -> f64 {
        (self.baseline + self.topline) / 2.0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Layer {
    pub key: String,
    /// Position of the key in stacking order; drives color assignment.
    pub index: usize,
    pub points: Vec<StackPoint>,
}

impl Layer {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Stack `keys` of `dataset` into one layer per key, in key order.
pub fn build_stack(dataset: &Dataset, keys: &[String]) -> Result<Vec<Layer>, SgError> {
    if dataset.is_empty() {
        return Err(SgError::EmptyDataset);
    }

    let values = dataset.value_matrix(keys);
    let offsets = wiggle_offsets(&values);

    let mut layers: Vec<Layer> = keys
        .iter()
        .enumerate()
        .map(|(index, key)| Layer {
            key: key.clone(),
            index,
            points: Vec::with_capacity(dataset.len()),
        })
        .collect();

    for (row, record) in dataset.records.iter().enumerate() {
        let mut floor = offsets[row];
        for (col, layer) in layers.iter_mut().enumerate() {
            let value = values[[row, col]];
            let topline = floor + value;
            layer.points.push(StackPoint {
                timestamp: record.timestamp,
                baseline: floor,
                topline,
            });
            floor = topline;
        }
    }

    debug!(
        layers = layers.len(),
        records = dataset.len(),
        "built wiggle stack"
    );
    Ok(layers)
}

/// Baseline offset per record for a records x layers value matrix.
///
/// `offset[0] = 0`; each later offset subtracts the thickness-weighted mean
/// midline slope of the layers between the previous record and this one. A
/// record whose values sum to zero carries the previous offset.
pub fn wiggle_offsets(values: &Array2<f64>) -> Array1<f64> {
    let (rows, cols) = values.dim();
    let mut offsets = Array1::zeros(rows);
    let mut offset = 0.0;
    for row in 1..rows {
        let mut total = 0.0;
        let mut weighted = 0.0;
        let mut below = 0.0;
        for col in 0..cols {
            let current = values[[row, col]];
            let delta = current - values[[row - 1, col]];
            let slope = delta / 2.0 + below;
            below += delta;
            total += current;
            weighted += slope * current;
        }
        if total != 0.0 {
            offset -= weighted / total;
        }
        offsets[row] = offset;
    }
    offsets
}

/// Lowest baseline and highest topline across all layers.
pub fn stack_extent(layers: &[Layer]) -> Option<(f64, f64)> {
    let mut points = layers.iter().flat_map(|layer| layer.points.iter());
    let first = points.next()?;
    Some(points.fold((first.baseline, first.topline), |(lo, hi), p| {
        (lo.min(p.baseline), hi.max(p.topline))
    }))
}

const LAYER_COLUMNS: [&str; 5] = ["date", "key", "baseline", "topline", "value"];

fn export_error(err: impl std::fmt::Display) -> SgError {
    SgError::Export(err.to_string())
}

/// One `date,key,baseline,topline,value` row per stacked point, layer by
/// layer. Keys are quoted as needed.
pub fn write_layer_rows<W: Write>(
    layers: &[Layer],
    writer: &mut csv::Writer<W>,
) -> Result<(), SgError> {
    writer.write_record(LAYER_COLUMNS).map_err(export_error)?;
    for layer in layers {
        for point in &layer.points {
            writer
                .write_record([
                    point.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                    layer.key.clone(),
                    format!("{:.6}", point.baseline),
                    format!("{:.6}", point.topline),
                    format!("{:.6}", point.thickness()),
                ])
                .map_err(export_error)?;
        }
    }
    writer.flush().map_err(export_error)?;
    Ok(())
}

/// Layer rows as CSV text.
pub fn layers_csv(layers: &[Layer]) -> Result<String, SgError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    write_layer_rows(layers, &mut writer)?;
    let bytes = writer.into_inner().map_err(export_error)?;
    String::from_utf8(bytes).map_err(export_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_csv;
    use ndarray::array;

    fn keys(ds: &Dataset) -> Vec<String> {
        ds.keys.clone()
    }

    #[test]
    fn single_record_has_zero_offset() {
        let ds = parse_csv("Date,A,B,C\n2024-01-01,3,1,4\n").unwrap();
        let layers = build_stack(&ds, &keys(&ds)).unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0].points[0].baseline, 0.0);
        assert_eq!(layers[0].points[0].topline, 3.0);
        assert_eq!(layers[1].points[0].baseline, 3.0);
        assert_eq!(layers[2].points[0].topline, 8.0);
    }

    #[test]
    fn empty_dataset_is_an_error() {
        let ds = parse_csv("Date,A\n").unwrap();
        assert_eq!(build_stack(&ds, &keys(&ds)), Err(SgError::EmptyDataset));
    }

    #[test]
    fn thickness_matches_values() {
        let ds = parse_csv(
            "Date,A,B,C\n2024-01-01,1,2,3\n2024-02-01,4,0,1\n2024-03-01,2.5,7,0.1\n2024-04-01,0,0,0\n",
        )
        .unwrap();
        let layers = build_stack(&ds, &keys(&ds)).unwrap();
        for layer in &layers {
            for (point, record) in layer.points.iter().zip(&ds.records) {
                let expected = record.value(&layer.key);
                assert!((point.thickness() - expected).abs() < 1e-12);
                assert_eq!(point.timestamp, record.timestamp);
            }
        }
    }

    #[test]
    fn layers_are_contiguous() {
        let ds = parse_csv("Date,A,B\n2024-01-01,1,2\n2024-02-01,3,4\n").unwrap();
        let layers = build_stack(&ds, &keys(&ds)).unwrap();
        for row in 0..ds.len() {
            assert_eq!(layers[0].points[row].topline, layers[1].points[row].baseline);
        }
    }

    #[test]
    fn wiggle_matches_hand_computation() {
        // row 1: deltas A=2, B=2; slopes A=1, B=2+1=3; weighted = 1*3 + 3*4 = 15; total = 7
        let values = array![[1.0, 2.0], [3.0, 4.0]];
        let offsets = wiggle_offsets(&values);
        assert_eq!(offsets[0], 0.0);
        assert!((offsets[1] - (-15.0 / 7.0)).abs() < 1e-12);
    }

    #[test]
    fn constant_series_stays_flat() {
        let values = array![[1.0, 2.0], [1.0, 2.0], [1.0, 2.0]];
        let offsets = wiggle_offsets(&values);
        assert!(offsets.iter().all(|&o| o == 0.0));
    }

    #[test]
    fn zero_total_carries_offset() {
        let values = array![[2.0], [0.0], [0.0]];
        let offsets = wiggle_offsets(&values);
        assert_eq!(offsets[1], 0.0);
        assert_eq!(offsets[2], 0.0);
    }

    #[test]
    fn unknown_and_reordered_keys() {
        let ds = parse_csv("Date,A,B\n2024-01-01,1,2\n2024-02-01,3,4\n").unwrap();
        let order = vec!["B".to_string(), "missing".to_string(), "A".to_string()];
        let layers = build_stack(&ds, &order).unwrap();
        assert_eq!(layers[0].key, "B");
        assert_eq!(layers[1].index, 1);
        assert!(layers[1].points.iter().all(|p| p.thickness() == 0.0));
        assert!((layers[2].points[1].thickness() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn extent_spans_all_layers() {
        let ds = parse_csv("Date,A,B\n2024-01-01,1,2\n2024-02-01,3,4\n").unwrap();
        let layers = build_stack(&ds, &keys(&ds)).unwrap();
        let (lo, hi) = stack_extent(&layers).unwrap();
        assert!((lo - (-15.0 / 7.0)).abs() < 1e-12);
        assert!((hi - 34.0 / 7.0).abs() < 1e-12);
        assert_eq!(stack_extent(&[]), None);
    }

    #[test]
    fn layer_rows_cover_every_point() {
        let ds = parse_csv("Date,A,B\n2024-01-01,1,2\n2024-02-01,3,4\n").unwrap();
        let layers = build_stack(&ds, &keys(&ds)).unwrap();
        let text = layers_csv(&layers).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "date,key,baseline,topline,value");
        assert_eq!(lines[1], "2024-01-01T00:00:00Z,A,0.000000,1.000000,1.000000");
    }

    #[test]
    fn layer_rows_quote_keys_with_commas() {
        let ds = parse_csv("Date,\"Sales, EU\",B\n2024-01-01,1,2\n").unwrap();
        let layers = build_stack(&ds, &keys(&ds)).unwrap();
        let text = layers_csv(&layers).unwrap();

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.len() == 5));
        assert_eq!(&rows[0][1], "Sales, EU");
        assert_eq!(&rows[0][4], "1.000000");
        assert_eq!(&rows[1][1], "B");
    }
}
