use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HoverConfig;
use crate::curve::Point;
use crate::render::AxisTick;
use crate::scale::{BandScale, LinearScale};
use crate::Dataset;

/// Per-record `(timestamp, value)` pairs for one category, in file order.
/// Unknown keys read as zero.
pub fn compute_hover_series(dataset: &Dataset, key: &str) -> Vec<(DateTime<Utc>, f64)> {
    dataset
        .records
        .iter()
        .map(|record| (record.timestamp, record.value(key)))
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum HoverEvent {
    Enter {
        key: String,
        color: String,
        pointer: Point,
    },
    Leave,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub enum HoverState {
    #[default]
    Hidden,
    Visible {
        key: String,
        color: String,
        /// Top-left corner of the panel in page coordinates.
        anchor: Point,
    },
}

impl HoverState {
    /// Next state after `event`. Every enter repositions the panel; nothing
    /// from the previous state survives.
    pub fn apply(&self, event: &HoverEvent, config: &HoverConfig) -> HoverState {
        match event {
            HoverEvent::Enter {
                key,
                color,
                pointer,
            } => HoverState::Visible {
                key: key.clone(),
                color: color.clone(),
                anchor: (pointer.0 + config.offset_x, pointer.1 + config.offset_y),
            },
            HoverEvent::Leave => HoverState::Hidden,
        }
    }

    pub fn is_visible(&self) -> bool {
        matches!(self, HoverState::Visible { .. })
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            HoverState::Visible { key, .. } => Some(key),
            HoverState::Hidden => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Mini bar chart of one category: one equal-width band per record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HoverChart {
    pub key: String,
    pub color: String,
    pub background: String,
    /// Outer SVG size, panel plus axis padding.
    pub width: f64,
    pub height: f64,
    pub bars: Vec<Bar>,
    /// y of the band axis.
    pub x_axis_y: f64,
    /// x of the value axis.
    pub y_axis_x: f64,
    /// Right end of the band range and top of the value range.
    pub plot_right: f64,
    pub plot_top: f64,
    pub x_labels: Vec<AxisTick>,
    pub y_ticks: Vec<AxisTick>,
    /// Pixel row of value 0; bars grow away from it.
    pub zero_y: f64,
    pub duration_ms: f64,
}

fn value_domain(series: &[(DateTime<Utc>, f64)]) -> (f64, f64) {
    let lo = series.iter().map(|(_, v)| *v).fold(0.0, f64::min);
    let hi = series.iter().map(|(_, v)| *v).fold(0.0, f64::max);
    if lo == hi {
        (0.0, 1.0)
    } else {
        (lo, hi)
    }
}

fn format_tick(value: f64) -> String {
    let rounded = (value * 1e9).round() / 1e9;
    if rounded == 0.0 {
        "0".to_string()
    } else {
        format!("{rounded}")
    }
}

impl HoverChart {
    pub fn build(dataset: &Dataset, key: &str, color: &str, config: &HoverConfig) -> Self {
        let series = compute_hover_series(dataset, key);
        let bands = BandScale::new(
            series.len(),
            (config.band_start, config.width),
            config.band_padding,
        );
        let y = LinearScale::new(value_domain(&series), (config.height, config.value_top));
        let zero_y = y.map(0.0);

        let mut bars = Vec::with_capacity(series.len());
        let mut x_labels = Vec::with_capacity(series.len());
        for (index, (timestamp, value)) in series.iter().enumerate() {
            let Some(x) = bands.band(index) else {
                continue;
            };
            let top = y.map(*value);
            bars.push(Bar {
                timestamp: *timestamp,
                value: *value,
                x,
                y: top.min(zero_y),
                width: bands.bandwidth(),
                height: (zero_y - top).abs(),
            });
            x_labels.push(AxisTick {
                position: x + bands.bandwidth() / 2.0,
                label: timestamp.format("%b").to_string(),
            });
        }

        let y_ticks = y
            .ticks(config.value_ticks)
            .into_iter()
            .map(|v| AxisTick {
                position: y.map(v),
                label: format_tick(v),
            })
            .collect();

        HoverChart {
            key: key.to_string(),
            color: color.to_string(),
            background: config.background.clone(),
            width: config.width + config.padding,
            height: config.height + config.padding,
            bars,
            x_axis_y: config.height,
            y_axis_x: config.band_start,
            plot_right: config.width,
            plot_top: config.value_top,
            x_labels,
            y_ticks,
            zero_y,
            duration_ms: config.animation_ms,
        }
    }

    /// Eased animation progress in `[0, 1]` at `elapsed_ms` after the enter.
    pub fn progress(&self, elapsed_ms: f64) -> f64 {
        if self.duration_ms <= 0.0 || elapsed_ms.is_nan() {
            return 1.0;
        }
        ease_cubic_in_out((elapsed_ms / self.duration_ms).clamp(0.0, 1.0))
    }

    /// Bars as drawn `elapsed_ms` into the grow animation.
    pub fn frame(&self, elapsed_ms: f64) -> Vec<Bar> {
        let t = self.progress(elapsed_ms);
        if t >= 1.0 {
            return self.bars.clone();
        }
        self.bars
            .iter()
            .map(|bar| {
                let height = bar.height * t;
                let y = if bar.value >= 0.0 {
                    self.zero_y - height
                } else {
                    self.zero_y
                };
                Bar { y, height, ..*bar }
            })
            .collect()
    }
}

pub fn ease_cubic_in_out(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_csv;
    use chrono::TimeZone;

    fn sample() -> Dataset {
        parse_csv("Date,A,B\n2024-01-01,1,2\n2024-02-01,3,4\n").unwrap()
    }

    #[test]
    fn series_for_key() {
        let series = compute_hover_series(&sample(), "A");
        assert_eq!(
            series,
            vec![
                (Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 1.0),
                (Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(), 3.0),
            ]
        );
        assert!(compute_hover_series(&sample(), "nope")
            .iter()
            .all(|(_, v)| *v == 0.0));
    }

    #[test]
    fn enter_leave_transitions() {
        let config = HoverConfig::default();
        let enter = HoverEvent::Enter {
            key: "A".into(),
            color: "#e41a1c".into(),
            pointer: (300.0, 200.0),
        };
        let state = HoverState::Hidden.apply(&enter, &config);
        assert_eq!(
            state,
            HoverState::Visible {
                key: "A".into(),
                color: "#e41a1c".into(),
                anchor: (180.0, 205.0),
            }
        );
        let again = state.apply(
            &HoverEvent::Enter {
                key: "B".into(),
                color: "#377eb8".into(),
                pointer: (10.0, 10.0),
            },
            &config,
        );
        assert_eq!(again.key(), Some("B"));
        let hidden = again.apply(&HoverEvent::Leave, &config);
        assert!(!hidden.is_visible());
        assert_eq!(hidden, HoverState::Hidden);
    }

    #[test]
    fn bars_span_zero_to_max() {
        let config = HoverConfig::default();
        let chart = HoverChart::build(&sample(), "A", "#e41a1c", &config);
        assert_eq!(chart.width, 290.0);
        assert_eq!(chart.height, 200.0);
        assert_eq!(chart.bars.len(), 2);
        assert_eq!(chart.zero_y, 150.0);
        let tallest = &chart.bars[1];
        assert!((tallest.y - 20.0).abs() < 1e-9);
        assert!((tallest.height - 130.0).abs() < 1e-9);
        assert!((chart.bars[0].x - 40.0).abs() < 1e-9);
        assert!((chart.bars[0].width - 90.0).abs() < 1e-9);
        assert_eq!(chart.x_labels[0].label, "Jan");
        assert_eq!(chart.x_labels[1].label, "Feb");
        assert_eq!(chart.y_ticks.first().map(|t| t.label.as_str()), Some("0"));
        assert_eq!(chart.y_ticks.last().map(|t| t.label.as_str()), Some("3"));
    }

    #[test]
    fn all_zero_category_uses_unit_domain() {
        let ds = parse_csv("Date,A\n2024-01-01,0\n2024-02-01,0\n").unwrap();
        let chart = HoverChart::build(&ds, "A", "#000", &HoverConfig::default());
        assert!(chart.bars.iter().all(|b| b.height == 0.0 && b.y == 150.0));
        assert!(chart.y_ticks.iter().all(|t| t.position.is_finite()));
    }

    #[test]
    fn negative_values_hang_below_zero() {
        let ds = parse_csv("Date,A\n2024-01-01,-1\n2024-02-01,1\n").unwrap();
        let chart = HoverChart::build(&ds, "A", "#000", &HoverConfig::default());
        assert!((chart.zero_y - 85.0).abs() < 1e-9);
        assert!((chart.bars[0].y - chart.zero_y).abs() < 1e-9);
        assert!((chart.bars[0].height - 65.0).abs() < 1e-9);
    }

    #[test]
    fn animation_frames() {
        let chart = HoverChart::build(&sample(), "A", "#e41a1c", &HoverConfig::default());
        assert!(chart.frame(0.0).iter().all(|b| b.height == 0.0 && b.y == chart.zero_y));
        assert_eq!(chart.frame(500.0), chart.bars);
        assert_eq!(chart.frame(10_000.0), chart.bars);
        let half = chart.frame(250.0);
        assert!((half[1].height - chart.bars[1].height / 2.0).abs() < 1e-9);
    }

    #[test]
    fn easing_endpoints() {
        assert_eq!(ease_cubic_in_out(0.0), 0.0);
        assert_eq!(ease_cubic_in_out(0.5), 0.5);
        assert_eq!(ease_cubic_in_out(1.0), 1.0);
        assert!(ease_cubic_in_out(0.25) < 0.25);
    }
}
