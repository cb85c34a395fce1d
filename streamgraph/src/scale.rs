use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::stack::{stack_extent, Layer};
use crate::{Dataset, SgError};

/// Continuous linear map from a numeric domain onto a pixel range. A collapsed
/// domain maps every input to the middle of the range.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct LinearScale {
    domain: (f64, f64),
    range: (f64, f64),
    clamp: bool,
}

impl LinearScale {
    pub fn new(domain: (f64, f64), range: (f64, f64)) -> Self {
        Self {
            domain,
            range,
            clamp: false,
        }
    }

    pub fn clamped(mut self, clamp: bool) -> Self {
        self.clamp = clamp;
        self
    }

    pub fn domain(&self) -> (f64, f64) {
        self.domain
    }

    pub fn range(&self) -> (f64, f64) {
        self.range
    }

    pub fn is_degenerate(&self) -> bool {
        let span = self.domain.1 - self.domain.0;
        span == 0.0 || !span.is_finite()
    }

    pub fn map(&self, value: f64) -> f64 {
        let (d0, d1) = self.domain;
        let (r0, r1) = self.range;
        if self.is_degenerate() {
            return (r0 + r1) / 2.0;
        }
        let mut t = (value - d0) / (d1 - d0);
        if self.clamp {
            t = t.clamp(0.0, 1.0);
        }
        r0 + t * (r1 - r0)
    }

    pub fn invert(&self, pixel: f64) -> f64 {
        let (d0, d1) = self.domain;
        let (r0, r1) = self.range;
        let span = r1 - r0;
        if self.is_degenerate() || span == 0.0 {
            return d0;
        }
        let mut t = (pixel - r0) / span;
        if self.clamp {
            t = t.clamp(0.0, 1.0);
        }
        d0 + t * (d1 - d0)
    }

    /// Roughly `count` evenly spaced round values inside the domain, using
    /// 1, 2 and 5 times a power of ten as the step.
    pub fn ticks(&self, count: usize) -> Vec<f64> {
        let lo = self.domain.0.min(self.domain.1);
        let hi = self.domain.0.max(self.domain.1);
        if count == 0 || !lo.is_finite() || !hi.is_finite() {
            return Vec::new();
        }
        if lo == hi {
            return vec![lo];
        }
        let raw = (hi - lo) / count as f64;
        let power = raw.log10().floor();
        let base = 10f64.powf(power);
        let error = raw / base;
        let factor = if error >= 50f64.sqrt() {
            10.0
        } else if error >= 10f64.sqrt() {
            5.0
        } else if error >= 2f64.sqrt() {
            2.0
        } else {
            1.0
        };
        let step = factor * base;
        if power < 0.0 {
            // Work in multiples of the inverse step so 0.3 stays 0.3.
            let inverse = (1.0 / step).round();
            let mut first = (lo * inverse).round() as i64;
            if (first as f64) / inverse < lo {
                first += 1;
            }
            let mut last = (hi * inverse).round() as i64;
            if (last as f64) / inverse > hi {
                last -= 1;
            }
            (first..=last).map(|i| i as f64 / inverse).collect()
        } else {
            let mut first = (lo / step).round() as i64;
            if (first as f64) * step < lo {
                first += 1;
            }
            let mut last = (hi / step).round() as i64;
            if (last as f64) * step > hi {
                last -= 1;
            }
            (first..=last).map(|i| i as f64 * step).collect()
        }
    }
}

/// Linear map from a time extent onto a pixel range.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimeScale {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    linear: LinearScale,
}

impl TimeScale {
    pub fn new(domain: (DateTime<Utc>, DateTime<Utc>), range: (f64, f64)) -> Self {
        let (start, end) = domain;
        Self {
            start,
            end,
            linear: LinearScale::new(
                (start.timestamp_millis() as f64, end.timestamp_millis() as f64),
                range,
            ),
        }
    }

    pub fn clamped(mut self, clamp: bool) -> Self {
        self.linear = self.linear.clamped(clamp);
        self
    }

    pub fn domain(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.start, self.end)
    }

    pub fn range(&self) -> (f64, f64) {
        self.linear.range()
    }

    pub fn map(&self, time: DateTime<Utc>) -> f64 {
        self.linear.map(time.timestamp_millis() as f64)
    }

    /// First instant of every month inside the domain. Long spans are thinned
    /// to every n-th month so at most `max_ticks` remain.
    pub fn month_ticks(&self, max_ticks: usize) -> Vec<DateTime<Utc>> {
        if max_ticks == 0 {
            return Vec::new();
        }
        let lo = self.start.min(self.end);
        let hi = self.start.max(self.end);
        let Some(mut month) = month_start(lo) else {
            return Vec::new();
        };
        if month < lo {
            match month.checked_add_months(Months::new(1)) {
                Some(next) => month = next,
                None => return Vec::new(),
            }
        }
        if month > hi {
            return Vec::new();
        }
        let span = (hi.year() - month.year()) as i64 * 12 + hi.month() as i64 - month.month() as i64 + 1;
        let step = u32::try_from((span as usize).div_ceil(max_ticks).max(1)).unwrap_or(u32::MAX);

        let mut ticks = Vec::new();
        let mut current = month;
        while current <= hi {
            ticks.push(current);
            match current.checked_add_months(Months::new(step)) {
                Some(next) => current = next,
                None => break,
            }
        }
        ticks
    }
}

fn month_start(time: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(time.year(), time.month(), 1)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

/// Ordinal scale splitting a range into `count` equal bands with symmetric
/// padding, centered in the range.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct BandScale {
    count: usize,
    start: f64,
    step: f64,
    bandwidth: f64,
}

impl BandScale {
    pub fn new(count: usize, range: (f64, f64), padding: f64) -> Self {
        let (r0, r1) = range;
        let n = count as f64;
        let step = (r1 - r0) / (n - padding + padding * 2.0).max(1.0);
        let start = r0 + (r1 - r0 - step * (n - padding)) * 0.5;
        Self {
            count,
            start,
            step,
            bandwidth: step * (1.0 - padding),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Left edge of band `index`.
    pub fn band(&self, index: usize) -> Option<f64> {
        (index < self.count).then(|| self.start + self.step * index as f64)
    }

    pub fn center(&self, index: usize) -> Option<f64> {
        self.band(index).map(|x| x + self.bandwidth / 2.0)
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn step(&self) -> f64 {
        self.step
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Scales {
    pub x: TimeScale,
    pub y: LinearScale,
}

/// Time→x over `[0, width]` and value→y over `[height, 0]` (inverted).
pub fn make_scales(
    dataset: &Dataset,
    layers: &[Layer],
    width: f64,
    height: f64,
) -> Result<Scales, SgError> {
    let extent = dataset.date_extent().ok_or(SgError::EmptyDataset)?;
    let (lo, hi) = stack_extent(layers).unwrap_or((0.0, 0.0));
    Ok(Scales {
        x: TimeScale::new(extent, (0.0, width)),
        y: LinearScale::new((lo, hi), (height, 0.0)),
    })
}
