// Chart geometry, palette and hover-panel settings. Defaults reproduce the
// 800x400 canvas with a legend gutter on the right.

use serde::{Deserialize, Serialize};

use crate::SgError;

pub const DEFAULT_PALETTE: [&str; 5] = ["#e41a1c", "#377eb8", "#4daf4a", "#984ea3", "#ff7f00"];

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Default for Margins {
    fn default() -> Self {
        Self {
            top: 20.0,
            right: 300.0,
            bottom: 50.0,
            left: 50.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LegendConfig {
    pub offset_x: f64,
    pub offset_y: f64,
    pub swatch_x: f64,
    pub base_y: f64,
    /// Vertical distance between consecutive entries; negative stacks upwards.
    pub step_y: f64,
    pub swatch_size: f64,
    pub label_x: f64,
    pub font_size: f64,
}

impl Default for LegendConfig {
    fn default() -> Self {
        Self {
            offset_x: 10.0,
            offset_y: 20.0,
            swatch_x: 10.0,
            base_y: 200.0,
            step_y: -25.0,
            swatch_size: 20.0,
            label_x: 35.0,
            font_size: 12.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HoverConfig {
    /// Right edge of the band range and width of the plot area.
    pub width: f64,
    /// Bottom of the value range (y of the zero line for positive data).
    pub height: f64,
    /// Extra room around the mini chart for its axes.
    pub padding: f64,
    pub band_start: f64,
    pub value_top: f64,
    pub band_padding: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub animation_ms: f64,
    pub value_ticks: usize,
    pub background: String,
}

impl Default for HoverConfig {
    fn default() -> Self {
        Self {
            width: 240.0,
            height: 150.0,
            padding: 50.0,
            band_start: 30.0,
            value_top: 20.0,
            band_padding: 0.1,
            offset_x: -120.0,
            offset_y: 5.0,
            animation_ms: 500.0,
            value_ticks: 5,
            background: "#f0f0f0".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChartConfig {
    pub width: f64,
    pub height: f64,
    pub margins: Margins,
    pub palette: Vec<String>,
    pub curve_tension: f64,
    pub axis_offset: f64,
    pub max_month_ticks: usize,
    pub legend: LegendConfig,
    pub hover: HoverConfig,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 400.0,
            margins: Margins::default(),
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
            curve_tension: 0.0,
            axis_offset: 5.0,
            max_month_ticks: 24,
            legend: LegendConfig::default(),
            hover: HoverConfig::default(),
        }
    }
}

impl ChartConfig {
    pub fn from_json_str(text: &str) -> Result<Self, SgError> {
        let config: ChartConfig =
            serde_json::from_str(text).map_err(|e| SgError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn inner_width(&self) -> f64 {
        self.width - self.margins.left - self.margins.right
    }

    pub fn inner_height(&self) -> f64 {
        self.height - self.margins.top - self.margins.bottom
    }

    /// Color for the category at `index`, cycling through the palette.
    pub fn color_for(&self, index: usize) -> &str {
        palette_color(&self.palette, index)
    }

    pub fn validate(&self) -> Result<(), SgError> {
        if !(self.inner_width() > 0.0) || !(self.inner_height() > 0.0) {
            return Err(SgError::InvalidConfig(format!(
                "drawable area {}x{} is empty after margins",
                self.inner_width(),
                self.inner_height()
            )));
        }
        if self.palette.is_empty() {
            return Err(SgError::InvalidConfig("palette must not be empty".into()));
        }
        if let Some(bad) = self.palette.iter().find(|c| parse_hex_color(c).is_none()) {
            return Err(SgError::InvalidConfig(format!("invalid palette color '{bad}'")));
        }
        if !(-1.0..=1.0).contains(&self.curve_tension) {
            return Err(SgError::InvalidConfig(format!(
                "curve tension {} outside [-1, 1]",
                self.curve_tension
            )));
        }
        if !(0.0..1.0).contains(&self.hover.band_padding) {
            return Err(SgError::InvalidConfig(format!(
                "band padding {} outside [0, 1)",
                self.hover.band_padding
            )));
        }
        if self.hover.width <= self.hover.band_start || self.hover.height <= self.hover.value_top {
            return Err(SgError::InvalidConfig("hover chart area is empty".into()));
        }
        if self.hover.animation_ms < 0.0 {
            return Err(SgError::InvalidConfig("animation duration must be >= 0".into()));
        }
        Ok(())
    }
}

pub fn palette_color(palette: &[String], index: usize) -> &str {
    if palette.is_empty() {
        return "#000000";
    }
    &palette[index % palette.len()]
}

/// Parse `#rrggbb` or `#rgb` into channel bytes.
pub fn parse_hex_color(value: &str) -> Option<(u8, u8, u8)> {
    let hex = value.trim().strip_prefix('#')?;
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some((r, g, b))
        }
        3 => {
            let mut channels = hex.chars().map(|c| {
                let v = c.to_digit(16).unwrap_or(0) as u8;
                v * 17
            });
            Some((channels.next()?, channels.next()?, channels.next()?))
        }
        _ => None,
    }
}
