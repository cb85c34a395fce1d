// Draw model: everything a front end needs to paint the chart, in pixel
// coordinates relative to the translated plot group.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{palette_color, ChartConfig, LegendConfig, Margins};
use crate::curve::{area_commands, flatten, to_svg_path, PathCommand, Point};
use crate::hover::HoverEvent;
use crate::scale::{make_scales, Scales};
use crate::stack::{build_stack, Layer};
use crate::{Dataset, SgError};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AxisTick {
    pub position: f64,
    pub label: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LayerShape {
    pub key: String,
    pub index: usize,
    pub color: String,
    pub commands: Vec<PathCommand>,
}

impl LayerShape {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn svg_path(&self) -> String {
        to_svg_path(&self.commands)
    }

    pub fn polygons(&self, steps: usize) -> Vec<Vec<Point>> {
        flatten(&self.commands, steps)
    }

    pub fn hover_enter(&self, pointer: Point) -> HoverEvent {
        HoverEvent::Enter {
            key: self.key.clone(),
            color: self.color.clone(),
            pointer,
        }
    }

    pub fn hover_leave(&self) -> HoverEvent {
        HoverEvent::Leave
    }
}

/// One filled region per layer: the topline left to right, then the baseline
/// back. Layers without points yield shapes with no commands.
pub fn render_layers(
    layers: &[Layer],
    scales: &Scales,
    palette: &[String],
    tension: f64,
) -> Vec<LayerShape> {
    layers
        .iter()
        .map(|layer| {
            let upper: Vec<Point> = layer
                .points
                .iter()
                .map(|p| (scales.x.map(p.timestamp), scales.y.map(p.topline)))
                .collect();
            let lower: Vec<Point> = layer
                .points
                .iter()
                .map(|p| (scales.x.map(p.timestamp), scales.y.map(p.baseline)))
                .collect();
            LayerShape {
                key: layer.key.clone(),
                index: layer.index,
                color: palette_color(palette, layer.index).to_string(),
                commands: area_commands(&upper, &lower, tension),
            }
        })
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LegendEntry {
    pub key: String,
    pub color: String,
    /// Top-left corner of the swatch inside the legend group.
    pub swatch: Point,
    pub swatch_size: f64,
    /// Text anchor, vertically centered on the swatch.
    pub label: Point,
    pub font_size: f64,
}

/// Swatch and label per key, in stacking order. Coordinates are relative to
/// the legend group; the first key sits at `base_y`.
pub fn render_legend(keys: &[String], palette: &[String], legend: &LegendConfig) -> Vec<LegendEntry> {
    keys.iter()
        .enumerate()
        .map(|(i, key)| {
            let y = legend.base_y + legend.step_y * i as f64;
            LegendEntry {
                key: key.clone(),
                color: palette_color(palette, i).to_string(),
                swatch: (legend.swatch_x, y),
                swatch_size: legend.swatch_size,
                label: (legend.label_x, y + legend.swatch_size / 2.0),
                font_size: legend.font_size,
            }
        })
        .collect()
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Chart {
    pub width: f64,
    pub height: f64,
    pub margins: Margins,
    pub inner_width: f64,
    pub inner_height: f64,
    pub scales: Scales,
    pub stack: Vec<Layer>,
    pub layers: Vec<LayerShape>,
    pub legend_origin: Point,
    pub legend: Vec<LegendEntry>,
    /// y of the time axis line, below the plot area.
    pub axis_y: f64,
    pub x_axis: Vec<AxisTick>,
}

impl Chart {
    pub fn shape(&self, key: &str) -> Option<&LayerShape> {
        self.layers.iter().find(|shape| shape.key == key)
    }
}

pub fn build_chart(dataset: &Dataset, config: &ChartConfig) -> Result<Chart, SgError> {
    config.validate()?;
    let inner_width = config.inner_width();
    let inner_height = config.inner_height();

    let stack = build_stack(dataset, &dataset.keys)?;
    let scales = make_scales(dataset, &stack, inner_width, inner_height)?;
    let layers = render_layers(&stack, &scales, &config.palette, config.curve_tension);
    let legend = render_legend(&dataset.keys, &config.palette, &config.legend);
    let x_axis = scales
        .x
        .month_ticks(config.max_month_ticks)
        .into_iter()
        .map(|t| AxisTick {
            position: scales.x.map(t),
            label: t.format("%b").to_string(),
        })
        .collect::<Vec<_>>();

    debug!(
        layers = layers.len(),
        ticks = x_axis.len(),
        width = inner_width,
        height = inner_height,
        "built chart"
    );

    Ok(Chart {
        width: config.width,
        height: config.height,
        margins: config.margins,
        inner_width,
        inner_height,
        scales,
        stack,
        layers,
        legend_origin: (
            inner_width + config.legend.offset_x,
            config.legend.offset_y,
        ),
        legend,
        axis_y: inner_height + config.axis_offset,
        x_axis,
    })
}
