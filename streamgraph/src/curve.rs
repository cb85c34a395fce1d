// Path geometry for smoothed areas. Curves pass through every sample; the
// spline only shapes the segments between them.

use serde::{Deserialize, Serialize};

pub type Point = (f64, f64);

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum PathCommand {
    MoveTo(Point),
    LineTo(Point),
    CubicTo(Point, Point, Point),
    Close,
}

/// Append a cardinal spline through `points`. When `connect` is set the first
/// point is joined to the current subpath with a line instead of starting a
/// new one. End tangents are zero, so the first and last control points sit
/// on the endpoints.
pub fn push_cardinal(out: &mut Vec<PathCommand>, points: &[Point], tension: f64, connect: bool) {
    let Some(&first) = points.first() else {
        return;
    };
    out.push(if connect {
        PathCommand::LineTo(first)
    } else {
        PathCommand::MoveTo(first)
    });
    if points.len() == 2 {
        out.push(PathCommand::LineTo(points[1]));
        return;
    }

    let k = (1.0 - tension) / 6.0;
    let last = points.len() - 1;
    for i in 0..last {
        let p1 = points[i];
        let p2 = points[i + 1];
        let p0 = if i == 0 { p2 } else { points[i - 1] };
        let p3 = if i + 2 <= last { points[i + 2] } else { p1 };
        let c1 = (p1.0 + k * (p2.0 - p0.0), p1.1 + k * (p2.1 - p0.1));
        let c2 = (p2.0 - k * (p3.0 - p1.0), p2.1 - k * (p3.1 - p1.1));
        out.push(PathCommand::CubicTo(c1, c2, p2));
    }
}

/// Closed region bounded above by `upper` (left to right) and below by
/// `lower`, which is traversed right to left.
pub fn area_commands(upper: &[Point], lower: &[Point], tension: f64) -> Vec<PathCommand> {
    if upper.is_empty() {
        return Vec::new();
    }
    let mut commands = Vec::with_capacity(upper.len() * 2 + 2);
    push_cardinal(&mut commands, upper, tension, false);
    let reversed: Vec<Point> = lower.iter().rev().copied().collect();
    push_cardinal(&mut commands, &reversed, tension, true);
    commands.push(PathCommand::Close);
    commands
}

fn fmt_coord(value: f64) -> String {
    let text = format!("{:.3}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" || text.is_empty() {
        "0".to_string()
    } else {
        text.to_string()
    }
}

fn fmt_point(p: Point) -> String {
    format!("{},{}", fmt_coord(p.0), fmt_coord(p.1))
}

/// SVG path data (`d` attribute) for the commands.
pub fn to_svg_path(commands: &[PathCommand]) -> String {
    let mut out = String::new();
    for command in commands {
        match *command {
            PathCommand::MoveTo(p) => {
                out.push('M');
                out.push_str(&fmt_point(p));
            }
            PathCommand::LineTo(p) => {
                out.push('L');
                out.push_str(&fmt_point(p));
            }
            PathCommand::CubicTo(c1, c2, p) => {
                out.push_str(&format!("C{},{},{}", fmt_point(c1), fmt_point(c2), fmt_point(p)));
            }
            PathCommand::Close => out.push('Z'),
        }
    }
    out
}

fn cubic_point(p0: Point, c1: Point, c2: Point, p1: Point, t: f64) -> Point {
    let mt = 1.0 - t;
    let a = mt * mt * mt;
    let b = 3.0 * mt * mt * t;
    let c = 3.0 * mt * t * t;
    let d = t * t * t;
    (
        a * p0.0 + b * c1.0 + c * c2.0 + d * p1.0,
        a * p0.1 + b * c1.1 + c * c2.1 + d * p1.1,
    )
}

/// Polyline approximation of each subpath, sampling every cubic segment at
/// `steps` evenly spaced parameters.
pub fn flatten(commands: &[PathCommand], steps: usize) -> Vec<Vec<Point>> {
    let steps = steps.max(1);
    let mut paths = Vec::new();
    let mut current: Vec<Point> = Vec::new();
    for command in commands {
        match *command {
            PathCommand::MoveTo(p) => {
                if !current.is_empty() {
                    paths.push(std::mem::take(&mut current));
                }
                current.push(p);
            }
            PathCommand::LineTo(p) => current.push(p),
            PathCommand::CubicTo(c1, c2, end) => {
                let start = current.last().copied().unwrap_or(end);
                for step in 1..=steps {
                    let t = step as f64 / steps as f64;
                    current.push(cubic_point(start, c1, c2, end, t));
                }
            }
            PathCommand::Close => {
                if !current.is_empty() {
                    paths.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        paths.push(current);
    }
    paths
}
