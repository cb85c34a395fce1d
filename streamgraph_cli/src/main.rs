use std::fs::{self, File};
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use chrono::SecondsFormat;
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use rayon::prelude::*;
use serde_json::{json, Value as JsonValue};
use streamgraph::{
    build_chart, build_stack, parse_csv, parse_hex_color, write_layer_rows, Bar, Chart,
    ChartConfig, Dataset, HoverChart, Point,
};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

/// Cubic segments are sampled this many times when flattened to polygons.
const CURVE_STEPS: usize = 16;
const TICK_SIZE: i32 = 6;

#[derive(Parser, Debug)]
#[command(author, version, about = "Streamgraph rendering CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render streamgraph charts for one or more CSV files
    Render(RenderArgs),
    /// Render the hover bar chart of one category
    Hover(HoverArgs),
    /// Summarize CSV files: categories, records, date extent and layer extents
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// CSV files: a date column followed by numeric category columns
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output directory (defaults next to each input)
    #[arg(long, value_hint = ValueHint::DirPath)]
    out_dir: Option<PathBuf>,

    /// Chart output format
    #[arg(long, value_enum, default_value_t = FormatOpt::Svg)]
    format: FormatOpt,

    /// Also write `<stem>_layers.csv` with stacked baselines and toplines
    #[arg(long, action = ArgAction::SetTrue)]
    layers_csv: bool,

    /// JSON chart configuration (size, margins, palette, legend, hover)
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Override the canvas width in pixels
    #[arg(long)]
    width: Option<f64>,

    /// Override the canvas height in pixels
    #[arg(long)]
    height: Option<f64>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct HoverArgs {
    /// CSV file to read
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Category to chart
    #[arg(long)]
    key: String,

    /// Output path; `.png` renders a bitmap, anything else SVG
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Animation time to capture (defaults to the final frame)
    #[arg(long)]
    elapsed_ms: Option<f64>,

    /// JSON chart configuration
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// CSV files to summarize
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output report path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Emit JSON instead of the text report
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatOpt {
    Svg,
    Png,
    Both,
}

impl FormatOpt {
    fn kinds(self) -> &'static [ChartKind] {
        match self {
            FormatOpt::Svg => &[ChartKind::Svg],
            FormatOpt::Png => &[ChartKind::Png],
            FormatOpt::Both => &[ChartKind::Svg, ChartKind::Png],
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    fn extension(self) -> &'static str {
        match self {
            ChartKind::Png => "png",
            ChartKind::Svg => "svg",
        }
    }

    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("png") => ChartKind::Png,
            _ => ChartKind::Svg,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Render(args) => args.verbose,
        Command::Hover(args) => args.verbose,
        Command::Inspect(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Render(args) => handle_render(args),
        Command::Hover(args) => handle_hover(args),
        Command::Inspect(args) => handle_inspect(args),
    }
}

fn load_config(path: Option<&Path>, width: Option<f64>, height: Option<f64>) -> Result<ChartConfig> {
    let mut config = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            ChartConfig::from_json_str(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => ChartConfig::default(),
    };
    if let Some(width) = width {
        config.width = width;
    }
    if let Some(height) = height {
        config.height = height;
    }
    config.validate()?;
    Ok(config)
}

fn load_dataset(path: &Path) -> Result<Dataset> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let dataset = parse_csv(&text).with_context(|| format!("failed to parse {}", path.display()))?;
    debug!(
        "{}: {} records, {} categories",
        path.display(),
        dataset.len(),
        dataset.keys.len()
    );
    Ok(dataset)
}

/// `<dir>/<stem><suffix>.<extension>`, where `dir` defaults to the input's
/// own directory.
fn output_path(input: &Path, out_dir: Option<&Path>, suffix: &str, extension: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("chart");
    let dir = match out_dir {
        Some(dir) => dir.to_path_buf(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    dir.join(format!("{stem}{suffix}.{extension}"))
}

fn handle_render(args: RenderArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.width, args.height)?;
    if let Some(dir) = args.out_dir.as_ref() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let t_total = Instant::now();
    let inputs: Vec<(usize, PathBuf)> = args.inputs.iter().cloned().enumerate().collect();
    let mut outcomes: Vec<(usize, PathBuf, Result<Vec<PathBuf>>)> = inputs
        .par_iter()
        .map(|(id, path)| (*id, path.clone(), render_input(path, &args, &config)))
        .collect();
    outcomes.sort_by_key(|(id, _, _)| *id);

    let mut failed = 0usize;
    for (_, path, outcome) in outcomes {
        match outcome {
            Ok(written) => {
                for out in written {
                    info!("Wrote {}", out.display());
                }
            }
            Err(err) => {
                failed += 1;
                error!("{}: {:#}", path.display(), err);
            }
        }
    }

    if args.profile || args.verbose {
        info!(
            "Render total: {:.1} ms ({} inputs)",
            t_total.elapsed().as_secs_f64() * 1000.0,
            args.inputs.len()
        );
    }
    if failed > 0 {
        return Err(anyhow!("{} of {} inputs failed", failed, args.inputs.len()));
    }
    Ok(())
}

fn render_input(path: &Path, args: &RenderArgs, config: &ChartConfig) -> Result<Vec<PathBuf>> {
    let timed = args.profile || args.verbose;

    let t_parse = Instant::now();
    let dataset = load_dataset(path)?;
    if timed {
        info!(
            "{}: parse stage {:.1} ms ({} records)",
            path.display(),
            t_parse.elapsed().as_secs_f64() * 1000.0,
            dataset.len()
        );
    }

    let t_layout = Instant::now();
    let chart = build_chart(&dataset, config)
        .with_context(|| format!("failed to lay out {}", path.display()))?;
    if timed {
        info!(
            "{}: layout stage {:.1} ms ({} layers)",
            path.display(),
            t_layout.elapsed().as_secs_f64() * 1000.0,
            chart.layers.len()
        );
    }

    let mut written = Vec::new();
    for kind in args.format.kinds() {
        let out = output_path(path, args.out_dir.as_deref(), "", kind.extension());
        let t_plot = Instant::now();
        render_chart_guard(&chart, &out, *kind)
            .map_err(|err| anyhow!("failed to render {}: {}", out.display(), err))?;
        if timed {
            info!(
                "{}: plot stage {:.1} ms",
                out.display(),
                t_plot.elapsed().as_secs_f64() * 1000.0
            );
        }
        written.push(out);
    }

    if args.layers_csv {
        let out = output_path(path, args.out_dir.as_deref(), "_layers", "csv");
        write_layers_csv(&chart, &out)?;
        written.push(out);
    }
    Ok(written)
}

fn write_layers_csv(chart: &Chart, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_layer_rows(&chart.stack, &mut writer)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn handle_hover(args: HoverArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), None, None)?;
    let dataset = load_dataset(&args.input)?;
    let chart = build_chart(&dataset, &config)
        .with_context(|| format!("failed to lay out {}", args.input.display()))?;
    let shape = chart.shape(&args.key).ok_or_else(|| {
        anyhow!(
            "category '{}' not found in {} (available: {})",
            args.key,
            args.input.display(),
            dataset.keys.join(", ")
        )
    })?;

    let panel = HoverChart::build(&dataset, &shape.key, &shape.color, &config.hover);
    let elapsed = args.elapsed_ms.unwrap_or(panel.duration_ms);
    let bars = panel.frame(elapsed);

    let output = args.output.clone().unwrap_or_else(|| {
        let slug: String = args
            .key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        output_path(&args.input, None, &format!("_{slug}"), "svg")
    });
    let kind = ChartKind::from_path(&output);
    render_hover_guard(&panel, &bars, &output, kind)
        .map_err(|err| anyhow!("failed to render {}: {}", output.display(), err))?;
    info!(
        "Wrote hover chart: {} ({} bars at {:.0} ms)",
        output.display(),
        bars.len(),
        elapsed
    );
    Ok(())
}

fn inspect_file(path: &Path) -> Result<JsonValue> {
    let dataset = load_dataset(path)?;
    let extent = dataset.date_extent().map(|(first, last)| {
        json!({
            "first": first.to_rfc3339_opts(SecondsFormat::Secs, true),
            "last": last.to_rfc3339_opts(SecondsFormat::Secs, true),
        })
    });
    let layers: Vec<JsonValue> = if dataset.is_empty() {
        Vec::new()
    } else {
        build_stack(&dataset, &dataset.keys)?
            .iter()
            .map(|layer| {
                let low = layer.points.iter().map(|p| p.baseline).fold(f64::INFINITY, f64::min);
                let high = layer
                    .points
                    .iter()
                    .map(|p| p.topline)
                    .fold(f64::NEG_INFINITY, f64::max);
                let peak = layer
                    .points
                    .iter()
                    .map(|p| p.thickness())
                    .fold(f64::NEG_INFINITY, f64::max);
                json!({
                    "key": layer.key,
                    "min_baseline": low,
                    "max_topline": high,
                    "max_value": peak,
                })
            })
            .collect()
    };
    Ok(json!({
        "file": path.display().to_string(),
        "date_column": dataset.date_column,
        "keys": dataset.keys,
        "records": dataset.len(),
        "extent": extent,
        "layers": layers,
    }))
}

fn format_report(summaries: &[JsonValue]) -> String {
    let mut report = String::new();
    for summary in summaries {
        report.push_str(&format!("FILE: {}\n", summary["file"].as_str().unwrap_or("?")));
        report.push_str(&format!("  records: {}\n", summary["records"]));
        let keys: Vec<&str> = summary["keys"]
            .as_array()
            .map(|keys| keys.iter().filter_map(JsonValue::as_str).collect())
            .unwrap_or_default();
        report.push_str(&format!("  keys: {}\n", keys.join(", ")));
        if let (Some(first), Some(last)) = (
            summary["extent"]["first"].as_str(),
            summary["extent"]["last"].as_str(),
        ) {
            report.push_str(&format!("  dates: {} .. {}\n", first, last));
        }
        if let Some(layers) = summary["layers"].as_array().filter(|l| !l.is_empty()) {
            report.push_str("  layers:\n");
            for layer in layers {
                report.push_str(&format!(
                    "    - {}: baseline>={:.3}, topline<={:.3}, peak={:.3}\n",
                    layer["key"].as_str().unwrap_or("?"),
                    layer["min_baseline"].as_f64().unwrap_or(f64::NAN),
                    layer["max_topline"].as_f64().unwrap_or(f64::NAN),
                    layer["max_value"].as_f64().unwrap_or(f64::NAN),
                ));
            }
        }
        report.push('\n');
    }
    report
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let summaries = args
        .inputs
        .par_iter()
        .map(|path| inspect_file(path))
        .collect::<Result<Vec<_>>>()?;

    let report = if args.json {
        let mut text = serde_json::to_string_pretty(&summaries)?;
        text.push('\n');
        text
    } else {
        format_report(&summaries)
    };

    if args.output.as_os_str() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(report.as_bytes())?;
        handle.flush()?;
    } else {
        fs::write(&args.output, report)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Inspection report written: {}", args.output.display());
    }
    Ok(())
}

fn rgb(hex: &str) -> RGBColor {
    let (r, g, b) = parse_hex_color(hex).unwrap_or((0, 0, 0));
    RGBColor(r, g, b)
}

fn to_pixel(origin: Point, point: Point) -> (i32, i32) {
    (
        (origin.0 + point.0).round() as i32,
        (origin.1 + point.1).round() as i32,
    )
}

fn canvas_size(width: f64, height: f64) -> (u32, u32) {
    (width.round().max(1.0) as u32, height.round().max(1.0) as u32)
}

fn render_chart_guard(chart: &Chart, path: &Path, kind: ChartKind) -> Result<(), String> {
    let render = || -> Result<(), String> {
        let size = canvas_size(chart.width, chart.height);
        let drawn = match kind {
            ChartKind::Png => {
                draw_streamgraph(BitMapBackend::new(path, size).into_drawing_area(), chart)
            }
            ChartKind::Svg => {
                draw_streamgraph(SVGBackend::new(path, size).into_drawing_area(), chart)
            }
        };
        drawn.map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_hover_guard(
    panel: &HoverChart,
    bars: &[Bar],
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        let size = canvas_size(panel.width, panel.height);
        let drawn = match kind {
            ChartKind::Png => {
                draw_hover_chart(BitMapBackend::new(path, size).into_drawing_area(), panel, bars)
            }
            ChartKind::Svg => {
                draw_hover_chart(SVGBackend::new(path, size).into_drawing_area(), panel, bars)
            }
        };
        drawn.map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn draw_streamgraph<DB>(root: DrawingArea<DB, plotters::coord::Shift>, chart: &Chart) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let origin = (chart.margins.left, chart.margins.top);

    for shape in &chart.layers {
        let fill = rgb(&shape.color).filled();
        for polygon in shape.polygons(CURVE_STEPS) {
            let points: Vec<(i32, i32)> = polygon.iter().map(|p| to_pixel(origin, *p)).collect();
            root.draw(&Polygon::new(points, fill))?;
        }
    }

    let axis_style = BLACK.stroke_width(1);
    let axis_left = to_pixel(origin, (0.0, chart.axis_y));
    let axis_right = to_pixel(origin, (chart.inner_width, chart.axis_y));
    root.draw(&PathElement::new(vec![axis_left, axis_right], axis_style))?;
    let tick_font = ("sans-serif", 10.0)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(HPos::Center, VPos::Top));
    for tick in &chart.x_axis {
        let (x, y) = to_pixel(origin, (tick.position, chart.axis_y));
        root.draw(&PathElement::new(vec![(x, y), (x, y + TICK_SIZE)], axis_style))?;
        root.draw(&Text::new(
            tick.label.clone(),
            (x, y + TICK_SIZE + 3),
            tick_font.clone(),
        ))?;
    }

    let legend_origin = (
        origin.0 + chart.legend_origin.0,
        origin.1 + chart.legend_origin.1,
    );
    for entry in &chart.legend {
        let (x, y) = entry.swatch;
        let corner = to_pixel(legend_origin, (x, y));
        let far = to_pixel(legend_origin, (x + entry.swatch_size, y + entry.swatch_size));
        root.draw(&Rectangle::new([corner, far], rgb(&entry.color).filled()))?;
        let font = ("sans-serif", entry.font_size)
            .into_font()
            .color(&BLACK)
            .pos(Pos::new(HPos::Left, VPos::Center));
        root.draw(&Text::new(
            entry.key.clone(),
            to_pixel(legend_origin, entry.label),
            font,
        ))?;
    }

    root.present()?;
    Ok(())
}

fn draw_hover_chart<DB>(
    root: DrawingArea<DB, plotters::coord::Shift>,
    panel: &HoverChart,
    bars: &[Bar],
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&rgb(&panel.background))?;
    let origin = (0.0, 0.0);

    let fill = rgb(&panel.color).filled();
    for bar in bars {
        let corner = to_pixel(origin, (bar.x, bar.y));
        let far = to_pixel(origin, (bar.x + bar.width, bar.y + bar.height));
        root.draw(&Rectangle::new([corner, far], fill))?;
    }

    let axis_style = BLACK.stroke_width(1);
    let font = ("sans-serif", 10.0).into_font().color(&BLACK);

    let (left, axis_y) = to_pixel(origin, (panel.y_axis_x, panel.x_axis_y));
    let (right, _) = to_pixel(origin, (panel.plot_right, panel.x_axis_y));
    root.draw(&PathElement::new(vec![(left, axis_y), (right, axis_y)], axis_style))?;
    for label in &panel.x_labels {
        let (x, _) = to_pixel(origin, (label.position, panel.x_axis_y));
        root.draw(&PathElement::new(vec![(x, axis_y), (x, axis_y + TICK_SIZE)], axis_style))?;
        root.draw(&Text::new(
            label.label.clone(),
            (x, axis_y + TICK_SIZE + 3),
            font.clone().pos(Pos::new(HPos::Center, VPos::Top)),
        ))?;
    }

    let (_, top) = to_pixel(origin, (panel.y_axis_x, panel.plot_top));
    root.draw(&PathElement::new(vec![(left, top), (left, axis_y)], axis_style))?;
    for tick in &panel.y_ticks {
        let (_, y) = to_pixel(origin, (panel.y_axis_x, tick.position));
        root.draw(&PathElement::new(vec![(left - TICK_SIZE, y), (left, y)], axis_style))?;
        root.draw(&Text::new(
            tick.label.clone(),
            (left - TICK_SIZE - 3, y),
            font.clone().pos(Pos::new(HPos::Right, VPos::Center)),
        ))?;
    }

    root.present()?;
    Ok(())
}
