use std::sync::Arc;

use leptos::logging::{log, warn};
use leptos::*;
use streamgraph::{
    layers_csv, Chart, ChartConfig, ChartSession, HoverChart, HoverEvent, HoverState, LoadedChart,
    SgError,
};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Blob, HtmlInputElement};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const APP_COMMIT: &str = env!("GIT_COMMIT_HASH");

/// Cubic in-out as an SVG key spline.
const EASE_SPLINE: &str = "0.645 0.045 0.355 1";

async fn read_first_file(input: &HtmlInputElement) -> Option<Result<(String, String), String>> {
    let file = input.files()?.item(0)?;
    let name = file.name();
    let read = match JsFuture::from(file.text()).await {
        Ok(value) => value
            .as_string()
            .map(|text| (name, text))
            .ok_or_else(|| "file did not decode as text".to_string()),
        Err(err) => Err(format!("read failed: {err:?}")),
    };
    Some(read)
}

fn blob_url_from_str(s: &str) -> Option<String> {
    let parts = js_sys::Array::new();
    parts.push(&JsValue::from_str(s));
    let blob = Blob::new_with_str_sequence(&parts).ok()?;
    web_sys::Url::create_object_url_with_blob(&blob).ok()
}

/// Whether a finished upload replaces what is on screen. A superseded upload
/// leaves the chart and the hover panel alone.
fn replaces_view(result: &Result<Arc<LoadedChart>, SgError>) -> bool {
    !matches!(result, Err(SgError::StaleUpload { .. }))
}

fn tooltip_style(anchor: (f64, f64), background: &str) -> String {
    format!(
        "position:absolute;left:{:.0}px;top:{:.0}px;background-color:{};",
        anchor.0, anchor.1, background
    )
}

fn streamgraph_svg(chart: &Chart, on_hover: impl Fn(HoverEvent) + Copy + 'static) -> impl IntoView {
    let plot_transform = format!("translate({},{})", chart.margins.left, chart.margins.top);
    let axis_transform = format!("translate(0,{})", chart.axis_y);
    let legend_transform = format!(
        "translate({},{})",
        chart.legend_origin.0, chart.legend_origin.1
    );

    let layers = chart
        .layers
        .iter()
        .map(|shape| {
            let shape = shape.clone();
            let d = shape.svg_path();
            let fill = shape.color.clone();
            view! {
                <path
                    class="layer"
                    d=d
                    fill=fill
                    on:mouseover=move |ev: ev::MouseEvent| {
                        on_hover(shape.hover_enter((ev.page_x() as f64, ev.page_y() as f64)))
                    }
                    on:mouseout=move |_| on_hover(HoverEvent::Leave)
                />
            }
        })
        .collect_view();

    let ticks = chart
        .x_axis
        .iter()
        .map(|tick| {
            let transform = format!("translate({},0)", tick.position);
            view! {
                <g class="tick" transform=transform>
                    <line y2="6" stroke="currentColor"/>
                    <text y="9" dy="0.71em" text-anchor="middle" font-size="10">{tick.label.clone()}</text>
                </g>
            }
        })
        .collect_view();

    let legend = chart
        .legend
        .iter()
        .map(|entry| {
            view! {
                <rect
                    x={entry.swatch.0}
                    y={entry.swatch.1}
                    width={entry.swatch_size}
                    height={entry.swatch_size}
                    fill={entry.color.clone()}
                />
                <text
                    x={entry.label.0}
                    y={entry.label.1}
                    style={format!("font-size:{}px;alignment-baseline:middle", entry.font_size)}
                >
                    {entry.key.clone()}
                </text>
            }
        })
        .collect_view();

    view! {
        <svg width={chart.width} height={chart.height}>
            <g transform=plot_transform>
                <g transform=axis_transform>
                    <line x2={chart.inner_width} stroke="currentColor"/>
                    {ticks}
                </g>
                {layers}
                <g transform=legend_transform>{legend}</g>
            </g>
        </svg>
    }
}

fn hover_svg(panel: &HoverChart) -> impl IntoView {
    let dur = format!("{}ms", panel.duration_ms);
    let start = panel.frame(0.0);
    let bars = panel
        .bars
        .iter()
        .zip(start)
        .map(|(bar, from)| {
            let dur_y = dur.clone();
            let dur_h = dur.clone();
            view! {
                <rect x={bar.x} y={bar.y} width={bar.width} height={bar.height} fill={panel.color.clone()}>
                    <animate
                        attributeName="y"
                        from={from.y}
                        to={bar.y}
                        dur=dur_y
                        calcMode="spline"
                        keyTimes="0;1"
                        keySplines=EASE_SPLINE
                    />
                    <animate
                        attributeName="height"
                        from={from.height}
                        to={bar.height}
                        dur=dur_h
                        calcMode="spline"
                        keyTimes="0;1"
                        keySplines=EASE_SPLINE
                    />
                </rect>
            }
        })
        .collect_view();

    let x_labels = panel
        .x_labels
        .iter()
        .map(|label| {
            view! {
                <text x={label.position} y={panel.x_axis_y + 9.0} dy="0.71em" text-anchor="middle" font-size="10">
                    {label.label.clone()}
                </text>
            }
        })
        .collect_view();

    let y_ticks = panel
        .y_ticks
        .iter()
        .map(|tick| {
            view! {
                <line x1={panel.y_axis_x - 6.0} x2={panel.y_axis_x} y1={tick.position} y2={tick.position} stroke="currentColor"/>
                <text x={panel.y_axis_x - 9.0} y={tick.position} dy="0.32em" text-anchor="end" font-size="10">
                    {tick.label.clone()}
                </text>
            }
        })
        .collect_view();

    view! {
        <svg width={panel.width} height={panel.height}>
            {bars}
            <line x1={panel.y_axis_x} x2={panel.plot_right} y1={panel.x_axis_y} y2={panel.x_axis_y} stroke="currentColor"/>
            {x_labels}
            <line x1={panel.y_axis_x} x2={panel.y_axis_x} y1={panel.plot_top} y2={panel.x_axis_y} stroke="currentColor"/>
            {y_ticks}
        </svg>
    }
}

#[component]
pub fn App() -> impl IntoView {
    let session = store_value(ChartSession::new(ChartConfig::default()));
    let (loaded, set_loaded) = create_signal(Option::<Arc<LoadedChart>>::None);
    let (hover, set_hover) = create_signal(HoverState::Hidden);
    let (panel, set_panel) = create_signal(Option::<HoverChart>::None);
    let (status, set_status) = create_signal(String::from("No file selected."));
    let (layers_href, set_layers_href) = create_signal(String::new());

    let on_hover = move |event: HoverEvent| {
        let state = session
            .try_update_value(|s| s.handle_hover(&event).clone())
            .unwrap_or_default();
        set_panel.set(session.with_value(|s| s.hover_chart()));
        set_hover.set(state);
    };

    let replace_download = move |csv: Option<String>| {
        let old = layers_href.get_untracked();
        if !old.is_empty() {
            let _ = web_sys::Url::revoke_object_url(&old);
        }
        set_layers_href.set(csv.as_deref().and_then(blob_url_from_str).unwrap_or_default());
    };

    let on_file = move |ev: ev::Event| {
        let Some(target) = ev.target() else {
            return;
        };
        let Ok(input) = target.dyn_into::<HtmlInputElement>() else {
            return;
        };
        let Some(ticket) = session.try_update_value(|s| s.begin_upload()) else {
            return;
        };
        set_status.set("Reading file…".to_string());
        spawn_local(async move {
            let read = read_first_file(&input).await;
            let is_latest =
                session.with_value(|s| s.latest_generation()) == ticket.generation();
            let (name, text) = match read {
                Some(Ok(pair)) => pair,
                Some(Err(err)) => {
                    if is_latest {
                        set_status.set(err);
                    }
                    return;
                }
                None => {
                    if is_latest {
                        set_status.set("No file selected.".to_string());
                    }
                    return;
                }
            };

            let Some(result) = session.try_update_value(|s| s.complete_upload(ticket, &text)) else {
                return;
            };
            if replaces_view(&result) {
                set_hover.set(HoverState::Hidden);
                set_panel.set(None);
            }
            match result {
                Ok(chart) => {
                    let csv = match layers_csv(&chart.chart.stack) {
                        Ok(csv) => Some(csv),
                        Err(err) => {
                            warn!("layers.csv unavailable: {err}");
                            None
                        }
                    };
                    replace_download(csv);
                    set_status.set(format!(
                        "{name}: {} records, {} categories.",
                        chart.dataset.len(),
                        chart.dataset.keys.len()
                    ));
                    log!("upload {} displayed", chart.generation);
                    set_loaded.set(Some(chart));
                }
                Err(SgError::StaleUpload { generation, latest }) => {
                    log!("discarding upload {generation}; upload {latest} is newer");
                }
                Err(err) => {
                    warn!("upload failed: {err}");
                    replace_download(None);
                    set_loaded.set(None);
                    set_status.set(format!("{name}: {err}"));
                }
            }
        });
    };

    let chart_view = move || match loaded.get() {
        Some(loaded) => streamgraph_svg(&loaded.chart, on_hover).into_view(),
        None => view! { <p class="note">"Upload a CSV file to draw the streamgraph."</p> }.into_view(),
    };

    let tooltip_view = move || match (hover.get(), panel.get()) {
        (HoverState::Visible { anchor, .. }, Some(panel)) => {
            let style = tooltip_style(anchor, &panel.background);
            Some(view! { <div id="tooltip" style=style>{hover_svg(&panel)}</div> })
        }
        _ => None,
    };

    view! {
        <main class="streamgraph-container">
            <section class="controls" style="background-color:#f0f0f0;padding:20px;">
                <h2>"Upload a CSV File"</h2>
                <input type="file" accept=".csv" on:change=on_file />
                <span class="note">{move || status.get()}</span>
            </section>
            <section id="streamgraph">{chart_view}</section>
            {tooltip_view}
            <section class="downloads">
                <a
                    href=move || layers_href.get()
                    download="layers.csv"
                    style=move || if layers_href.get().is_empty() { "display:none;".to_string() } else { "display:inline;".to_string() }
                >
                    "Download layers.csv"
                </a>
            </section>
            <footer>
                <p class="note">{"Web version "}{APP_VERSION}{" ("}{APP_COMMIT}{")"}</p>
            </footer>
        </main>
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    leptos::mount_to_body(|| view! { <App/> });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_upload_keeps_view() {
        let mut session = ChartSession::new(ChartConfig::default());
        let older = session.begin_upload();
        let newer = session.begin_upload();

        let shown = session.complete_upload(newer, "Date,A\n2024-01-01,1\n");
        assert!(replaces_view(&shown));
        let stale = session.complete_upload(older, "Date,A\n2024-01-01,2\n");
        assert!(!replaces_view(&stale));

        let next = session.begin_upload();
        let failed = session.complete_upload(next, "Date,A\n2024-01-01,x\n");
        assert!(replaces_view(&failed));
    }

    #[test]
    fn tooltip_is_anchored() {
        assert_eq!(
            tooltip_style((180.0, 205.0), "#f0f0f0"),
            "position:absolute;left:180px;top:205px;background-color:#f0f0f0;"
        );
    }
}
