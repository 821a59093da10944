//! Chart output.
//!
//! Stages describe each figure as data (`Figure`) and hand it to a
//! `ChartSink` together with an explicit `RenderConfig`. Nothing here
//! holds process-wide styling state; a sink renders exactly what it is
//! given.

use crate::{error::PipelineResult, stats::FiveNumber};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Rendering options handed to the sink with every figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub font_family: String,
    /// Typeset labels with TeX when the renderer supports it.
    pub use_tex: bool,
    pub dpi: u32,
    pub width_in: f64,
    pub height_in: f64,
    pub histogram_bins: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            font_family: "sans-serif".into(),
            use_tex: false,
            dpi: 300,
            width_in: 14.0,
            height_in: 10.0,
            histogram_bins: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    /// File stem under figures/.
    pub name: String,
    pub title: String,
    pub panels: Vec<Panel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    pub title: String,
    pub y_label: Option<String>,
    pub body: PanelBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PanelBody {
    Bars {
        labels: Vec<String>,
        series: Vec<Series>,
        /// Horizontal reference lines (zero line, alpha line).
        reference_lines: Vec<Marker>,
    },
    Histogram {
        edges: Vec<f64>,
        series: Vec<Series>,
        /// Vertical reference lines (threshold, fence).
        markers: Vec<Marker>,
    },
    Pie {
        labels: Vec<String>,
        values: Vec<f64>,
    },
    BoxSummary {
        summary: FiveNumber,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    /// None renders as a gap (undefined value).
    pub values: Vec<Option<f64>>,
}

impl Series {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        Self { name: name.into(), values: values.into_iter().map(Some).collect() }
    }

    pub fn with_gaps(name: impl Into<String>, values: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self { name: name.into(), values: values.into_iter().collect() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub label: String,
    pub value: f64,
}

impl Marker {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self { label: label.into(), value }
    }
}

impl Panel {
    pub fn bars(title: impl Into<String>, labels: Vec<String>, series: Vec<Series>) -> Self {
        Self {
            title: title.into(),
            y_label: None,
            body: PanelBody::Bars { labels, series, reference_lines: Vec::new() },
        }
    }

    pub fn with_y_label(mut self, label: impl Into<String>) -> Self {
        self.y_label = Some(label.into());
        self
    }

    pub fn with_reference(mut self, marker: Marker) -> Self {
        match &mut self.body {
            PanelBody::Bars { reference_lines, .. } => reference_lines.push(marker),
            PanelBody::Histogram { markers, .. } => markers.push(marker),
            _ => {}
        }
        self
    }
}

/// Equal-width histogram over [min, max]. The last bin is closed.
/// Returns (edges, counts); empty input yields no bins.
pub fn histogram(data: &[f64], bins: usize) -> (Vec<f64>, Vec<f64>) {
    let finite: Vec<f64> = data.iter().copied().filter(|x| x.is_finite()).collect();
    if finite.is_empty() || bins == 0 {
        return (Vec::new(), Vec::new());
    }
    let lo = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let mut hi = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if hi == lo {
        hi = lo + 1.0;
    }
    let width = (hi - lo) / bins as f64;
    let edges: Vec<f64> = (0..=bins).map(|i| lo + width * i as f64).collect();
    let mut counts = vec![0.0; bins];
    for x in finite {
        let idx = (((x - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1.0;
    }
    (edges, counts)
}

/// Histogram panel for one or more samples sharing the same bin edges.
pub fn histogram_panel(
    title: impl Into<String>,
    samples: &[(&str, &[f64])],
    bins: usize,
) -> Panel {
    let pooled: Vec<f64> = samples.iter().flat_map(|(_, s)| s.iter().copied()).collect();
    let (edges, _) = histogram(&pooled, bins);
    let series = samples
        .iter()
        .map(|(name, s)| Series::new(*name, bin_counts(s, &edges)))
        .collect();
    Panel {
        title: title.into(),
        y_label: Some("Frequency".into()),
        body: PanelBody::Histogram { edges, series, markers: Vec::new() },
    }
}

fn bin_counts(data: &[f64], edges: &[f64]) -> Vec<f64> {
    if edges.len() < 2 {
        return Vec::new();
    }
    let bins = edges.len() - 1;
    let mut counts = vec![0.0; bins];
    for &x in data.iter().filter(|x| x.is_finite()) {
        if x < edges[0] || x > edges[bins] {
            continue;
        }
        let idx = edges[1..].partition_point(|&e| e <= x).min(bins - 1);
        counts[idx] += 1.0;
    }
    counts
}

// ── Sinks ────────────────────────────────────────────────────────────────────

/// Anything that accepts finished figures.
pub trait ChartSink {
    fn render(&mut self, figure: &Figure, render: &RenderConfig) -> PipelineResult<()>;
}

#[derive(Serialize)]
struct FigureDocument<'a> {
    render: &'a RenderConfig,
    figure: &'a Figure,
}

/// Writes `<dir>/<figure.name>.json` for an external renderer.
pub struct JsonChartSink {
    dir: PathBuf,
}

impl JsonChartSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ChartSink for JsonChartSink {
    fn render(&mut self, figure: &Figure, render: &RenderConfig) -> PipelineResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", figure.name));
        let doc = FigureDocument { render, figure };
        std::fs::write(&path, serde_json::to_string_pretty(&doc)?)?;
        log::info!("Saved figure: {}", path.display());
        Ok(())
    }
}

/// Keeps figures in memory. Used by tests and by callers that render
/// in-process.
#[derive(Default)]
pub struct MemoryChartSink {
    pub figures: Vec<Figure>,
}

impl ChartSink for MemoryChartSink {
    fn render(&mut self, figure: &Figure, _render: &RenderConfig) -> PipelineResult<()> {
        self.figures.push(figure.clone());
        Ok(())
    }
}
