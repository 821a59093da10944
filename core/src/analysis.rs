//! Statistical analysis, stage 5.
//!
//! Compares final revenue between arms over a fixed snapshot of simulated
//! outcomes. Everything is recomputed from scratch on each call.

use crate::{
    config::{DesignConfig, PipelineConfig, SegmentBounds},
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    report::{Figure, Marker, Panel, Series},
    rng::StageSlot,
    segment::Segment,
    stage::{PipelineStage, StageContext, StageOutput},
    stats,
    store::{OutcomeRow, Table},
    treatment::SimulatedOutcome,
    types::Group,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub n_control:          usize,
    pub n_treatment:        usize,
    pub control_mean:       f64,
    pub treatment_mean:     f64,
    pub mean_diff:          f64,
    pub pct_diff:           Option<f64>,
    pub t_stat:             Option<f64>,
    pub p_value:            Option<f64>,
    /// Unequal-variance standard error of the difference.
    pub se:                 f64,
    /// min(n1 − 1, n2 − 1), used for the CI critical value.
    pub df:                 usize,
    pub t_crit:             f64,
    pub ci_low:             f64,
    pub ci_high:            f64,
    pub pooled_std:         f64,
    pub cohens_d:           Option<f64>,
    /// Smallest difference detectable at the configured power with n1.
    pub detectable_effect:  f64,
    pub detectable_pct:     Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEffect {
    pub segment:        Segment,
    pub n_control:      usize,
    pub n_treatment:    usize,
    pub control_mean:   f64,
    pub treatment_mean: f64,
    pub difference:     f64,
    pub pct_diff:       Option<f64>,
    pub t_stat:         Option<f64>,
    pub p_value:        Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub overall:  AnalysisResult,
    pub segments: Vec<SegmentEffect>,
    /// Segments missing data on one side.
    pub skipped:  Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    #[serde(rename = "Metric")]
    pub metric: String,
    #[serde(rename = "Value")]
    pub value:  String,
}

/// Overall two-sample comparison of treatment against control.
pub fn compare_groups(
    control: &[f64],
    treatment: &[f64],
    design: &DesignConfig,
) -> PipelineResult<AnalysisResult> {
    let (n1, n2) = (control.len(), treatment.len());
    if n1 < 2 || n2 < 2 {
        return Err(PipelineError::InsufficientData {
            what: "two-sample comparison (rows per arm)".into(),
            needed: 2,
            actual: n1.min(n2),
        });
    }
    // Both arms have ≥ 2 rows, so every moment below is defined.
    let insufficient = || PipelineError::InsufficientData {
        what: "two-sample comparison".into(),
        needed: 2,
        actual: n1.min(n2),
    };
    let control_mean = stats::mean(control).ok_or_else(insufficient)?;
    let treatment_mean = stats::mean(treatment).ok_or_else(insufficient)?;
    let v1 = stats::variance(control).ok_or_else(insufficient)?;
    let v2 = stats::variance(treatment).ok_or_else(insufficient)?;

    let mean_diff = treatment_mean - control_mean;
    let test = stats::ttest_ind(treatment, control)?;

    let se = (v1 / n1 as f64 + v2 / n2 as f64).sqrt();
    let df = (n1 - 1).min(n2 - 1);
    let t_crit = stats::t_quantile(1.0 - design.alpha / 2.0, df as f64)?;

    let pooled_std =
        (((n1 - 1) as f64 * v1 + (n2 - 1) as f64 * v2) / (n1 + n2 - 2) as f64).sqrt();

    let z_alpha = stats::normal_quantile(1.0 - design.alpha / 2.0)?;
    let z_beta = stats::normal_quantile(design.power)?;
    let detectable_effect = (z_alpha + z_beta) * pooled_std / (n1 as f64 / 2.0).sqrt();

    Ok(AnalysisResult {
        n_control: n1,
        n_treatment: n2,
        control_mean,
        treatment_mean,
        mean_diff,
        pct_diff: stats::ratio(mean_diff, control_mean).map(|r| r * 100.0),
        t_stat: test.map(|t| t.t_stat),
        p_value: test.map(|t| t.p_value),
        se,
        df,
        t_crit,
        ci_low: mean_diff - t_crit * se,
        ci_high: mean_diff + t_crit * se,
        pooled_std,
        cohens_d: stats::ratio(mean_diff, pooled_std),
        detectable_effect,
        detectable_pct: stats::ratio(detectable_effect, control_mean).map(|r| r * 100.0),
    })
}

fn revenue(outcomes: &[&SimulatedOutcome], group: Group) -> Vec<f64> {
    outcomes
        .iter()
        .filter(|o| o.group() == group)
        .map(|o| o.final_revenue)
        .collect()
}

/// Per-segment comparison. Segments with no rows in either arm are left
/// out of the result and listed in the second element.
pub fn segment_effects(
    outcomes: &[SimulatedOutcome],
    bounds: &SegmentBounds,
) -> PipelineResult<(Vec<SegmentEffect>, Vec<Segment>)> {
    let mut effects = Vec::new();
    let mut skipped = Vec::new();
    for segment in Segment::ALL {
        let subset: Vec<&SimulatedOutcome> = outcomes
            .iter()
            .filter(|o| Segment::classify(o.total_price(), bounds) == segment)
            .collect();
        let c = revenue(&subset, Group::Control);
        let t = revenue(&subset, Group::Treatment);
        let (Some(control_mean), Some(treatment_mean)) = (stats::mean(&c), stats::mean(&t)) else {
            skipped.push(segment);
            continue;
        };
        let difference = treatment_mean - control_mean;
        let test = stats::ttest_ind(&t, &c)?;
        effects.push(SegmentEffect {
            segment,
            n_control: c.len(),
            n_treatment: t.len(),
            control_mean,
            treatment_mean,
            difference,
            pct_diff: stats::ratio(difference, control_mean).map(|r| r * 100.0),
            t_stat: test.map(|x| x.t_stat),
            p_value: test.map(|x| x.p_value),
        });
    }
    Ok((effects, skipped))
}

pub fn analyze(outcomes: &[SimulatedOutcome], config: &PipelineConfig) -> PipelineResult<Analysis> {
    let all: Vec<&SimulatedOutcome> = outcomes.iter().collect();
    let control = revenue(&all, Group::Control);
    let treatment = revenue(&all, Group::Treatment);
    let overall = compare_groups(&control, &treatment, &config.design)?;
    let (segments, skipped) = segment_effects(outcomes, &config.segments)?;
    Ok(Analysis { overall, segments, skipped })
}

fn fmt(v: Option<f64>, decimals: usize, suffix: &str) -> String {
    v.map_or_else(String::new, |x| format!("{x:.decimals$}{suffix}"))
}

/// The headline table written to analysis_results.csv. Undefined values
/// are written as empty cells.
pub fn metric_rows(r: &AnalysisResult) -> Vec<MetricRow> {
    let row = |metric: &str, value: String| MetricRow { metric: metric.into(), value };
    vec![
        row("Overall Effect (BRL)", fmt(Some(r.mean_diff), 2, "")),
        row("Effect (%)", fmt(r.pct_diff, 2, "%")),
        row("P-value", fmt(r.p_value, 4, "")),
        row("95% CI Lower", fmt(Some(r.ci_low), 2, "")),
        row("95% CI Upper", fmt(Some(r.ci_high), 2, "")),
        row("Cohen's d", fmt(r.cohens_d, 4, "")),
        row("Detectable Effect (BRL)", fmt(Some(r.detectable_effect), 2, "")),
    ]
}

// ── Stage ────────────────────────────────────────────────────────────────────

pub struct AnalysisStage;

impl PipelineStage for AnalysisStage {
    fn slot(&self) -> StageSlot {
        StageSlot::Analysis
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> PipelineResult<StageOutput> {
        let rows: Vec<OutcomeRow> = ctx.store.read_table(Table::ExperimentResults)?;
        let outcomes: Vec<SimulatedOutcome> = rows.into_iter().map(SimulatedOutcome::from).collect();
        log::info!("Loaded experiment results: {} orders", outcomes.len());

        let analysis = analyze(&outcomes, ctx.config)?;
        let r = &analysis.overall;

        log::info!(
            "Control mean: {:.2} (n={}), treatment mean: {:.2} (n={}), delta={:.2} ({}%)",
            r.control_mean, r.n_control, r.treatment_mean, r.n_treatment, r.mean_diff,
            fmt(r.pct_diff, 2, "")
        );
        log::info!("T-test: t={}, p={}", fmt(r.t_stat, 3, ""), fmt(r.p_value, 4, ""));
        log::info!("95% CI: [{:.2}, {:.2}] BRL (df={}, t_crit={:.4})", r.ci_low, r.ci_high, r.df, r.t_crit);
        log::info!("Cohen's d = {}", fmt(r.cohens_d, 4, ""));
        log::info!(
            "Detectable effect (power {}): {:.2} BRL ({}%)",
            ctx.config.design.power, r.detectable_effect, fmt(r.detectable_pct, 2, "")
        );
        for s in &analysis.segments {
            log::info!(
                "Segment {}: control={:.2}, treatment={:.2}, diff={:.2} ({}%), p={}",
                s.segment, s.control_mean, s.treatment_mean, s.difference,
                fmt(s.pct_diff, 2, ""), fmt(s.p_value, 4, "")
            );
        }

        let mut events = vec![PipelineEvent::EffectEstimated {
            mean_diff: r.mean_diff,
            p_value: r.p_value,
            ci_low: r.ci_low,
            ci_high: r.ci_high,
        }];
        for seg in &analysis.skipped {
            log::info!("Segment {seg} skipped: no rows in one arm");
            events.push(PipelineEvent::SegmentSkipped { segment: seg.to_string() });
        }

        let metrics = metric_rows(r);
        ctx.store.write_table(Table::AnalysisResults, &metrics)?;
        ctx.store.write_table(Table::SegmentResults, &analysis.segments)?;

        let figure = segmentation_figure(&analysis.segments, &ctx.config.segments, ctx.config.design.alpha);
        ctx.charts.render(&figure, &ctx.config.render)?;

        Ok(StageOutput { rows_out: metrics.len(), events })
    }
}

fn segmentation_figure(segments: &[SegmentEffect], bounds: &SegmentBounds, alpha: f64) -> Figure {
    let labels: Vec<String> = segments.iter().map(|s| s.segment.label(bounds)).collect();
    Figure {
        name: "segmentation_analysis".into(),
        title: "Segmentation analysis".into(),
        panels: vec![
            Panel::bars(
                "Mean Revenue by Segment",
                labels.clone(),
                vec![
                    Series::new("Control", segments.iter().map(|s| s.control_mean)),
                    Series::new("Treatment", segments.iter().map(|s| s.treatment_mean)),
                ],
            ),
            Panel::bars(
                "Treatment Effect (%) by Segment",
                labels.clone(),
                vec![Series::with_gaps("pct_diff", segments.iter().map(|s| s.pct_diff))],
            )
            .with_reference(Marker::new("zero", 0.0)),
            Panel::bars(
                "P-values by Segment",
                labels.clone(),
                vec![Series::with_gaps("p_value", segments.iter().map(|s| s.p_value))],
            )
            .with_reference(Marker::new(format!("alpha={alpha}"), alpha)),
            Panel::bars(
                "Revenue Difference (BRL) by Segment",
                labels,
                vec![Series::new("difference", segments.iter().map(|s| s.difference))],
            )
            .with_reference(Marker::new("zero", 0.0)),
        ],
    }
}
