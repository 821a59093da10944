//! Treatment simulation, stage 4.
//!
//! Per-order state machine, terminal in one pass:
//!   below_threshold  = total_price < threshold
//!   eligible         = treatment AND below_threshold
//!   responders       = floor(response_rate × |eligible|) eligible orders,
//!                      drawn uniformly without replacement
//!   amount_added     = max(0, threshold − total_price) + Uniform(min_add, max_add)
//!
//! Revenue rule:
//!   control                          → final_price + shipping
//!   treatment, final_price ≥ threshold → final_price (shipping waived)
//!   treatment, final_price < threshold → final_price + shipping
//!
//! Every outcome is built once as an immutable record; nothing is patched
//! after construction.

use crate::{
    config::TreatmentConfig,
    design::Assignment,
    error::PipelineResult,
    event::PipelineEvent,
    report::{histogram_panel, Figure, Marker, Panel, PanelBody, Series},
    rng::{StageRng, StageSlot},
    stage::{PipelineStage, StageContext, StageOutput},
    stats,
    store::{AssignmentRow, OutcomeRow, Table},
    types::Group,
};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedOutcome {
    pub assignment:      Assignment,
    pub below_threshold: bool,
    pub responded:       bool,
    pub amount_added:    f64,
    pub final_price:     f64,
    pub final_revenue:   f64,
}

impl SimulatedOutcome {
    pub fn group(&self) -> Group {
        self.assignment.group
    }

    pub fn total_price(&self) -> f64 {
        self.assignment.order.total_price
    }

    pub fn total_shipping(&self) -> f64 {
        self.assignment.order.total_shipping
    }
}

/// Top-up a responder adds: enough to reach the threshold, plus `extra`.
pub fn amount_added(total_price: f64, threshold: f64, extra: f64) -> f64 {
    (threshold - total_price).max(0.0) + extra
}

/// The three-way revenue rule.
pub fn final_revenue(group: Group, final_price: f64, shipping: f64, threshold: f64) -> f64 {
    match group {
        Group::Control => final_price + shipping,
        Group::Treatment if final_price >= threshold => final_price,
        Group::Treatment => final_price + shipping,
    }
}

/// Build the outcome for one order given its (optional) responder extra.
pub fn outcome_for(assignment: &Assignment, extra: Option<f64>, threshold: f64) -> SimulatedOutcome {
    let price = assignment.order.total_price;
    let below_threshold = price < threshold;
    let added = extra.map_or(0.0, |x| amount_added(price, threshold, x));
    let final_price = price + added;
    SimulatedOutcome {
        assignment: assignment.clone(),
        below_threshold,
        responded: extra.is_some(),
        amount_added: added,
        final_price,
        final_revenue: final_revenue(
            assignment.group,
            final_price,
            assignment.order.total_shipping,
            threshold,
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricComparison {
    pub metric:         String,
    pub control_mean:   Option<f64>,
    pub treatment_mean: Option<f64>,
    pub change_pct:     Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreatmentSummary {
    pub eligible:                 usize,
    pub responders:               usize,
    pub mean_amount_added:        Option<f64>,
    pub control_mean_revenue:     Option<f64>,
    pub treatment_mean_revenue:   Option<f64>,
    pub mean_diff:                Option<f64>,
    pub pct_diff:                 Option<f64>,
    /// Σ amount_added over responders.
    pub revenue_gained:           f64,
    /// Σ shipping over treatment orders already at or above the threshold.
    pub revenue_lost:             f64,
    pub net_effect:               f64,
    pub non_responders_below:     usize,
    pub already_above:            usize,
}

/// Invariants the simulation must satisfy; logged, not enforced by panic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreatmentChecks {
    pub missing_revenue:      usize,
    pub control_unchanged:    bool,
    pub responders_crossed:   bool,
    pub revenue_min:          Option<f64>,
    pub revenue_max:          Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TreatmentRun {
    pub outcomes:    Vec<SimulatedOutcome>,
    pub summary:     TreatmentSummary,
    pub comparisons: Vec<MetricComparison>,
    pub checks:      TreatmentChecks,
}

/// Simulate customer response for every assignment, in input order.
pub fn simulate_treatment(
    assignments: &[Assignment],
    cfg: &TreatmentConfig,
    rng: &mut StageRng,
) -> TreatmentRun {
    let eligible: Vec<usize> = assignments
        .iter()
        .enumerate()
        .filter(|(_, a)| a.group == Group::Treatment && a.order.total_price < cfg.threshold)
        .map(|(i, _)| i)
        .collect();
    let n_responders = (eligible.len() as f64 * cfg.response_rate).floor() as usize;

    // Extras are drawn in responder draw order, one per responder.
    let mut extras: HashMap<usize, f64> = HashMap::with_capacity(n_responders);
    for pick in rng.sample_indices(eligible.len(), n_responders) {
        extras.insert(eligible[pick], rng.uniform(cfg.min_add, cfg.max_add));
    }

    let outcomes: Vec<SimulatedOutcome> = assignments
        .iter()
        .enumerate()
        .map(|(i, a)| outcome_for(a, extras.get(&i).copied(), cfg.threshold))
        .collect();

    let summary = summarize(&outcomes, eligible.len());
    let comparisons = compare_metrics(&outcomes);
    let checks = self_check(&outcomes, cfg.threshold);
    TreatmentRun { outcomes, summary, comparisons, checks }
}

fn column(outcomes: &[SimulatedOutcome], group: Group, f: impl Fn(&SimulatedOutcome) -> f64) -> Vec<f64> {
    outcomes.iter().filter(|o| o.group() == group).map(f).collect()
}

fn summarize(outcomes: &[SimulatedOutcome], eligible: usize) -> TreatmentSummary {
    let added: Vec<f64> = outcomes.iter().filter(|o| o.responded).map(|o| o.amount_added).collect();
    let control = column(outcomes, Group::Control, |o| o.final_revenue);
    let treatment = column(outcomes, Group::Treatment, |o| o.final_revenue);
    let control_mean_revenue = stats::mean(&control);
    let treatment_mean_revenue = stats::mean(&treatment);
    let mean_diff = treatment_mean_revenue.zip(control_mean_revenue).map(|(t, c)| t - c);
    let pct_diff = mean_diff
        .zip(control_mean_revenue)
        .and_then(|(d, c)| stats::ratio(d, c))
        .map(|r| r * 100.0);

    let treated = || outcomes.iter().filter(|o| o.group() == Group::Treatment);
    let revenue_gained: f64 = added.iter().sum();
    let revenue_lost: f64 = treated()
        .filter(|o| !o.below_threshold)
        .map(|o| o.total_shipping())
        .sum();

    TreatmentSummary {
        eligible,
        responders: added.len(),
        mean_amount_added: stats::mean(&added),
        control_mean_revenue,
        treatment_mean_revenue,
        mean_diff,
        pct_diff,
        revenue_gained,
        revenue_lost,
        net_effect: revenue_gained - revenue_lost,
        non_responders_below: treated().filter(|o| o.below_threshold && !o.responded).count(),
        already_above: treated().filter(|o| !o.below_threshold).count(),
    }
}

fn compare_metrics(outcomes: &[SimulatedOutcome]) -> Vec<MetricComparison> {
    let metrics: [(&str, fn(&SimulatedOutcome) -> f64); 4] = [
        ("Original Price", |o| o.total_price()),
        ("Final Price", |o| o.final_price),
        ("Shipping Cost", |o| o.total_shipping()),
        ("Final Revenue", |o| o.final_revenue),
    ];
    metrics
        .iter()
        .map(|(name, f)| {
            let c = stats::mean(&column(outcomes, Group::Control, f));
            let t = stats::mean(&column(outcomes, Group::Treatment, f));
            MetricComparison {
                metric: (*name).into(),
                control_mean: c,
                treatment_mean: t,
                change_pct: t.zip(c).and_then(|(t, c)| stats::ratio(t - c, c)).map(|r| r * 100.0),
            }
        })
        .collect()
}

fn self_check(outcomes: &[SimulatedOutcome], threshold: f64) -> TreatmentChecks {
    let revenue: Vec<f64> = outcomes.iter().map(|o| o.final_revenue).collect();
    let finite: Vec<f64> = revenue.iter().copied().filter(|r| r.is_finite()).collect();
    TreatmentChecks {
        missing_revenue: revenue.len() - finite.len(),
        control_unchanged: outcomes
            .iter()
            .filter(|o| o.group() == Group::Control)
            .all(|o| o.final_price == o.total_price()),
        responders_crossed: outcomes
            .iter()
            .filter(|o| o.responded)
            .all(|o| o.final_price >= threshold),
        revenue_min: finite.iter().copied().reduce(f64::min),
        revenue_max: finite.iter().copied().reduce(f64::max),
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "undefined".into(), |x| format!("{x:.2}"))
}

// ── Stage ────────────────────────────────────────────────────────────────────

pub struct TreatmentStage;

impl PipelineStage for TreatmentStage {
    fn slot(&self) -> StageSlot {
        StageSlot::Treatment
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> PipelineResult<StageOutput> {
        let rows: Vec<AssignmentRow> = ctx.store.read_table(Table::ExperimentDesign)?;
        let assignments: Vec<Assignment> = rows.into_iter().map(Assignment::from).collect();
        log::info!("Loaded experiment design: {} orders", assignments.len());

        let cfg = &ctx.config.treatment;
        let run = simulate_treatment(&assignments, cfg, ctx.rng);
        let (s, checks) = (&run.summary, &run.checks);

        log::info!(
            "Eligible treatment orders below {:.0}: {} | responders: {} ({:.1}%), avg addition {}",
            cfg.threshold, s.eligible, s.responders, cfg.response_rate * 100.0,
            fmt_opt(s.mean_amount_added)
        );
        log::info!(
            "Mean revenue: control {}, treatment {}, delta {} ({}%)",
            fmt_opt(s.control_mean_revenue), fmt_opt(s.treatment_mean_revenue),
            fmt_opt(s.mean_diff), fmt_opt(s.pct_diff)
        );
        log::info!(
            "Revenue gained: +{:.2}, lost: -{:.2}, net: {:.2}",
            s.revenue_gained, s.revenue_lost, s.net_effect
        );
        for c in &run.comparisons {
            log::info!(
                "{}: control={}, treatment={}, change={}%",
                c.metric, fmt_opt(c.control_mean), fmt_opt(c.treatment_mean), fmt_opt(c.change_pct)
            );
        }

        let mut events = vec![PipelineEvent::ResponseSimulated {
            eligible: s.eligible,
            responders: s.responders,
        }];
        if checks.missing_revenue > 0 {
            log::warn!("{} orders have missing revenue", checks.missing_revenue);
            events.push(PipelineEvent::InvariantViolated {
                group: None,
                description: format!("{} orders have missing revenue", checks.missing_revenue),
            });
        }
        if !checks.control_unchanged {
            log::warn!("Control orders were modified by the simulation");
            events.push(PipelineEvent::InvariantViolated {
                group: Some(Group::Control),
                description: "control final_price differs from total_price".into(),
            });
        }
        if !checks.responders_crossed {
            log::warn!("Some responders did not reach the threshold");
            events.push(PipelineEvent::InvariantViolated {
                group: Some(Group::Treatment),
                description: "responder below threshold".into(),
            });
        }
        log::info!(
            "Final revenue range: {} to {}",
            fmt_opt(checks.revenue_min),
            fmt_opt(checks.revenue_max)
        );

        let out: Vec<OutcomeRow> = run.outcomes.iter().map(OutcomeRow::from).collect();
        ctx.store.write_table(Table::ExperimentResults, &out)?;

        let control = column(&run.outcomes, Group::Control, |o| o.final_revenue);
        let treatment = column(&run.outcomes, Group::Treatment, |o| o.final_revenue);
        let mut dist = histogram_panel(
            "Final Revenue Distribution",
            &[("Control", &control), ("Treatment", &treatment)],
            ctx.config.render.histogram_bins,
        );
        for (label, mean) in [("Control mean", s.control_mean_revenue), ("Treatment mean", s.treatment_mean_revenue)] {
            if let Some(m) = mean {
                dist = dist.with_reference(Marker::new(label, m));
            }
        }
        let groups = vec!["Control".to_string(), "Treatment".to_string()];
        ctx.charts.render(
            &Figure {
                name: "treatment_effect_analysis".into(),
                title: "Treatment effect analysis".into(),
                panels: vec![
                    dist,
                    Panel::bars(
                        "Mean Revenue per Group",
                        groups,
                        vec![Series::with_gaps("mean", [s.control_mean_revenue, s.treatment_mean_revenue])],
                    ),
                    Panel {
                        title: "Treatment Group Composition".into(),
                        y_label: None,
                        body: PanelBody::Pie {
                            labels: vec!["Responders".into(), "Non-responders".into(), "Already above".into()],
                            values: vec![
                                s.responders as f64,
                                s.non_responders_below as f64,
                                s.already_above as f64,
                            ],
                        },
                    },
                    Panel::bars(
                        "Revenue Impact Breakdown",
                        vec!["Gained".into(), "Lost".into(), "Net".into()],
                        vec![Series::new("BRL", [s.revenue_gained, -s.revenue_lost, s.net_effect])],
                    )
                    .with_reference(Marker::new("zero", 0.0)),
                ],
            },
            &ctx.config.render,
        )?;

        Ok(StageOutput { rows_out: out.len(), events })
    }
}
