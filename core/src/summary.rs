//! Business summary, stage 6.
//!
//! Turns simulated outcomes into segment economics and compares two
//! rollout strategies:
//!   - universal: free shipping for every segment
//!   - targeted:  free shipping only for the configured segments
//!
//! A strategy is recommended for implementation when its net impact is
//! positive; among those, the one with the largest net impact is
//! preferred. Segment names are never special-cased.

use crate::{
    analysis,
    config::SegmentBounds,
    error::PipelineResult,
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEconomics {
    pub segment:           Segment,
    pub n_control:         usize,
    pub n_treatment:       usize,
    /// Σ amount_added over responders.
    pub revenue_gain:      f64,
    /// Σ shipping over treatment orders whose final price met the threshold.
    pub shipping_cost:     f64,
    pub net_impact:        f64,
    /// Mean treatment revenue minus mean control revenue.
    pub per_customer_diff: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Universal,
    Targeted,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Universal => "universal",
            Self::Targeted  => "targeted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Implement,
    Reject,
}

impl Recommendation {
    pub fn for_net(net_impact: f64) -> Self {
        if net_impact > 0.0 { Self::Implement } else { Self::Reject }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Implement => "IMPLEMENT",
            Self::Reject    => "REJECT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutcome {
    pub strategy:           Strategy,
    /// Segments in scope, joined with '+'.
    pub scope:              String,
    pub customers_affected: usize,
    pub revenue_gain:       f64,
    pub shipping_cost:      f64,
    pub net_profit:         f64,
    /// None when shipping cost is zero.
    pub roi_pct:            Option<f64>,
    pub recommendation:     Recommendation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyComparison {
    pub universal:   StrategyOutcome,
    pub targeted:    StrategyOutcome,
    /// Highest positive net impact, if any strategy is worth implementing.
    pub preferred:   Option<Strategy>,
    /// targeted net − universal net.
    pub improvement: f64,
}

impl StrategyComparison {
    pub fn outcomes(&self) -> [&StrategyOutcome; 2] {
        [&self.universal, &self.targeted]
    }
}

/// Control-arm context printed alongside the comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineContext {
    pub n_control:    usize,
    pub n_treatment:  usize,
    pub control_mean: Option<f64>,
    pub control_std:  Option<f64>,
}

/// ROI in percent; undefined when nothing was spent.
pub fn roi_pct(net_impact: f64, shipping_cost: f64) -> Option<f64> {
    stats::ratio(net_impact, shipping_cost).map(|r| r * 100.0)
}

pub fn baseline_context(outcomes: &[SimulatedOutcome]) -> BaselineContext {
    let control: Vec<f64> = outcomes
        .iter()
        .filter(|o| o.group() == Group::Control)
        .map(|o| o.assignment.order.order_total)
        .collect();
    BaselineContext {
        n_control: control.len(),
        n_treatment: outcomes.len() - control.len(),
        control_mean: stats::mean(&control),
        control_std: stats::std_dev(&control),
    }
}

/// Economics for every segment, in reporting order. Empty segments are
/// kept with zero sums so strategy totals always cover the same rows.
pub fn segment_economics(
    outcomes: &[SimulatedOutcome],
    bounds: &SegmentBounds,
    threshold: f64,
) -> Vec<SegmentEconomics> {
    Segment::ALL
        .iter()
        .map(|&segment| {
            let in_segment = |o: &&SimulatedOutcome| Segment::classify(o.total_price(), bounds) == segment;
            let control: Vec<f64> = outcomes
                .iter()
                .filter(in_segment)
                .filter(|o| o.group() == Group::Control)
                .map(|o| o.final_revenue)
                .collect();
            let treated: Vec<&SimulatedOutcome> = outcomes
                .iter()
                .filter(in_segment)
                .filter(|o| o.group() == Group::Treatment)
                .collect();

            let revenue_gain: f64 = treated.iter().filter(|o| o.responded).map(|o| o.amount_added).sum();
            let shipping_cost: f64 = treated
                .iter()
                .filter(|o| o.final_price >= threshold)
                .map(|o| o.total_shipping())
                .sum();
            let treated_revenue: Vec<f64> = treated.iter().map(|o| o.final_revenue).collect();

            SegmentEconomics {
                segment,
                n_control: control.len(),
                n_treatment: treated.len(),
                revenue_gain,
                shipping_cost,
                net_impact: revenue_gain - shipping_cost,
                per_customer_diff: stats::mean(&treated_revenue)
                    .zip(stats::mean(&control))
                    .map(|(t, c)| t - c),
            }
        })
        .collect()
}

/// Roll the segments in `scope` up into one strategy outcome.
pub fn evaluate_strategy(
    strategy: Strategy,
    scope: &[Segment],
    economics: &[SegmentEconomics],
) -> StrategyOutcome {
    let in_scope: Vec<&SegmentEconomics> =
        economics.iter().filter(|e| scope.contains(&e.segment)).collect();
    let revenue_gain: f64 = in_scope.iter().map(|e| e.revenue_gain).sum();
    let shipping_cost: f64 = in_scope.iter().map(|e| e.shipping_cost).sum();
    let net_profit: f64 = in_scope.iter().map(|e| e.net_impact).sum();
    StrategyOutcome {
        strategy,
        scope: scope.iter().map(Segment::as_str).collect::<Vec<_>>().join("+"),
        customers_affected: in_scope.iter().map(|e| e.n_treatment).sum(),
        revenue_gain,
        shipping_cost,
        net_profit,
        roi_pct: roi_pct(net_profit, shipping_cost),
        recommendation: Recommendation::for_net(net_profit),
    }
}

pub fn compare_strategies(economics: &[SegmentEconomics], targeted: &[Segment]) -> StrategyComparison {
    let universal = evaluate_strategy(Strategy::Universal, &Segment::ALL, economics);
    let targeted = evaluate_strategy(Strategy::Targeted, targeted, economics);
    let preferred = [&universal, &targeted]
        .into_iter()
        .filter(|s| s.recommendation == Recommendation::Implement)
        .max_by(|a, b| a.net_profit.total_cmp(&b.net_profit))
        .map(|s| s.strategy);
    let improvement = targeted.net_profit - universal.net_profit;
    StrategyComparison { universal, targeted, preferred, improvement }
}

fn fmt_roi(v: Option<f64>) -> String {
    v.map_or_else(|| "undefined".into(), |x| format!("{x:.1}%"))
}

// ── Stage ────────────────────────────────────────────────────────────────────

pub struct SummaryStage;

impl PipelineStage for SummaryStage {
    fn slot(&self) -> StageSlot {
        StageSlot::Summary
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> PipelineResult<StageOutput> {
        let rows: Vec<OutcomeRow> = ctx.store.read_table(Table::ExperimentResults)?;
        let outcomes: Vec<SimulatedOutcome> = rows.into_iter().map(SimulatedOutcome::from).collect();

        let base = baseline_context(&outcomes);
        log::info!(
            "Control={}, Treatment={} | baseline mean={}, std={}",
            base.n_control,
            base.n_treatment,
            base.control_mean.map_or_else(|| "undefined".into(), |m| format!("{m:.2}")),
            base.control_std.map_or_else(|| "undefined".into(), |s| format!("{s:.2}"))
        );

        let bounds = &ctx.config.segments;
        let economics = segment_economics(&outcomes, bounds, ctx.config.treatment.threshold);
        for e in &economics {
            log::info!(
                "{}: gain=+{:.2}, shipping=-{:.2}, net={:+.2}",
                e.segment, e.revenue_gain, e.shipping_cost, e.net_impact
            );
        }

        let comparison = compare_strategies(&economics, &ctx.config.strategy.targeted_segments);
        let mut events = Vec::new();
        for s in comparison.outcomes() {
            log::info!(
                "{} ({}): net={:+.2}, ROI={}, {}",
                s.strategy.as_str(), s.scope, s.net_profit, fmt_roi(s.roi_pct),
                s.recommendation.as_str()
            );
            events.push(PipelineEvent::RecommendationIssued {
                strategy: s.strategy.as_str().into(),
                net_impact: s.net_profit,
                recommendation: s.recommendation.as_str().into(),
            });
        }
        match comparison.preferred {
            Some(p) => log::info!(
                "Preferred strategy: {} (improvement of targeted over universal: {:+.2})",
                p.as_str(), comparison.improvement
            ),
            None => log::warn!("No strategy has a positive net impact"),
        }

        ctx.store.write_table(Table::SegmentEconomics, &economics)?;
        let strategies = [comparison.universal.clone(), comparison.targeted.clone()];
        ctx.store.write_table(Table::StrategyComparison, &strategies)?;

        // Segment effects come from the live analysis of these outcomes.
        let (effects, _) = analysis::segment_effects(&outcomes, bounds)?;
        let figure = summary_figure(&comparison, &economics, &effects);
        ctx.charts.render(&figure, &ctx.config.render)?;

        Ok(StageOutput { rows_out: strategies.len(), events })
    }
}

fn summary_figure(
    comparison: &StrategyComparison,
    economics: &[SegmentEconomics],
    effects: &[analysis::SegmentEffect],
) -> Figure {
    let strategies = vec!["Universal".to_string(), "Targeted".to_string()];
    let segments: Vec<String> = economics.iter().map(|e| e.segment.to_string()).collect();
    Figure {
        name: "final_summary".into(),
        title: "Final summary".into(),
        panels: vec![
            Panel::bars(
                "Net Profit by Strategy",
                strategies.clone(),
                vec![Series::new(
                    "net",
                    [comparison.universal.net_profit, comparison.targeted.net_profit],
                )],
            )
            .with_y_label("Net Profit (BRL)")
            .with_reference(Marker::new("zero", 0.0)),
            Panel::bars(
                "Return on Investment by Strategy",
                strategies,
                vec![Series::with_gaps(
                    "roi",
                    [comparison.universal.roi_pct, comparison.targeted.roi_pct],
                )],
            )
            .with_y_label("ROI (%)")
            .with_reference(Marker::new("zero", 0.0)),
            Panel::bars(
                "Economic Breakdown by Segment",
                segments,
                vec![
                    Series::new("Revenue Gained", economics.iter().map(|e| e.revenue_gain)),
                    Series::new("Shipping Cost", economics.iter().map(|e| -e.shipping_cost)),
                    Series::new("Net Impact", economics.iter().map(|e| e.net_impact)),
                ],
            )
            .with_y_label("Amount (BRL)"),
            Panel::bars(
                "Treatment Effect by Segment",
                effects.iter().map(|e| e.segment.to_string()).collect(),
                vec![Series::with_gaps("effect_pct", effects.iter().map(|e| e.pct_diff))],
            )
            .with_y_label("Treatment Effect (%)")
            .with_reference(Marker::new("zero", 0.0)),
        ],
    }
}
