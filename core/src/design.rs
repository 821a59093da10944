//! Experiment design, stage 3.
//!
//! 1. Baseline revenue metrics over every historical order.
//! 2. Minimum detectable effect as a fixed share of baseline revenue.
//! 3. Per-group sample size from the normal-approximation power formula.
//! 4. Uniform sampling without replacement, then an independent Bernoulli
//!    draw per sampled order for the arm. Arm sizes are whatever the draws
//!    give; they are never rebalanced.

use crate::{
    aggregate::Order,
    config::DesignConfig,
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    report::{Figure, Panel, Series},
    rng::{StageRng, StageSlot},
    stage::{PipelineStage, StageContext, StageOutput},
    stats,
    store::{AssignmentRow, Table},
    types::Group,
};
use serde::Serialize;

/// An order with its experiment arm. Built once; never reassigned.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub order: Order,
    pub group: Group,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub orders:        usize,
    pub mean_revenue:  f64,
    pub std_revenue:   f64,
    pub mean_price:    f64,
    pub mean_shipping: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerPlan {
    pub mde_pct:     f64,
    pub mde_abs:     f64,
    pub alpha:       f64,
    pub power:       f64,
    pub z_alpha:     f64,
    pub z_beta:      f64,
    pub n_per_group: u64,
    pub n_total:     u64,
}

/// Pre-treatment balance between the arms. Informational only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceCheck {
    pub n_control:      usize,
    pub n_treatment:    usize,
    pub control_mean:   Option<f64>,
    pub treatment_mean: Option<f64>,
    pub abs_diff:       Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ExperimentDesign {
    pub baseline:    Baseline,
    pub plan:        PowerPlan,
    pub assignments: Vec<Assignment>,
    pub balance:     BalanceCheck,
}

pub fn baseline(orders: &[Order]) -> PipelineResult<Baseline> {
    let revenue: Vec<f64> = orders.iter().map(|o| o.order_total).collect();
    let prices: Vec<f64> = orders.iter().map(|o| o.total_price).collect();
    let shipping: Vec<f64> = orders.iter().map(|o| o.total_shipping).collect();

    let insufficient = || PipelineError::InsufficientData {
        what: "baseline revenue".into(),
        needed: 2,
        actual: orders.len(),
    };
    Ok(Baseline {
        orders:        orders.len(),
        mean_revenue:  stats::mean(&revenue).ok_or_else(insufficient)?,
        std_revenue:   stats::std_dev(&revenue).ok_or_else(insufficient)?,
        mean_price:    stats::mean(&prices).ok_or_else(insufficient)?,
        mean_shipping: stats::mean(&shipping).ok_or_else(insufficient)?,
    })
}

/// n per group = ceil(2 (z_{1−α/2} + z_power)² σ² / MDE²).
///
/// Standard-normal quantiles are used on purpose: this is a planning
/// approximation, not the final test statistic.
pub fn required_sample_size(std: f64, mde: f64, alpha: f64, power: f64) -> PipelineResult<u64> {
    if !(mde.is_finite() && mde > 0.0) {
        return Err(PipelineError::InvalidDesign(format!(
            "minimum detectable effect must be positive, got {mde}"
        )));
    }
    let z_alpha = stats::normal_quantile(1.0 - alpha / 2.0)?;
    let z_beta = stats::normal_quantile(power)?;
    let n = 2.0 * (z_alpha + z_beta).powi(2) * std * std / (mde * mde);
    Ok(n.ceil() as u64)
}

pub fn plan_power(base: &Baseline, cfg: &DesignConfig) -> PipelineResult<PowerPlan> {
    let mde_abs = base.mean_revenue * cfg.mde_pct / 100.0;
    let n_per_group = required_sample_size(base.std_revenue, mde_abs, cfg.alpha, cfg.power)?;
    Ok(PowerPlan {
        mde_pct: cfg.mde_pct,
        mde_abs,
        alpha: cfg.alpha,
        power: cfg.power,
        z_alpha: stats::normal_quantile(1.0 - cfg.alpha / 2.0)?,
        z_beta: stats::normal_quantile(cfg.power)?,
        n_per_group,
        n_total: n_per_group * 2,
    })
}

/// Sample `n` orders uniformly without replacement (clamped to what is
/// available) and assign each an arm independently.
pub fn assign_groups(
    orders: &[Order],
    n: usize,
    treatment_probability: f64,
    rng: &mut StageRng,
) -> Vec<Assignment> {
    let picked = rng.sample_indices(orders.len(), n);
    picked
        .into_iter()
        .map(|i| {
            let group = if rng.chance(treatment_probability) {
                Group::Treatment
            } else {
                Group::Control
            };
            Assignment { order: orders[i].clone(), group }
        })
        .collect()
}

pub fn balance(assignments: &[Assignment]) -> BalanceCheck {
    let totals = |g: Group| -> Vec<f64> {
        assignments
            .iter()
            .filter(|a| a.group == g)
            .map(|a| a.order.order_total)
            .collect()
    };
    let control = totals(Group::Control);
    let treatment = totals(Group::Treatment);
    let control_mean = stats::mean(&control);
    let treatment_mean = stats::mean(&treatment);
    BalanceCheck {
        n_control: control.len(),
        n_treatment: treatment.len(),
        control_mean,
        treatment_mean,
        abs_diff: control_mean.zip(treatment_mean).map(|(c, t)| (c - t).abs()),
    }
}

pub fn design_experiment(
    orders: &[Order],
    cfg: &DesignConfig,
    rng: &mut StageRng,
) -> PipelineResult<ExperimentDesign> {
    let base = baseline(orders)?;
    let plan = plan_power(&base, cfg)?;
    if plan.n_total == 0 {
        return Err(PipelineError::InvalidDesign(
            "required sample size is zero (order revenue has no variance)".into(),
        ));
    }
    let n = usize::try_from(plan.n_total).unwrap_or(usize::MAX).min(orders.len());
    let assignments = assign_groups(orders, n, cfg.treatment_probability, rng);
    let balance = balance(&assignments);
    Ok(ExperimentDesign { baseline: base, plan, assignments, balance })
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "undefined".into(), |x| format!("{x:.2}"))
}

// ── Stage ────────────────────────────────────────────────────────────────────

pub struct DesignStage;

impl PipelineStage for DesignStage {
    fn slot(&self) -> StageSlot {
        StageSlot::Design
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> PipelineResult<StageOutput> {
        let orders: Vec<Order> = ctx.store.read_table(Table::OrderTotals)?;
        log::info!("Loaded order_totals: {} orders", orders.len());

        let design = design_experiment(&orders, &ctx.config.design, ctx.rng)?;
        let (base, plan, bal) = (&design.baseline, &design.plan, &design.balance);

        log::info!(
            "Mean revenue: {:.2} | Std: {:.2} | Mean shipping: {:.2}",
            base.mean_revenue, base.std_revenue, base.mean_shipping
        );
        if plan.mde_abs > base.mean_shipping {
            log::info!("MDE {:.1}% ({:.2}) covers mean shipping cost", plan.mde_pct, plan.mde_abs);
        } else {
            log::info!(
                "MDE {:.1}% ({:.2}) is below mean shipping cost ({:.2})",
                plan.mde_pct, plan.mde_abs, base.mean_shipping
            );
        }
        log::info!(
            "alpha = {}, power = {}: {} per group ({} total), {} available",
            plan.alpha, plan.power, plan.n_per_group, plan.n_total, orders.len()
        );
        log::info!(
            "Randomization check: control {} (n={}), treatment {} (n={}), diff {}",
            fmt_opt(bal.control_mean), bal.n_control,
            fmt_opt(bal.treatment_mean), bal.n_treatment,
            fmt_opt(bal.abs_diff)
        );

        let rows: Vec<AssignmentRow> = design.assignments.iter().map(AssignmentRow::from).collect();
        ctx.store.write_table(Table::ExperimentDesign, &rows)?;

        let groups = vec!["Control".to_string(), "Treatment".to_string()];
        ctx.charts.render(
            &Figure {
                name: "experiment_design_overview".into(),
                title: "Experiment design overview".into(),
                panels: vec![
                    Panel::bars(
                        "Experiment Group Sizes",
                        groups.clone(),
                        vec![Series::new("orders", [bal.n_control as f64, bal.n_treatment as f64])],
                    )
                    .with_y_label("Orders"),
                    Panel::bars(
                        "Baseline Revenue per Order",
                        groups,
                        vec![Series::with_gaps("mean", [bal.control_mean, bal.treatment_mean])],
                    )
                    .with_y_label("BRL"),
                ],
            },
            &ctx.config.render,
        )?;

        Ok(StageOutput {
            rows_out: rows.len(),
            events: vec![
                PipelineEvent::SampleSizeComputed {
                    mde_abs: plan.mde_abs,
                    n_per_group: plan.n_per_group,
                    n_total: plan.n_total,
                    available: orders.len(),
                },
                PipelineEvent::GroupsAssigned {
                    sampled: rows.len(),
                    control: bal.n_control,
                    treatment: bal.n_treatment,
                },
            ],
        })
    }
}
