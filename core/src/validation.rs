//! Data-quality validation, stage 2.
//!
//! Six independent, read-only checks on the aggregated orders. Each yields
//! PASS or ACKNOWLEDGED with a detail line. None of them halts the
//! pipeline; they are recorded for human review.
//!
//! The checks are a pure function of their inputs: running them twice on
//! the same tables yields an identical report.

use crate::{
    aggregate::Order,
    config::ValidationConfig,
    error::PipelineResult,
    event::PipelineEvent,
    report::{histogram_panel, Figure, Marker, Panel, PanelBody},
    rng::StageSlot,
    stage::{PipelineStage, StageContext, StageOutput},
    stats::{self, FiveNumber},
    store::{RawOrder, Table},
};
use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Pass,
    Acknowledged,
}

impl CheckStatus {
    fn pass_if(ok: bool) -> Self {
        if ok { Self::Pass } else { Self::Acknowledged }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass         => "PASS",
            Self::Acknowledged => "ACKNOWLEDGED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub check:   String,
    pub status:  CheckStatus,
    pub details: String,
}

/// The numbers behind the report, kept for callers that need more than text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationMetrics {
    pub distinct_customers:   usize,
    pub repeat_customers:     usize,
    pub repeat_share:         Option<f64>,
    pub monthly_counts:       BTreeMap<u32, usize>,
    pub temporal_ratio:       Option<f64>,
    /// Share of raw orders per order_status, most frequent first in logs.
    pub status_shares:        BTreeMap<String, f64>,
    pub delivered_share:      Option<f64>,
    pub only_delivered:       bool,
    pub outlier_lower:        Option<f64>,
    pub outlier_upper:        Option<f64>,
    pub outlier_count:        usize,
    pub outlier_pct:          Option<f64>,
    pub cv_pct:               Option<f64>,
    pub missing_values:       usize,
    pub nonpositive_price:    usize,
    pub nonpositive_total:    usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub checks:  Vec<ValidationCheck>,
    pub metrics: ValidationMetrics,
}

fn pct(v: Option<f64>) -> String {
    v.map_or_else(|| "undefined".into(), |x| format!("{x:.2}%"))
}

fn check(name: &str, status: CheckStatus, details: String) -> ValidationCheck {
    ValidationCheck { check: name.into(), status, details }
}

/// Run every check.
pub fn validate(
    orders: &[Order],
    raw_orders: &[RawOrder],
    cfg: &ValidationConfig,
) -> PipelineResult<ValidationReport> {
    let mut m = ValidationMetrics::default();
    let checks = vec![
        independence(orders, raw_orders, cfg, &mut m),
        temporal_balance(raw_orders, cfg, &mut m)?,
        delivery_status(orders, raw_orders, cfg, &mut m),
        outliers(orders, cfg, &mut m),
        variability(orders, cfg, &mut m),
        completeness(orders, &mut m),
    ];
    Ok(ValidationReport { checks, metrics: m })
}

fn independence(
    orders: &[Order],
    raw_orders: &[RawOrder],
    cfg: &ValidationConfig,
    m: &mut ValidationMetrics,
) -> ValidationCheck {
    let customer_of: HashMap<&str, &str> = raw_orders
        .iter()
        .map(|o| (o.order_id.as_str(), o.customer_id.as_str()))
        .collect();

    let mut per_customer: HashMap<&str, usize> = HashMap::new();
    for order in orders {
        // Orders with no customer record carry no customer key.
        if let Some(customer) = customer_of.get(order.order_id.as_str()) {
            *per_customer.entry(*customer).or_default() += 1;
        }
    }
    m.distinct_customers = per_customer.len();
    m.repeat_customers = per_customer.values().filter(|&&n| n > 1).count();
    m.repeat_share = stats::ratio(m.repeat_customers as f64, m.distinct_customers as f64);

    let ok = m.repeat_share.is_some_and(|s| s < cfg.max_repeat_customer_share);
    let advice = if ok {
        "independence assumption holds"
    } else {
        "consider customer-level randomization"
    };
    check(
        "Independence",
        CheckStatus::pass_if(ok),
        format!("Repeat customers: {} ({advice})", pct(m.repeat_share.map(|s| s * 100.0))),
    )
}

fn temporal_balance(
    raw_orders: &[RawOrder],
    cfg: &ValidationConfig,
    m: &mut ValidationMetrics,
) -> PipelineResult<ValidationCheck> {
    for o in raw_orders {
        let ts = NaiveDateTime::parse_from_str(&o.order_purchase_timestamp, TIMESTAMP_FORMAT)?;
        *m.monthly_counts.entry(ts.month()).or_default() += 1;
    }
    let max = m.monthly_counts.values().copied().max();
    let min = m.monthly_counts.values().copied().min();
    m.temporal_ratio = match (max, min) {
        (Some(hi), Some(lo)) => stats::ratio(hi as f64, lo as f64),
        _ => None,
    };

    let ok = m.temporal_ratio.is_some_and(|r| r < cfg.max_temporal_ratio);
    let ratio = m.temporal_ratio.map_or_else(|| "undefined".into(), |r| format!("{r:.2}"));
    let note = if ok {
        "orders reasonably distributed over time"
    } else {
        "temporal clustering detected"
    };
    Ok(check(
        "Temporal Distribution",
        CheckStatus::pass_if(ok),
        format!("Temporal ratio: {ratio} ({note})"),
    ))
}

fn delivery_status(
    orders: &[Order],
    raw_orders: &[RawOrder],
    cfg: &ValidationConfig,
    m: &mut ValidationMetrics,
) -> ValidationCheck {
    let delivered = raw_orders
        .iter()
        .filter(|o| o.order_status == cfg.delivered_status)
        .count();
    m.delivered_share = stats::ratio(delivered as f64, raw_orders.len() as f64);

    let mut per_status: BTreeMap<&str, usize> = BTreeMap::new();
    for o in raw_orders {
        *per_status.entry(o.order_status.as_str()).or_default() += 1;
    }
    m.status_shares = per_status
        .into_iter()
        .filter_map(|(status, n)| {
            stats::ratio(n as f64, raw_orders.len() as f64).map(|r| (status.to_string(), r))
        })
        .collect();
    m.only_delivered = orders.len() == delivered;

    let scope = if m.only_delivered {
        "dataset contains only delivered orders"
    } else {
        "dataset includes some non-delivered but valid orders"
    };
    // Informational: composition never fails.
    check(
        "Order Quality",
        CheckStatus::Pass,
        format!(
            "Delivered orders: {} ({scope})",
            pct(m.delivered_share.map(|s| s * 100.0))
        ),
    )
}

fn outliers(orders: &[Order], cfg: &ValidationConfig, m: &mut ValidationMetrics) -> ValidationCheck {
    let totals: Vec<f64> = orders.iter().map(|o| o.order_total).collect();
    if let (Some(q1), Some(q3)) = (stats::quantile(&totals, 0.25), stats::quantile(&totals, 0.75)) {
        let iqr = q3 - q1;
        let lower = q1 - cfg.outlier_iqr_multiplier * iqr;
        let upper = q3 + cfg.outlier_iqr_multiplier * iqr;
        m.outlier_lower = Some(lower);
        m.outlier_upper = Some(upper);
        m.outlier_count = totals.iter().filter(|&&t| t < lower || t > upper).count();
        m.outlier_pct = stats::ratio(m.outlier_count as f64, totals.len() as f64).map(|r| r * 100.0);
    }

    let ok = m.outlier_pct.is_some_and(|p| p < cfg.max_outlier_pct);
    let note = if ok {
        "minimal outliers, standard analysis fine"
    } else {
        "consider robust methods or transformations"
    };
    check(
        "Outliers",
        CheckStatus::pass_if(ok),
        format!("Outliers: {} (IQR x{}, {note})", pct(m.outlier_pct), cfg.outlier_iqr_multiplier),
    )
}

fn variability(orders: &[Order], cfg: &ValidationConfig, m: &mut ValidationMetrics) -> ValidationCheck {
    let totals: Vec<f64> = orders.iter().map(|o| o.order_total).collect();
    m.cv_pct = match (stats::std_dev(&totals), stats::mean(&totals)) {
        (Some(sd), Some(mean)) => stats::ratio(sd, mean).map(|r| r * 100.0),
        _ => None,
    };
    let tier = match m.cv_pct {
        Some(cv) if cv < cfg.cv_moderate_below => "moderate variability",
        Some(cv) if cv < cfg.cv_high_below => "high variability",
        Some(_) => "very high variability, large sample sizes required",
        None => "undefined (zero mean or fewer than two orders)",
    };
    // Advisory text only; there is no gate on dispersion.
    check(
        "Variability",
        CheckStatus::Acknowledged,
        format!("CV: {} ({tier})", pct(m.cv_pct)),
    )
}

fn completeness(orders: &[Order], m: &mut ValidationMetrics) -> ValidationCheck {
    m.missing_values = orders
        .iter()
        .flat_map(|o| [o.total_price, o.total_shipping, o.order_total])
        .filter(|v| !v.is_finite())
        .count()
        + orders.iter().filter(|o| o.order_id.trim().is_empty()).count();
    m.nonpositive_price = orders.iter().filter(|o| o.total_price <= 0.0).count();
    m.nonpositive_total = orders.iter().filter(|o| o.order_total <= 0.0).count();

    let ok = m.missing_values == 0 && m.nonpositive_price == 0 && m.nonpositive_total == 0;
    let details = if ok {
        "No missing values; all orders have positive values".to_string()
    } else {
        format!(
            "Missing values: {}; zero/negative values: price={}, total={}",
            m.missing_values, m.nonpositive_price, m.nonpositive_total
        )
    };
    check("Data Completeness", CheckStatus::pass_if(ok), details)
}

// ── Stage ────────────────────────────────────────────────────────────────────

pub struct ValidateStage;

impl PipelineStage for ValidateStage {
    fn slot(&self) -> StageSlot {
        StageSlot::Validate
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> PipelineResult<StageOutput> {
        let orders: Vec<Order> = ctx.store.read_table(Table::OrderTotals)?;
        let raw_orders: Vec<RawOrder> = ctx.store.read_table(Table::RawOrders)?;
        log::info!("Loaded data: order_totals {}, orders {}", orders.len(), raw_orders.len());

        let report = validate(&orders, &raw_orders, &ctx.config.validation)?;

        let mut events = Vec::with_capacity(report.checks.len());
        for c in &report.checks {
            match c.status {
                CheckStatus::Pass => log::info!("[{}] {}: {}", c.status.as_str(), c.check, c.details),
                CheckStatus::Acknowledged => {
                    log::warn!("[{}] {}: {}", c.status.as_str(), c.check, c.details)
                }
            }
            events.push(PipelineEvent::CheckRecorded {
                check: c.check.clone(),
                status: c.status.as_str().into(),
                details: c.details.clone(),
            });
        }

        let mut shares: Vec<(&String, &f64)> = report.metrics.status_shares.iter().collect();
        shares.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (status, share) in shares {
            log::info!("Order status {status}: {:.2}%", share * 100.0);
        }

        ctx.store.write_table(Table::ValidationReport, &report.checks)?;

        let totals: Vec<f64> = orders.iter().map(|o| o.order_total).collect();
        let mut hist = histogram_panel(
            "Distribution of Order Totals",
            &[("orders", &totals)],
            ctx.config.render.histogram_bins,
        );
        if let Some(upper) = report.metrics.outlier_upper {
            hist = hist.with_reference(Marker::new(format!("Threshold: {upper:.0}"), upper));
        }
        let mut panels = vec![hist];
        if let Some(summary) = stats::five_number(&totals) {
            panels.push(box_panel(summary));
        }
        ctx.charts.render(
            &Figure {
                name: "outlier_analysis".into(),
                title: "Outlier analysis".into(),
                panels,
            },
            &ctx.config.render,
        )?;

        Ok(StageOutput { rows_out: report.checks.len(), events })
    }
}

fn box_panel(summary: FiveNumber) -> Panel {
    Panel {
        title: "Box Plot - Outlier Detection".into(),
        y_label: None,
        body: PanelBody::BoxSummary { summary },
    }
}
