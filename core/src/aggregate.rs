//! Order aggregation, stage 1.
//!
//! Collapses the raw order and order-item exports into one row per order.
//! The join is an inner join: orders without item records are excluded,
//! and so are item rows whose order is missing from the orders export.
//! Both exclusions are counted and logged, never treated as failure.

use crate::{
    error::PipelineResult,
    event::PipelineEvent,
    report::{histogram_panel, Figure, Marker},
    rng::StageSlot,
    stage::{PipelineStage, StageContext, StageOutput},
    stats,
    store::{RawOrder, RawOrderItem, Table},
    types::OrderId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id:       OrderId,
    /// Sum of item prices.
    pub total_price:    f64,
    /// Sum of item freight values.
    pub total_shipping: f64,
    pub num_items:      u32,
    /// total_price + total_shipping.
    pub order_total:    f64,
}

/// Descriptive statistics of the joined item rows and the resulting orders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplorationSummary {
    pub item_rows:              usize,
    pub mean_item_price:        Option<f64>,
    pub median_item_price:      Option<f64>,
    pub mean_freight:           Option<f64>,
    pub mean_item_total:        Option<f64>,
    pub items_below_threshold:  usize,
    pub items_at_or_above:      usize,
    pub pct_items_at_or_above:  Option<f64>,
    pub order_count:            usize,
    pub mean_order_total:       Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    /// Sorted by order id.
    pub orders:               Vec<Order>,
    /// Prices of the joined item rows, in input order.
    pub item_prices:          Vec<f64>,
    pub orders_without_items: usize,
    pub orphan_items:         usize,
    pub exploration:          ExplorationSummary,
}

#[derive(Default)]
struct OrderAccumulator {
    total_price:    f64,
    total_shipping: f64,
    num_items:      u32,
}

/// Join and aggregate. `threshold` only feeds the exploration split.
pub fn aggregate_orders(
    orders: &[RawOrder],
    items: &[RawOrderItem],
    threshold: f64,
) -> Aggregation {
    let known: HashSet<&str> = orders.iter().map(|o| o.order_id.as_str()).collect();

    let mut joined: Vec<&RawOrderItem> = Vec::with_capacity(items.len());
    let mut orphan_items = 0;
    for item in items {
        if known.contains(item.order_id.as_str()) {
            joined.push(item);
        } else {
            orphan_items += 1;
        }
    }

    let mut per_order: BTreeMap<&str, OrderAccumulator> = BTreeMap::new();
    for item in &joined {
        let acc = per_order.entry(item.order_id.as_str()).or_default();
        acc.total_price += item.price;
        acc.total_shipping += item.freight_value;
        acc.num_items += 1;
    }

    let orders_without_items = known.len() - per_order.len();

    let aggregated: Vec<Order> = per_order
        .into_iter()
        .map(|(id, acc)| Order {
            order_id:       id.to_string(),
            total_price:    acc.total_price,
            total_shipping: acc.total_shipping,
            num_items:      acc.num_items,
            order_total:    acc.total_price + acc.total_shipping,
        })
        .collect();

    let exploration = explore(&joined, &aggregated, threshold);
    let item_prices = joined.iter().map(|i| i.price).collect();

    Aggregation {
        orders: aggregated,
        item_prices,
        orders_without_items,
        orphan_items,
        exploration,
    }
}

fn explore(items: &[&RawOrderItem], orders: &[Order], threshold: f64) -> ExplorationSummary {
    let prices: Vec<f64> = items.iter().map(|i| i.price).collect();
    let freight: Vec<f64> = items.iter().map(|i| i.freight_value).collect();
    let item_totals: Vec<f64> = items.iter().map(|i| i.price + i.freight_value).collect();
    let order_totals: Vec<f64> = orders.iter().map(|o| o.order_total).collect();

    let items_below_threshold = prices.iter().filter(|&&p| p < threshold).count();
    let items_at_or_above = prices.iter().filter(|&&p| p >= threshold).count();

    ExplorationSummary {
        item_rows:             items.len(),
        mean_item_price:       stats::mean(&prices),
        median_item_price:     stats::median(&prices),
        mean_freight:          stats::mean(&freight),
        mean_item_total:       stats::mean(&item_totals),
        items_below_threshold,
        items_at_or_above,
        pct_items_at_or_above: stats::ratio(items_at_or_above as f64, items.len() as f64)
            .map(|r| r * 100.0),
        order_count:           orders.len(),
        mean_order_total:      stats::mean(&order_totals),
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "undefined".into(), |x| format!("{x:.2}"))
}

// ── Stage ────────────────────────────────────────────────────────────────────

pub struct AggregateStage;

impl PipelineStage for AggregateStage {
    fn slot(&self) -> StageSlot {
        StageSlot::Aggregate
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> PipelineResult<StageOutput> {
        let orders: Vec<RawOrder> = ctx.store.read_table(Table::RawOrders)?;
        let items: Vec<RawOrderItem> = ctx.store.read_table(Table::RawOrderItems)?;
        log::info!("Orders: {} rows, order items: {} rows", orders.len(), items.len());

        let threshold = ctx.config.treatment.threshold;
        let agg = aggregate_orders(&orders, &items, threshold);
        let ex = &agg.exploration;

        log::info!(
            "Orders without item records are excluded: {} orders; {} orphan item rows dropped",
            agg.orders_without_items,
            agg.orphan_items
        );
        log::info!(
            "Item price mean: {}, median: {} | shipping mean: {} | item total mean: {}",
            fmt_opt(ex.mean_item_price),
            fmt_opt(ex.median_item_price),
            fmt_opt(ex.mean_freight),
            fmt_opt(ex.mean_item_total)
        );
        log::info!(
            "Items below {threshold:.0}: {}, at or above: {} ({}%)",
            ex.items_below_threshold,
            ex.items_at_or_above,
            fmt_opt(ex.pct_items_at_or_above)
        );
        log::info!(
            "Order-level dataset: {} orders, mean order total {}",
            ex.order_count,
            fmt_opt(ex.mean_order_total)
        );

        ctx.store.write_table(Table::OrderTotals, &agg.orders)?;

        let marker = || Marker::new(format!("Threshold: {threshold:.0}"), threshold);
        let item_panel = histogram_panel(
            "Distribution of Item Prices (Item Level)",
            &[("items", &agg.item_prices)],
            ctx.config.render.histogram_bins,
        )
        .with_reference(marker());
        let prices: Vec<f64> = agg.orders.iter().map(|o| o.total_price).collect();
        let order_panel = histogram_panel(
            "Distribution of Total Order Prices (Order Level)",
            &[("orders", &prices)],
            ctx.config.render.histogram_bins,
        )
        .with_reference(marker());
        ctx.charts.render(
            &Figure {
                name: "order_price_distribution".into(),
                title: "Order price distribution".into(),
                panels: vec![item_panel, order_panel],
            },
            &ctx.config.render,
        )?;

        Ok(StageOutput {
            rows_out: agg.orders.len(),
            events: vec![PipelineEvent::OrdersExcluded {
                orders_without_items: agg.orders_without_items,
                orphan_items: agg.orphan_items,
            }],
        })
    }
}
