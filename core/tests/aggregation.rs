use freeship_core::{
    aggregate::{aggregate_orders, Order},
    config::ValidationConfig,
    store::{RawOrder, RawOrderItem},
    validation::{validate, CheckStatus},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn raw_order(id: &str, customer: &str, month: u32) -> RawOrder {
    RawOrder {
        order_id:                 id.into(),
        customer_id:              customer.into(),
        order_status:             "delivered".into(),
        order_purchase_timestamp: format!("2017-{month:02}-10 09:30:00"),
    }
}

fn item(order: &str, n: u32, price: f64, freight: f64) -> RawOrderItem {
    RawOrderItem {
        order_id:      order.into(),
        order_item_id: n,
        price,
        freight_value: freight,
    }
}

fn status_of(report: &freeship_core::validation::ValidationReport, name: &str) -> CheckStatus {
    report
        .checks
        .iter()
        .find(|c| c.check == name)
        .unwrap_or_else(|| panic!("missing check {name}"))
        .status
}

// ── Aggregation ──────────────────────────────────────────────────────────────

#[test]
fn items_are_summed_per_order() {
    let orders = [raw_order("a", "c1", 1), raw_order("b", "c2", 2)];
    let items = [
        item("a", 1, 40.0, 10.0),
        item("a", 2, 35.5, 5.0),
        item("b", 1, 120.0, 22.0),
    ];
    let agg = aggregate_orders(&orders, &items, 100.0);

    assert_eq!(
        agg.orders,
        vec![
            Order {
                order_id:       "a".into(),
                total_price:    75.5,
                total_shipping: 15.0,
                num_items:      2,
                order_total:    90.5,
            },
            Order {
                order_id:       "b".into(),
                total_price:    120.0,
                total_shipping: 22.0,
                num_items:      1,
                order_total:    142.0,
            },
        ]
    );
    assert_eq!(agg.exploration.items_below_threshold, 2);
    assert_eq!(agg.exploration.items_at_or_above, 1);
}

#[test]
fn join_exclusions_are_counted_not_fatal() {
    let orders = [raw_order("a", "c1", 1), raw_order("lonely", "c2", 1)];
    let items = [item("a", 1, 40.0, 10.0), item("ghost", 1, 99.0, 9.0)];
    let agg = aggregate_orders(&orders, &items, 100.0);

    assert_eq!(agg.orders.len(), 1);
    assert_eq!(agg.item_prices, vec![40.0], "orphan items stay out of the item-level view");
    assert_eq!(agg.orders_without_items, 1);
    assert_eq!(agg.orphan_items, 1);
    assert_eq!(agg.exploration.item_rows, 1);
}

#[test]
fn empty_inputs_give_undefined_exploration() {
    let agg = aggregate_orders(&[], &[], 100.0);
    assert!(agg.orders.is_empty());
    assert_eq!(agg.exploration.mean_item_price, None);
    assert_eq!(agg.exploration.pct_items_at_or_above, None);
}

// ── Validation ───────────────────────────────────────────────────────────────

fn spread_fixture() -> (Vec<RawOrder>, Vec<Order>) {
    let raw: Vec<RawOrder> = (0..120)
        .map(|i| raw_order(&format!("o{i}"), &format!("c{i}"), 1 + (i % 12) as u32))
        .collect();
    let orders: Vec<Order> = (0..120)
        .map(|i| {
            let price = 60.0 + (i % 10) as f64 * 5.0;
            Order {
                order_id:       format!("o{i}"),
                total_price:    price,
                total_shipping: 15.0,
                num_items:      1,
                order_total:    price + 15.0,
            }
        })
        .collect();
    (raw, orders)
}

#[test]
fn clean_data_passes_every_gated_check() {
    let (raw, orders) = spread_fixture();
    let report = validate(&orders, &raw, &ValidationConfig::default()).unwrap();

    let names: Vec<&str> = report.checks.iter().map(|c| c.check.as_str()).collect();
    assert_eq!(
        names,
        [
            "Independence",
            "Temporal Distribution",
            "Order Quality",
            "Outliers",
            "Variability",
            "Data Completeness",
        ]
    );
    assert_eq!(status_of(&report, "Independence"), CheckStatus::Pass);
    assert_eq!(status_of(&report, "Temporal Distribution"), CheckStatus::Pass);
    assert_eq!(status_of(&report, "Order Quality"), CheckStatus::Pass);
    assert_eq!(status_of(&report, "Outliers"), CheckStatus::Pass);
    assert_eq!(status_of(&report, "Variability"), CheckStatus::Acknowledged);
    assert_eq!(status_of(&report, "Data Completeness"), CheckStatus::Pass);
    assert!(report.metrics.only_delivered);
    assert_eq!(report.metrics.temporal_ratio, Some(1.0));
}

#[test]
fn repeat_customers_and_clustering_are_acknowledged() {
    let (mut raw, orders) = spread_fixture();
    // Half the customers place a second order; everything lands in March.
    for (i, o) in raw.iter_mut().enumerate() {
        if i % 2 == 1 {
            o.customer_id = format!("c{}", i - 1);
        }
        o.order_purchase_timestamp = "2017-03-01 08:00:00".into();
    }
    raw[0].order_purchase_timestamp = "2017-04-01 08:00:00".into();

    let report = validate(&orders, &raw, &ValidationConfig::default()).unwrap();
    assert_eq!(status_of(&report, "Independence"), CheckStatus::Acknowledged);
    assert_eq!(status_of(&report, "Temporal Distribution"), CheckStatus::Acknowledged);
    // Findings are recorded, never fatal: later checks still ran.
    assert_eq!(report.checks.len(), 6);
}

#[test]
fn zero_priced_orders_fail_completeness() {
    let (raw, mut orders) = spread_fixture();
    orders[3].total_price = 0.0;
    let report = validate(&orders, &raw, &ValidationConfig::default()).unwrap();
    assert_eq!(status_of(&report, "Data Completeness"), CheckStatus::Acknowledged);
    assert_eq!(report.metrics.nonpositive_price, 1);
}

#[test]
fn validation_is_pure() {
    let (raw, orders) = spread_fixture();
    let cfg = ValidationConfig::default();
    let a = validate(&orders, &raw, &cfg).unwrap();
    let b = validate(&orders, &raw, &cfg).unwrap();
    assert_eq!(a, b);
}

#[test]
fn malformed_timestamp_is_an_error() {
    let (mut raw, orders) = spread_fixture();
    raw[5].order_purchase_timestamp = "yesterday".into();
    assert!(validate(&orders, &raw, &ValidationConfig::default()).is_err());
}

#[test]
fn every_order_status_gets_a_share() {
    let (mut raw, orders) = spread_fixture();
    for o in raw.iter_mut().take(30) {
        o.order_status = "shipped".into();
    }
    raw[30].order_status = "canceled".into();
    let report = validate(&orders, &raw, &ValidationConfig::default()).unwrap();
    let shares = &report.metrics.status_shares;

    assert_eq!(shares.len(), 3);
    assert!((shares["shipped"] - 30.0 / 120.0).abs() < 1e-12);
    assert!((shares["canceled"] - 1.0 / 120.0).abs() < 1e-12);
    assert!((shares["delivered"] - 89.0 / 120.0).abs() < 1e-12);
    assert_eq!(report.metrics.delivered_share, Some(shares["delivered"]));
    let total: f64 = shares.values().sum();
    assert!((total - 1.0).abs() < 1e-12);
}
