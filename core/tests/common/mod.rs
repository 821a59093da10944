//! Synthetic raw exports for integration tests.
//!
//! The fixture mimics the marketplace exports closely enough for every
//! stage to run: a spread of basket sizes on both sides of the
//! free-shipping threshold, purchases across all twelve months, one
//! order with no items and one orphan item row.

#![allow(dead_code)]

use freeship_core::{
    config::PipelineConfig,
    engine::Pipeline,
    report::MemoryChartSink,
    store::TableStore,
};
use std::{fmt::Write as _, fs, path::Path};

pub const FIXTURE_ORDERS: usize = 600;

/// Item prices for order `i`. Deterministic, no RNG involved.
pub fn item_prices(i: usize) -> Vec<f64> {
    let items = 1 + i % 3;
    (0..items)
        .map(|j| 12.0 + ((i * 37 + j * 53) % 110) as f64 + 0.5 * (j as f64))
        .collect()
}

pub fn freight(i: usize) -> f64 {
    7.5 + (i % 9) as f64 * 2.25
}

/// Write raw/ under `root`. Returns the number of orders that have items.
pub fn write_raw(root: &Path, n_orders: usize) -> usize {
    let raw = root.join("raw");
    fs::create_dir_all(&raw).unwrap();

    // Extra columns are present on purpose; readers must ignore them.
    let mut orders = String::from(
        "order_id,customer_id,order_status,order_purchase_timestamp,order_approved_at\n",
    );
    for i in 0..n_orders {
        // Every 50th order reuses the previous customer.
        let customer = if i % 50 == 49 { i - 1 } else { i };
        let status = if i % 40 == 0 { "shipped" } else { "delivered" };
        let month = 1 + i % 12;
        let day = 1 + i % 28;
        writeln!(
            orders,
            "ord{i:05},cust{customer:05},{status},2017-{month:02}-{day:02} 10:{:02}:00,",
            i % 60
        )
        .unwrap();
    }
    // Order with no items: excluded by the join.
    writeln!(orders, "ord-empty,cust-empty,delivered,2017-06-15 12:00:00,").unwrap();

    let mut items = String::from("order_id,order_item_id,product_id,price,freight_value\n");
    for i in 0..n_orders {
        for (j, price) in item_prices(i).iter().enumerate() {
            writeln!(items, "ord{i:05},{},prod{j},{price:.2},{:.2}", j + 1, freight(i)).unwrap();
        }
    }
    // Item whose order is unknown: dropped by the join.
    writeln!(items, "ord-orphan,1,prod0,55.00,10.00").unwrap();

    fs::write(raw.join("olist_orders_dataset.csv"), orders).unwrap();
    fs::write(raw.join("olist_order_items_dataset.csv"), items).unwrap();
    n_orders
}

/// Pipeline over a fresh data directory, figures kept in memory.
pub fn pipeline_in(root: &Path, seed: u64) -> Pipeline {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = TableStore::open(root).unwrap();
    let config = PipelineConfig::default().with_seed(seed);
    Pipeline::build(config, store, Box::new(MemoryChartSink::default()))
}
