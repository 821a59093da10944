//! CSV row shapes and their mapping to stage records.
//!
//! Stage records nest (an outcome holds an assignment holds an order);
//! the CSV tables are flat. The conversions live here so stages never
//! see column layout.

use crate::{
    aggregate::Order,
    design::Assignment,
    treatment::SimulatedOutcome,
    types::{CustomerId, Group, OrderId},
};
use serde::{Deserialize, Serialize};

/// One row of the raw orders export. Unlisted columns are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOrder {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub order_status: String,
    pub order_purchase_timestamp: String,
}

/// One row of the raw order-items export. Unlisted columns are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOrderItem {
    pub order_id: OrderId,
    pub order_item_id: u32,
    pub price: f64,
    pub freight_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRow {
    pub order_id: OrderId,
    pub total_price: f64,
    pub total_shipping: f64,
    pub num_items: u32,
    pub order_total: f64,
    pub group: Group,
}

impl From<&Assignment> for AssignmentRow {
    fn from(a: &Assignment) -> Self {
        Self {
            order_id:       a.order.order_id.clone(),
            total_price:    a.order.total_price,
            total_shipping: a.order.total_shipping,
            num_items:      a.order.num_items,
            order_total:    a.order.order_total,
            group:          a.group,
        }
    }
}

impl From<AssignmentRow> for Assignment {
    fn from(r: AssignmentRow) -> Self {
        Self {
            order: Order {
                order_id:       r.order_id,
                total_price:    r.total_price,
                total_shipping: r.total_shipping,
                num_items:      r.num_items,
                order_total:    r.order_total,
            },
            group: r.group,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRow {
    pub order_id: OrderId,
    pub total_price: f64,
    pub total_shipping: f64,
    pub num_items: u32,
    pub order_total: f64,
    pub group: Group,
    pub below_threshold: bool,
    pub responded: bool,
    pub amount_added: f64,
    pub final_price: f64,
    pub final_revenue: f64,
}

impl From<&SimulatedOutcome> for OutcomeRow {
    fn from(o: &SimulatedOutcome) -> Self {
        let a = AssignmentRow::from(&o.assignment);
        Self {
            order_id:        a.order_id,
            total_price:     a.total_price,
            total_shipping:  a.total_shipping,
            num_items:       a.num_items,
            order_total:     a.order_total,
            group:           a.group,
            below_threshold: o.below_threshold,
            responded:       o.responded,
            amount_added:    o.amount_added,
            final_price:     o.final_price,
            final_revenue:   o.final_revenue,
        }
    }
}

impl From<OutcomeRow> for SimulatedOutcome {
    fn from(r: OutcomeRow) -> Self {
        let assignment = Assignment::from(AssignmentRow {
            order_id:       r.order_id,
            total_price:    r.total_price,
            total_shipping: r.total_shipping,
            num_items:      r.num_items,
            order_total:    r.order_total,
            group:          r.group,
        });
        Self {
            assignment,
            below_threshold: r.below_threshold,
            responded:       r.responded,
            amount_added:    r.amount_added,
            final_price:     r.final_price,
            final_revenue:   r.final_revenue,
        }
    }
}
