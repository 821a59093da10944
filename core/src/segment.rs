//! Price-based order segments.
//!
//! Segments group orders for reporting only. They never feed back into
//! the revenue rule.

use crate::config::SegmentBounds;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Segment {
    Small,
    Medium,
    Large,
}

impl Segment {
    /// Reporting order.
    pub const ALL: [Segment; 3] = [Self::Small, Self::Medium, Self::Large];

    /// Bucket an order by its pre-treatment total price.
    pub fn classify(total_price: f64, bounds: &SegmentBounds) -> Self {
        if total_price < bounds.small_below {
            Self::Small
        } else if total_price < bounds.large_from {
            Self::Medium
        } else {
            Self::Large
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small  => "Small",
            Self::Medium => "Medium",
            Self::Large  => "Large",
        }
    }

    /// Label with the price range, for chart axes.
    pub fn label(&self, bounds: &SegmentBounds) -> String {
        match self {
            Self::Small  => format!("Small (<{:.0})", bounds.small_below),
            Self::Medium => format!("Medium ({:.0}-{:.0})", bounds.small_below, bounds.large_from),
            Self::Large  => format!("Large (>={:.0})", bounds.large_from),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
