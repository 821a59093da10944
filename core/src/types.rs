//! Shared primitive types used across every pipeline stage.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable order identifier, as it appears in the raw export.
pub type OrderId = String;

/// A customer identifier from the raw orders table.
pub type CustomerId = String;

/// Experiment arm. Assigned once per order, never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    Control,
    Treatment,
}

impl Group {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Control   => "control",
            Self::Treatment => "treatment",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
