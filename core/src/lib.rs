//! Offline analysis pipeline for a free-shipping-threshold A/B experiment.
//!
//! Six batch stages, run in a fixed order by [`engine::Pipeline`]:
//! aggregation, validation, experiment design, treatment simulation,
//! statistical analysis and business summary. Each stage persists its
//! output table through [`store::TableStore`] for the next one to read.

pub mod aggregate;
pub mod analysis;
pub mod config;
pub mod design;
pub mod engine;
pub mod error;
pub mod event;
pub mod report;
pub mod rng;
pub mod segment;
pub mod stage;
pub mod stats;
pub mod store;
pub mod summary;
pub mod treatment;
pub mod types;
pub mod validation;
