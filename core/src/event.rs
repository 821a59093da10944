//! Run-log events: everything a stage wants recorded for human review.
//!
//! RULE: Stages report through events only; the engine alone persists them.
//! Variants are appended per stage, never removed or reordered.

use crate::types::Group;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // ── Engine events ──────────────────────────────
    RunInitialized {
        run_id: String,
        seed: u64,
    },
    StageStarted {
        stage: String,
    },
    StageCompleted {
        stage: String,
        rows_out: usize,
    },

    // ── Aggregate ──────────────────────────────────
    OrdersExcluded {
        /// Orders without item records.
        orders_without_items: usize,
        /// Item rows whose order id is absent from the orders table.
        orphan_items: usize,
    },

    // ── Validate ───────────────────────────────────
    CheckRecorded {
        check: String,
        status: String,
        details: String,
    },

    // ── Design ─────────────────────────────────────
    SampleSizeComputed {
        mde_abs: f64,
        n_per_group: u64,
        n_total: u64,
        available: usize,
    },
    GroupsAssigned {
        sampled: usize,
        control: usize,
        treatment: usize,
    },

    // ── Treatment ──────────────────────────────────
    ResponseSimulated {
        eligible: usize,
        responders: usize,
    },
    InvariantViolated {
        group: Option<Group>,
        description: String,
    },

    // ── Analysis ───────────────────────────────────
    EffectEstimated {
        mean_diff: f64,
        p_value: Option<f64>,
        ci_low: f64,
        ci_high: f64,
    },
    SegmentSkipped {
        segment: String,
    },

    // ── Summary ────────────────────────────────────
    RecommendationIssued {
        strategy: String,
        net_impact: f64,
        recommendation: String,
    },
}

impl PipelineEvent {
    /// Stable name for the event_type field of the run log.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. }       => "run_initialized",
            Self::StageStarted { .. }         => "stage_started",
            Self::StageCompleted { .. }       => "stage_completed",
            Self::OrdersExcluded { .. }       => "orders_excluded",
            Self::CheckRecorded { .. }        => "check_recorded",
            Self::SampleSizeComputed { .. }   => "sample_size_computed",
            Self::GroupsAssigned { .. }       => "groups_assigned",
            Self::ResponseSimulated { .. }    => "response_simulated",
            Self::InvariantViolated { .. }    => "invariant_violated",
            Self::EffectEstimated { .. }      => "effect_estimated",
            Self::SegmentSkipped { .. }       => "segment_skipped",
            Self::RecommendationIssued { .. } => "recommendation_issued",
        }
    }
}

/// The run-log entry as persisted, one JSON object per line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub seq: u64,
    pub run_id: String,
    pub stage: String,
    pub event_type: String,
    pub payload: PipelineEvent,
}
