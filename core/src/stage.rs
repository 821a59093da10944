//! Stage trait.
//!
//! RULE: Every pipeline step implements PipelineStage.
//! The engine runs registered stages in registration order.
//! A stage reads its input only from the store and writes its output
//! only to the store and the chart sink; stages never call each other.

use crate::{
    config::PipelineConfig,
    error::PipelineResult,
    event::PipelineEvent,
    report::ChartSink,
    rng::{StageRng, StageSlot},
    store::TableStore,
};

/// Everything a stage may touch while it runs.
pub struct StageContext<'a> {
    pub config: &'a PipelineConfig,
    pub store:  &'a TableStore,
    pub charts: &'a mut dyn ChartSink,
    /// This stage's deterministic RNG, fresh for every run.
    pub rng:    &'a mut StageRng,
}

/// What a stage hands back to the engine.
#[derive(Debug, Default)]
pub struct StageOutput {
    /// Rows written to the stage's primary table.
    pub rows_out: usize,
    pub events:   Vec<PipelineEvent>,
}

/// The contract every stage must fulfill.
pub trait PipelineStage {
    /// Stable slot; also names the stage and selects its RNG stream.
    fn slot(&self) -> StageSlot;

    fn name(&self) -> &'static str {
        self.slot().name()
    }

    fn run(&self, ctx: &mut StageContext<'_>) -> PipelineResult<StageOutput>;
}
