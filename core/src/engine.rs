//! The pipeline engine: runs the stages of the experiment in order.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Aggregate   raw exports       → order_totals
//!   2. Validate    order_totals      → validation_report
//!   3. Design      order_totals      → experiment_design
//!   4. Treatment   experiment_design → experiment_results
//!   5. Analysis    experiment_results → analysis_results, segment_results
//!   6. Summary     experiment_results → segment_economics, strategy_comparison
//!
//! RULES:
//!   - Each stage reads ONLY what earlier stages persisted in the store.
//!   - No stage calls another stage's functions directly.
//!   - All randomness flows through the RngBank, one stream per stage.
//!   - Every stage outcome is recorded in the run log.
//!   - A failing stage aborts the run; nothing after it executes.

use crate::{
    aggregate::AggregateStage,
    analysis::AnalysisStage,
    config::PipelineConfig,
    design::DesignStage,
    error::{PipelineError, PipelineResult},
    event::{PipelineEvent, RunLogEntry},
    report::{ChartSink, JsonChartSink},
    rng::{RngBank, StageSlot},
    stage::{PipelineStage, StageContext},
    store::TableStore,
    summary::SummaryStage,
    treatment::TreatmentStage,
    validation::ValidateStage,
};

pub struct Pipeline {
    pub run_id:   String,
    pub config:   PipelineConfig,
    pub rng_bank: RngBank,
    pub store:    TableStore,
    charts:       Box<dyn ChartSink>,
    stages:       Vec<Box<dyn PipelineStage>>,
    seq:          u64,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: TableStore, charts: Box<dyn ChartSink>) -> Self {
        Self {
            run_id:   format!("run-{}", config.seed),
            rng_bank: RngBank::new(config.seed),
            config,
            store,
            charts,
            stages:   Vec::new(),
            seq:      0,
        }
    }

    /// Build a fully wired pipeline with every stage registered.
    /// Call this instead of new() + manual register() calls.
    pub fn build(config: PipelineConfig, store: TableStore, charts: Box<dyn ChartSink>) -> Self {
        let mut pipeline = Pipeline::new(config, store, charts);

        // EXECUTION ORDER: fixed, documented, never reordered.
        pipeline.register(Box::new(AggregateStage));
        pipeline.register(Box::new(ValidateStage));
        pipeline.register(Box::new(DesignStage));
        pipeline.register(Box::new(TreatmentStage));
        pipeline.register(Box::new(AnalysisStage));
        pipeline.register(Box::new(SummaryStage));
        pipeline
    }

    /// Open `data_dir` and write figures under its figures/ folder.
    pub fn open(config: PipelineConfig, data_dir: &str) -> PipelineResult<Self> {
        let store = TableStore::open(data_dir)?;
        let charts = Box::new(JsonChartSink::new(store.figures_dir()));
        Ok(Self::build(config, store, charts))
    }

    /// Register a stage. Call in the documented execution order.
    pub fn register(&mut self, stage: Box<dyn PipelineStage>) {
        self.stages.push(stage);
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every registered stage in order, starting a fresh run log.
    pub fn run_all(&mut self) -> PipelineResult<Vec<PipelineEvent>> {
        log::info!("{}: data directory {}", self.run_id, self.store.root().display());
        self.store.reset_run_log()?;
        self.seq = 0;
        let init = PipelineEvent::RunInitialized {
            run_id: self.run_id.clone(),
            seed: self.config.seed,
        };
        self.record("engine", &init)?;

        let mut events = vec![init];
        for index in 0..self.stages.len() {
            events.extend(self.run_index(index)?);
        }
        Ok(events)
    }

    /// Run a single stage against whatever the store currently holds.
    pub fn run_stage(&mut self, slot: StageSlot) -> PipelineResult<Vec<PipelineEvent>> {
        let index = self
            .stages
            .iter()
            .position(|s| s.slot() == slot)
            .ok_or_else(|| PipelineError::StageNotFound { name: slot.name().into() })?;
        self.run_index(index)
    }

    fn run_index(&mut self, index: usize) -> PipelineResult<Vec<PipelineEvent>> {
        let slot = self.stages[index].slot();
        let name = slot.name();
        log::info!("── stage {name} ──");

        let started = PipelineEvent::StageStarted { stage: name.into() };
        self.record(name, &started)?;

        // A fresh stream per invocation: re-running one stage reproduces
        // exactly what it drew in a full run.
        let mut rng = self.rng_bank.for_stage(slot);
        log::debug!(
            "stage {name}: rng stream '{}' from master seed {}",
            rng.name,
            self.rng_bank.master_seed()
        );
        let output = {
            let mut ctx = StageContext {
                config: &self.config,
                store:  &self.store,
                charts: self.charts.as_mut(),
                rng:    &mut rng,
            };
            self.stages[index].run(&mut ctx)?
        };

        let mut events = vec![started];
        for event in output.events {
            self.record(name, &event)?;
            events.push(event);
        }
        let completed = PipelineEvent::StageCompleted {
            stage: name.into(),
            rows_out: output.rows_out,
        };
        self.record(name, &completed)?;
        events.push(completed);
        log::info!("stage {name} completed: {} rows", output.rows_out);
        Ok(events)
    }

    fn record(&mut self, stage: &str, event: &PipelineEvent) -> PipelineResult<()> {
        self.seq += 1;
        let entry = RunLogEntry {
            seq:        self.seq,
            run_id:     self.run_id.clone(),
            stage:      stage.to_string(),
            event_type: event.type_name().to_string(),
            payload:    event.clone(),
        };
        self.store.append_event(&entry)
    }
}
