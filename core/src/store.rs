//! Flat-file persistence layer.
//!
//! RULE: Only store.rs (and its row mappings under store/) touches the
//! filesystem for tables. Stages call store methods and never open
//! files directly.
//!
//! Layout under the data directory:
//!   raw/        input exports, read-only
//!   processed/  one CSV per stage output, plus run_log.jsonl
//!   figures/    chart descriptions written by the chart sink

mod rows;

pub use rows::{AssignmentRow, OutcomeRow, RawOrder, RawOrderItem};

use crate::{
    error::{PipelineError, PipelineResult},
    event::RunLogEntry,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

pub const RUN_LOG_FILE: &str = "run_log.jsonl";

/// Every table the pipeline reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    RawOrders,
    RawOrderItems,
    OrderTotals,
    ValidationReport,
    ExperimentDesign,
    ExperimentResults,
    AnalysisResults,
    SegmentResults,
    SegmentEconomics,
    StrategyComparison,
}

impl Table {
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::RawOrders          => "olist_orders_dataset.csv",
            Self::RawOrderItems      => "olist_order_items_dataset.csv",
            Self::OrderTotals        => "order_totals.csv",
            Self::ValidationReport   => "validation_report.csv",
            Self::ExperimentDesign   => "experiment_design.csv",
            Self::ExperimentResults  => "experiment_results.csv",
            Self::AnalysisResults    => "analysis_results.csv",
            Self::SegmentResults     => "segment_results.csv",
            Self::SegmentEconomics   => "segment_economics.csv",
            Self::StrategyComparison => "strategy_comparison.csv",
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::RawOrders | Self::RawOrderItems)
    }
}

pub struct TableStore {
    root: PathBuf,
}

impl TableStore {
    /// Open the data directory, creating the output folders if needed.
    /// The raw folder must already exist for the first stage to succeed,
    /// but opening never requires it.
    pub fn open(data_dir: impl AsRef<Path>) -> PipelineResult<Self> {
        let root = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(root.join("processed"))?;
        fs::create_dir_all(root.join("figures"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }

    pub fn figures_dir(&self) -> PathBuf {
        self.root.join("figures")
    }

    pub fn path_of(&self, table: Table) -> PathBuf {
        let dir = if table.is_raw() { self.raw_dir() } else { self.processed_dir() };
        dir.join(table.file_name())
    }

    // ── Tables ─────────────────────────────────────────────────

    /// Read every row of `table`. A missing file or a table with no data
    /// rows is a hard error: no stage can proceed without its input.
    pub fn read_table<T: DeserializeOwned>(&self, table: Table) -> PipelineResult<Vec<T>> {
        let path = self.path_of(table);
        if !path.is_file() {
            return Err(PipelineError::MissingTable {
                table: table.file_name().into(),
                path: path.display().to_string(),
            });
        }
        let mut reader = csv::Reader::from_path(&path)?;
        let mut rows = Vec::new();
        for (i, record) in reader.deserialize().enumerate() {
            let row: T = record.map_err(|e| PipelineError::MalformedRow {
                table: table.file_name().into(),
                row: i + 1,
                reason: e.to_string(),
            })?;
            rows.push(row);
        }
        if rows.is_empty() {
            return Err(PipelineError::EmptyTable { table: table.file_name().into() });
        }
        log::debug!("read {} rows from {}", rows.len(), path.display());
        Ok(rows)
    }

    /// Replace `table` with `rows`.
    pub fn write_table<T: Serialize>(&self, table: Table, rows: &[T]) -> PipelineResult<()> {
        let path = self.path_of(table);
        let mut writer = csv::Writer::from_path(&path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        log::debug!("wrote {} rows to {}", rows.len(), path.display());
        Ok(())
    }

    // ── Run log ────────────────────────────────────────────────

    pub fn append_event(&self, entry: &RunLogEntry) -> PipelineResult<()> {
        let path = self.processed_dir().join(RUN_LOG_FILE);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", serde_json::to_string(entry)?)?;
        Ok(())
    }

    pub fn run_log(&self) -> PipelineResult<Vec<RunLogEntry>> {
        let path = self.processed_dir().join(RUN_LOG_FILE);
        if !path.is_file() {
            return Ok(Vec::new());
        }
        fs::read_to_string(path)?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(PipelineError::from))
            .collect()
    }

    /// Start a fresh run log.
    pub fn reset_run_log(&self) -> PipelineResult<()> {
        let path = self.processed_dir().join(RUN_LOG_FILE);
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
