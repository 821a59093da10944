//! Pipeline configuration.
//!
//! Every constant the stages depend on lives here. `PipelineConfig::default()`
//! reproduces the published experiment; a JSON file may override any subset
//! of sections (missing sections and fields fall back to the defaults).

use crate::{report::RenderConfig, segment::Segment};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Repeat-customer share at or above which customer-level randomization is advised.
    pub max_repeat_customer_share: f64,
    /// Max/min monthly order ratio at or above which temporal clustering is reported.
    pub max_temporal_ratio: f64,
    /// Tukey fence multiplier on the IQR.
    pub outlier_iqr_multiplier: f64,
    /// Outlier percentage at or above which robust methods are advised.
    pub max_outlier_pct: f64,
    pub cv_moderate_below: f64,
    pub cv_high_below: f64,
    pub delivered_status: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_repeat_customer_share: 0.05,
            max_temporal_ratio: 3.0,
            outlier_iqr_multiplier: 3.0,
            max_outlier_pct: 5.0,
            cv_moderate_below: 30.0,
            cv_high_below: 100.0,
            delivered_status: "delivered".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignConfig {
    /// Minimum detectable effect as a percentage of baseline mean revenue.
    pub mde_pct: f64,
    pub alpha: f64,
    pub power: f64,
    /// Per-order probability of landing in the treatment arm.
    pub treatment_probability: f64,
}

impl Default for DesignConfig {
    fn default() -> Self {
        Self {
            mde_pct: 5.0,
            alpha: 0.05,
            power: 0.80,
            treatment_probability: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreatmentConfig {
    /// Free-shipping threshold on total item price.
    pub threshold: f64,
    /// Share of eligible treatment orders whose customer tops up the basket.
    pub response_rate: f64,
    pub min_add: f64,
    pub max_add: f64,
}

impl Default for TreatmentConfig {
    fn default() -> Self {
        Self {
            threshold: 100.0,
            response_rate: 0.40,
            min_add: 15.0,
            max_add: 35.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentBounds {
    /// Orders priced below this are Small.
    pub small_below: f64,
    /// Orders priced at or above this are Large.
    pub large_from: f64,
}

impl Default for SegmentBounds {
    fn default() -> Self {
        Self { small_below: 75.0, large_from: 150.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Segments the targeted rollout applies to.
    pub targeted_segments: Vec<Segment>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self { targeted_segments: vec![Segment::Small] }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub seed: u64,
    pub validation: ValidationConfig,
    pub design: DesignConfig,
    pub treatment: TreatmentConfig,
    pub segments: SegmentBounds,
    pub strategy: StrategyConfig,
    pub render: RenderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            validation: ValidationConfig::default(),
            design: DesignConfig::default(),
            treatment: TreatmentConfig::default(),
            segments: SegmentBounds::default(),
            strategy: StrategyConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load overrides from a JSON file.
    /// In tests, use PipelineConfig::default().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.check()?;
        Ok(config)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn check(&self) -> anyhow::Result<()> {
        let unit = |name: &str, v: f64| -> anyhow::Result<()> {
            if v > 0.0 && v < 1.0 {
                Ok(())
            } else {
                Err(anyhow::anyhow!("{name} must lie in (0, 1), got {v}"))
            }
        };
        unit("design.alpha", self.design.alpha)?;
        unit("design.power", self.design.power)?;
        unit("design.treatment_probability", self.design.treatment_probability)?;
        if !(0.0..=1.0).contains(&self.treatment.response_rate) {
            anyhow::bail!(
                "treatment.response_rate must lie in [0, 1], got {}",
                self.treatment.response_rate
            );
        }
        if self.treatment.min_add > self.treatment.max_add {
            anyhow::bail!(
                "treatment.min_add ({}) exceeds treatment.max_add ({})",
                self.treatment.min_add,
                self.treatment.max_add
            );
        }
        if self.segments.small_below > self.segments.large_from {
            anyhow::bail!(
                "segments.small_below ({}) exceeds segments.large_from ({})",
                self.segments.small_below,
                self.segments.large_from
            );
        }
        Ok(())
    }
}
