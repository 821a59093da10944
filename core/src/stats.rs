//! Descriptive statistics and the distribution lookups the stages share.
//!
//! Conventions:
//!   - Variances and standard deviations are sample (n − 1) estimates.
//!   - Quantiles interpolate linearly between closest ranks.
//!   - Anything undefined for the given input returns None rather than NaN.

use crate::error::{PipelineError, PipelineResult};
use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

pub fn mean(data: &[f64]) -> Option<f64> {
    if data.is_empty() {
        return None;
    }
    Some(data.iter().sum::<f64>() / data.len() as f64)
}

/// Sample variance. Needs at least two observations.
pub fn variance(data: &[f64]) -> Option<f64> {
    if data.len() < 2 {
        return None;
    }
    let m = mean(data)?;
    let ss: f64 = data.iter().map(|x| (x - m) * (x - m)).sum();
    Some(ss / (data.len() - 1) as f64)
}

pub fn std_dev(data: &[f64]) -> Option<f64> {
    variance(data).map(f64::sqrt)
}

/// `numerator / denominator`, or None when the denominator is zero.
pub fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

/// Quantile `p` in [0, 1] with linear interpolation.
pub fn quantile(data: &[f64], p: f64) -> Option<f64> {
    if data.is_empty() || !(0.0..=1.0).contains(&p) {
        return None;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    quantile_sorted(&sorted, p)
}

pub fn quantile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    Some(sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo]))
}

pub fn median(data: &[f64]) -> Option<f64> {
    quantile(data, 0.5)
}

/// Min, Q1, median, Q3, max.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FiveNumber {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

pub fn five_number(data: &[f64]) -> Option<FiveNumber> {
    if data.is_empty() {
        return None;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(FiveNumber {
        min:    sorted[0],
        q1:     quantile_sorted(&sorted, 0.25)?,
        median: quantile_sorted(&sorted, 0.5)?,
        q3:     quantile_sorted(&sorted, 0.75)?,
        max:    sorted[sorted.len() - 1],
    })
}

// ── Distributions ────────────────────────────────────────────────────────────

fn standard_normal() -> PipelineResult<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| PipelineError::Distribution(e.to_string()))
}

fn students_t(df: f64) -> PipelineResult<StudentsT> {
    StudentsT::new(0.0, 1.0, df).map_err(|e| PipelineError::Distribution(e.to_string()))
}

/// Standard-normal quantile z_p.
pub fn normal_quantile(p: f64) -> PipelineResult<f64> {
    Ok(standard_normal()?.inverse_cdf(p))
}

/// Student-t quantile with `df` degrees of freedom.
pub fn t_quantile(p: f64, df: f64) -> PipelineResult<f64> {
    Ok(students_t(df)?.inverse_cdf(p))
}

/// Two-sided tail probability of |t| under Student-t with `df` degrees of freedom.
pub fn t_two_sided_p(t: f64, df: f64) -> PipelineResult<f64> {
    let tail = 1.0 - students_t(df)?.cdf(t.abs());
    Ok((2.0 * tail).clamp(0.0, 1.0))
}

// ── Two-sample test ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TTest {
    pub t_stat: f64,
    pub p_value: f64,
    pub df: f64,
}

/// Pooled-variance two-sample t-test of `a` against `b`, two-sided.
///
/// Returns None when the statistic is undefined: fewer than three
/// observations in total, an empty side, or zero pooled variance.
pub fn ttest_ind(a: &[f64], b: &[f64]) -> PipelineResult<Option<TTest>> {
    let (na, nb) = (a.len(), b.len());
    if na == 0 || nb == 0 || na + nb < 3 {
        return Ok(None);
    }
    let (Some(ma), Some(mb)) = (mean(a), mean(b)) else {
        return Ok(None);
    };
    let va = variance(a).unwrap_or(0.0);
    let vb = variance(b).unwrap_or(0.0);
    let df = (na + nb - 2) as f64;
    let pooled_var = ((na - 1) as f64 * va + (nb - 1) as f64 * vb) / df;
    let se = (pooled_var * (1.0 / na as f64 + 1.0 / nb as f64)).sqrt();
    if se == 0.0 || !se.is_finite() {
        return Ok(None);
    }
    let t_stat = (ma - mb) / se;
    let p_value = t_two_sided_p(t_stat, df)?;
    Ok(Some(TTest { t_stat, p_value, df }))
}
