//! Scalar thresholds derived from a transformed signal.

use crate::error::{DetectError, Result};
use serde::{Deserialize, Serialize};

/// Default number of bins for `ThresholdMethod::HistogramMode`.
pub const DEFAULT_HISTOGRAM_BINS: usize = 120;

/// How a detection or selection threshold is derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMethod {
    /// `multiplier * mean`
    Mean,
    /// `multiplier * median`
    Median,
    /// `multiplier * std`
    Std,
    /// `mean + multiplier * std`
    MeanPlusStd,
    /// `median + multiplier * std`
    MedianPlusStd,
    /// `multiplier *` centre of the most populated histogram bin.
    HistogramMode { bins: usize },
    /// The `multiplier`-th percentile, linearly interpolated.
    Percentile,
    /// The multiplier itself, for signals that are already normalised.
    Absolute,
}

/// Derive a threshold from `signal`. Standard deviations are population
/// deviations.
pub fn derive_threshold(signal: &[f64], method: ThresholdMethod, multiplier: f64) -> Result<f64> {
    if let ThresholdMethod::Absolute = method {
        return Ok(multiplier);
    }
    if signal.is_empty() {
        return Err(DetectError::EmptyInput("threshold"));
    }
    let value = match method {
        ThresholdMethod::Mean => multiplier * mean(signal),
        ThresholdMethod::Median => multiplier * median(signal),
        ThresholdMethod::Std => multiplier * std(signal),
        ThresholdMethod::MeanPlusStd => mean(signal) + multiplier * std(signal),
        ThresholdMethod::MedianPlusStd => median(signal) + multiplier * std(signal),
        ThresholdMethod::HistogramMode { bins } => multiplier * histogram_mode(signal, bins)?,
        ThresholdMethod::Percentile => {
            if !(0.0..=100.0).contains(&multiplier) {
                return Err(DetectError::invalid(
                    "threshold",
                    format!("percentile {multiplier} outside 0-100"),
                ));
            }
            percentile(signal, multiplier)
        }
        ThresholdMethod::Absolute => multiplier,
    };
    Ok(value)
}

pub(crate) fn mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

pub(crate) fn std(x: &[f64]) -> f64 {
    let m = mean(x);
    (x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / x.len() as f64).sqrt()
}

fn sorted(x: &[f64]) -> Vec<f64> {
    let mut v = x.to_vec();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

fn median(x: &[f64]) -> f64 {
    percentile(x, 50.0)
}

fn percentile(x: &[f64], q: f64) -> f64 {
    let v = sorted(x);
    let pos = q / 100.0 * (v.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    v[lo] + (v[hi] - v[lo]) * (pos - lo as f64)
}

fn histogram_mode(x: &[f64], bins: usize) -> Result<f64> {
    if bins == 0 {
        return Err(DetectError::invalid("threshold", "histogram needs at least one bin"));
    }
    let (lo, hi) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if hi <= lo {
        return Ok(lo);
    }
    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0usize; bins];
    for &v in x {
        // the maximum falls into the last, closed bin
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = i;
        }
    }
    Ok(lo + (best as f64 + 0.5) * width)
}
