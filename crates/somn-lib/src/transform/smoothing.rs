//! Windowed smoothing and normalisation kernels.
//!
//! Window lengths arrive in samples; converting from seconds is the caller's
//! job so every kernel here can reject an empty window the same way.

use super::fft::convolve_same;
use crate::error::{DetectError, Result};

fn require_window(stage: &'static str, len: usize) -> Result<()> {
    if len == 0 {
        return Err(DetectError::invalid(stage, "window is shorter than one sample"));
    }
    Ok(())
}

/// Boxcar average of `len` samples.
pub fn moving_avg(x: &[f64], len: usize) -> Result<Vec<f64>> {
    require_window("moving_avg", len)?;
    let kernel = vec![1.0 / len as f64; len];
    Ok(convolve_same(x, &kernel))
}

/// Triangular smoothing with half-width `half` samples.
pub fn tri_smooth(x: &[f64], half: usize) -> Result<Vec<f64>> {
    require_window("tri_smooth", half)?;
    let mut kernel: Vec<f64> = (1..half).map(|v| v as f64).collect();
    kernel.push(half as f64);
    kernel.extend((1..half).rev().map(|v| v as f64));
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|v| *v /= total);
    Ok(convolve_same(x, &kernel))
}

/// Gaussian smoothing with `sigma` in samples, kernel truncated at four
/// sigmas and edges handled by mirror reflection.
pub fn gaussian(x: &[f64], sigma: f64) -> Result<Vec<f64>> {
    if sigma.is_nan() || sigma <= 0.0 {
        return Err(DetectError::invalid("gaussian", "sigma must be positive"));
    }
    let radius = (4.0 * sigma + 0.5) as usize;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let d = i as f64 - radius as f64;
            (-0.5 * d * d / (sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|v| *v /= total);

    let n = x.len() as isize;
    if n == 0 {
        return Ok(Vec::new());
    }
    let reflect = |mut i: isize| -> usize {
        // period 2n: "d c b a | a b c d | d c b a"
        let period = 2 * n;
        i = i.rem_euclid(period);
        if i >= n {
            i = period - 1 - i;
        }
        i as usize
    };
    Ok((0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * x[reflect(i + k as isize - radius as isize)])
                .sum()
        })
        .collect())
}

/// Half-open window `[i - half, i + half)` around every sample, clamped to
/// the array.
fn centred_windows(n: usize, half: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..n).map(move |i| (i.saturating_sub(half), (i + half).min(n)))
}

fn prefix_sums(x: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut sum = Vec::with_capacity(x.len() + 1);
    let mut sq = Vec::with_capacity(x.len() + 1);
    sum.push(0.0);
    sq.push(0.0);
    for &v in x {
        sum.push(sum[sum.len() - 1] + v);
        sq.push(sq[sq.len() - 1] + v * v);
    }
    (sum, sq)
}

/// Sliding root-mean-square.
pub fn moving_rms(x: &[f64], half: usize) -> Result<Vec<f64>> {
    require_window("moving_rms", half)?;
    let (_, sq) = prefix_sums(x);
    Ok(centred_windows(x.len(), half)
        .map(|(lo, hi)| ((sq[hi] - sq[lo]) / (hi - lo) as f64).max(0.0).sqrt())
        .collect())
}

/// Sliding z-score. Flat windows map to zero.
pub fn zscore(x: &[f64], half: usize) -> Result<Vec<f64>> {
    require_window("zscore", half)?;
    let (sum, sq) = prefix_sums(x);
    Ok(centred_windows(x.len(), half)
        .zip(x)
        .map(|((lo, hi), &v)| {
            let count = (hi - lo) as f64;
            let mean = (sum[hi] - sum[lo]) / count;
            let var = ((sq[hi] - sq[lo]) / count - mean * mean).max(0.0);
            let sd = var.sqrt();
            if sd > 0.0 {
                (v - mean) / sd
            } else {
                0.0
            }
        })
        .collect())
}
