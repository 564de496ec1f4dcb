//! Wavelet kernels for the Morlet and real-wavelet-bank transforms.

use super::fft::{convolve_same, convolve_same_complex};
use crate::error::{DetectError, Result};
use rustfft::num_complex::Complex;
use std::f64::consts::PI;

/// Complex Morlet wavelet centred on `f0` Hz with spectral standard deviation
/// `sd` Hz, spanning `n_sd` temporal standard deviations on each side.
pub fn morlet_kernel(f0: f64, sd: f64, n_sd: f64, fs: f64) -> Result<Vec<Complex<f64>>> {
    if sd.is_nan() || sd <= 0.0 {
        return Err(DetectError::invalid("morlet", "frequency sd must be positive"));
    }
    let st = 1.0 / (2.0 * PI * sd);
    let half = (n_sd * st * fs) as i64;
    if half <= 0 {
        return Err(DetectError::invalid("morlet", "wavelet is shorter than one sample"));
    }
    let norm = (PI.sqrt() * st * fs).sqrt();
    Ok((-half..=half)
        .map(|i| {
            let t = i as f64 / fs;
            let envelope = (-t * t / (2.0 * st * st)).exp() / norm;
            Complex::from_polar(envelope, 2.0 * PI * f0 * t)
        })
        .collect())
}

/// Magnitude of the Morlet convolution.
pub fn morlet(x: &[Complex<f64>], f0: f64, sd: f64, n_sd: f64, fs: f64) -> Result<Vec<f64>> {
    let kernel = morlet_kernel(f0, sd, n_sd, fs)?;
    Ok(convolve_same_complex(x, &kernel)
        .into_iter()
        .map(|c| c.norm())
        .collect())
}

/// Gaussian-tapered cosines, one per frequency, `dur` seconds long.
pub fn real_wavelets(freqs: &[f64], dur: f64, width: f64, fs: f64) -> Vec<Vec<f64>> {
    let count = (dur * fs).ceil().max(0.0) as usize;
    let x: Vec<f64> = (0..count).map(|i| -dur / 2.0 + i as f64 / fs).collect();
    let taper: Vec<f64> = x
        .iter()
        .map(|t| (-PI * t * t / (width * width)).exp())
        .collect();
    freqs
        .iter()
        .map(|f| {
            x.iter()
                .zip(&taper)
                .map(|(t, g)| (2.0 * PI * f * t).cos() * g)
                .collect()
        })
        .collect()
}

/// Tukey window of `len` samples with taper fraction `alpha`, scaled by
/// `1 / len`.
pub fn tukey(len: usize, alpha: f64) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    let scale = 1.0 / len as f64;
    (0..len)
        .map(|i| {
            let x = i as f64 / (len - 1) as f64;
            let w = if x < alpha / 2.0 {
                0.5 * (1.0 + (2.0 * PI / alpha * (x - alpha / 2.0)).cos())
            } else if x >= 1.0 - alpha / 2.0 {
                0.5 * (1.0 + (2.0 * PI / alpha * (x - 1.0 + alpha / 2.0)).cos())
            } else {
                1.0
            };
            w * scale
        })
        .collect()
}

/// Convolve with every wavelet, rectify, smooth with a Tukey window of
/// `win_len` samples and average across the bank.
pub fn wavelet_bank(x: &[f64], wavelets: &[Vec<f64>], win_len: usize) -> Result<Vec<f64>> {
    if wavelets.is_empty() {
        return Err(DetectError::invalid("wavelet_real", "no frequencies given"));
    }
    if win_len == 0 {
        return Err(DetectError::invalid("wavelet_real", "smoothing window is shorter than one sample"));
    }
    let window = tukey(win_len, 0.5);
    let mut acc = vec![0.0; x.len()];
    for wavelet in wavelets {
        let rect: Vec<f64> = convolve_same(x, wavelet).into_iter().map(f64::abs).collect();
        for (a, v) in acc.iter_mut().zip(convolve_same(&rect, &window)) {
            *a += v;
        }
    }
    let count = wavelets.len() as f64;
    acc.iter_mut().for_each(|v| *v /= count);
    Ok(acc)
}
