//! Per-interval spectral features.
//!
//! Out-of-bounds windows produce `f64::NAN` rather than an error so a single
//! edge event does not spoil a whole channel.

use crate::error::{DetectError, Result};
use crate::intervals::Interval;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

/// Peak frequencies above this are ignored.
pub const MAX_FREQUENCY_OF_INTEREST: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scaling {
    /// Power spectral density, V²/Hz.
    Density,
    /// Power spectrum, V².
    Spectrum,
}

/// One-sided periodogram.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    pub freqs: Vec<f64>,
    pub power: Vec<f64>,
}

/// Periodogram with constant detrending and a boxcar window.
pub fn periodogram(x: &[f64], fs: f64, scaling: Scaling) -> Result<Spectrum> {
    let n = x.len();
    if n == 0 {
        return Err(DetectError::EmptyInput("periodogram"));
    }
    let mean = x.iter().sum::<f64>() / n as f64;
    let mut buffer: Vec<f64> = x.iter().map(|v| v - mean).collect();

    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(n);
    let mut spectrum = r2c.make_output_vec();
    r2c.process(&mut buffer, &mut spectrum)
        .map_err(|e| DetectError::invalid("periodogram", e.to_string()))?;

    let scale = match scaling {
        Scaling::Density => 1.0 / (fs * n as f64),
        Scaling::Spectrum => 1.0 / (n as f64 * n as f64),
    };
    let nyquist_bin = (n % 2 == 0).then_some(n / 2);
    let power = spectrum
        .iter()
        .enumerate()
        .map(|(k, c)| {
            let p = c.norm_sqr() * scale;
            if k == 0 || Some(k) == nyquist_bin {
                p
            } else {
                2.0 * p
            }
        })
        .collect();
    let freqs = (0..spectrum.len()).map(|k| k as f64 * fs / n as f64).collect();
    Ok(Spectrum { freqs, power })
}

/// Short-time power spectra.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    pub freqs: Vec<f64>,
    /// One power-density spectrum per frame.
    pub frames: Vec<Vec<f64>>,
    /// Samples between consecutive frame starts.
    pub step: usize,
}

/// Spectrogram with per-frame linear detrending and a Tukey window of taper
/// fraction `taper`. Frames that would run past the end are not computed.
pub fn spectrogram(x: &[f64], fs: f64, nperseg: usize, noverlap: usize, taper: f64) -> Result<Spectrogram> {
    if nperseg < 2 || noverlap >= nperseg {
        return Err(DetectError::invalid(
            "spectrogram",
            format!("{nperseg} samples per frame with {noverlap} overlapping"),
        ));
    }
    let step = nperseg - noverlap;
    let window = tukey_window(nperseg, taper);
    let scale = 1.0 / (fs * window.iter().map(|w| w * w).sum::<f64>());

    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(nperseg);
    let mut spectrum = r2c.make_output_vec();
    let nyquist_bin = (nperseg % 2 == 0).then_some(nperseg / 2);

    let mut frames = Vec::new();
    let mut pos = 0;
    while pos + nperseg <= x.len() {
        let mut frame = detrend_linear(&x[pos..pos + nperseg]);
        frame.iter_mut().zip(&window).for_each(|(v, w)| *v *= w);
        r2c.process(&mut frame, &mut spectrum)
            .map_err(|e| DetectError::invalid("spectrogram", e.to_string()))?;
        frames.push(
            spectrum
                .iter()
                .enumerate()
                .map(|(k, c)| {
                    let p = c.norm_sqr() * scale;
                    if k == 0 || Some(k) == nyquist_bin {
                        p
                    } else {
                        2.0 * p
                    }
                })
                .collect(),
        );
        pos += step;
    }
    let freqs = (0..spectrum.len())
        .map(|k| k as f64 * fs / nperseg as f64)
        .collect();
    Ok(Spectrogram {
        freqs,
        frames,
        step,
    })
}

/// Symmetric Tukey window, unit height.
fn tukey_window(len: usize, alpha: f64) -> Vec<f64> {
    if alpha <= 0.0 {
        return vec![1.0; len];
    }
    let width = alpha * (len - 1) as f64 / 2.0;
    (0..len)
        .map(|i| {
            let n = i as f64;
            let m = (len - 1) as f64 - n;
            let d = n.min(m);
            if d < width {
                0.5 * (1.0 + (std::f64::consts::PI * (d / width - 1.0)).cos())
            } else {
                1.0
            }
        })
        .collect()
}

/// Remove the least-squares line.
fn detrend_linear(x: &[f64]) -> Vec<f64> {
    let n = x.len() as f64;
    let mean_t = (n - 1.0) / 2.0;
    let mean_x = x.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, v) in x.iter().enumerate() {
        let dt = i as f64 - mean_t;
        sxy += dt * (v - mean_x);
        sxx += dt * dt;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    x.iter()
        .enumerate()
        .map(|(i, v)| v - mean_x - slope * (i as f64 - mean_t))
        .collect()
}

/// Window over which the peak frequency is measured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakWindow {
    /// The whole interval.
    Interval,
    /// A window of this many seconds centred on the interval peak.
    Peak(f64),
}

fn diff(x: &[f64]) -> Vec<f64> {
    x.windows(2).map(|w| w[1] - w[0]).collect()
}

/// `[x0, x1)` if it lies inside a series of length `len`.
fn window_bounds(x0: f64, x1: f64, len: usize) -> Option<(usize, usize)> {
    if x0 < 0.0 || x1 >= len as f64 || x1 <= x0 {
        return None;
    }
    Some((x0 as usize, x1 as usize))
}

/// Frequency of maximum power in each interval, below
/// `MAX_FREQUENCY_OF_INTEREST`. The raw signal is first-differenced to
/// flatten the 1/f background.
pub fn spectral_peak(
    intervals: &[Interval],
    raw: &[f64],
    fs: f64,
    window: PeakWindow,
) -> Result<Vec<f64>> {
    let d = diff(raw);
    intervals
        .iter()
        .map(|iv| {
            let (x0, x1) = match window {
                PeakWindow::Interval => (iv.start as f64, iv.end as f64),
                PeakWindow::Peak(secs) => {
                    let half = secs / 2.0 * fs;
                    (iv.peak as f64 - half, iv.peak as f64 + half)
                }
            };
            let Some((a, b)) = window_bounds(x0, x1, d.len()) else {
                return Ok(f64::NAN);
            };
            if b - a < 2 {
                return Ok(f64::NAN);
            }
            let spec = periodogram(&d[a..b], fs, Scaling::Density)?;
            let mut best: Option<(f64, f64)> = None;
            for (&f, &p) in spec.freqs.iter().zip(&spec.power) {
                if f >= MAX_FREQUENCY_OF_INTEREST {
                    break;
                }
                if best.map_or(true, |(_, bp)| p > bp) {
                    best = Some((f, p));
                }
            }
            Ok(best.map_or(f64::NAN, |(f, _)| f))
        })
        .collect()
}

fn nearest_bin(freqs: &[f64], target: f64) -> usize {
    let mut best = 0;
    for (i, f) in freqs.iter().enumerate() {
        if (f - target).abs() < (freqs[best] - target).abs() {
            best = i;
        }
    }
    best
}

/// Mean power between the bins nearest to `band.0` (inclusive) and `band.1`
/// (exclusive), on the differenced raw signal.
pub fn band_power(intervals: &[Interval], raw: &[f64], fs: f64, band: (f64, f64)) -> Result<Vec<f64>> {
    let d = diff(raw);
    intervals
        .iter()
        .map(|iv| {
            let Some((a, b)) = window_bounds(iv.start as f64, iv.end as f64, d.len()) else {
                return Ok(f64::NAN);
            };
            let spec = periodogram(&d[a..b], fs, Scaling::Density)?;
            let b0 = nearest_bin(&spec.freqs, band.0);
            let b1 = nearest_bin(&spec.freqs, band.1);
            if b1 <= b0 {
                return Ok(f64::NAN);
            }
            let slice = &spec.power[b0..b1];
            Ok(slice.iter().sum::<f64>() / slice.len() as f64)
        })
        .collect()
}

/// Keep intervals whose in-band amplitude, relative to the amplitude over
/// `[0, band.1]`, exceeds `ratio`. Intervals touching the array edge score 0.
pub fn power_ratio_filter(
    intervals: Vec<Interval>,
    raw: &[f64],
    fs: f64,
    band: (f64, f64),
    ratio: f64,
) -> Result<Vec<Interval>> {
    let mut kept = Vec::with_capacity(intervals.len());
    for iv in intervals {
        let score = match window_bounds(iv.start as f64, iv.end as f64, raw.len()) {
            None => 0.0,
            Some((a, b)) => {
                let spec = periodogram(&raw[a..b], fs, Scaling::Spectrum)?;
                let amp: Vec<f64> = spec.power.iter().map(|p| p.sqrt()).collect();
                let mean_where = |pred: &dyn Fn(f64) -> bool| {
                    let vals: Vec<f64> = spec
                        .freqs
                        .iter()
                        .zip(&amp)
                        .filter(|(f, _)| pred(**f))
                        .map(|(_, a)| *a)
                        .collect();
                    vals.iter().sum::<f64>() / vals.len() as f64
                };
                let inband = mean_where(&|f| f >= band.0 && f <= band.1);
                let below = mean_where(&|f| f <= band.1);
                inband / below
            }
        };
        if score > ratio {
            kept.push(iv);
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn tone(f: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * f * i as f64 / fs).sin()).collect()
    }

    #[test]
    fn periodogram_density_integrates_to_variance() {
        let fs = 100.0;
        let x = tone(10.0, fs, 200);
        let spec = periodogram(&x, fs, Scaling::Density).unwrap();
        let df = fs / 200.0;
        let total: f64 = spec.power.iter().sum::<f64>() * df;
        assert!((total - 0.5).abs() < 1e-9, "{total}");
        assert_eq!(spec.freqs[20], 10.0);
    }

    #[test]
    fn spectrogram_tracks_a_frequency_change() {
        let fs = 100.0;
        let x: Vec<f64> = tone(3.0, fs, 500)
            .into_iter()
            .chain(tone(20.0, fs, 500))
            .collect();
        let spec = spectrogram(&x, fs, 100, 50, 0.25).unwrap();
        assert_eq!(spec.step, 50);
        assert_eq!(spec.frames.len(), 19);
        let argmax = |frame: &[f64]| {
            let mut best = 0;
            for (k, p) in frame.iter().enumerate() {
                if *p > frame[best] {
                    best = k;
                }
            }
            spec.freqs[best]
        };
        assert_eq!(argmax(&spec.frames[2]), 3.0);
        assert_eq!(argmax(&spec.frames[15]), 20.0);
    }

    #[test]
    fn linear_trend_is_removed() {
        let ramp: Vec<f64> = (0..10).map(|i| 2.0 * i as f64 + 1.0).collect();
        assert!(detrend_linear(&ramp).iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn spectral_peak_finds_spindle_frequency() {
        let fs = 200.0;
        let mut raw = vec![0.0; 2000];
        for (i, v) in tone(13.0, fs, 400).into_iter().enumerate() {
            raw[800 + i] = v;
        }
        let ivs = [Interval::new(800, 1000, 1200)];
        let peak = spectral_peak(&ivs, &raw, fs, PeakWindow::Interval).unwrap();
        assert!((peak[0] - 13.0).abs() < 0.6, "{peak:?}");
        let windowed = spectral_peak(&ivs, &raw, fs, PeakWindow::Peak(1.0)).unwrap();
        assert!((windowed[0] - 13.0).abs() < 1.1);
    }

    #[test]
    fn out_of_bounds_windows_are_nan() {
        let raw = vec![0.0; 100];
        let ivs = [Interval::new(10, 12, 99), Interval::new(0, 2, 20)];
        let peak = spectral_peak(&ivs, &raw, 100.0, PeakWindow::Interval).unwrap();
        assert!(peak[0].is_nan());
        // a flat segment still has a spectrum, peaking at DC
        assert_eq!(peak[1], 0.0);
        let edge = spectral_peak(&ivs[1..], &raw, 100.0, PeakWindow::Peak(1.0)).unwrap();
        assert!(edge[0].is_nan());
        let bp = band_power(&ivs[..1], &raw, 100.0, (11.0, 16.0)).unwrap();
        assert!(bp[0].is_nan());
    }

    #[test]
    fn band_power_is_larger_in_band() {
        let fs = 100.0;
        let raw = tone(13.0, fs, 500);
        let ivs = [Interval::new(0, 100, 400)];
        let sigma = band_power(&ivs, &raw, fs, (11.0, 16.0)).unwrap()[0];
        let delta = band_power(&ivs, &raw, fs, (1.0, 4.0)).unwrap()[0];
        assert!(sigma > 100.0 * delta);
    }

    #[test]
    fn power_ratio_rejects_slow_activity() {
        let fs = 100.0;
        let spindle = tone(13.0, fs, 300);
        let slow = tone(2.0, fs, 300);
        let raw: Vec<f64> = spindle.iter().chain(&slow).copied().chain([0.0; 10]).collect();
        let ivs = vec![Interval::new(0, 50, 300), Interval::new(300, 350, 600)];
        let kept = power_ratio_filter(ivs, &raw, fs, (10.0, 16.0), 0.5).unwrap();
        assert_eq!(kept, vec![Interval::new(0, 50, 300)]);
        // an interval reaching the last sample scores zero
        let edge = vec![Interval::new(300, 350, 610)];
        assert!(power_ratio_filter(edge, &raw, fs, (10.0, 16.0), 0.0).unwrap().is_empty());
    }
}
