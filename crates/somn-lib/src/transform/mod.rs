//! Stateless signal transforms applied by detection recipes.
//!
//! Each `Transform` is one step of a recipe chain. Durations are given in
//! seconds and converted to samples here; filters run forward and backward so
//! transformed samples stay aligned with the raw signal.

pub mod fft;
pub mod filters;
pub mod remez;
pub mod smoothing;
pub mod wavelet;

use crate::error::{DetectError, Result};
use crate::signal::Samples;
use filters::Passband;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Chebyshev-II stopband attenuation in dB.
pub const CHEBY2_STOPBAND_DB: f64 = 40.0;

/// One step of a transform chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Transform {
    Abs,
    Abs2,
    Butter { order: usize, low: f64, high: f64 },
    SosButter { order: usize, low: f64, high: f64 },
    Cheby2 { order: usize, low: f64, high: f64 },
    /// Highpass at `low`, then lowpass at `high`.
    DoubleButter { order: usize, low: f64, high: f64 },
    LowButter { order: usize, cutoff: f64 },
    Cdemod { carrier: f64 },
    Hilbert,
    /// `dur` is the half-width in temporal standard deviations.
    Morlet { f0: f64, sd: f64, dur: f64 },
    WaveletReal {
        freqs: Vec<f64>,
        dur: f64,
        width: f64,
        win: f64,
    },
    MovingAvg { dur: f64 },
    MovingRms { dur: f64 },
    TriSmooth { dur: f64 },
    /// `sigma` in seconds.
    Gaussian { sigma: f64 },
    Remez {
        low: f64,
        high: f64,
        rolloff: f64,
        dur: f64,
    },
    Zscore { dur: f64 },
}

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Abs => "abs",
            Transform::Abs2 => "abs2",
            Transform::Butter { .. } => "butter",
            Transform::SosButter { .. } => "sosbutter",
            Transform::Cheby2 { .. } => "cheby2",
            Transform::DoubleButter { .. } => "double_butter",
            Transform::LowButter { .. } => "low_butter",
            Transform::Cdemod { .. } => "cdemod",
            Transform::Hilbert => "hilbert",
            Transform::Morlet { .. } => "morlet",
            Transform::WaveletReal { .. } => "wavelet_real",
            Transform::MovingAvg { .. } => "moving_avg",
            Transform::MovingRms { .. } => "moving_rms",
            Transform::TriSmooth { .. } => "tri_smooth",
            Transform::Gaussian { .. } => "gaussian",
            Transform::Remez { .. } => "remez",
            Transform::Zscore { .. } => "zscore",
        }
    }

    /// Apply this step to `samples` recorded at `fs` Hz.
    pub fn apply(&self, samples: Samples, fs: f64) -> Result<Samples> {
        let stage = self.name();
        match self {
            Transform::Abs => Ok(Samples::Real(match samples {
                Samples::Real(v) => v.into_iter().map(f64::abs).collect(),
                Samples::Complex(v) => v.into_iter().map(|c| c.norm()).collect(),
            })),
            Transform::Abs2 => Ok(Samples::Real(match samples {
                Samples::Real(v) => v.into_iter().map(|x| x * x).collect(),
                Samples::Complex(v) => v.into_iter().map(|c| c.norm_sqr()).collect(),
            })),
            Transform::Butter { order, low, high } | Transform::SosButter { order, low, high } => {
                let sos = filters::butter(*order, Passband::Bandpass(*low, *high), fs)?;
                samples.map_parts(|x| Ok(sos.filtfilt(x)))
            }
            Transform::Cheby2 { order, low, high } => {
                let sos = filters::cheby2(
                    *order,
                    CHEBY2_STOPBAND_DB,
                    Passband::Bandpass(*low, *high),
                    fs,
                )?;
                samples.map_parts(|x| Ok(sos.filtfilt(x)))
            }
            Transform::DoubleButter { order, low, high } => {
                let hp = filters::butter(*order, Passband::Highpass(*low), fs)?;
                let lp = filters::butter(*order, Passband::Lowpass(*high), fs)?;
                samples.map_parts(|x| Ok(lp.filtfilt(&hp.filtfilt(x))))
            }
            Transform::LowButter { order, cutoff } => {
                let sos = filters::butter(*order, Passband::Lowpass(*cutoff), fs)?;
                samples.map_parts(|x| Ok(sos.filtfilt(x)))
            }
            Transform::Cdemod { carrier } => {
                let w = -2.0 * PI * carrier / fs;
                Ok(Samples::Complex(
                    samples
                        .into_complex()
                        .into_iter()
                        .enumerate()
                        .map(|(i, c)| c * Complex::from_polar(1.0, w * i as f64))
                        .collect(),
                ))
            }
            Transform::Hilbert => {
                let x = samples.into_real(stage)?;
                Ok(Samples::Complex(fft::analytic_signal(&x)))
            }
            Transform::Morlet { f0, sd, dur } => {
                let x = samples.into_complex();
                Ok(Samples::Real(wavelet::morlet(&x, *f0, *sd, *dur, fs)?))
            }
            Transform::WaveletReal {
                freqs,
                dur,
                width,
                win,
            } => {
                let x = samples.into_real(stage)?;
                let bank = wavelet::real_wavelets(freqs, *dur, *width, fs);
                let win_len = (win * fs).round() as usize;
                Ok(Samples::Real(wavelet::wavelet_bank(&x, &bank, win_len)?))
            }
            Transform::MovingAvg { dur } => {
                let len = window(stage, *dur * fs)?;
                samples.map_parts(|x| smoothing::moving_avg(x, len))
            }
            Transform::MovingRms { dur } => {
                let x = samples.into_real(stage)?;
                let half = window(stage, (fs * dur / 2.0).floor())?;
                Ok(Samples::Real(smoothing::moving_rms(&x, half)?))
            }
            Transform::TriSmooth { dur } => {
                let half = window(stage, dur * fs / 2.0)?;
                samples.map_parts(|x| smoothing::tri_smooth(x, half))
            }
            Transform::Gaussian { sigma } => {
                let sigma = sigma * fs;
                samples.map_parts(|x| smoothing::gaussian(x, sigma))
            }
            Transform::Remez {
                low,
                high,
                rolloff,
                dur,
            } => {
                let numtaps = window(stage, fs * dur)?;
                let fir = remez::Fir::bandpass(numtaps, *low, *high, *rolloff, fs)?;
                samples.map_parts(|x| Ok(fir.filtfilt(x)))
            }
            Transform::Zscore { dur } => {
                let x = samples.into_real(stage)?;
                let half = window(stage, (fs * dur / 2.0).floor())?;
                Ok(Samples::Real(smoothing::zscore(&x, half)?))
            }
        }
    }
}

/// Truncate a sample count, refusing windows that vanish.
fn window(stage: &'static str, samples: f64) -> Result<usize> {
    if !samples.is_finite() || samples < 1.0 {
        return Err(DetectError::invalid(
            stage,
            format!("window of {samples:.3} samples is too short"),
        ));
    }
    Ok(samples as usize)
}

/// Run a chain of transforms over a raw series.
pub fn apply_chain(raw: &[f64], chain: &[Transform], fs: f64) -> Result<Samples> {
    chain
        .iter()
        .try_fold(Samples::Real(raw.to_vec()), |acc, step| step.apply(acc, fs))
}
