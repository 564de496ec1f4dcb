//! Equiripple FIR bandpass design (Parks-McClellan exchange).
//!
//! Every design is measured against the ideal response before use. When the
//! exchange stalls on a long filter, a Kaiser-window design of the same
//! length is tried; a filter that still misses the bands is an error.

use super::fft::convolve_same;
use crate::error::{DetectError, Result};
use std::f64::consts::PI;

const GRID_DENSITY: usize = 16;
const MAX_ITERATIONS: usize = 100;
/// Relative gap between peak and levelled error at which the exchange stops.
const CONVERGENCE: f64 = 1e-4;
/// Largest departure from the ideal 0/1 amplitude a usable filter may show.
pub const MAX_DEVIATION: f64 = 0.1;

/// Linear-phase bandpass FIR with odd length.
#[derive(Debug, Clone, PartialEq)]
pub struct Fir {
    taps: Vec<f64>,
}

struct Band {
    lo: f64,
    hi: f64,
    desired: f64,
}

struct GridPoint {
    /// `cos(2 pi f)`, the abscissa of the cosine polynomial.
    x: f64,
    desired: f64,
    band: usize,
}

impl Fir {
    /// Design a bandpass keeping `[low, high]` Hz with stopbands ending
    /// `rolloff` Hz away from each edge. `numtaps` is forced odd.
    pub fn bandpass(numtaps: usize, low: f64, high: f64, rolloff: f64, fs: f64) -> Result<Self> {
        let numtaps = if numtaps % 2 == 0 { numtaps + 1 } else { numtaps };
        if numtaps < 3 {
            return Err(DetectError::invalid("remez", "filter needs at least 3 taps"));
        }
        let nyquist = fs / 2.0;
        if !(rolloff > 0.0 && low - rolloff > 0.0 && low < high && high + rolloff < nyquist) {
            return Err(DetectError::invalid(
                "remez",
                format!("band {low}-{high} Hz with rolloff {rolloff} Hz does not fit below {nyquist} Hz"),
            ));
        }
        let bands = [
            Band {
                lo: 0.0,
                hi: (low - rolloff) / fs,
                desired: 0.0,
            },
            Band {
                lo: low / fs,
                hi: high / fs,
                desired: 1.0,
            },
            Band {
                lo: (high + rolloff) / fs,
                hi: 0.5,
                desired: 0.0,
            },
        ];

        let (taps, converged) = equiripple(numtaps, &bands);
        let fir = Self { taps };
        let deviation = fir.deviation(&bands);
        if deviation <= MAX_DEVIATION {
            if !converged {
                log::debug!("remez exchange stopped early for {numtaps} taps (deviation {deviation:.4})");
            }
            return Ok(fir);
        }

        log::warn!(
            "remez exchange failed for {numtaps} taps at {low}-{high} Hz (deviation {deviation:.3}), \
             using a Kaiser window design"
        );
        let fir = Self {
            taps: kaiser_bandpass(numtaps, low - rolloff / 2.0, high + rolloff / 2.0, rolloff, fs),
        };
        let deviation = fir.deviation(&bands);
        if deviation > MAX_DEVIATION {
            return Err(DetectError::invalid(
                "remez",
                format!(
                    "no {numtaps}-tap filter keeps {low}-{high} Hz within {MAX_DEVIATION} of the \
                     ideal response (best deviation {deviation:.3})"
                ),
            ));
        }
        Ok(fir)
    }

    pub fn taps(&self) -> &[f64] {
        &self.taps
    }

    /// Forward-backward application. Both ends are extended with the edge
    /// value so the filter starts from a constant history.
    pub fn filtfilt(&self, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        if n == 0 {
            return Vec::new();
        }
        let pad = self.taps.len();
        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend(std::iter::repeat(x[0]).take(pad));
        ext.extend_from_slice(x);
        ext.extend(std::iter::repeat(x[n - 1]).take(pad));

        // symmetric taps: the backward pass is the same convolution
        let once = convolve_same(&ext, &self.taps);
        let twice = convolve_same(&once, &self.taps);
        twice[pad..pad + n].to_vec()
    }

    /// Magnitude response at `freq` Hz.
    pub fn gain_at(&self, freq: f64, fs: f64) -> f64 {
        let w = 2.0 * PI * freq / fs;
        let (re, im) = self
            .taps
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(re, im), (k, &h)| {
                (re + h * (w * k as f64).cos(), im - h * (w * k as f64).sin())
            });
        (re * re + im * im).sqrt()
    }

    /// Worst distance of the amplitude response from the desired value,
    /// sampled at four points per tap across every band.
    fn deviation(&self, bands: &[Band]) -> f64 {
        if self.taps.iter().any(|t| !t.is_finite()) {
            return f64::INFINITY;
        }
        let n = self.taps.len();
        let centre = &self.taps[(n - 1) / 2..];
        let mut worst = 0.0_f64;
        for band in bands {
            let count = (((band.hi - band.lo) * 4.0 * n as f64).ceil() as usize).max(8);
            for i in 0..=count {
                let f = band.lo + (band.hi - band.lo) * i as f64 / count as f64;
                worst = worst.max((amplitude(centre, 2.0 * PI * f) - band.desired).abs());
            }
        }
        worst
    }
}

/// Zero-phase amplitude of a symmetric filter, given the taps from the
/// centre onwards.
fn amplitude(centre: &[f64], w: f64) -> f64 {
    let cw = w.cos();
    let (mut prev, mut cur) = (1.0, cw);
    let mut sum = centre[0];
    for &c in &centre[1..] {
        sum += 2.0 * c * cur;
        let next = 2.0 * cw * cur - prev;
        prev = cur;
        cur = next;
    }
    sum
}

/// Type I design with unit weights: amplitude A(w) = sum a_k cos(k w) is
/// fitted on a dense grid by the Remez exchange, then sampled back to taps.
/// Returns the taps and whether the error levelled out.
fn equiripple(numtaps: usize, bands: &[Band]) -> (Vec<f64>, bool) {
    let half = (numtaps - 1) / 2;
    let nfcns = half + 1;
    let grid = dense_grid(bands, nfcns);

    let r = nfcns + 1;
    let mut ext: Vec<usize> = (0..r).map(|i| i * (grid.len() - 1) / (r - 1)).collect();
    let mut fit = Fit::solve(&grid, &ext);
    let mut converged = false;

    for _ in 0..MAX_ITERATIONS {
        let err: Vec<f64> = grid.iter().map(|g| g.desired - fit.eval(g.x)).collect();
        if err.iter().any(|e| !e.is_finite()) {
            break;
        }
        let peak = err.iter().fold(0.0_f64, |m, e| m.max(e.abs()));
        if peak - fit.delta.abs() <= CONVERGENCE * peak {
            converged = true;
            break;
        }
        let next = exchange(&grid, &err, &ext, fit.delta);
        if next == ext {
            break;
        }
        ext = next;
        fit = Fit::solve(&grid, &ext);
    }

    // sample A at N equispaced frequencies and invert the real cosine series
    let n = numtaps as f64;
    let amps: Vec<f64> = (0..=half)
        .map(|m| fit.eval((2.0 * PI * m as f64 / n).cos()))
        .collect();
    let taps = (0..numtaps)
        .map(|i| {
            let shift = i as f64 - half as f64;
            let sum: f64 = amps
                .iter()
                .enumerate()
                .skip(1)
                .map(|(m, a)| 2.0 * a * (2.0 * PI * m as f64 * shift / n).cos())
                .sum();
            (amps[0] + sum) / n
        })
        .collect();
    (taps, converged)
}

/// Evenly spaced points covering each band edge to edge.
fn dense_grid(bands: &[Band], nfcns: usize) -> Vec<GridPoint> {
    let step = 0.5 / (GRID_DENSITY * nfcns) as f64;
    let mut grid = Vec::new();
    for (b, band) in bands.iter().enumerate() {
        let count = ((band.hi - band.lo) / step).round().max(1.0) as usize;
        for i in 0..=count {
            let freq = band.lo + (band.hi - band.lo) * i as f64 / count as f64;
            grid.push(GridPoint {
                x: (2.0 * PI * freq).cos(),
                desired: band.desired,
                band: b,
            });
        }
    }
    grid
}

/// Alternating fit through the current extremal set.
struct Fit {
    x: Vec<f64>,
    weights: Vec<f64>,
    values: Vec<f64>,
    delta: f64,
}

impl Fit {
    fn solve(grid: &[GridPoint], ext: &[usize]) -> Self {
        let x: Vec<f64> = ext.iter().map(|&i| grid[i].x).collect();
        let all = barycentric(&x);
        let mut num = 0.0;
        let mut den = 0.0;
        let mut sign = 1.0;
        for (w, &i) in all.iter().zip(ext) {
            num += w * grid[i].desired;
            den += sign * w;
            sign = -sign;
        }
        let delta = num / den;

        // interpolate through all but the last extremal
        let keep = x.len() - 1;
        let mut values = Vec::with_capacity(keep);
        let mut sign = 1.0;
        for &i in &ext[..keep] {
            values.push(grid[i].desired - sign * delta);
            sign = -sign;
        }
        let x = x[..keep].to_vec();
        let weights = barycentric(&x);
        Self {
            x,
            weights,
            values,
            delta,
        }
    }

    fn eval(&self, xv: f64) -> f64 {
        let mut num = 0.0;
        let mut den = 0.0;
        for ((&xk, &wk), &ck) in self.x.iter().zip(&self.weights).zip(&self.values) {
            let d = xv - xk;
            if d.abs() < 1e-14 {
                return ck;
            }
            let t = wk / d;
            num += t * ck;
            den += t;
        }
        num / den
    }
}

/// Barycentric weights, up to a common factor. Products are accumulated as
/// logarithms so long filters neither overflow nor underflow.
fn barycentric(x: &[f64]) -> Vec<f64> {
    let logs: Vec<(f64, f64)> = x
        .iter()
        .enumerate()
        .map(|(k, &xk)| {
            let mut log = 0.0;
            let mut sign = 1.0;
            for (j, &xj) in x.iter().enumerate() {
                if j != k {
                    let d = xk - xj;
                    log += d.abs().ln();
                    sign *= d.signum();
                }
            }
            (-log, sign)
        })
        .collect();
    let top = logs.iter().map(|&(l, _)| l).fold(f64::NEG_INFINITY, f64::max);
    logs.into_iter().map(|(l, s)| s * (l - top).exp()).collect()
}

/// Next reference set: as many alternating error extrema as `ext` holds,
/// each at least `|delta|` in size, keeping the largest error on the grid.
///
/// The error at reference point k is `(-1)^k delta`. Climbing from each one
/// towards larger error of the same sign gives an alternating set, so the
/// exchange never runs short of points; local extrema elsewhere on the grid
/// then compete with it.
fn exchange(grid: &[GridPoint], err: &[f64], ext: &[usize], delta: f64) -> Vec<usize> {
    let n = err.len();
    let level = delta.abs();
    let neighbours = |i: usize| {
        let left = (i > 0 && grid[i - 1].band == grid[i].band).then(|| i - 1);
        let right = (i + 1 < n && grid[i + 1].band == grid[i].band).then(|| i + 1);
        [left, right].into_iter().flatten()
    };
    let climb = |mut i: usize, s: f64| loop {
        let best = neighbours(i).max_by(|&a, &b| (s * err[a]).total_cmp(&(s * err[b])));
        match best {
            Some(j) if s * err[j] > s * err[i] => i = j,
            _ => return i,
        }
    };

    let mut cand: Vec<usize> = (0..n)
        .filter(|&i| {
            let s = err[i].signum();
            let e = s * err[i];
            e > 0.0 && e >= level && neighbours(i).all(|j| s * err[j] <= e)
        })
        .collect();
    let mut sign = if delta < 0.0 { -1.0 } else { 1.0 };
    for &i in ext {
        cand.push(climb(i, sign));
        sign = -sign;
    }
    cand.sort_unstable();
    cand.dedup();

    // collapse runs of equal sign to their largest member
    let mut alt: Vec<usize> = Vec::with_capacity(cand.len());
    for i in cand {
        match alt.last_mut() {
            Some(last) if (err[*last] > 0.0) == (err[i] > 0.0) => {
                if err[i].abs() > err[*last].abs() {
                    *last = i;
                }
            }
            _ => alt.push(i),
        }
    }

    let r = ext.len();
    if alt.len() < r {
        return ext.to_vec();
    }
    while alt.len() > r {
        if err[alt[0]].abs() < err[alt[alt.len() - 1]].abs() {
            alt.remove(0);
        } else {
            alt.pop();
        }
    }
    alt
}

/// Windowed-sinc bandpass with cutoffs `f1` and `f2` Hz; the Kaiser window
/// is sized for a `transition` Hz wide roll-off at the filter length.
fn kaiser_bandpass(numtaps: usize, f1: f64, f2: f64, transition: f64, fs: f64) -> Vec<f64> {
    let half = (numtaps - 1) as f64 / 2.0;
    let width = 2.0 * PI * transition / fs;
    let atten = 2.285 * (numtaps - 1) as f64 * width + 7.95;
    let beta = if atten > 50.0 {
        0.1102 * (atten - 8.7)
    } else if atten >= 21.0 {
        0.5842 * (atten - 21.0).powf(0.4) + 0.07886 * (atten - 21.0)
    } else {
        0.0
    };
    let (c1, c2) = (f1 / fs, f2 / fs);
    let norm = bessel_i0(beta);
    (0..numtaps)
        .map(|i| {
            let m = i as f64 - half;
            let ideal = 2.0 * c2 * sinc(2.0 * c2 * m) - 2.0 * c1 * sinc(2.0 * c1 * m);
            let r = m / half;
            ideal * bessel_i0(beta * (1.0 - r * r).max(0.0).sqrt()) / norm
        })
        .collect()
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Zeroth-order modified Bessel function, I0(x) = sum (x^2/4)^k / (k!)^2.
fn bessel_i0(x: f64) -> f64 {
    let quarter = x * x / 4.0;
    let mut sum = 1.0;
    let mut term = 1.0;
    for k in 1..60 {
        term *= quarter / (k * k) as f64;
        sum += term;
        if term < 1e-15 * sum {
            break;
        }
    }
    sum
}
