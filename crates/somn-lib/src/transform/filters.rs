//! IIR filter design and zero-phase application.
//!
//! Filters are designed as analog prototypes, mapped to the requested band,
//! discretised with the bilinear transform and factored into second-order
//! sections. Forward-backward application pads the signal with an odd
//! extension and starts every section from its steady state, so edges do not
//! ring.

use crate::error::{DetectError, Result};
use rustfft::num_complex::Complex;
use std::f64::consts::PI;

type Root = Complex<f64>;

/// Which part of the spectrum a filter keeps. Frequencies are in Hz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Passband {
    Lowpass(f64),
    Highpass(f64),
    Bandpass(f64, f64),
}

/// Second-order section coefficients, normalised so `a[0] == 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct BiquadCoeffs {
    /// Numerator coefficients [b0, b1, b2]
    pub b: [f64; 3],
    /// Denominator coefficients [a0=1, a1, a2]
    pub a: [f64; 3],
}

impl BiquadCoeffs {
    /// Steady-state transposed direct form II state for a unit step input.
    fn step_state(&self) -> [f64; 2] {
        let [b0, b1, b2] = self.b;
        let [_, a1, a2] = self.a;
        let gain = (b0 + b1 + b2) / (1.0 + a1 + a2);
        let z1 = b2 - a2 * gain;
        let z0 = b1 - a1 * gain + z1;
        [z0, z1]
    }

    fn dc_gain(&self) -> f64 {
        self.b.iter().sum::<f64>() / self.a.iter().sum::<f64>()
    }
}

/// Cascade of second-order sections.
#[derive(Clone, Debug, PartialEq)]
pub struct Sos {
    sections: Vec<BiquadCoeffs>,
}

struct Zpk {
    z: Vec<Root>,
    p: Vec<Root>,
    k: f64,
}

/// Butterworth filter of the given order.
pub fn butter(order: usize, band: Passband, fs: f64) -> Result<Sos> {
    check_order("butter", order)?;
    let proto = butter_prototype(order);
    design(proto, band, fs, "butter")
}

/// Chebyshev type II filter with `rs` dB of stopband attenuation.
pub fn cheby2(order: usize, rs: f64, band: Passband, fs: f64) -> Result<Sos> {
    check_order("cheby2", order)?;
    if rs <= 0.0 {
        return Err(DetectError::invalid("cheby2", "stopband attenuation must be positive"));
    }
    let proto = cheby2_prototype(order, rs);
    design(proto, band, fs, "cheby2")
}

impl Sos {
    pub fn sections(&self) -> &[BiquadCoeffs] {
        &self.sections
    }

    /// Single forward pass from rest.
    pub fn filter(&self, x: &[f64]) -> Vec<f64> {
        let states = vec![[0.0; 2]; self.sections.len()];
        self.run(x, states)
    }

    /// Zero-phase forward-backward filtering.
    pub fn filtfilt(&self, x: &[f64]) -> Vec<f64> {
        if x.is_empty() {
            return Vec::new();
        }
        let padlen = (3 * (2 * self.sections.len() + 1)).min(x.len() - 1);
        let ext = odd_extension(x, padlen);
        let zi = self.steady_states();

        let x0 = ext[0];
        let forward = self.run(&ext, scaled(&zi, x0));
        let mut reversed: Vec<f64> = forward.into_iter().rev().collect();
        let y0 = reversed[0];
        reversed = self.run(&reversed, scaled(&zi, y0));
        reversed.reverse();
        reversed[padlen..padlen + x.len()].to_vec()
    }

    /// Magnitude response at `freq` Hz.
    pub fn gain_at(&self, freq: f64, fs: f64) -> f64 {
        let w = 2.0 * PI * freq / fs;
        let z1 = Root::from_polar(1.0, -w);
        let z2 = z1 * z1;
        self.sections
            .iter()
            .map(|s| {
                let num = s.b[0] + z1 * s.b[1] + z2 * s.b[2];
                let den = s.a[0] + z1 * s.a[1] + z2 * s.a[2];
                (num / den).norm()
            })
            .product()
    }

    fn steady_states(&self) -> Vec<[f64; 2]> {
        let mut scale = 1.0;
        self.sections
            .iter()
            .map(|s| {
                let [z0, z1] = s.step_state();
                let out = [z0 * scale, z1 * scale];
                scale *= s.dc_gain();
                out
            })
            .collect()
    }

    fn run(&self, x: &[f64], mut states: Vec<[f64; 2]>) -> Vec<f64> {
        let mut out = x.to_vec();
        for (s, z) in self.sections.iter().zip(states.iter_mut()) {
            for v in out.iter_mut() {
                let input = *v;
                let y = s.b[0] * input + z[0];
                z[0] = s.b[1] * input - s.a[1] * y + z[1];
                z[1] = s.b[2] * input - s.a[2] * y;
                *v = y;
            }
        }
        out
    }
}

fn scaled(states: &[[f64; 2]], by: f64) -> Vec<[f64; 2]> {
    states.iter().map(|z| [z[0] * by, z[1] * by]).collect()
}

/// Odd extension of `x` by `padlen` samples on both sides.
pub(crate) fn odd_extension(x: &[f64], padlen: usize) -> Vec<f64> {
    let n = x.len();
    let mut out = Vec::with_capacity(n + 2 * padlen);
    let first = x[0];
    let last = x[n - 1];
    for i in (1..=padlen).rev() {
        out.push(2.0 * first - x[i]);
    }
    out.extend_from_slice(x);
    for i in 1..=padlen {
        out.push(2.0 * last - x[n - 1 - i]);
    }
    out
}

fn check_order(stage: &'static str, order: usize) -> Result<()> {
    if order == 0 {
        return Err(DetectError::invalid(stage, "filter order must be at least 1"));
    }
    Ok(())
}

fn butter_prototype(order: usize) -> Zpk {
    let n = order as f64;
    let p = (0..order)
        .map(|i| {
            let m = -(n - 1.0) + 2.0 * i as f64;
            -Root::from_polar(1.0, PI * m / (2.0 * n))
        })
        .collect();
    Zpk {
        z: Vec::new(),
        p,
        k: 1.0,
    }
}

fn cheby2_prototype(order: usize, rs: f64) -> Zpk {
    let n = order as f64;
    let de = 1.0 / (10f64.powf(0.1 * rs) - 1.0).sqrt();
    let mu = (1.0 / de).asinh() / n;

    // zeros on the imaginary axis; the middle one is at infinity for odd orders
    let z: Vec<Root> = (0..order)
        .map(|i| -(n - 1.0) + 2.0 * i as f64)
        .filter(|m| *m != 0.0)
        .map(|m| Root::new(0.0, 1.0 / (m * PI / (2.0 * n)).sin()))
        .collect();

    let p: Vec<Root> = (0..order)
        .map(|i| {
            let m = -(n - 1.0) + 2.0 * i as f64;
            let q = -Root::from_polar(1.0, PI * m / (2.0 * n));
            let q = Root::new(mu.sinh() * q.re, mu.cosh() * q.im);
            Root::new(1.0, 0.0) / q
        })
        .collect();

    let num: Root = p.iter().map(|r| -*r).product();
    let den: Root = z.iter().map(|r| -*r).product();
    Zpk {
        z,
        p,
        k: (num / den).re,
    }
}

fn design(proto: Zpk, band: Passband, fs: f64, stage: &'static str) -> Result<Sos> {
    let nyquist = fs / 2.0;
    let norm = |f: f64| -> Result<f64> {
        if f <= 0.0 || f >= nyquist {
            return Err(DetectError::invalid(
                stage,
                format!("corner frequency {f} Hz must lie inside (0, {nyquist}) Hz"),
            ));
        }
        Ok(f / nyquist)
    };
    // pre-warp with the normalised sampling rate used by the bilinear step
    let warp = |wn: f64| 4.0 * (PI * wn / 2.0).tan();

    let analog = match band {
        Passband::Lowpass(f) => lp2lp(proto, warp(norm(f)?)),
        Passband::Highpass(f) => lp2hp(proto, warp(norm(f)?)),
        Passband::Bandpass(lo, hi) => {
            if lo >= hi {
                return Err(DetectError::invalid(
                    stage,
                    format!("band ({lo}, {hi}) Hz is empty"),
                ));
            }
            let (wl, wh) = (warp(norm(lo)?), warp(norm(hi)?));
            lp2bp(proto, (wl * wh).sqrt(), wh - wl)
        }
    };
    Ok(zpk_to_sos(bilinear(analog, 2.0)))
}

fn lp2lp(zpk: Zpk, wo: f64) -> Zpk {
    let degree = zpk.p.len() - zpk.z.len();
    Zpk {
        z: zpk.z.iter().map(|z| *z * wo).collect(),
        p: zpk.p.iter().map(|p| *p * wo).collect(),
        k: zpk.k * wo.powi(degree as i32),
    }
}

fn lp2hp(zpk: Zpk, wo: f64) -> Zpk {
    let degree = zpk.p.len() - zpk.z.len();
    let num: Root = zpk.z.iter().map(|r| -*r).product();
    let den: Root = zpk.p.iter().map(|r| -*r).product();
    let mut z: Vec<Root> = zpk.z.iter().map(|z| wo / *z).collect();
    z.extend(std::iter::repeat(Root::new(0.0, 0.0)).take(degree));
    Zpk {
        z,
        p: zpk.p.iter().map(|p| wo / *p).collect(),
        k: zpk.k * (num / den).re,
    }
}

fn lp2bp(zpk: Zpk, wo: f64, bw: f64) -> Zpk {
    let degree = zpk.p.len() - zpk.z.len();
    let split = |roots: &[Root]| -> Vec<Root> {
        let scaled: Vec<Root> = roots.iter().map(|r| *r * (bw / 2.0)).collect();
        let mut out: Vec<Root> = scaled
            .iter()
            .map(|&r| r + (r * r - wo * wo).sqrt())
            .collect();
        out.extend(scaled.iter().map(|&r| r - (r * r - wo * wo).sqrt()));
        out
    };
    let mut z = split(&zpk.z);
    z.extend(std::iter::repeat(Root::new(0.0, 0.0)).take(degree));
    Zpk {
        z,
        p: split(&zpk.p),
        k: zpk.k * bw.powi(degree as i32),
    }
}

fn bilinear(zpk: Zpk, fs: f64) -> Zpk {
    let degree = zpk.p.len() - zpk.z.len();
    let fs2 = 2.0 * fs;
    let num: Root = zpk.z.iter().map(|z| fs2 - *z).product();
    let den: Root = zpk.p.iter().map(|p| fs2 - *p).product();
    let mut z: Vec<Root> = zpk.z.iter().map(|&z| (fs2 + z) / (fs2 - z)).collect();
    z.extend(std::iter::repeat(Root::new(-1.0, 0.0)).take(degree));
    Zpk {
        z,
        p: zpk.p.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect(),
        k: zpk.k * (num / den).re,
    }
}

fn zpk_to_sos(zpk: Zpk) -> Sos {
    let num = real_quadratics(&zpk.z);
    let den = real_quadratics(&zpk.p);
    let n = num.len().max(den.len()).max(1);
    let unit = [1.0, 0.0, 0.0];
    let mut sections: Vec<BiquadCoeffs> = (0..n)
        .map(|i| BiquadCoeffs {
            b: num.get(i).copied().unwrap_or(unit),
            a: den.get(i).copied().unwrap_or(unit),
        })
        .collect();
    for b in sections[0].b.iter_mut() {
        *b *= zpk.k;
    }
    Sos { sections }
}

/// Group roots into real polynomials in z^-1: conjugate pairs become one
/// quadratic each, real roots are paired in sorted order.
fn real_quadratics(roots: &[Root]) -> Vec<[f64; 3]> {
    let mut quads = Vec::new();
    let mut reals = Vec::new();
    for r in roots {
        if r.im.abs() <= 1e-10 * (1.0 + r.norm()) {
            reals.push(r.re);
        } else if r.im > 0.0 {
            quads.push([1.0, -2.0 * r.re, r.norm_sqr()]);
        }
    }
    reals.sort_by(|a, b| a.total_cmp(b));
    for pair in reals.chunks(2) {
        match pair {
            [a, b] => quads.push([1.0, -(a + b), a * b]),
            [a] => quads.push([1.0, -a, 0.0]),
            _ => {}
        }
    }
    quads
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}"
        );
    }

    fn sine(freq: f64, fs: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn second_order_lowpass_matches_reference_coefficients() {
        // butter(2, 0.1) reference values
        let sos = butter(2, Passband::Lowpass(12.5), 250.0).unwrap();
        let s = &sos.sections()[0];
        assert_close(s.b[0], 0.020083365564211, 1e-9);
        assert_close(s.b[1], 0.040166731128423, 1e-9);
        assert_close(s.b[2], 0.020083365564211, 1e-9);
        assert_close(s.a[1], -1.561018075800718, 1e-9);
        assert_close(s.a[2], 0.641351538057563, 1e-9);
    }

    #[test]
    fn bandpass_passes_centre_and_blocks_edges() {
        let fs = 256.0;
        let sos = butter(4, Passband::Bandpass(11.0, 16.0), fs).unwrap();
        assert_eq!(sos.sections().len(), 4);
        assert_close(sos.gain_at(13.3, fs), 1.0, 0.05);
        assert!(sos.gain_at(2.0, fs) < 1e-3);
        assert!(sos.gain_at(40.0, fs) < 1e-3);
    }

    #[test]
    fn cheby2_bandpass_rejects_stopband_by_40_db() {
        let fs = 200.0;
        let sos = cheby2(4, 40.0, Passband::Bandpass(10.0, 16.0), fs).unwrap();
        assert_close(sos.gain_at(13.0, fs), 1.0, 0.1);
        assert!(sos.gain_at(3.0, fs) <= 0.0101);
        assert!(sos.gain_at(30.0, fs) <= 0.0101);
    }

    #[test]
    fn filtfilt_preserves_phase_and_amplitude_in_band() {
        let fs = 200.0;
        let x = sine(13.0, fs, 2000);
        let sos = butter(3, Passband::Bandpass(10.0, 16.0), fs).unwrap();
        let y = sos.filtfilt(&x);
        assert_eq!(y.len(), x.len());
        for i in 500..1500 {
            assert_close(y[i], x[i], 0.05);
        }
    }

    #[test]
    fn highpass_removes_offset() {
        let fs = 100.0;
        let x: Vec<f64> = sine(5.0, fs, 1000).iter().map(|v| v + 10.0).collect();
        let sos = butter(2, Passband::Highpass(1.0), fs).unwrap();
        let y = sos.filtfilt(&x);
        let mean = y[200..800].iter().sum::<f64>() / 600.0;
        assert!(mean.abs() < 0.05, "mean {mean}");
    }

    #[test]
    fn rejects_corner_above_nyquist() {
        let err = butter(2, Passband::Lowpass(60.0), 100.0).unwrap_err();
        assert!(matches!(err, DetectError::InvalidParameter { stage: "butter", .. }));
    }
}
