//! FFT-backed convolution and analytic signal.

use rustfft::{num_complex::Complex, FftPlanner};

/// Smallest 5-smooth length (2^a 3^b 5^c) that is at least `n`.
pub fn next_fast_len(n: usize) -> usize {
    if n <= 6 {
        return n.max(1);
    }
    let mut best = n.next_power_of_two();
    let mut p5 = 1usize;
    while p5 < best {
        let mut p35 = p5;
        while p35 < best {
            // smallest power of two lifting p35 to at least n
            let mut candidate = p35;
            while candidate < n {
                candidate *= 2;
            }
            best = best.min(candidate);
            p35 *= 3;
        }
        p5 *= 5;
    }
    best
}

/// Complex convolution, output trimmed to the length of `x` and centred the
/// way a "same" convolution is.
pub fn convolve_same_complex(x: &[Complex<f64>], kernel: &[Complex<f64>]) -> Vec<Complex<f64>> {
    let n = x.len();
    let m = kernel.len();
    if n == 0 || m == 0 {
        return vec![Complex::new(0.0, 0.0); n];
    }
    let full = n + m - 1;
    let size = next_fast_len(full);

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(size);
    let inverse = planner.plan_fft_inverse(size);

    let mut a = vec![Complex::new(0.0, 0.0); size];
    a[..n].copy_from_slice(x);
    let mut b = vec![Complex::new(0.0, 0.0); size];
    b[..m].copy_from_slice(kernel);
    forward.process(&mut a);
    forward.process(&mut b);
    for (u, v) in a.iter_mut().zip(&b) {
        *u *= *v;
    }
    inverse.process(&mut a);

    let scale = 1.0 / size as f64;
    let offset = (m - 1) / 2;
    a[offset..offset + n].iter().map(|c| *c * scale).collect()
}

/// Real convolution with "same" output length.
pub fn convolve_same(x: &[f64], kernel: &[f64]) -> Vec<f64> {
    let xc: Vec<Complex<f64>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
    let kc: Vec<Complex<f64>> = kernel.iter().map(|&v| Complex::new(v, 0.0)).collect();
    convolve_same_complex(&xc, &kc)
        .into_iter()
        .map(|c| c.re)
        .collect()
}

/// Analytic signal of a real series. The series is zero-padded to an
/// efficient FFT length and the result truncated back to the input length.
pub fn analytic_signal(x: &[f64]) -> Vec<Complex<f64>> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let size = next_fast_len(n);
    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(size);
    let inverse = planner.plan_fft_inverse(size);

    let mut buf = vec![Complex::new(0.0, 0.0); size];
    for (dst, &v) in buf.iter_mut().zip(x) {
        dst.re = v;
    }
    forward.process(&mut buf);

    let half = size / 2;
    for (k, c) in buf.iter_mut().enumerate() {
        let h = if k == 0 || (size % 2 == 0 && k == half) {
            1.0
        } else if k < (size + 1) / 2 {
            2.0
        } else {
            0.0
        };
        *c *= h;
    }
    inverse.process(&mut buf);

    let scale = 1.0 / size as f64;
    buf.truncate(n);
    buf.into_iter().map(|c| c * scale).collect()
}
