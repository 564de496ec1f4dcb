use crate::error::{DetectError, Result};
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Working samples flowing through a transform chain.
///
/// Filters and smoothers are linear, so they accept either variant and act on
/// the real and imaginary parts independently.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Real(Vec<f64>),
    Complex(Vec<Complex<f64>>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::Real(v) => v.len(),
            Samples::Complex(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, Samples::Complex(_))
    }

    /// Unwrap real samples; `stage` names the consumer for the error message.
    pub fn into_real(self, stage: &'static str) -> Result<Vec<f64>> {
        match self {
            Samples::Real(v) => Ok(v),
            Samples::Complex(_) => Err(DetectError::ComplexSignal(stage)),
        }
    }

    pub fn into_complex(self) -> Vec<Complex<f64>> {
        match self {
            Samples::Real(v) => v.into_iter().map(|x| Complex::new(x, 0.0)).collect(),
            Samples::Complex(v) => v,
        }
    }

    /// Apply a real-to-real operation to each component.
    pub(crate) fn map_parts<F>(self, mut op: F) -> Result<Samples>
    where
        F: FnMut(&[f64]) -> Result<Vec<f64>>,
    {
        match self {
            Samples::Real(v) => Ok(Samples::Real(op(&v)?)),
            Samples::Complex(v) => {
                let re: Vec<f64> = v.iter().map(|c| c.re).collect();
                let im: Vec<f64> = v.iter().map(|c| c.im).collect();
                let re = op(&re)?;
                let im = op(&im)?;
                Ok(Samples::Complex(
                    re.into_iter()
                        .zip(im)
                        .map(|(re, im)| Complex::new(re, im))
                        .collect(),
                ))
            }
        }
    }
}

impl From<Vec<f64>> for Samples {
    fn from(v: Vec<f64>) -> Self {
        Samples::Real(v)
    }
}

/// Read-only view of a multi-channel recording, as handed over by a dataset
/// reader. Only the first trial is consumed; multi-block acquisitions are
/// concatenated by the reader, so `time` may jump between blocks.
pub trait SignalSource {
    fn sampling_rate(&self) -> f64;
    fn time(&self) -> &[f64];
    fn channel_labels(&self) -> &[String];
    fn channel(&self, label: &str) -> Option<&[f64]>;
}

/// In-memory multi-channel recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    fs: f64,
    time: Vec<f64>,
    labels: Vec<String>,
    data: Vec<Vec<f64>>,
}

impl Recording {
    /// Build a recording whose time vector starts at 0 s and is gap-free.
    pub fn new(fs: f64, channels: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let n = channels.first().map(|(_, d)| d.len()).unwrap_or(0);
        let time = (0..n).map(|i| i as f64 / fs).collect();
        Self::with_time(fs, time, channels)
    }

    /// Build a recording with an explicit time vector.
    pub fn with_time(fs: f64, time: Vec<f64>, channels: Vec<(String, Vec<f64>)>) -> Result<Self> {
        if fs.is_nan() || fs <= 0.0 {
            return Err(DetectError::invalid(
                "recording",
                format!("sampling rate must be positive, got {fs}"),
            ));
        }
        let mut labels = Vec::with_capacity(channels.len());
        let mut data = Vec::with_capacity(channels.len());
        for (label, samples) in channels {
            if samples.len() != time.len() {
                return Err(DetectError::LengthMismatch {
                    what: "channel",
                    expected: time.len(),
                    actual: samples.len(),
                });
            }
            labels.push(label);
            data.push(samples);
        }
        Ok(Self {
            fs,
            time,
            labels,
            data,
        })
    }

    /// Concatenate acquisition blocks that share sampling rate and channels.
    /// Time vectors are appended as-is, so gaps between blocks survive.
    pub fn stitch(blocks: &[Recording]) -> Result<Self> {
        let first = blocks.first().ok_or(DetectError::EmptyInput("stitch"))?;
        let mut time = Vec::new();
        let mut data = vec![Vec::new(); first.labels.len()];
        for block in blocks {
            if block.fs != first.fs {
                return Err(DetectError::invalid(
                    "stitch",
                    format!("sampling rate {} differs from {}", block.fs, first.fs),
                ));
            }
            if block.labels != first.labels {
                return Err(DetectError::invalid("stitch", "channel labels differ"));
            }
            time.extend_from_slice(&block.time);
            for (acc, chan) in data.iter_mut().zip(&block.data) {
                acc.extend_from_slice(chan);
            }
        }
        Ok(Self {
            fs: first.fs,
            time,
            labels: first.labels.clone(),
            data,
        })
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }
}

impl SignalSource for Recording {
    fn sampling_rate(&self) -> f64 {
        self.fs
    }

    fn time(&self) -> &[f64] {
        &self.time
    }

    fn channel_labels(&self) -> &[String] {
        &self.labels
    }

    fn channel(&self, label: &str) -> Option<&[f64]> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|idx| self.data[idx].as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_builds_uniform_time() {
        let rec = Recording::new(4.0, vec![("Cz".into(), vec![0.0; 8])]).unwrap();
        assert_eq!(rec.time().len(), 8);
        assert_eq!(rec.time()[4], 1.0);
        assert!(rec.channel("Cz").is_some());
        assert!(rec.channel("Pz").is_none());
    }

    #[test]
    fn recording_rejects_ragged_channels() {
        let err = Recording::new(
            100.0,
            vec![("a".into(), vec![0.0; 10]), ("b".into(), vec![0.0; 9])],
        )
        .unwrap_err();
        assert!(matches!(err, DetectError::LengthMismatch { .. }));
    }

    #[test]
    fn stitch_keeps_gaps_in_time() {
        let a = Recording::with_time(2.0, vec![0.0, 0.5], vec![("Cz".into(), vec![1.0, 2.0])])
            .unwrap();
        let b = Recording::with_time(
            2.0,
            vec![100.0, 100.5],
            vec![("Cz".into(), vec![3.0, 4.0])],
        )
        .unwrap();
        let rec = Recording::stitch(&[a, b]).unwrap();
        assert_eq!(rec.time(), &[0.0, 0.5, 100.0, 100.5]);
        assert_eq!(rec.channel("Cz").unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn complex_samples_refuse_real_unwrap() {
        let s = Samples::Complex(vec![Complex::new(1.0, 1.0)]);
        assert!(matches!(
            s.into_real("threshold"),
            Err(DetectError::ComplexSignal("threshold"))
        ));
    }
}
