//! Finished events and the per-detection result set.

use crate::intervals::{deduplicate, Interval, Span};
use serde::{Deserialize, Deserializer, Serialize};

/// A detected or consensus event. Times are seconds from recording start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub chan: String,
    #[serde(default)]
    pub features: Features,
}

/// Method-specific measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Features {
    Spindle(SpindleFeatures),
    SlowWave(SlowWaveFeatures),
    Arousal {
        #[serde(deserialize_with = "null_as_nan")]
        dur: f64,
    },
    /// Merged events (consensus) carry no measurements.
    #[default]
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpindleFeatures {
    #[serde(deserialize_with = "null_as_nan")]
    pub peak_time: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub peak_val_det: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub peak_val_orig: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub dur: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub auc_det: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub auc_orig: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub rms_det: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub rms_orig: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub ptp_det: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub ptp_orig: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub peak_freq: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub power: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowWaveFeatures {
    #[serde(deserialize_with = "null_as_nan")]
    pub trough_time: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub zero_time: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub peak_time: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub trough_val: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub peak_val: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub dur: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub ptp: f64,
    #[serde(deserialize_with = "null_as_nan")]
    pub auc: f64,
}

/// NaN is written as `null` by serde_json; read it back as NaN. Every
/// measurement goes through this so result files round-trip.
fn null_as_nan<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
}

impl Features {
    /// Names accepted by [`Event::feature`] for this kind, in column order.
    pub fn names(&self) -> &'static [&'static str] {
        match self {
            Features::Spindle(_) => &[
                "peak_time",
                "peak_val_det",
                "peak_val_orig",
                "dur",
                "auc_det",
                "auc_orig",
                "rms_det",
                "rms_orig",
                "ptp_det",
                "ptp_orig",
                "peak_freq",
                "power",
            ],
            Features::SlowWave(_) => &[
                "trough_time",
                "zero_time",
                "peak_time",
                "trough_val",
                "peak_val",
                "dur",
                "ptp",
                "auc",
            ],
            Features::Arousal { .. } | Features::None => &["dur"],
        }
    }
}

impl Event {
    /// Bare event with no measurements.
    pub fn new(start: f64, end: f64, chan: impl Into<String>) -> Self {
        Self {
            start,
            end,
            chan: chan.into(),
            features: Features::None,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Look a measurement up by name. `start`, `end` and `dur` work for every
    /// kind of event.
    pub fn feature(&self, name: &str) -> Option<f64> {
        match name {
            "start" => return Some(self.start),
            "end" => return Some(self.end),
            _ => {}
        }
        match &self.features {
            Features::Spindle(s) => match name {
                "peak_time" => Some(s.peak_time),
                "peak_val_det" => Some(s.peak_val_det),
                "peak_val_orig" => Some(s.peak_val_orig),
                "dur" => Some(s.dur),
                "auc_det" => Some(s.auc_det),
                "auc_orig" => Some(s.auc_orig),
                "rms_det" => Some(s.rms_det),
                "rms_orig" => Some(s.rms_orig),
                "ptp_det" => Some(s.ptp_det),
                "ptp_orig" => Some(s.ptp_orig),
                "peak_freq" => Some(s.peak_freq),
                "power" => Some(s.power),
                _ => None,
            },
            Features::SlowWave(s) => match name {
                "trough_time" => Some(s.trough_time),
                "zero_time" => Some(s.zero_time),
                "peak_time" => Some(s.peak_time),
                "trough_val" => Some(s.trough_val),
                "peak_val" => Some(s.peak_val),
                "dur" => Some(s.dur),
                "ptp" => Some(s.ptp),
                "auc" => Some(s.auc),
                _ => None,
            },
            Features::Arousal { dur } => (name == "dur").then_some(*dur),
            Features::None => (name == "dur").then(|| self.duration()),
        }
    }
}

impl Span for Event {
    fn onset(&self) -> f64 {
        self.start
    }
    fn offset(&self) -> f64 {
        self.end
    }
    fn set_onset(&mut self, v: f64) {
        self.start = v;
    }
    fn set_offset(&mut self, v: f64) {
        self.end = v;
    }
}

fn rms(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
}

fn ptp(x: &[f64]) -> f64 {
    let (lo, hi) = x
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    hi - lo
}

/// Build spindle events. Duplicate intervals are collapsed first; `peaks`
/// and `powers` are parallel to `intervals`.
#[allow(clippy::too_many_arguments)]
pub fn assemble_events(
    intervals: &[Interval],
    peaks: &[f64],
    powers: &[f64],
    det: &[f64],
    raw: &[f64],
    time: &[f64],
    fs: f64,
    chan: &str,
) -> Vec<Event> {
    let (kept, intervals) = deduplicate(intervals, det);
    kept.into_iter()
        .zip(intervals)
        .map(|(k, iv)| {
            let span_det = &det[iv.start..iv.end];
            let span_raw = &raw[iv.start..iv.end];
            Event {
                start: time[iv.start],
                end: time[iv.end - 1],
                chan: chan.to_string(),
                features: Features::Spindle(SpindleFeatures {
                    peak_time: time[iv.peak],
                    peak_val_det: det[iv.peak],
                    peak_val_orig: raw[iv.peak],
                    dur: (iv.end - iv.start) as f64 / fs,
                    auc_det: span_det.iter().sum::<f64>() / fs,
                    auc_orig: span_raw.iter().sum::<f64>() / fs,
                    rms_det: rms(span_det),
                    rms_orig: rms(span_raw),
                    ptp_det: ptp(span_det),
                    ptp_orig: ptp(span_raw),
                    peak_freq: peaks.get(k).copied().unwrap_or(f64::NAN),
                    power: powers.get(k).copied().unwrap_or(f64::NAN),
                }),
            }
        })
        .collect()
}

/// Build slow-wave events from intervals whose `zero_cross` and `crest` are
/// filled in.
pub fn assemble_slow_waves(
    intervals: &[Interval],
    det: &[f64],
    time: &[f64],
    fs: f64,
    chan: &str,
) -> Vec<Event> {
    intervals
        .iter()
        .filter_map(|iv| {
            let zero = iv.zero_cross?;
            let crest = iv.crest?;
            Some(Event {
                start: time[iv.start],
                end: time[iv.end - 1],
                chan: chan.to_string(),
                features: Features::SlowWave(SlowWaveFeatures {
                    trough_time: time[iv.peak],
                    zero_time: time[zero],
                    peak_time: time[crest],
                    trough_val: det[iv.peak],
                    peak_val: det[crest],
                    dur: (iv.end - iv.start) as f64 / fs,
                    ptp: det[crest] - det[iv.peak],
                    auc: det[iv.start..iv.end].iter().map(|v| v.abs()).sum::<f64>() / fs,
                }),
            })
        })
        .collect()
}

pub fn assemble_arousals(intervals: &[Interval], time: &[f64], fs: f64, chan: &str) -> Vec<Event> {
    intervals
        .iter()
        .map(|iv| Event {
            start: time[iv.start],
            end: time[iv.end - 1],
            chan: chan.to_string(),
            features: Features::Arousal {
                dur: (iv.end - iv.start) as f64 / fs,
            },
        })
        .collect()
}

/// Everything one detector run produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSet {
    /// Label of the recipe that produced the events.
    pub method: String,
    pub chan_names: Vec<String>,
    /// Detection threshold per channel, when the method has one.
    pub det_values: Vec<Option<f64>>,
    /// Selection threshold per channel, when the method has one.
    pub sel_values: Vec<Option<f64>>,
    /// All events, sorted by start.
    pub events: Vec<Event>,
    /// Seconds of signal analysed on each channel.
    #[serde(default)]
    pub duration: f64,
}

/// Scoring epoch used for event densities, seconds.
pub const EPOCH_SECS: f64 = 30.0;

impl EventSet {
    /// One value per channel: `"count"` gives the number of events,
    /// `"density"` events per 30 s epoch, any other name the mean of that
    /// feature over the channel's events (NaN when the channel has none or
    /// the feature is missing).
    pub fn summary(&self, feature: &str) -> Vec<(String, f64)> {
        let epochs = self.duration / EPOCH_SECS;
        self.chan_names
            .iter()
            .map(|chan| {
                let in_chan = self.events.iter().filter(|e| &e.chan == chan);
                let value = if feature == "count" {
                    in_chan.count() as f64
                } else if feature == "density" {
                    if epochs > 0.0 {
                        in_chan.count() as f64 / epochs
                    } else {
                        f64::NAN
                    }
                } else {
                    let vals: Vec<f64> = in_chan
                        .map(|e| e.feature(feature).unwrap_or(f64::NAN))
                        .collect();
                    if vals.is_empty() {
                        f64::NAN
                    } else {
                        vals.iter().sum::<f64>() / vals.len() as f64
                    }
                };
                (chan.clone(), value)
            })
            .collect()
    }
}
