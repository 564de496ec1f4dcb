//! Named detection recipes.
//!
//! A recipe is an immutable bundle of transform chains, threshold rules and
//! refinement limits reproducing one published detection method. Recipes are
//! looked up by name; construction folds user overrides in once and nothing
//! changes afterwards.

use crate::error::{DetectError, Result};
use crate::intervals::{DurationBounds, TieBreak};
use crate::metrics::spectral::PeakWindow;
use crate::threshold::ThresholdMethod;
use crate::transform::Transform;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Spindle,
    SlowWave,
    Arousal,
}

/// A threshold method with its multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub method: ThresholdMethod,
    pub value: f64,
}

impl ThresholdRule {
    pub const fn new(method: ThresholdMethod, value: f64) -> Self {
        Self { method, value }
    }
}

/// How candidate intervals are found on the detection signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectRule {
    Above(ThresholdRule),
    Between(ThresholdRule, ThresholdRule),
    /// Local maxima above the threshold.
    Maxima(ThresholdRule),
}

/// Envelope-threshold pipeline used by spindle methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePlan {
    pub det: Vec<Transform>,
    /// Separate chain for the selection signal; `None` reuses the detection
    /// signal.
    pub sel: Option<Vec<Transform>>,
    pub det_rule: DetectRule,
    /// Looser threshold used to widen detected intervals.
    pub sel_rule: Option<ThresholdRule>,
    /// Minimum in-band amplitude ratio.
    pub power_ratio: Option<f64>,
    pub peak_window: PeakWindow,
}

/// Negative half-wave detection followed by the positive half-wave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowWavePlan {
    pub det: Vec<Transform>,
    /// Allowed duration of the negative half-wave, seconds.
    pub trough_duration: DurationBounds,
    /// The trough must fall below this value (negative).
    pub max_trough_amp: f64,
    /// Minimum trough-to-peak amplitude.
    pub min_ptp: f64,
}

/// One edge of a spectrogram band; `None` means the end of the spectrum.
pub type BandEdges = (f64, Option<f64>);

/// Spectral-edge state machine for arousals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArousalPlan {
    /// Band whose balance point must jump to open an event.
    pub band1: BandEdges,
    /// Band whose balance point must settle back to close it.
    pub band2: BandEdges,
    /// Spectrogram window, seconds.
    pub window: f64,
    /// Fraction of overlap between consecutive windows.
    pub overlap: f64,
    /// Taper fraction of the Tukey window.
    pub taper: f64,
    pub start_thresh: f64,
    pub end_thresh: f64,
    /// Minimum time between consecutive event starts, seconds.
    pub refractory: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pipeline", rename_all = "snake_case")]
pub enum Stages {
    Envelope(EnvelopePlan),
    SlowWave(SlowWavePlan),
    Arousal(ArousalPlan),
}

/// A fully parameterised detection method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub family: Family,
    /// Frequency band of interest, Hz.
    pub band: (f64, f64),
    pub duration: DurationBounds,
    /// Candidates closer than this many seconds are merged.
    pub min_interval: Option<f64>,
    pub tie_break: TieBreak,
    pub merge_across_channels: bool,
    pub stages: Stages,
}

/// Values a caller may replace when building a recipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeOverrides {
    pub band: Option<(f64, f64)>,
    pub duration: Option<DurationBounds>,
    pub merge_across_channels: Option<bool>,
}

type Builder = fn(&RecipeOverrides) -> Recipe;

const REGISTRY: &[(&str, Builder)] = &[
    ("Moelle2011", moelle2011),
    ("Nir2011", nir2011),
    ("Ferrarelli2007", ferrarelli2007),
    ("Wamsley2012", wamsley2012),
    ("Ray2015", ray2015),
    ("FASST", fasst),
    ("FASST2", fasst2),
    ("UCSD", ucsd),
    ("Concordia", concordia),
    ("Massimini2004", massimini2004),
    ("AASM/Massimini2004", aasm_massimini2004),
    ("HouseDetector", house_detector),
];

/// Names of every registered method.
pub fn method_names() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(name, _)| *name)
}

impl Recipe {
    /// Look up a method with its published defaults.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::with_overrides(name, &RecipeOverrides::default())
    }

    pub fn with_overrides(name: &str, overrides: &RecipeOverrides) -> Result<Self> {
        let (_, build) = REGISTRY
            .iter()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| DetectError::UnknownMethod(name.to_string()))?;
        let recipe = build(overrides);
        recipe.validate()?;
        Ok(recipe)
    }

    fn validate(&self) -> Result<()> {
        let (lo, hi) = self.band;
        if !(lo > 0.0 && hi > lo) {
            return Err(DetectError::invalid(
                "recipe",
                format!("frequency band {lo}-{hi} Hz is not increasing and positive"),
            ));
        }
        if let (Some(min), Some(max)) = (self.duration.min, self.duration.max) {
            if min > max {
                return Err(DetectError::invalid(
                    "recipe",
                    format!("minimum duration {min} s exceeds maximum {max} s"),
                ));
            }
        }
        Ok(())
    }
}

fn bound(v: Option<f64>) -> String {
    v.map_or_else(|| "inf".to_string(), |v| format!("{v:04.1}"))
}

impl fmt::Display for Recipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            Family::Spindle => write!(
                f,
                "detsp_{}_{:02}-{:02}Hz_{}-{}s",
                self.name,
                self.band.0,
                self.band.1,
                bound(self.duration.min),
                bound(self.duration.max)
            ),
            Family::SlowWave => write!(
                f,
                "detsw_{}_{:04.2}-{:04.2}Hz",
                self.name, self.band.0, self.band.1
            ),
            Family::Arousal => write!(
                f,
                "detar_{}_{}-{}s",
                self.name,
                bound(self.duration.min),
                bound(self.duration.max)
            ),
        }
    }
}

fn spindle(
    name: &str,
    o: &RecipeOverrides,
    band: (f64, f64),
    duration: (Option<f64>, Option<f64>),
    min_interval: Option<f64>,
    plan: impl FnOnce((f64, f64)) -> EnvelopePlan,
) -> Recipe {
    let band = o.band.unwrap_or(band);
    Recipe {
        name: name.to_string(),
        family: Family::Spindle,
        band,
        duration: o.duration.unwrap_or(DurationBounds {
            min: duration.0,
            max: duration.1,
        }),
        min_interval,
        tie_break: TieBreak::Earlier,
        merge_across_channels: o.merge_across_channels.unwrap_or(false),
        stages: Stages::Envelope(plan(band)),
    }
}

fn above(method: ThresholdMethod, value: f64) -> DetectRule {
    DetectRule::Above(ThresholdRule::new(method, value))
}

fn moelle2011(o: &RecipeOverrides) -> Recipe {
    spindle("Moelle2011", o, (12.0, 15.0), (Some(0.5), Some(3.0)), None, |(low, high)| EnvelopePlan {
        det: vec![
            Transform::Remez {
                low,
                high,
                rolloff: 1.7,
                dur: 2.36,
            },
            Transform::MovingRms { dur: 0.2 },
            Transform::MovingAvg { dur: 0.2 },
        ],
        sel: None,
        det_rule: above(ThresholdMethod::MeanPlusStd, 1.5),
        sel_rule: None,
        power_ratio: None,
        peak_window: PeakWindow::Interval,
    })
}

fn nir2011(o: &RecipeOverrides) -> Recipe {
    spindle("Nir2011", o, (9.2, 16.8), (Some(0.5), Some(2.0)), Some(1.0), |(low, high)| EnvelopePlan {
        det: vec![
            Transform::Butter { order: 2, low, high },
            Transform::Hilbert,
            Transform::Abs,
            Transform::Gaussian { sigma: 0.04 },
        ],
        sel: None,
        det_rule: above(ThresholdMethod::MeanPlusStd, 3.0),
        sel_rule: Some(ThresholdRule::new(ThresholdMethod::MeanPlusStd, 1.0)),
        power_ratio: None,
        peak_window: PeakWindow::Interval,
    })
}

fn ferrarelli2007(o: &RecipeOverrides) -> Recipe {
    spindle("Ferrarelli2007", o, (11.0, 15.0), (Some(0.3), Some(3.0)), None, |(low, high)| EnvelopePlan {
        det: vec![
            Transform::Remez {
                low,
                high,
                rolloff: 0.9,
                dur: 2.56,
            },
            Transform::Hilbert,
            Transform::Abs,
        ],
        sel: None,
        det_rule: above(ThresholdMethod::Mean, 8.0),
        sel_rule: Some(ThresholdRule::new(ThresholdMethod::Mean, 2.0)),
        power_ratio: None,
        peak_window: PeakWindow::Interval,
    })
}

fn wamsley2012(o: &RecipeOverrides) -> Recipe {
    spindle("Wamsley2012", o, (12.0, 15.0), (Some(0.3), Some(3.0)), None, |(low, high)| EnvelopePlan {
        det: vec![
            Transform::Morlet {
                f0: (low + high) / 2.0,
                sd: 0.8,
                dur: 1.0,
            },
            Transform::Abs2,
            Transform::MovingAvg { dur: 0.1 },
        ],
        sel: None,
        det_rule: above(ThresholdMethod::Mean, 4.5),
        sel_rule: None,
        power_ratio: None,
        peak_window: PeakWindow::Interval,
    })
}

fn ray2015(o: &RecipeOverrides) -> Recipe {
    spindle("Ray2015", o, (11.0, 16.0), (Some(0.49), None), Some(0.25), |(low, high)| {
        let carrier = (low + high) / 2.0;
        EnvelopePlan {
            det: vec![
                Transform::Butter {
                    order: 4,
                    low: 0.3,
                    high: 35.0,
                },
                Transform::Cdemod { carrier },
                Transform::LowButter {
                    order: 4,
                    cutoff: 5.0,
                },
                Transform::TriSmooth { dur: 2.0 / carrier },
                Transform::Abs2,
                Transform::Zscore { dur: 60.0 },
            ],
            sel: None,
            det_rule: above(ThresholdMethod::Absolute, 2.33),
            sel_rule: Some(ThresholdRule::new(ThresholdMethod::Absolute, 0.1)),
            power_ratio: None,
            peak_window: PeakWindow::Interval,
        }
    })
}

fn fasst(o: &RecipeOverrides) -> Recipe {
    spindle("FASST", o, (11.0, 18.0), (Some(0.4), Some(1.3)), Some(1.0), |(low, high)| EnvelopePlan {
        det: vec![
            Transform::Butter { order: 4, low, high },
            Transform::Abs,
            Transform::MovingAvg { dur: 0.1 },
        ],
        sel: None,
        det_rule: above(ThresholdMethod::Percentile, 90.0),
        sel_rule: None,
        power_ratio: None,
        peak_window: PeakWindow::Interval,
    })
}

fn fasst2(o: &RecipeOverrides) -> Recipe {
    spindle("FASST2", o, (11.0, 18.0), (Some(0.4), Some(1.3)), Some(1.0), |(low, high)| EnvelopePlan {
        det: vec![
            Transform::Butter { order: 4, low, high },
            Transform::MovingRms { dur: 0.1 },
            Transform::MovingAvg { dur: 0.1 },
        ],
        sel: None,
        det_rule: above(ThresholdMethod::Percentile, 90.0),
        sel_rule: None,
        power_ratio: None,
        peak_window: PeakWindow::Interval,
    })
}

fn ucsd(o: &RecipeOverrides) -> Recipe {
    spindle("UCSD", o, (10.0, 16.0), (Some(0.3), Some(3.0)), None, |(low, high)| {
        let steps = ((high - low) / 0.5).round() as usize;
        let freqs: Vec<f64> = (0..=steps).map(|i| low + 0.5 * i as f64).collect();
        EnvelopePlan {
            det: vec![Transform::WaveletReal {
                freqs: freqs.clone(),
                dur: 1.0,
                width: 0.5,
                win: 0.5,
            }],
            sel: Some(vec![Transform::WaveletReal {
                freqs,
                dur: 1.0,
                width: 0.2,
                win: 0.2,
            }]),
            det_rule: DetectRule::Maxima(ThresholdRule::new(ThresholdMethod::MedianPlusStd, 2.0)),
            sel_rule: Some(ThresholdRule::new(ThresholdMethod::MedianPlusStd, 1.0)),
            power_ratio: Some(0.5),
            peak_window: PeakWindow::Interval,
        }
    })
}

fn concordia(o: &RecipeOverrides) -> Recipe {
    spindle("Concordia", o, (10.0, 16.0), (Some(0.5), Some(3.0)), Some(0.2), |(low, high)| EnvelopePlan {
        det: vec![
            Transform::Butter { order: 2, low, high },
            Transform::MovingRms { dur: 0.2 },
            Transform::MovingAvg { dur: 0.2 },
        ],
        sel: None,
        det_rule: DetectRule::Between(
            ThresholdRule::new(ThresholdMethod::MeanPlusStd, 3.0),
            ThresholdRule::new(ThresholdMethod::MeanPlusStd, 10.0),
        ),
        sel_rule: Some(ThresholdRule::new(ThresholdMethod::MeanPlusStd, 1.0)),
        power_ratio: None,
        peak_window: PeakWindow::Interval,
    })
}

fn slow_wave(
    name: &str,
    o: &RecipeOverrides,
    trough_duration: DurationBounds,
    max_trough_amp: f64,
    min_ptp: f64,
) -> Recipe {
    let (low, high) = o.band.unwrap_or((0.1, 4.0));
    Recipe {
        name: name.to_string(),
        family: Family::SlowWave,
        band: (low, high),
        duration: o.duration.unwrap_or_default(),
        min_interval: None,
        tie_break: TieBreak::Earlier,
        merge_across_channels: o.merge_across_channels.unwrap_or(false),
        stages: Stages::SlowWave(SlowWavePlan {
            det: vec![Transform::DoubleButter { order: 2, low, high }],
            trough_duration,
            max_trough_amp,
            min_ptp,
        }),
    }
}

fn massimini2004(o: &RecipeOverrides) -> Recipe {
    slow_wave("Massimini2004", o, DurationBounds::new(0.3, 1.0), -80.0, 140.0)
}

fn aasm_massimini2004(o: &RecipeOverrides) -> Recipe {
    slow_wave("AASM/Massimini2004", o, DurationBounds::new(0.25, 1.0), -40.0, 75.0)
}

fn house_detector(o: &RecipeOverrides) -> Recipe {
    Recipe {
        name: "HouseDetector".to_string(),
        family: Family::Arousal,
        band: o.band.unwrap_or((0.2, 5.0)),
        duration: o.duration.unwrap_or(DurationBounds::new(3.0, 30.0)),
        min_interval: None,
        tie_break: TieBreak::Earlier,
        merge_across_channels: o.merge_across_channels.unwrap_or(false),
        stages: Stages::Arousal(ArousalPlan {
            band1: (5.0, None),
            band2: (0.2, None),
            window: 1.0,
            overlap: 0.5,
            taper: 0.25,
            start_thresh: 1.2,
            end_thresh: 1.1,
            refractory: 10.0,
        }),
    }
}
