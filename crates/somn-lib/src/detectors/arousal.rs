//! Spectral-edge arousal detection.
//!
//! Every spectrogram frame is reduced to the frequency that splits the power
//! of a band in two halves. An arousal opens when the split point of the
//! upper band jumps by `start_thresh`, and closes once the split point of
//! the broad band settles back under `end_thresh` times its pre-onset value.

use super::ChannelEvents;
use crate::error::{DetectError, Result};
use crate::event::assemble_arousals;
use crate::intervals::{remove_straddlers, within_duration, Interval, STRADDLE_TOLERANCE};
use crate::metrics::spectral::spectrogram;
use crate::recipe::{ArousalPlan, BandEdges, Recipe};

pub fn detect_arousals(
    recipe: &Recipe,
    plan: &ArousalPlan,
    raw: &[f64],
    time: &[f64],
    fs: f64,
    chan: &str,
) -> Result<ChannelEvents> {
    let nperseg = (plan.window * fs) as usize;
    let noverlap = (plan.overlap * nperseg as f64) as usize;
    let mut result = ChannelEvents::default();
    if raw.len() < nperseg {
        log::debug!("Chan {chan} is shorter than one spectrogram window");
        return Ok(result);
    }
    let spec = spectrogram(raw, fs, nperseg, noverlap, plan.taper)?;
    let upper = band_bins(&spec.freqs, plan.band1)?;
    let broad = band_bins(&spec.freqs, plan.band2)?;
    let eq1: Vec<f64> = spec
        .frames
        .iter()
        .map(|p| split_point(&p[upper.clone()], &spec.freqs[upper.clone()]))
        .collect();
    let eq2: Vec<f64> = spec
        .frames
        .iter()
        .map(|p| split_point(&p[broad.clone()], &spec.freqs[broad.clone()]))
        .collect();

    let step_secs = spec.step as f64 / fs;
    let edges = EdgeRule {
        start_thresh: plan.start_thresh,
        end_thresh: plan.end_thresh,
        lookahead: recipe
            .duration
            .max
            .map(|max| (max / step_secs).ceil() as usize),
        refractory: ((plan.refractory / step_secs).ceil() as usize).max(1),
    };
    let spans = edges.scan(&eq1, &eq2);

    // frame indices refer to window centres; shift them to window starts
    let shift = if plan.overlap > 0.0 {
        (1.0 / (2.0 * plan.overlap)) as usize
    } else {
        0
    };
    let n = raw.len();
    let mut intervals: Vec<Interval> = spans
        .into_iter()
        .filter_map(|(onset, offset)| {
            let start = ((onset + 1).saturating_sub(shift) * spec.step).min(n);
            let end = ((offset + 1).saturating_sub(shift) * spec.step).min(n);
            (end > start).then(|| Interval::new(start, start, end))
        })
        .collect();

    intervals = within_duration(intervals, time, recipe.duration);
    intervals = remove_straddlers(intervals, time, fs, STRADDLE_TOLERANCE);
    intervals.retain(|iv| iv.end > iv.start + 1);
    result.events = assemble_arousals(&intervals, time, fs, chan);
    Ok(result)
}

/// Indices of the spectrogram bins nearest to the band edges; an open upper
/// edge runs to the last bin.
fn band_bins(freqs: &[f64], (low, high): BandEdges) -> Result<std::ops::Range<usize>> {
    let nearest = |f: f64| {
        freqs
            .iter()
            .enumerate()
            .min_by(|a, b| (a.1 - f).abs().total_cmp(&(b.1 - f).abs()))
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let lo = nearest(low);
    let hi = high.map_or(freqs.len(), nearest);
    if hi <= lo {
        return Err(DetectError::invalid(
            "arousal",
            format!("band {low}-{high:?} Hz holds no spectrogram bins"),
        ));
    }
    Ok(lo..hi)
}

/// Frequency at which the power below equals the power above.
fn split_point(power: &[f64], freqs: &[f64]) -> f64 {
    let total: f64 = power.iter().sum();
    let mut below = 0.0;
    let mut best = (f64::INFINITY, f64::NAN);
    for (p, f) in power.iter().zip(freqs) {
        below += p;
        // cumulative sum from the left against the one from the right
        let above = total - below + p;
        let gap = (below - above).abs();
        if gap < best.0 {
            best = (gap, *f);
        }
    }
    best.1
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle(usize),
    /// The upper split point jumped between frame `.0` and the next one.
    Armed(usize),
    /// Open event waiting to be recorded.
    Active { onset: usize, offset: usize },
    /// No new event may open before this frame.
    Cooldown(usize),
}

struct EdgeRule {
    start_thresh: f64,
    end_thresh: f64,
    /// Frames searched for the closing edge; `None` searches to the end.
    lookahead: Option<usize>,
    refractory: usize,
}

impl EdgeRule {
    /// Frame index pairs `(onset, offset)` of every arousal.
    fn scan(&self, eq1: &[f64], eq2: &[f64]) -> Vec<(usize, usize)> {
        let frames = eq1.len().min(eq2.len());
        let mut spans = Vec::new();
        let mut phase = Phase::Idle(0);
        loop {
            phase = match phase {
                Phase::Idle(i) if i + 2 >= frames => break,
                Phase::Idle(i) => {
                    if eq1[i + 1] / eq1[i] >= self.start_thresh {
                        Phase::Armed(i)
                    } else {
                        Phase::Idle(i + 1)
                    }
                }
                Phase::Armed(i) => {
                    let floor = eq2[i] * self.end_thresh;
                    let last = self
                        .lookahead
                        .map_or(frames - 1, |w| (i + 2 + w).min(frames - 1));
                    match (i + 2..last).find(|&k| eq2[k] < floor) {
                        Some(k) => Phase::Active {
                            onset: i,
                            offset: k,
                        },
                        None => Phase::Idle(i + 1),
                    }
                }
                Phase::Active { onset, offset } => {
                    spans.push((onset, offset));
                    Phase::Cooldown(offset.max(onset + self.refractory))
                }
                Phase::Cooldown(next) => Phase::Idle(next),
            };
        }
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::Stages;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    fn rule() -> EdgeRule {
        EdgeRule {
            start_thresh: 1.2,
            end_thresh: 1.1,
            lookahead: None,
            refractory: 4,
        }
    }

    #[test]
    fn split_point_halves_power() {
        let freqs = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(split_point(&[1.0, 1.0, 1.0, 1.0, 1.0], &freqs), 2.0);
        assert_eq!(split_point(&[0.0, 0.0, 0.0, 9.0, 0.0], &freqs), 3.0);
    }

    #[test]
    fn band_edges_snap_to_nearest_bins() {
        let freqs: Vec<f64> = (0..=10).map(|k| k as f64).collect();
        assert_eq!(band_bins(&freqs, (5.0, None)).unwrap(), 5..11);
        assert_eq!(band_bins(&freqs, (0.2, Some(4.4))).unwrap(), 0..4);
        assert!(band_bins(&freqs, (6.0, Some(6.2))).is_err());
    }

    #[test]
    fn state_machine_opens_and_closes() {
        let eq1 = [10.0, 10.0, 20.0, 20.0, 20.0, 10.0, 10.0, 10.0, 10.0];
        let eq2 = [1.0, 1.0, 8.0, 8.0, 8.0, 1.0, 1.0, 1.0, 1.0];
        assert_eq!(rule().scan(&eq1, &eq2), vec![(1, 5)]);
    }

    #[test]
    fn unclosed_onset_is_dropped() {
        let eq1 = [10.0, 10.0, 20.0, 20.0, 20.0, 20.0];
        let eq2 = [1.0, 1.0, 8.0, 8.0, 8.0, 8.0];
        assert!(rule().scan(&eq1, &eq2).is_empty());
    }

    #[test]
    fn refractory_period_skips_nearby_onsets() {
        // second jump at frame 3 falls inside the cooldown of the first
        let eq1 = [10.0, 20.0, 10.0, 10.0, 20.0, 10.0, 10.0, 10.0, 10.0];
        let eq2 = [1.0, 8.0, 1.0, 1.0, 8.0, 1.0, 1.0, 1.0, 1.0];
        assert_eq!(rule().scan(&eq1, &eq2), vec![(0, 2)]);
        let eager = EdgeRule {
            refractory: 1,
            ..rule()
        };
        assert_eq!(eager.scan(&eq1, &eq2), vec![(0, 2), (3, 5)]);
    }

    #[test]
    fn detects_high_frequency_burst() {
        let fs = 128.0;
        let mut rng = StdRng::seed_from_u64(7);
        let raw: Vec<f64> = (0..(60.0 * fs) as usize)
            .map(|i| {
                let t = i as f64 / fs;
                let mut v = 30.0 * (2.0 * PI * 3.0 * t).sin() + 2.0 * (2.0 * PI * 10.0 * t).sin();
                if (20.0..30.0).contains(&t) {
                    v += 40.0 * (2.0 * PI * 50.0 * t).sin();
                }
                v + rng.gen_range(-0.1..0.1)
            })
            .collect();
        let time: Vec<f64> = (0..raw.len()).map(|i| i as f64 / fs).collect();
        let recipe = Recipe::from_name("HouseDetector").unwrap();
        let Stages::Arousal(plan) = &recipe.stages else {
            panic!("arousal recipe expected");
        };
        let found = detect_arousals(&recipe, plan, &raw, &time, fs, "Fz").unwrap();
        assert_eq!(found.events.len(), 1);
        let ev = &found.events[0];
        assert!((18.5..=20.5).contains(&ev.start), "start {}", ev.start);
        assert!((29.0..=31.0).contains(&ev.end), "end {}", ev.end);
        assert_eq!(ev.chan, "Fz");
        assert!(found.det_value.is_none());
    }
}
