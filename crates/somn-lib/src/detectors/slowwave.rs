//! Slow waves: a negative half-wave of bounded length and depth, followed by
//! the positive half-wave up to the next downward zero crossing.

use super::ChannelEvents;
use crate::error::Result;
use crate::event::assemble_slow_waves;
use crate::intervals::{
    extract_intervals, extreme, remove_straddlers, within_duration, Interval, MaskRule,
    STRADDLE_TOLERANCE,
};
use crate::recipe::{Recipe, SlowWavePlan};
use crate::transform::apply_chain;

/// Positive half-waves are searched for at most this long when the recipe
/// has no maximum duration.
const DEFAULT_SEARCH_SECS: f64 = 10.0;

pub fn detect_slow_waves(
    recipe: &Recipe,
    plan: &SlowWavePlan,
    raw: &[f64],
    time: &[f64],
    fs: f64,
    chan: &str,
) -> Result<ChannelEvents> {
    let det = apply_chain(raw, &plan.det, fs)?.into_real("slow wave")?;
    let mut result = ChannelEvents::default();

    let Some(troughs) = extract_intervals(&det, MaskRule::Below(0.0)) else {
        log::debug!("No negative half-waves on chan {chan}");
        return Ok(result);
    };
    let mut troughs = within_duration(troughs, time, plan.trough_duration);
    troughs.retain(|iv| det[iv.peak] < plan.max_trough_amp);

    let search = (recipe.duration.max.unwrap_or(DEFAULT_SEARCH_SECS) * fs) as usize;
    let mut waves: Vec<Interval> = troughs
        .into_iter()
        .filter_map(|iv| positive_half_wave(iv, &det, search))
        .filter(|iv| iv.crest.map_or(false, |c| det[c] - det[iv.peak] >= plan.min_ptp))
        .collect();

    waves = within_duration(waves, time, recipe.duration);
    waves = remove_straddlers(waves, time, fs, STRADDLE_TOLERANCE);
    waves.retain(|iv| iv.end > iv.start + 1);
    result.events = assemble_slow_waves(&waves, &det, time, fs, chan);
    Ok(result)
}

/// Extend a negative half-wave through the following positive one. The wave
/// is dropped when the signal does not turn negative again within `search`
/// samples.
fn positive_half_wave(mut iv: Interval, det: &[f64], search: usize) -> Option<Interval> {
    let zero = iv.end;
    let limit = zero.saturating_add(search).min(det.len());
    let next_neg = (zero..limit).find(|&i| det[i] < 0.0)?;
    if next_neg <= zero {
        return None;
    }
    iv.zero_cross = Some(zero);
    iv.crest = Some(extreme(det, zero, next_neg, false));
    iv.end = next_neg;
    Some(iv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_wave_ends_at_next_negative_sample() {
        let det = [-1.0, -3.0, -1.0, 0.0, 2.0, 5.0, 1.0, -1.0, -2.0];
        let iv = Interval::new(0, 1, 3);
        let wave = positive_half_wave(iv, &det, 100).unwrap();
        assert_eq!(wave.zero_cross, Some(3));
        assert_eq!(wave.crest, Some(5));
        assert_eq!(wave.end, 7);
        // no return below zero inside the window
        assert!(positive_half_wave(iv, &det, 3).is_none());
    }
}
