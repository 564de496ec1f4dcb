//! Envelope-threshold pipeline shared by the spindle recipes.

use super::ChannelEvents;
use crate::error::Result;
use crate::event::assemble_events;
use crate::intervals::{
    extract_intervals, extreme, merge_close, remove_straddlers, select_events, within_duration,
    Interval, MaskRule, STRADDLE_TOLERANCE,
};
use crate::metrics::spectral::{band_power, power_ratio_filter, spectral_peak};
use crate::recipe::{DetectRule, EnvelopePlan, Recipe, ThresholdRule};
use crate::threshold::derive_threshold;
use crate::transform::apply_chain;
use std::borrow::Cow;

fn derive(signal: &[f64], rule: ThresholdRule) -> Result<f64> {
    derive_threshold(signal, rule.method, rule.value)
}

/// Run the envelope pipeline on one channel.
pub fn detect_envelope(
    recipe: &Recipe,
    plan: &EnvelopePlan,
    raw: &[f64],
    time: &[f64],
    fs: f64,
    chan: &str,
) -> Result<ChannelEvents> {
    let det = apply_chain(raw, &plan.det, fs)?.into_real("detection threshold")?;
    let sel: Cow<[f64]> = match &plan.sel {
        Some(chain) => Cow::Owned(apply_chain(raw, chain, fs)?.into_real("selection threshold")?),
        None => Cow::Borrowed(det.as_slice()),
    };

    let (rule, det_value) = match plan.det_rule {
        DetectRule::Above(t) => {
            let v = derive(&det, t)?;
            (MaskRule::Above(v), v)
        }
        DetectRule::Between(lo, hi) => {
            let lo = derive(&det, lo)?;
            let hi = derive(&det, hi)?;
            (MaskRule::Between(lo, hi), lo)
        }
        DetectRule::Maxima(t) => {
            let v = derive(&det, t)?;
            (MaskRule::Maxima { floor: Some(v) }, v)
        }
    };
    let sel_value = plan.sel_rule.map(|t| derive(&sel, t)).transpose()?;

    let mut result = ChannelEvents {
        events: Vec::new(),
        det_value: Some(det_value),
        sel_value,
    };
    let Some(mut intervals) = extract_intervals(&det, rule) else {
        log::debug!("No events above threshold on chan {chan}");
        return Ok(result);
    };

    if let Some(v) = sel_value {
        select_events(&sel, &mut intervals, MaskRule::Above(v));
    }
    if let Some(gap) = recipe.min_interval {
        intervals = merge_close(intervals, gap * fs, recipe.tie_break);
        repeak(&mut intervals, &det);
    }
    intervals = within_duration(intervals, time, recipe.duration);
    intervals = remove_straddlers(intervals, time, fs, STRADDLE_TOLERANCE);
    if let Some(ratio) = plan.power_ratio {
        intervals = power_ratio_filter(intervals, raw, fs, recipe.band, ratio)?;
    }
    intervals.retain(|iv| iv.end > iv.start + 1);

    let peaks = spectral_peak(&intervals, raw, fs, plan.peak_window)?;
    let powers = band_power(&intervals, raw, fs, recipe.band)?;
    result.events = assemble_events(&intervals, &peaks, &powers, &det, raw, time, fs, chan);
    Ok(result)
}

/// Merged intervals take the detection maximum over their new extent.
fn repeak(intervals: &mut [Interval], det: &[f64]) {
    for iv in intervals.iter_mut() {
        if iv.end > iv.start {
            iv.peak = extreme(det, iv.start, iv.end.min(det.len()), false);
        }
    }
}
