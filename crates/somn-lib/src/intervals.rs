//! Candidate intervals: mask extraction and refinement.

use serde::{Deserialize, Serialize};

/// Sample indices into the untransformed signal. `end` is exclusive.
///
/// Slow-wave detection fills `zero_cross` (the upward zero crossing after the
/// trough) and `crest` (the positive peak that follows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub start: usize,
    pub peak: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zero_cross: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crest: Option<usize>,
}

impl Interval {
    pub fn new(start: usize, peak: usize, end: usize) -> Self {
        Self {
            start,
            peak,
            end,
            zero_cross: None,
            crest: None,
        }
    }
}

/// Boolean condition turning a signal into a mask.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskRule {
    /// `x >= value`, peak at the maximum.
    Above(f64),
    /// `x < value`, peak at the minimum.
    Below(f64),
    /// `lo <= x < hi`, peak at the maximum.
    Between(f64, f64),
    /// Strict local maxima, optionally only those above `floor`.
    Maxima { floor: Option<f64> },
}

impl MaskRule {
    fn holds(&self, v: f64) -> bool {
        match *self {
            MaskRule::Above(t) => v >= t,
            MaskRule::Below(t) => v < t,
            MaskRule::Between(lo, hi) => v >= lo && v < hi,
            MaskRule::Maxima { .. } => false,
        }
    }
}

/// Maximal runs of `true` as half-open `(start, end)` pairs.
pub fn true_runs(mask: &[bool]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut prev = false;
    let mut start = 0;
    // a false sentinel on both sides: rising edge opens, falling edge closes
    for (i, &cur) in mask.iter().chain(std::iter::once(&false)).enumerate() {
        if cur && !prev {
            start = i;
        } else if !cur && prev {
            runs.push((start, i));
        }
        prev = cur;
    }
    runs
}

/// Candidate intervals where `rule` holds.
///
/// `None` means the mask never held; `Some(vec![])` is a present but empty
/// set (maxima that all fall under the floor).
pub fn extract_intervals(signal: &[f64], rule: MaskRule) -> Option<Vec<Interval>> {
    if let MaskRule::Maxima { floor } = rule {
        let peaks: Vec<usize> = (1..signal.len().saturating_sub(1))
            .filter(|&i| signal[i] > signal[i - 1] && signal[i] > signal[i + 1])
            .collect();
        if peaks.is_empty() {
            return None;
        }
        return Some(
            peaks
                .into_iter()
                .filter(|&i| floor.map_or(true, |f| signal[i] > f))
                .map(|i| Interval::new(i, i, i))
                .collect(),
        );
    }

    let mask: Vec<bool> = signal.iter().map(|&v| rule.holds(v)).collect();
    let runs = true_runs(&mask);
    if runs.is_empty() {
        return None;
    }
    let lowest = matches!(rule, MaskRule::Below(_));
    Some(
        runs.into_iter()
            .map(|(start, end)| Interval::new(start, extreme(signal, start, end, lowest), end))
            .collect(),
    )
}

/// Index of the max (or min) of `signal[start..end]`; the first one wins ties.
pub(crate) fn extreme(signal: &[f64], start: usize, end: usize, lowest: bool) -> usize {
    let mut best = start;
    for i in start..end {
        let better = if lowest {
            signal[i] < signal[best]
        } else {
            signal[i] > signal[best]
        };
        if better {
            best = i;
        }
    }
    best
}

/// Widen each interval while `looser` keeps holding on either side.
///
/// The new start is the last sample before the interval where `looser`
/// fails, and the new (exclusive) end the first such sample after it, so
/// both boundary samples sit on the sub-threshold side. A side whose walk
/// runs off the array keeps its original boundary.
pub fn select_events(signal: &[f64], intervals: &mut [Interval], looser: MaskRule) {
    let n = signal.len();
    for iv in intervals.iter_mut() {
        let mut j = iv.start.min(n);
        while j > 0 && looser.holds(signal[j - 1]) {
            j -= 1;
        }
        if j > 0 {
            iv.start = j - 1;
        }

        let mut j = iv.end;
        while j < n && looser.holds(signal[j]) {
            j += 1;
        }
        if j < n {
            iv.end = j;
        }
    }
}

/// Anything with an onset and an offset on a common axis.
pub trait Span {
    fn onset(&self) -> f64;
    fn offset(&self) -> f64;
    fn set_onset(&mut self, v: f64);
    fn set_offset(&mut self, v: f64);

    fn length(&self) -> f64 {
        self.offset() - self.onset()
    }
}

impl Span for Interval {
    fn onset(&self) -> f64 {
        self.start as f64
    }
    fn offset(&self) -> f64 {
        self.end as f64
    }
    fn set_onset(&mut self, v: f64) {
        self.start = v as usize;
    }
    fn set_offset(&mut self, v: f64) {
        self.end = v as usize;
    }
}

/// Which member of a merged pair keeps its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The earlier one, with its end extended.
    #[default]
    Earlier,
    /// The longer one, with the onset pulled back to the earlier start.
    Longer,
}

/// Merge spans closer than `min_interval`.
///
/// `items` must be sorted by onset. Each span is compared against the last
/// merged accumulator, so long chains cascade left to right.
pub fn merge_close<T: Span>(items: Vec<T>, min_interval: f64, tie: TieBreak) -> Vec<T> {
    debug_assert!(
        items.windows(2).all(|w| w[0].onset() <= w[1].onset()),
        "merge_close needs spans sorted by onset"
    );
    let half = min_interval / 2.0;
    let mut merged: Vec<T> = Vec::with_capacity(items.len());
    for mut next in items {
        match merged.last_mut() {
            Some(last) if next.onset() - half <= last.offset() + half => {
                if tie == TieBreak::Longer && next.length() > last.length() {
                    next.set_onset(last.onset().min(next.onset()));
                    *last = next;
                } else {
                    let end = last.offset().max(next.offset());
                    last.set_offset(end);
                }
            }
            _ => merged.push(next),
        }
    }
    merged
}

/// Optional lower and upper limits, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DurationBounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl DurationBounds {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn contains(&self, dur: f64) -> bool {
        self.min.map_or(true, |m| dur >= m) && self.max.map_or(true, |m| dur <= m)
    }
}

/// Elapsed time between the first and last sample of an interval.
fn elapsed(iv: &Interval, time: &[f64]) -> f64 {
    let last = time.len().saturating_sub(1);
    let first = iv.start.min(last);
    let end = iv.end.saturating_sub(1).min(last);
    time[end] - time[first]
}

/// Keep intervals whose elapsed time lies within `bounds`.
pub fn within_duration(intervals: Vec<Interval>, time: &[f64], bounds: DurationBounds) -> Vec<Interval> {
    if time.is_empty() {
        return intervals;
    }
    intervals
        .into_iter()
        .filter(|iv| bounds.contains(elapsed(iv, time)))
        .collect()
}

/// Default discrepancy, in seconds, before an interval counts as straddling
/// an acquisition gap.
pub const STRADDLE_TOLERANCE: f64 = 0.1;

/// Drop intervals whose wall-clock span disagrees with their sample span.
pub fn remove_straddlers(
    intervals: Vec<Interval>,
    time: &[f64],
    fs: f64,
    tolerance: f64,
) -> Vec<Interval> {
    if time.is_empty() {
        return intervals;
    }
    intervals
        .into_iter()
        .filter(|iv| {
            let nominal = (iv.end as f64 - 1.0 - iv.start as f64) / fs;
            (elapsed(iv, time) - nominal).abs() <= tolerance
        })
        .collect()
}

/// Collapse consecutive intervals with identical `(start, end)`, keeping the
/// peak with the larger `signal` value. Returns the surviving input indices
/// next to the collapsed intervals.
pub fn deduplicate(intervals: &[Interval], signal: &[f64]) -> (Vec<usize>, Vec<Interval>) {
    let mut kept = Vec::with_capacity(intervals.len());
    let mut out: Vec<Interval> = Vec::with_capacity(intervals.len());
    for (i, iv) in intervals.iter().enumerate() {
        match out.last_mut() {
            Some(last) if last.start == iv.start && last.end == iv.end => {
                if signal[iv.peak] > signal[last.peak] {
                    last.peak = iv.peak;
                }
            }
            _ => {
                kept.push(i);
                out.push(*iv);
            }
        }
    }
    if kept.len() < intervals.len() {
        log::debug!("Removing {} duplicate events", intervals.len() - kept.len());
    }
    (kept, out)
}
