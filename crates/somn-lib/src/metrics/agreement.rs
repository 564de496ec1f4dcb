//! Consensus between raters and agreement between two event lists.

use crate::error::{DetectError, Result};
use crate::event::Event;
use crate::intervals::true_runs;
use serde::{Deserialize, Serialize};

fn check_sorted(rater: usize, events: &[Event]) -> Result<()> {
    match events.windows(2).position(|w| w[1].start < w[0].start) {
        Some(i) => Err(DetectError::Unsorted { rater, index: i + 1 }),
        None => Ok(()),
    }
}

/// Merge rater event lists by per-sample voting.
///
/// Every rater marks the samples its events cover; samples where the share of
/// raters is at least `threshold` form the merged events. All raters are
/// assumed to score the same channel, which is taken from the first event.
pub fn consensus(
    raters: &[Vec<Event>],
    threshold: f64,
    fs: f64,
    min_duration: Option<f64>,
) -> Result<Vec<Event>> {
    if raters.is_empty() {
        return Err(DetectError::EmptyInput("consensus"));
    }
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(DetectError::invalid(
            "consensus",
            format!("threshold must be in (0, 1], got {threshold}"),
        ));
    }
    if fs.is_nan() || fs <= 0.0 {
        return Err(DetectError::invalid("consensus", "sampling rate must be positive"));
    }
    for (i, rater) in raters.iter().enumerate() {
        check_sorted(i, rater)?;
    }

    let firsts = raters.iter().filter_map(|r| r.first());
    let Some(beg) = firsts.map(|e| e.start).reduce(f64::min) else {
        return Ok(Vec::new());
    };
    let end = raters
        .iter()
        .filter_map(|r| r.last())
        .map(|e| e.end)
        .fold(f64::NEG_INFINITY, f64::max);
    let chan = raters
        .iter()
        .find_map(|r| r.first())
        .map(|e| e.chan.clone())
        .unwrap_or_default();

    let n = ((end - beg) * fs) as usize;
    let mut votes = vec![0usize; n];
    for rater in raters {
        let mut covered = vec![false; n];
        for ev in rater {
            let a = (((ev.start - beg) * fs) as usize).min(n);
            let b = (((ev.end - beg) * fs) as usize).min(n);
            if a < b {
                covered[a..b].iter_mut().for_each(|c| *c = true);
            }
        }
        for (v, c) in votes.iter_mut().zip(covered) {
            *v += c as usize;
        }
    }

    let count = raters.len() as f64;
    let mask: Vec<bool> = votes.iter().map(|&v| v as f64 / count >= threshold).collect();
    let merged = true_runs(&mask)
        .into_iter()
        .map(|(a, b)| Event::new(beg + a as f64 / fs, beg + b as f64 / fs, chan.clone()))
        .filter(|ev| min_duration.map_or(true, |m| ev.duration() >= m))
        .collect();
    Ok(merged)
}

/// Outcome of matching a candidate list against a reference list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedEvents {
    /// `(reference index, candidate index)` of every match.
    pub pairs: Vec<(usize, usize)>,
    pub unmatched_reference: Vec<usize>,
    pub unmatched_candidate: Vec<usize>,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Intersection over union of two events; 0 when they do not overlap.
pub fn overlap_ratio(a: &Event, b: &Event) -> f64 {
    let inter = a.end.min(b.end) - a.start.max(b.start);
    if inter <= 0.0 {
        return 0.0;
    }
    let union = a.end.max(b.end) - a.start.min(b.start);
    inter / union
}

/// One-to-one matching of `candidate` events to `reference` events.
///
/// Pairs are taken greedily by decreasing overlap ratio, ties going to the
/// lower reference index and then the lower candidate index. A pair counts
/// when its ratio is at least `threshold`.
pub fn match_events(reference: &[Event], candidate: &[Event], threshold: f64) -> Result<MatchedEvents> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(DetectError::invalid(
            "match_events",
            format!("overlap threshold must be in [0, 1], got {threshold}"),
        ));
    }
    let mut scored: Vec<(f64, usize, usize)> = Vec::new();
    for (i, r) in reference.iter().enumerate() {
        for (j, c) in candidate.iter().enumerate() {
            let iou = overlap_ratio(r, c);
            if iou > 0.0 && iou >= threshold {
                scored.push((iou, i, j));
            }
        }
    }
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut ref_used = vec![false; reference.len()];
    let mut cand_used = vec![false; candidate.len()];
    let mut pairs = Vec::new();
    for (_, i, j) in scored {
        if !ref_used[i] && !cand_used[j] {
            ref_used[i] = true;
            cand_used[j] = true;
            pairs.push((i, j));
        }
    }
    pairs.sort_unstable();

    let matched = pairs.len() as f64;
    let ratio = |den: usize| if den == 0 { 0.0 } else { matched / den as f64 };
    let precision = ratio(candidate.len());
    let recall = ratio(reference.len());
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    Ok(MatchedEvents {
        pairs,
        unmatched_reference: unused(&ref_used),
        unmatched_candidate: unused(&cand_used),
        precision,
        recall,
        f1,
    })
}

fn unused(flags: &[bool]) -> Vec<usize> {
    flags
        .iter()
        .enumerate()
        .filter(|(_, used)| !**used)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(spans: &[(f64, f64)]) -> Vec<Event> {
        spans.iter().map(|&(s, e)| Event::new(s, e, "Cz")).collect()
    }

    fn rater1() -> Vec<Event> {
        events(&[
            (3.0, 9.0),
            (20.0, 25.0),
            (30.0, 40.0),
            (50.0, 50.2),
            (60.0, 60.4),
            (102.0, 105.7),
            (110.6, 111.0),
        ])
    }

    fn rater2() -> Vec<Event> {
        events(&[
            (0.0, 0.3),
            (4.0, 8.0),
            (21.0, 25.0),
            (31.0, 39.0),
            (70.0, 70.4),
            (80.0, 80.3),
            (102.5, 105.0),
            (109.0, 109.2),
        ])
    }

    #[test]
    fn full_agreement_keeps_only_shared_samples() {
        let r1 = events(&[(3.0, 9.0), (20.0, 25.0), (30.0, 40.0), (42.0, 42.5)]);
        let r2 = events(&[(2.0, 10.0), (21.0, 26.0), (41.0, 42.0), (42.0, 42.3)]);
        let cons = consensus(&[r1, r2], 1.0, 512.0, Some(0.5)).unwrap();
        assert_eq!(cons, events(&[(3.0, 9.0), (21.0, 25.0)]));
    }

    #[test]
    fn identical_raters_reproduce_their_list() {
        let list = events(&[(1.0, 2.0), (5.0, 5.25), (7.5, 9.0)]);
        let cons = consensus(&[list.clone(), list.clone(), list], 1.0, 256.0, Some(0.5)).unwrap();
        assert_eq!(cons, events(&[(1.0, 2.0), (7.5, 9.0)]));
    }

    #[test]
    fn half_consensus_fixture() {
        let cons = consensus(&[rater1(), rater2()], 0.5, 512.0, Some(0.5)).unwrap();
        assert_eq!(cons.len(), 4);
        assert_eq!((cons[0].start, cons[0].end), (3.0, 9.0));
        assert_eq!(cons[3].start, 102.0);
        assert!((cons[3].end - 105.699).abs() < 1e-3);
        assert!(cons.iter().all(|e| e.chan == "Cz"));
    }

    #[test]
    fn unsorted_raters_are_rejected() {
        let bad = events(&[(5.0, 6.0), (1.0, 2.0)]);
        let err = consensus(&[rater1(), bad], 0.5, 100.0, None).unwrap_err();
        assert_eq!(err, DetectError::Unsorted { rater: 1, index: 1 });
    }

    #[test]
    fn match_events_fixture() {
        let m = match_events(&rater1(), &rater2(), 0.5).unwrap();
        assert_eq!(m.pairs, vec![(0, 1), (1, 2), (2, 3), (5, 6)]);
        assert!((m.precision - 0.5).abs() < 1e-12);
        assert!((m.recall - 4.0 / 7.0).abs() < 1e-12);
        assert!((m.f1 - 0.5333).abs() < 1e-4);
        assert_eq!(m.unmatched_reference, vec![3, 4, 6]);
        assert_eq!(m.unmatched_candidate, vec![0, 4, 5, 7]);
    }

    #[test]
    fn each_event_matches_at_most_once() {
        let reference = events(&[(0.0, 10.0)]);
        let candidate = events(&[(0.0, 9.0), (1.0, 10.0)]);
        let m = match_events(&reference, &candidate, 0.5).unwrap();
        // both score 0.9; the lower index wins
        assert_eq!(m.pairs, vec![(0, 0)]);
        assert_eq!(m.unmatched_candidate, vec![1]);
    }

    #[test]
    fn empty_lists_score_zero() {
        let m = match_events(&[], &rater2(), 0.5).unwrap();
        assert_eq!((m.precision, m.recall, m.f1), (0.0, 0.0, 0.0));
    }
}
