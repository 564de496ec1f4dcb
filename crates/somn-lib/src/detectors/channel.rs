//! Runs a recipe over every channel of a recording.

use super::arousal::detect_arousals;
use super::envelope::detect_envelope;
use super::slowwave::detect_slow_waves;
use super::ChannelEvents;
use crate::error::{DetectError, Result};
use crate::event::EventSet;
use crate::intervals::merge_close;
use crate::recipe::{Family, Recipe, RecipeOverrides, Stages};
use crate::signal::SignalSource;

/// Outcome of a run that may be cancelled between channels.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Completed(EventSet),
    Aborted,
}

/// A configured detection method, ready to run on any source.
#[derive(Debug, Clone)]
pub struct Detector {
    recipe: Recipe,
    channels: Option<Vec<String>>,
}

impl Detector {
    pub fn new(method: &str) -> Result<Self> {
        Recipe::from_name(method).map(Self::from_recipe)
    }

    pub fn with_overrides(method: &str, overrides: &RecipeOverrides) -> Result<Self> {
        Recipe::with_overrides(method, overrides).map(Self::from_recipe)
    }

    pub fn from_recipe(recipe: Recipe) -> Self {
        Self {
            recipe,
            channels: None,
        }
    }

    /// Restrict detection to these channels; by default every channel of
    /// the source is used.
    pub fn with_channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = Some(channels.into_iter().map(Into::into).collect());
        self
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    /// Detect on every channel.
    pub fn detect<S: SignalSource + ?Sized>(&self, source: &S) -> Result<EventSet> {
        Ok(self.run(source, |_, _| true)?.unwrap_or_default())
    }

    /// Detect on every channel, calling `keep_going(done, total)` before each
    /// one. Returning `false` stops the run and discards partial results.
    pub fn detect_with_progress<S, F>(&self, source: &S, keep_going: F) -> Result<Detection>
    where
        S: SignalSource + ?Sized,
        F: FnMut(usize, usize) -> bool,
    {
        Ok(match self.run(source, keep_going)? {
            Some(set) => Detection::Completed(set),
            None => Detection::Aborted,
        })
    }

    fn run<S, F>(&self, source: &S, mut keep_going: F) -> Result<Option<EventSet>>
    where
        S: SignalSource + ?Sized,
        F: FnMut(usize, usize) -> bool,
    {
        let chan_names: Vec<String> = match &self.channels {
            Some(chans) => chans.clone(),
            None => source.channel_labels().to_vec(),
        };
        let fs = source.sampling_rate();
        let time = source.time();
        let family = match self.recipe.family {
            Family::Spindle => "spindles",
            Family::SlowWave => "slow waves",
            Family::Arousal => "arousals",
        };

        let mut events = Vec::new();
        let mut det_values = Vec::with_capacity(chan_names.len());
        let mut sel_values = Vec::with_capacity(chan_names.len());
        for (i, chan) in chan_names.iter().enumerate() {
            if !keep_going(i, chan_names.len()) {
                log::info!("Detection cancelled after {i} channels");
                return Ok(None);
            }
            let raw = source
                .channel(chan)
                .ok_or_else(|| DetectError::MissingChannel(chan.clone()))?;
            if raw.len() != time.len() {
                return Err(DetectError::LengthMismatch {
                    what: "time",
                    expected: raw.len(),
                    actual: time.len(),
                });
            }

            log::info!("Detecting {family} on chan {chan}");
            let found = self.run_channel(raw, time, fs, chan)?;
            det_values.push(found.det_value);
            sel_values.push(found.sel_value);
            events.extend(found.events);
        }

        events.sort_by(|a, b| a.start.total_cmp(&b.start));
        if self.recipe.merge_across_channels && chan_names.len() > 1 {
            let before = events.len();
            events = merge_close(
                events,
                self.recipe.min_interval.unwrap_or(0.0),
                self.recipe.tie_break,
            );
            log::debug!("Merged {before} events across channels into {}", events.len());
        }

        Ok(Some(EventSet {
            method: self.recipe.to_string(),
            chan_names,
            det_values,
            sel_values,
            events,
            duration: time.len() as f64 / fs,
        }))
    }

    fn run_channel(&self, raw: &[f64], time: &[f64], fs: f64, chan: &str) -> Result<ChannelEvents> {
        match &self.recipe.stages {
            Stages::Envelope(plan) => detect_envelope(&self.recipe, plan, raw, time, fs, chan),
            Stages::SlowWave(plan) => detect_slow_waves(&self.recipe, plan, raw, time, fs, chan),
            Stages::Arousal(plan) => detect_arousals(&self.recipe, plan, raw, time, fs, chan),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Features;
    use crate::recipe::method_names;
    use crate::signal::{Recording, SignalSource};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::f64::consts::PI;

    const FS: f64 = 256.0;

    fn noise(n: usize, amp: f64, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n).map(|_| rng.gen_range(-amp..amp)).collect()
    }

    /// 30 s of noise with one-second 13 Hz bursts starting at `onsets`.
    fn burst_channel(fs: f64, onsets: &[f64], seed: u64) -> Vec<f64> {
        let mut x = noise((30.0 * fs) as usize, 5.0, seed);
        for (i, v) in x.iter_mut().enumerate() {
            let t = i as f64 / fs;
            if onsets.iter().any(|&o| (o..o + 1.0).contains(&t)) {
                *v += 50.0 * (2.0 * PI * 13.0 * t).sin();
            }
        }
        x
    }

    fn spindle_channel(onset: f64, seed: u64) -> Vec<f64> {
        burst_channel(FS, &[onset], seed)
    }

    fn one_channel(label: &str, data: Vec<f64>) -> Recording {
        Recording::new(FS, vec![(label.to_string(), data)]).unwrap()
    }

    #[test]
    fn spindle_recipes_find_the_burst() {
        let rec = one_channel("Cz", spindle_channel(10.0, 1));
        for method in ["Nir2011", "Moelle2011", "Ferrarelli2007", "Wamsley2012", "Concordia"] {
            let set = Detector::new(method).unwrap().detect(&rec).unwrap();
            assert!(!set.events.is_empty(), "{method} found nothing");
            assert!(
                set.events.iter().all(|e| e.start > 9.0 && e.end < 12.0),
                "{method} fired outside the burst"
            );
            assert!(set
                .events
                .iter()
                .any(|e| e.start < 10.9 && e.end > 10.1 && e.chan == "Cz"));
            assert_eq!(set.chan_names, vec!["Cz".to_string()]);
            assert!(set.det_values[0].is_some());
            let Features::Spindle(f) = &set.events[0].features else {
                panic!("{method} produced non-spindle features");
            };
            assert!((11.5..=14.5).contains(&f.peak_freq), "{method} peak {}", f.peak_freq);
        }
    }

    #[test]
    fn every_spindle_method_recovers_bursts() {
        // percentile thresholds only sit on the bursts when they fill more
        // than a tenth of the record
        let sparse: &[f64] = &[10.0];
        let dense: &[f64] = &[4.0, 11.0, 18.0, 25.0];
        let cases = [
            ("Moelle2011", sparse),
            ("Nir2011", sparse),
            ("Ferrarelli2007", sparse),
            ("Wamsley2012", sparse),
            ("Ray2015", sparse),
            ("FASST", dense),
            ("FASST2", dense),
            ("UCSD", sparse),
            ("Concordia", sparse),
        ];
        let spindle_methods: Vec<&str> = method_names()
            .filter(|m| Recipe::from_name(m).unwrap().family == Family::Spindle)
            .collect();
        assert_eq!(spindle_methods, cases.iter().map(|c| c.0).collect::<Vec<_>>());

        for fs in [256.0, 500.0] {
            for (method, onsets) in cases {
                let rec = Recording::new(fs, vec![("Cz".into(), burst_channel(fs, onsets, 31))]).unwrap();
                let set = Detector::new(method).unwrap().detect(&rec).unwrap();
                let spans: Vec<(f64, f64)> = set.events.iter().map(|e| (e.start, e.end)).collect();
                for &onset in onsets {
                    assert!(
                        spans.iter().any(|&(s, e)| s < onset + 0.9 && e > onset + 0.1),
                        "{method} @ {fs} Hz missed the burst at {onset} s: {spans:?}"
                    );
                }
                assert!(
                    spans
                        .iter()
                        .all(|&(s, e)| onsets.iter().any(|&o| s > o - 1.0 && e < o + 2.0)),
                    "{method} @ {fs} Hz fired outside the bursts: {spans:?}"
                );
            }
        }
    }

    /// Valid input never errors, and events are ordered, non-empty and
    /// inside the recording, whatever the method and sampling rate.
    #[test]
    fn every_method_keeps_event_invariants_across_rates() {
        for fs in [200.0, 256.0, 500.0] {
            let mut c3 = burst_channel(fs, &[8.0, 21.0], 41);
            for (i, v) in c3.iter_mut().enumerate() {
                let t = i as f64 / fs;
                if (14.0..15.0).contains(&t) {
                    *v -= 150.0 * (2.0 * PI * (t - 14.0)).sin();
                }
                if (17.0..24.0).contains(&t) {
                    *v += 20.0 * (2.0 * PI * 40.0 * t).sin();
                }
            }
            let c4 = burst_channel(fs, &[8.4], 42);
            let rec = Recording::new(fs, vec![("C3".into(), c3), ("C4".into(), c4)]).unwrap();
            let last = *rec.time().last().unwrap();

            for method in method_names() {
                let set = Detector::new(method)
                    .unwrap()
                    .detect(&rec)
                    .unwrap_or_else(|e| panic!("{method} @ {fs} Hz: {e}"));
                assert_eq!(set.chan_names, ["C3".to_string(), "C4".to_string()]);
                assert_eq!(set.det_values.len(), 2);
                assert!((set.duration - 30.0).abs() < 1e-9);
                for ev in &set.events {
                    assert!(ev.start < ev.end, "{method} @ {fs} Hz: {ev:?}");
                    assert!(ev.start >= 0.0 && ev.end <= last, "{method} @ {fs} Hz: {ev:?}");
                }
                assert!(
                    set.events.windows(2).all(|w| w[0].start <= w[1].start),
                    "{method} @ {fs} Hz: events out of order"
                );
            }
        }
    }

    #[test]
    fn selection_threshold_is_reported() {
        let rec = one_channel("Cz", spindle_channel(10.0, 2));
        let set = Detector::new("Nir2011").unwrap().detect(&rec).unwrap();
        let (det, sel) = (set.det_values[0].unwrap(), set.sel_values[0].unwrap());
        assert!(sel < det);
        assert!(set.method.starts_with("detsp_Nir2011"));
    }

    #[test]
    fn detection_is_deterministic() {
        let rec = one_channel("Cz", spindle_channel(12.0, 3));
        let det = Detector::new("Nir2011").unwrap();
        assert_eq!(det.detect(&rec).unwrap(), det.detect(&rec).unwrap());
    }

    #[test]
    fn slow_wave_is_measured() {
        let mut x = noise((40.0 * FS) as usize, 1.0, 4);
        for (i, v) in x.iter_mut().enumerate() {
            let t = i as f64 / FS;
            if (20.0..21.0).contains(&t) {
                *v -= 150.0 * (2.0 * PI * (t - 20.0)).sin();
            }
        }
        let rec = one_channel("Fz", x);
        let set = Detector::new("Massimini2004").unwrap().detect(&rec).unwrap();
        assert_eq!(set.events.len(), 1);
        let Features::SlowWave(sw) = &set.events[0].features else {
            panic!("slow wave features expected");
        };
        assert!((20.1..20.4).contains(&sw.trough_time), "trough at {}", sw.trough_time);
        assert!((20.6..20.9).contains(&sw.peak_time), "peak at {}", sw.peak_time);
        assert!(sw.trough_val < -80.0);
        assert!(sw.ptp >= 140.0);
        assert_eq!(set.det_values, vec![None]);
    }

    #[test]
    fn cross_channel_merge_joins_overlapping_events() {
        let rec = Recording::new(
            FS,
            vec![
                ("C3".to_string(), spindle_channel(10.0, 5)),
                ("C4".to_string(), spindle_channel(10.3, 6)),
            ],
        )
        .unwrap();
        let separate = Detector::new("Nir2011").unwrap().detect(&rec).unwrap();
        assert_eq!(separate.events.len(), 2);

        let merge = RecipeOverrides {
            merge_across_channels: Some(true),
            ..Default::default()
        };
        let merged = Detector::with_overrides("Nir2011", &merge)
            .unwrap()
            .detect(&rec)
            .unwrap();
        assert_eq!(merged.events.len(), 1);
        assert_eq!(merged.events[0].chan, "C3");
        assert_eq!(merged.events[0].end, separate.events[1].end);
    }

    #[test]
    fn cancelling_discards_partial_results() {
        let rec = Recording::new(
            FS,
            vec![
                ("C3".to_string(), spindle_channel(10.0, 7)),
                ("C4".to_string(), spindle_channel(10.0, 8)),
            ],
        )
        .unwrap();
        let det = Detector::new("FASST").unwrap();
        let mut seen = Vec::new();
        let out = det
            .detect_with_progress(&rec, |done, total| {
                seen.push((done, total));
                done < 1
            })
            .unwrap();
        assert_eq!(out, Detection::Aborted);
        assert_eq!(seen, vec![(0, 2), (1, 2)]);
    }

    #[test]
    fn channel_selection_and_missing_channels() {
        let rec = Recording::new(
            FS,
            vec![
                ("C3".to_string(), spindle_channel(10.0, 9)),
                ("C4".to_string(), noise((30.0 * FS) as usize, 5.0, 10)),
            ],
        )
        .unwrap();
        let set = Detector::new("Nir2011")
            .unwrap()
            .with_channels(["C3"])
            .detect(&rec)
            .unwrap();
        assert_eq!(set.chan_names, vec!["C3".to_string()]);

        let err = Detector::new("Nir2011")
            .unwrap()
            .with_channels(["Oz"])
            .detect(&rec)
            .unwrap_err();
        assert_eq!(err, DetectError::MissingChannel("Oz".into()));
    }

    struct Ragged {
        time: Vec<f64>,
        labels: Vec<String>,
        data: Vec<f64>,
    }

    impl SignalSource for Ragged {
        fn sampling_rate(&self) -> f64 {
            FS
        }
        fn time(&self) -> &[f64] {
            &self.time
        }
        fn channel_labels(&self) -> &[String] {
            &self.labels
        }
        fn channel(&self, _label: &str) -> Option<&[f64]> {
            Some(&self.data)
        }
    }

    #[test]
    fn time_and_samples_must_line_up() {
        let src = Ragged {
            time: vec![0.0; 10],
            labels: vec!["Cz".into()],
            data: vec![0.0; 12],
        };
        let err = Detector::new("FASST").unwrap().detect(&src).unwrap_err();
        assert!(matches!(err, DetectError::LengthMismatch { .. }));
    }

    #[test]
    fn unknown_method_is_rejected() {
        assert_eq!(
            Detector::new("Smith2020").unwrap_err(),
            DetectError::UnknownMethod("Smith2020".into())
        );
    }
}
