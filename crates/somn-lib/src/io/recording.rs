use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::path::Path;

use crate::signal::Recording;

/// Load a multi-channel CSV with one header row of channel labels.
///
/// A column named `time` (any case) becomes the time vector, so recordings
/// with acquisition gaps survive; without one, time starts at 0 s and
/// advances by `1 / fs`.
pub fn read_channels_csv(path: &Path, fs: f64) -> Result<Recording> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let time_idx = headers.iter().position(|h| h.eq_ignore_ascii_case("time"));
    let labels: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| Some(*i) != time_idx)
        .map(|(i, h)| (i, h.to_string()))
        .collect();
    if labels.is_empty() {
        anyhow::bail!("{} has no channel columns", path.display());
    }

    let mut time = Vec::new();
    let mut columns = vec![Vec::new(); labels.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {}", row + 1))?;
        let field = |idx: usize| -> Result<f64> {
            let text = record
                .get(idx)
                .ok_or_else(|| anyhow::anyhow!("row {} is missing column {}", row + 1, idx + 1))?;
            text.parse::<f64>()
                .with_context(|| format!("row {}: '{}' is not a number", row + 1, text))
        };
        if let Some(idx) = time_idx {
            time.push(field(idx)?);
        }
        for ((idx, _), column) in labels.iter().zip(columns.iter_mut()) {
            column.push(field(*idx)?);
        }
    }

    let channels = labels
        .into_iter()
        .map(|(_, label)| label)
        .zip(columns)
        .collect();
    let recording = match time_idx {
        Some(_) => Recording::with_time(fs, time, channels),
        None => Recording::new(fs, channels),
    };
    recording.with_context(|| format!("building recording from {}", path.display()))
}
