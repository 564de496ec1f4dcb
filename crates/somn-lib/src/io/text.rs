//! Single-channel sample files: one value per line, optionally preceded by
//! a `# label=Cz fs=256` header. Other `#` lines are comments.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::signal::Recording;

/// Sampling rate assumed when neither the caller nor the file gives one.
pub const DEFAULT_FS: f64 = 256.0;
/// Channel label used when neither the caller nor the file gives one.
pub const DEFAULT_LABEL: &str = "signal";

/// Build a one-channel recording from sample text. An explicit `label` or
/// `fs` wins over the header, which wins over the defaults.
pub fn parse_channel_text(text: &str, label: Option<&str>, fs: Option<f64>) -> Result<Recording> {
    let mut header_label = None;
    let mut header_fs = None;
    let mut samples = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if let Some(comment) = trimmed.strip_prefix('#') {
            for (key, value) in comment.split_whitespace().filter_map(|t| t.split_once('=')) {
                match key {
                    "label" => header_label = Some(value.to_string()),
                    "fs" => {
                        let rate: f64 = value
                            .parse()
                            .with_context(|| format!("line {}: bad sampling rate '{value}'", idx + 1))?;
                        header_fs = Some(rate);
                    }
                    _ => {}
                }
            }
            continue;
        }
        if trimmed.is_empty() {
            continue;
        }
        let val: f64 = trimmed
            .parse()
            .with_context(|| format!("line {} is not a sample: {}", idx + 1, trimmed))?;
        samples.push(val);
    }
    if samples.is_empty() {
        bail!("no samples found");
    }

    let label = label
        .map(str::to_string)
        .or(header_label)
        .unwrap_or_else(|| DEFAULT_LABEL.to_string());
    let fs = match fs.or(header_fs) {
        Some(fs) => fs,
        None => {
            log::warn!("no sampling rate given for {label}, assuming {DEFAULT_FS} Hz");
            DEFAULT_FS
        }
    };
    Recording::new(fs, vec![(label, samples)]).context("building single-channel recording")
}

/// Read a single-channel sample file from disk.
pub fn read_channel_text(path: &Path, label: Option<&str>, fs: Option<f64>) -> Result<Recording> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_channel_text(&text, label, fs).with_context(|| format!("in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalSource;

    #[test]
    fn header_names_the_channel_and_rate() {
        let rec = parse_channel_text("# label=Fz fs=2 recorded overnight\n1.5\n\n-2\n 3e-1 \n", None, None)
            .unwrap();
        assert_eq!(rec.channel_labels(), ["Fz".to_string()]);
        assert_eq!(rec.channel("Fz").unwrap(), &[1.5, -2.0, 0.3]);
        assert_eq!(rec.time(), &[0.0, 0.5, 1.0]);
    }

    #[test]
    fn caller_values_override_the_header() {
        let rec = parse_channel_text("# label=Fz fs=2\n1\n2\n", Some("Cz"), Some(4.0)).unwrap();
        assert_eq!(rec.channel_labels(), ["Cz".to_string()]);
        assert_eq!(rec.sampling_rate(), 4.0);

        let bare = parse_channel_text("1\n2\n", None, None).unwrap();
        assert_eq!(bare.channel_labels(), [DEFAULT_LABEL.to_string()]);
        assert_eq!(bare.sampling_rate(), DEFAULT_FS);
    }

    #[test]
    fn reports_the_bad_line() {
        let err = parse_channel_text("1.0\nabc\n", None, None).unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(parse_channel_text("# nothing\n", None, None).is_err());
        let err = parse_channel_text("# fs=fast\n1.0\n", None, None).unwrap_err();
        assert!(err.to_string().contains("bad sampling rate"));
    }
}
