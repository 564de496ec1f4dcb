use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Write;
use std::path::Path;

use crate::event::Event;

/// Rater files hold either a bare list of events or a full detection result.
#[derive(Deserialize)]
#[serde(untagged)]
enum EventFile {
    List(Vec<Event>),
    Set { events: Vec<Event> },
}

pub fn parse_events_json(text: &str) -> Result<Vec<Event>> {
    let file: EventFile = serde_json::from_str(text).context("parsing event list")?;
    Ok(match file {
        EventFile::List(events) | EventFile::Set { events } => events,
    })
}

/// Read events from a JSON file, either `[{"start": .., "end": ..}, ..]` or
/// the output of a detection run.
pub fn read_events_json(path: &Path) -> Result<Vec<Event>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_events_json(&text).with_context(|| format!("in {}", path.display()))
}

/// Write one row per event. Feature columns follow the kind of the first
/// event; missing or NaN values are left empty.
pub fn write_events_csv<W: Write>(out: W, events: &[Event]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    let names = events.first().map_or(&[][..], |e| e.features.names());
    let mut header = vec!["start", "end", "chan"];
    header.extend_from_slice(names);
    writer.write_record(&header)?;
    for ev in events {
        let mut row = vec![ev.start.to_string(), ev.end.to_string(), ev.chan.clone()];
        row.extend(names.iter().map(|name| match ev.feature(name) {
            Some(v) if !v.is_nan() => v.to_string(),
            _ => String::new(),
        }));
        writer.write_record(&row)?;
    }
    writer.flush().context("flushing event table")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Features;

    #[test]
    fn reads_lists_and_result_sets() {
        let list = parse_events_json(r#"[{"start": 1.0, "end": 2.0, "chan": "Cz"}]"#).unwrap();
        assert_eq!(list, vec![Event::new(1.0, 2.0, "Cz")]);

        let set = parse_events_json(
            r#"{"method": "detsp_FASST", "chan_names": ["Cz"], "events": [{"start": 3.0, "end": 4.5}]}"#,
        )
        .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].duration(), 1.5);
    }

    #[test]
    fn csv_rows_carry_feature_columns() {
        let mut ev = Event::new(1.0, 4.0, "Fz");
        ev.features = Features::Arousal { dur: 3.0 };
        let mut buf = Vec::new();
        write_events_csv(&mut buf, &[ev]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "start,end,chan,dur\n1,4,Fz,3\n");
    }

    #[test]
    fn empty_table_still_has_a_header() {
        let mut buf = Vec::new();
        write_events_csv(&mut buf, &[]).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "start,end,chan\n");
    }
}
