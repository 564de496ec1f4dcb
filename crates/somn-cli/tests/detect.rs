use assert_cmd::Command;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::f64::consts::PI;
use std::{fs, path::Path};
use tempfile::tempdir;

const FS: f64 = 256.0;

/// 30 s of noise with a one-second 13 Hz burst at 10 s.
fn spindle_samples(seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..(30.0 * FS) as usize)
        .map(|i| {
            let t = i as f64 / FS;
            let burst = if (10.0..11.0).contains(&t) {
                50.0 * (2.0 * PI * 13.0 * t).sin()
            } else {
                0.0
            };
            burst + rng.gen_range(-5.0..5.0)
        })
        .collect()
}

fn write_series(path: &Path, samples: &[f64]) {
    let body: Vec<String> = samples.iter().map(|v| v.to_string()).collect();
    fs::write(path, body.join("\n")).unwrap();
}

fn somn() -> Command {
    Command::cargo_bin("somn").unwrap()
}

#[test]
fn methods_lists_every_recipe() {
    let output = somn().arg("methods").assert().success().get_output().stdout.clone();
    let text = String::from_utf8(output).unwrap();
    assert_eq!(text.lines().count(), 12);
    assert!(text.contains("Nir2011\tdetsp_Nir2011_9.2-16.8Hz_00.5-02.0s"));
    assert!(text.contains("Massimini2004\tdetsw_Massimini2004_0.10-4.00Hz"));
}

#[test]
fn detect_reports_the_burst_as_json() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("cz.txt");
    write_series(&input, &spindle_samples(11));

    let output = somn()
        .args(["detect", "--method", "Nir2011", "--fs", "256", "--label", "Cz", "--input"])
        .arg(&input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["chan_names"][0], "Cz");
    let events = json["events"].as_array().unwrap();
    assert!(!events.is_empty());
    let start = events[0]["start"].as_f64().unwrap();
    assert!((9.0..11.0).contains(&start), "start {start}");
    assert_eq!(events[0]["features"]["kind"], "spindle");
}

#[test]
fn sample_header_names_the_channel() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("pz.txt");
    let body: Vec<String> = spindle_samples(15).iter().map(|v| v.to_string()).collect();
    fs::write(&input, format!("# label=Pz fs=256\n{}", body.join("\n"))).unwrap();

    let output = somn()
        .args(["detect", "--method", "Nir2011", "--input"])
        .arg(&input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["chan_names"][0], "Pz");
    assert!((json["duration"].as_f64().unwrap() - 30.0).abs() < 1e-9);

    let output = somn()
        .args(["detect", "--method", "Nir2011", "--label", "Oz", "--input"])
        .arg(&input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["chan_names"][0], "Oz");
}

#[test]
fn detect_reads_stdin_and_writes_csv() {
    let body: Vec<String> = spindle_samples(12).iter().map(|v| v.to_string()).collect();
    let output = somn()
        .args(["detect", "--method", "Nir2011", "--format", "csv"])
        .write_stdin(body.join("\n"))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).unwrap();
    let header = text.lines().next().unwrap();
    assert!(header.starts_with("start,end,chan,peak_time"));
}

#[test]
fn config_file_selects_method_and_channels() {
    let temp = tempdir().unwrap();
    let samples = spindle_samples(13);
    let mut table = String::from("C3,C4\n");
    for v in &samples {
        table.push_str(&format!("{v},{}\n", v * 0.5));
    }
    let csv = temp.path().join("night.csv");
    fs::write(&csv, table).unwrap();
    let config = temp.path().join("detect.toml");
    fs::write(
        &config,
        "method = \"Concordia\"\nchannels = [\"C4\"]\nmin_dur = 0.4\n",
    )
    .unwrap();

    let output = somn()
        .args(["detect", "--csv"])
        .arg(&csv)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["chan_names"], serde_json::json!(["C4"]));
    assert!(json["method"].as_str().unwrap().contains("_00.4-03.0s"));
}

#[test]
fn summary_prints_one_value_per_channel() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("cz.txt");
    write_series(&input, &spindle_samples(14));
    let output = somn()
        .args(["detect", "--method", "Nir2011", "--label", "Cz", "--summary", "count", "--input"])
        .arg(&input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json[0][0], "Cz");
    let count = json[0][1].as_f64().unwrap();
    assert!(count >= 1.0);

    let output = somn()
        .args(["detect", "--method", "Nir2011", "--label", "Cz", "--summary", "density", "--input"])
        .arg(&input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).unwrap();
    // 30 s of signal is exactly one epoch
    assert!((json[0][1].as_f64().unwrap() - count).abs() < 1e-9);
}

#[test]
fn unknown_method_fails() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("x.txt");
    write_series(&input, &[0.0; 512]);
    let assert = somn()
        .args(["detect", "--method", "Smith2020", "--input"])
        .arg(&input)
        .assert()
        .failure();
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    assert!(stderr.contains("unknown detection method 'Smith2020'"));
}
