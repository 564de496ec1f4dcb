use assert_cmd::Command;
use serde_json::{json, Value};
use std::{fs, path::PathBuf};
use tempfile::{tempdir, TempDir};

fn events(spans: &[(f64, f64)]) -> Value {
    Value::Array(
        spans
            .iter()
            .map(|(s, e)| json!({"start": s, "end": e, "chan": "Cz"}))
            .collect(),
    )
}

fn write_raters(temp: &TempDir) -> (PathBuf, PathBuf) {
    let a = temp.path().join("rater_a.json");
    let b = temp.path().join("rater_b.json");
    let first = events(&[
        (3.0, 9.0),
        (20.0, 25.0),
        (30.0, 40.0),
        (50.0, 50.2),
        (60.0, 60.4),
        (102.0, 105.7),
        (110.6, 111.0),
    ]);
    let second = events(&[
        (0.0, 0.3),
        (4.0, 8.0),
        (21.0, 25.0),
        (31.0, 39.0),
        (70.0, 70.4),
        (80.0, 80.3),
        (102.5, 105.0),
        (109.0, 109.2),
    ]);
    fs::write(&a, first.to_string()).unwrap();
    fs::write(&b, second.to_string()).unwrap();
    (a, b)
}

#[test]
fn consensus_merges_rater_files() {
    let temp = tempdir().unwrap();
    let (a, b) = write_raters(&temp);
    let output = Command::cargo_bin("somn")
        .unwrap()
        .args(["consensus", "--threshold", "0.5", "--fs", "512", "--min-duration", "0.5"])
        .arg("--rater")
        .arg(&a)
        .arg("--rater")
        .arg(&b)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let merged: Value = serde_json::from_slice(&output).unwrap();
    let merged = merged.as_array().unwrap();
    assert_eq!(merged.len(), 4);
    assert_eq!(merged[0]["start"], 3.0);
    assert_eq!(merged[0]["end"], 9.0);
}

#[test]
fn consensus_needs_two_raters() {
    let temp = tempdir().unwrap();
    let (a, _) = write_raters(&temp);
    Command::cargo_bin("somn")
        .unwrap()
        .args(["consensus", "--rater"])
        .arg(&a)
        .assert()
        .failure();
}

#[test]
fn agreement_scores_candidate_against_reference() {
    let temp = tempdir().unwrap();
    let (a, b) = write_raters(&temp);
    let output = Command::cargo_bin("somn")
        .unwrap()
        .args(["agreement", "--threshold", "0.5", "--reference"])
        .arg(&a)
        .arg("--candidate")
        .arg(&b)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let matched: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(matched["pairs"], json!([[0, 1], [1, 2], [2, 3], [5, 6]]));
    assert!((matched["precision"].as_f64().unwrap() - 0.5).abs() < 1e-12);
    assert!((matched["f1"].as_f64().unwrap() - 0.5333).abs() < 1e-4);
}
