//! Integration tests for the geobatch binary
//!
//! Each test runs in its own temporary directory so no geobatch.toml from
//! the working tree is picked up.

use std::path::Path;
use std::process::{Command, Output};

fn geobatch(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_geobatch"))
        .args(args)
        .current_dir(dir)
        .env_remove("GEOBATCH_SERVICE_URL")
        .env_remove("GEOBATCH_SAFETY_MARGIN")
        .env_remove("GEOBATCH_SCALE_M")
        .env_remove("GEOBATCH_BYTE_LIMIT")
        .env_remove("GEOBATCH_BYTES_PER_BAND")
        .output()
        .expect("Failed to execute command")
}

fn json_data(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value =
        serde_json::from_str(&stdout).expect("Output should be valid JSON");
    assert_eq!(parsed["status"], "success");
    parsed["data"].clone()
}

#[test]
fn test_plan_json_at_equator() {
    let dir = tempfile::tempdir().unwrap();
    let output = geobatch(dir.path(), &["plan", "--bands", "196", "--json"]);
    assert!(output.status.success(), "Command should succeed");

    let data = json_data(&output);
    assert_eq!(data["pixels_per_side"], 246);
    assert_eq!(data["safety_margin"], 0.95);
}

#[test]
fn test_plan_reads_config_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("geobatch.toml"), "safety_margin = 0.8\n").unwrap();

    let output = geobatch(dir.path(), &["plan", "--bands", "196", "--json"]);
    assert!(output.status.success());
    assert_eq!(json_data(&output)["pixels_per_side"], 226);
}

#[test]
fn test_plan_infeasible_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = geobatch(
        dir.path(),
        &["plan", "--bands", "196", "--byte-limit", "100", "--json"],
    );
    assert!(!output.status.success());
}

#[test]
fn test_suggest_profiles_plots() {
    let dir = tempfile::tempdir().unwrap();
    let plots = dir.path().join("plots.geojson");
    std::fs::write(
        &plots,
        r#"{"type": "FeatureCollection", "features": [
            {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [10.0, 5.0]}},
            {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [10.1, 5.1]}},
            {"type": "Feature", "properties": {}, "geometry": {"type": "Point", "coordinates": [10.2, 5.2]}}
        ]}"#,
    )
    .unwrap();

    let output = geobatch(dir.path(), &["suggest", "plots.geojson", "--json"]);
    assert!(output.status.success());

    let data = json_data(&output);
    assert_eq!(data["profile"]["feature_count"], 3);
    assert_eq!(data["profile"]["feature_type"], "point");
    assert!(data["suggested_mode"].is_string());
}

#[test]
fn test_mosaic_of_empty_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("tiles")).unwrap();

    let output = geobatch(dir.path(), &["mosaic", "tiles"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No usable tiles"));
}

#[test]
fn test_run_without_service_url_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = geobatch(
        dir.path(),
        &["run", "plots.geojson", "--layers", "layers.toml"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No remote service configured"));
}

#[test]
fn test_config_lists_sources() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("geobatch.toml"), "chunk_size = 50\n").unwrap();

    let output = geobatch(dir.path(), &["config", "--json"]);
    assert!(output.status.success());

    let rows = json_data(&output);
    let chunk = rows
        .as_array()
        .unwrap()
        .iter()
        .find(|row| row["key"] == "chunk_size")
        .unwrap()
        .clone();
    assert_eq!(chunk["value"], "50");
    assert_eq!(chunk["source"], "File");
}
