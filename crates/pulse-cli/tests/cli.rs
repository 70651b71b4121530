use assert_cmd::Command;
use predicates::prelude::*;
use std::error::Error;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const NETWORK: &str = r#"
[kernel]
resolution_ms = 0.1
workers = 2

[[unit]]
model = "iaf_psc_exp"
count = 2
i_e = 400.0

[[unit]]
model = "spike_source"
spike_times_ms = [1.0, 5.0, 9.0]

[[connection]]
source = 0
target = 1
weight = 50.0
delay_steps = 10
rule = { rule = "stdp", lambda = 0.05 }

[[connection]]
source = 2
target = 1
weight = 20.0
delay_steps = 15
"#;

fn write_network(dir: &Path, content: &str) -> Result<PathBuf, Box<dyn Error>> {
    let path = dir.join("net.toml");
    std::fs::write(&path, content)?;
    Ok(path)
}

#[test]
fn check_prints_summary() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let path = write_network(tmp.path(), NETWORK)?;
    let mut cmd = Command::cargo_bin("pulse")?;
    cmd.arg("check").arg("--network").arg(&path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("units: 3 (iaf_psc_exp: 2, spike_source: 1)"))
        .stdout(predicate::str::contains("connections: 2 (static: 1, stdp: 1)"))
        .stdout(predicate::str::contains("min delay: 10 steps"))
        .stdout(predicate::str::contains("partitions: 2"));
    Ok(())
}

#[test]
fn check_rejects_invalid_delay() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let path = write_network(tmp.path(), &NETWORK.replace("delay_steps = 10", "delay_steps = 0"))?;
    let mut cmd = Command::cargo_bin("pulse")?;
    cmd.arg("check").arg("--network").arg(&path);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid delay 0"));
    Ok(())
}

#[test]
fn check_missing_file_fails() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let mut cmd = Command::cargo_bin("pulse")?;
    cmd.arg("check").arg("--network").arg(tmp.path().join("absent.toml"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read network file"));
    Ok(())
}

#[test]
fn run_prints_spike_counts() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let path = write_network(tmp.path(), NETWORK)?;
    let mut cmd = Command::cargo_bin("pulse")?;
    cmd.args(["run", "--steps", "2000", "--network"]).arg(&path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("spike_source"))
        .stdout(predicate::str::contains("total:"));
    Ok(())
}

#[test]
fn run_json_is_identical_across_worker_counts() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let path = write_network(tmp.path(), NETWORK)?;
    let mut outputs = Vec::new();
    for workers in ["1", "3"] {
        let mut cmd = Command::cargo_bin("pulse")?;
        cmd.args(["run", "--json", "--steps", "2000", "--workers", workers, "--network"])
            .arg(&path);
        let output = cmd.assert().success().get_output().stdout.clone();
        outputs.push(serde_json::from_slice::<serde_json::Value>(&output)?);
    }
    assert_eq!(outputs[0], outputs[1]);

    let report = &outputs[0];
    assert_eq!(report["steps"], 2000);
    assert_eq!(report["min_delay"], 10);
    let spikes = report["spikes"].as_array().ok_or("spikes is not an array")?;
    // the source fires at 1, 5 and 9 ms
    let source_steps: Vec<u64> = spikes
        .iter()
        .filter(|s| s["unit"] == 2)
        .filter_map(|s| s["step"].as_u64())
        .collect();
    assert_eq!(source_steps, vec![10, 50, 90]);
    Ok(())
}

#[test]
fn run_requires_positive_steps() -> Result<(), Box<dyn Error>> {
    let tmp = tempdir()?;
    let path = write_network(tmp.path(), NETWORK)?;
    let mut cmd = Command::cargo_bin("pulse")?;
    cmd.args(["run", "--steps", "0", "--network"]).arg(&path);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--steps"));
    Ok(())
}
