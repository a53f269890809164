#![cfg(not(target_arch = "wasm32"))]

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::tempdir;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("disks.json");
    fs::write(&path, body).unwrap();
    path
}

fn ramctl() -> Command {
    let mut cmd = Command::cargo_bin("aero-ramctl").unwrap();
    cmd.env_remove("AERO_RAMCTL_LOG");
    cmd
}

fn reports(stdout: &[u8]) -> Vec<Value> {
    std::str::from_utf8(stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[test]
fn reports_geometry_for_each_disk() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"{
            "disks": [
                { "name": "disk0", "block_size": 512, "block_count": 16 },
                { "name": "scratch", "block_size": 4096, "block_count": 3 }
            ]
        }"#,
    );

    let out = ramctl().arg("--config").arg(&config).assert().success();
    let reports = reports(&out.get_output().stdout);

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0]["name"], "disk0");
    assert_eq!(reports[0]["blockSize"], 512);
    assert_eq!(reports[0]["blockCount"], 16);
    assert_eq!(reports[0]["capacityBytes"], 8192);
    assert_eq!(reports[0]["imageBytes"], 0);
    assert_eq!(reports[1]["capacityBytes"], 12288);
}

#[test]
fn image_is_padded_and_dumped() {
    let dir = tempdir().unwrap();
    let image: Vec<u8> = (0..700u32).map(|i| (i % 251) as u8).collect();
    fs::write(dir.path().join("boot.img"), &image).unwrap();
    let config = write_config(
        dir.path(),
        r#"{ "disks": [ { "name": "disk0", "block_size": 512, "block_count": 4, "image": "boot.img" } ] }"#,
    );
    let dump = dir.path().join("disk0.bin");

    let out = ramctl()
        .arg("--config")
        .arg(&config)
        .arg("--self-check")
        .arg("--dump")
        .arg(format!("disk0={}", dump.display()))
        .assert()
        .success();
    let reports = reports(&out.get_output().stdout);
    assert_eq!(reports[0]["imageBytes"], 1024);

    let contents = fs::read(&dump).unwrap();
    assert_eq!(contents.len(), 2048);
    assert_eq!(&contents[..700], image.as_slice());
    assert!(contents[700..].iter().all(|b| *b == 0));
}

#[test]
fn oversized_image_is_truncated() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("big.img"), vec![0xEE; 5000]).unwrap();
    let config = write_config(
        dir.path(),
        r#"{ "disks": [ { "name": "small", "block_size": 1024, "block_count": 2, "image": "big.img" } ] }"#,
    );

    let out = ramctl().arg("--config").arg(&config).assert().success();
    let reports = reports(&out.get_output().stdout);
    assert_eq!(reports[0]["imageBytes"], 2048);
}

#[test]
fn duplicate_disk_name_fails() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"{
            "disks": [
                { "name": "disk0", "block_size": 512, "block_count": 1 },
                { "name": "disk0", "block_size": 512, "block_count": 1 }
            ]
        }"#,
    );

    ramctl()
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("configure disk \"disk0\""));
}

#[test]
fn quota_exhaustion_fails() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"{
            "controller": { "max_total_bytes": 4096 },
            "disks": [
                { "name": "a", "block_size": 512, "block_count": 8 },
                { "name": "b", "block_size": 512, "block_count": 1 }
            ]
        }"#,
    );

    ramctl()
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("configure disk \"b\""));
}

#[test]
fn invalid_geometry_fails() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"{ "disks": [ { "name": "zero", "block_size": 0, "block_count": 8 } ] }"#,
    );

    ramctl().arg("--config").arg(&config).assert().failure();
}

#[test]
fn dump_of_unknown_disk_fails() {
    let dir = tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"{ "disks": [ { "name": "disk0", "block_size": 512, "block_count": 1 } ] }"#,
    );

    ramctl()
        .arg("--config")
        .arg(&config)
        .arg("--dump")
        .arg(format!("nope={}", dir.path().join("x.bin").display()))
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown disk"));
}

#[test]
fn missing_config_file_fails() {
    let dir = tempdir().unwrap();
    ramctl()
        .arg("--config")
        .arg(dir.path().join("absent.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("read config"));
}
