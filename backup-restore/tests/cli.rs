//! Command line behaviour: exit codes and list output.

use assert_cmd::Command;
use predicates::prelude::*;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const MANIFEST: &str = r#"{
    "lastbackup": "daily-1",
    "modified": {"/a/b.txt": {}},
    "deleted": ["/gone.txt"],
    "moved": {"/new.txt": {"original": "/old.txt"}}
}"#;

fn archive() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(5);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "a/b.txt", &b"hello"[..]).unwrap();
    builder.into_inner().unwrap()
}

/// Plaintext backup set plus an empty config file in `dir`.
fn setup(dir: &Path, files: &[(&str, &[u8])]) {
    let mut list = String::new();
    for (name, data) in files {
        fs::write(dir.join(name), data).unwrap();
        list.push_str(&format!("{}  {}\n", hex::encode(Sha256::digest(data)), name));
    }
    fs::write(dir.join("b.lst"), list).unwrap();
    fs::write(dir.join("restore.toml"), "").unwrap();
}

fn cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("backup-restore").unwrap();
    cmd.arg(dir.join("restore.toml")).arg(dir.join("b.tar"));
    cmd
}

#[test]
fn test_list_prints_plan() {
    let dir = TempDir::new().unwrap();
    setup(dir.path(), &[("b.tar", &archive()), ("b.json", MANIFEST.as_bytes())]);
    let target = dir.path().join("restore");

    cmd(dir.path())
        .arg("--list")
        .assert()
        .success()
        .stdout(predicate::str::contains("Parent backup: daily-1"))
        .stdout(predicate::str::contains("Modified: /a/b.txt"))
        .stdout(predicate::str::contains("Deleted: /gone.txt"))
        .stdout(predicate::str::contains("Moved: /old.txt -> /new.txt"));

    assert!(!target.exists());
}

#[test]
fn test_restore_extracts_archive() {
    let dir = TempDir::new().unwrap();
    setup(dir.path(), &[("b.tar", &archive()), ("b.json", MANIFEST.as_bytes())]);
    let target = dir.path().join("restore");

    cmd(dir.path()).arg("--restore").arg(&target).assert().success();
    assert_eq!(fs::read(target.join("a/b.txt")).unwrap(), b"hello");
}

#[test]
fn test_no_mode_only_verifies() {
    let dir = TempDir::new().unwrap();
    setup(dir.path(), &[("b.tar", &archive()), ("b.json", MANIFEST.as_bytes())]);

    cmd(dir.path()).assert().success().stdout(predicate::str::is_empty());
}

#[test]
fn test_corrupt_manifest_fails_even_forced() {
    let dir = TempDir::new().unwrap();
    setup(dir.path(), &[("b.tar", &archive()), ("b.json", MANIFEST.as_bytes())]);
    fs::write(dir.path().join("b.json"), "{}").unwrap();

    cmd(dir.path())
        .arg("--force")
        .arg("--restore")
        .arg(dir.path().join("restore"))
        .assert()
        .code(1);
    assert!(!dir.path().join("restore").exists());
}

#[test]
fn test_lineage_mismatch_fails() {
    let dir = TempDir::new().unwrap();
    setup(dir.path(), &[("b.tar", &archive()), ("b.json", MANIFEST.as_bytes())]);

    cmd(dir.path())
        .args(["--list", "--lastbackup", "daily-0"])
        .assert()
        .code(1);
}

#[test]
fn test_modes_are_exclusive() {
    let dir = TempDir::new().unwrap();
    setup(dir.path(), &[("b.tar", &archive()), ("b.json", MANIFEST.as_bytes())]);

    cmd(dir.path()).args(["--list", "--validate"]).assert().failure();
}

#[test]
fn test_missing_config_fails() {
    let dir = TempDir::new().unwrap();
    setup(dir.path(), &[("b.tar", &archive()), ("b.json", MANIFEST.as_bytes())]);

    Command::cargo_bin("backup-restore")
        .unwrap()
        .arg(dir.path().join("missing.toml"))
        .arg(dir.path().join("b.tar"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_missing_gpg_exits_255() {
    let dir = TempDir::new().unwrap();
    setup(dir.path(), &[("b.tar.gpg", b"sealed"), ("b.json", MANIFEST.as_bytes())]);
    fs::write(
        dir.path().join("restore.toml"),
        "[tools]\ngpg = \"definitely-not-a-real-gpg-binary\"\n",
    )
    .unwrap();

    Command::cargo_bin("backup-restore")
        .unwrap()
        .arg(dir.path().join("restore.toml"))
        .arg(dir.path().join("b.json"))
        .arg("--list")
        .assert()
        .code(255);
}
