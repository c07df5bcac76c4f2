//! Smoke tests -- verify the binary runs and the offline subcommands work.

use std::path::Path;

use assert_cmd::Command;
use tempfile::TempDir;

fn write_config(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("supportbundles.toml");
    let db = dir.join("bundles.db");
    std::fs::write(
        &path,
        format!(
            "[storage]\ndb_path = \"{}\"\n\n[logging]\nlevel = \"warn\"\n",
            db.display()
        ),
    )
    .unwrap();
    path
}

fn cli(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("supportbundles").unwrap();
    cmd.arg("--config").arg(config);
    cmd
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("supportbundles")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("Diagnostic support bundle lifecycle service"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("supportbundles")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("supportbundles"));
}

#[test]
fn test_serve_subcommand_exists() {
    Command::cargo_bin("supportbundles")
        .unwrap()
        .args(["serve", "--help"])
        .assert()
        .success();
}

#[test]
fn test_list_empty_store() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    cli(&config)
        .arg("list")
        .assert()
        .success()
        .stdout(predicates::str::contains("No support bundles found."));
}

#[test]
fn test_collectors_lists_builtins() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    cli(&config)
        .arg("collectors")
        .assert()
        .success()
        .stdout(predicates::str::contains("basic"))
        .stdout(predicates::str::contains("settings"))
        .stdout(predicates::str::contains("db"));
}

#[test]
fn test_create_export_remove() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let output = cli(&config)
        .args(["create", "--collectors", "settings", "--creator", "ops"])
        .assert()
        .success()
        .stdout(predicates::str::contains("State:    complete"))
        .get_output()
        .stdout
        .clone();
    let stdout = String::from_utf8(output).unwrap();
    let uid = stdout
        .lines()
        .find_map(|line| line.strip_prefix("=== Support Bundle "))
        .and_then(|rest| rest.strip_suffix(" ==="))
        .unwrap()
        .to_string();

    let archive = dir.path().join("bundle.tar.zst");
    cli(&config)
        .args(["export", &uid, "--output"])
        .arg(&archive)
        .assert()
        .success();
    assert!(std::fs::metadata(&archive).unwrap().len() > 0);

    cli(&config)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicates::str::contains("\"stats.bundles.count\": 1"));

    cli(&config).args(["remove", &uid]).assert().success();

    cli(&config)
        .args(["get", &uid])
        .assert()
        .failure()
        .stderr(predicates::str::contains("not found"));
}

#[test]
fn test_missing_config_file_fails() {
    Command::cargo_bin("supportbundles")
        .unwrap()
        .args(["--config", "/nonexistent/supportbundles.toml", "list"])
        .assert()
        .failure();
}

#[test]
fn test_config_load_is_logged() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    cli(&config)
        .env_remove("RUST_LOG")
        .arg("list")
        .assert()
        .success()
        .stdout(predicates::str::contains("loaded support bundle configuration"));
}
