use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let settings = dir.path().join("settings.yml");
    std::fs::write(
        &settings,
        format!(
            "sources_root: {0}/sources\nmerged_root: {0}/merged\nstate_root: {0}/state\n",
            dir.path().display()
        ),
    )
    .unwrap();
    settings
}

#[test]
fn validate_accepts_a_minimal_config() {
    let dir = TempDir::new().unwrap();
    let settings = write_config(&dir);

    Command::cargo_bin("shelfmerged")
        .unwrap()
        .args(["--config", settings.to_str().unwrap(), "config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"));
}

#[test]
fn validate_reads_sibling_documents() {
    let dir = TempDir::new().unwrap();
    let settings = write_config(&dir);
    std::fs::write(
        dir.path().join("manga_equivalents.yml"),
        "groups:\n  Manga Alpha:\n    - The Manga Alpha\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("source_priority.yml"), "sources:\n  - diskA\n").unwrap();

    Command::cargo_bin("shelfmerged")
        .unwrap()
        .args(["--config", settings.to_str().unwrap(), "config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("equivalence groups: 1"));
}

#[test]
fn conflicting_alias_fails_validation_with_usage_exit_code() {
    let dir = TempDir::new().unwrap();
    let settings = write_config(&dir);
    std::fs::write(
        dir.path().join("manga_equivalents.yml"),
        "groups:\n  A:\n    - x\n  B:\n    - x\n",
    )
    .unwrap();

    Command::cargo_bin("shelfmerged")
        .unwrap()
        .args(["--config", settings.to_str().unwrap(), "config", "validate"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("maps to both"));
}

#[test]
fn missing_settings_file_exits_with_usage_code() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope/settings.yml");

    Command::cargo_bin("shelfmerged")
        .unwrap()
        .args(["--config", missing.to_str().unwrap(), "config", "validate"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn config_show_emits_json_when_asked() {
    let dir = TempDir::new().unwrap();
    let settings = write_config(&dir);

    Command::cargo_bin("shelfmerged")
        .unwrap()
        .args([
            "--config",
            settings.to_str().unwrap(),
            "config",
            "show",
            "--json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"merge_interval_secs\": 300"));
}

#[test]
fn relative_roots_are_rejected() {
    let dir = TempDir::new().unwrap();
    let settings = dir.path().join("settings.yml");
    std::fs::write(
        &settings,
        "sources_root: relative/sources\nmerged_root: /m\nstate_root: /s\n",
    )
    .unwrap();

    Command::cargo_bin("shelfmerged")
        .unwrap()
        .args(["--config", settings.to_str().unwrap(), "config", "validate"])
        .assert()
        .code(64)
        .stderr(predicate::str::contains("absolute"));
}
