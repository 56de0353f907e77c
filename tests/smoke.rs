//! Smoke tests -- verify the binary runs and key subcommands work.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn vigilant() -> Command {
    let mut cmd = Command::cargo_bin("vigilant").unwrap();
    cmd.env_remove("VIGILANT_CONFIG")
        .env_remove("TELEGRAM_BOT_TOKEN")
        .env_remove("TELEGRAM_CHAT_ID")
        .env("RUST_LOG", "warn");
    cmd
}

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_cli_help() {
    vigilant()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("severity fusion"));
}

#[test]
fn test_cli_version() {
    vigilant()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("vigilant"));
}

#[test]
fn test_run_subcommand_exists() {
    vigilant()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--realtime"));
}

#[test]
fn test_check_config_prints_effective_settings() {
    let cfg = write_temp(
        r#"
[fusion]
detection_count_threshold = 12

[logging]
level = "warn"
"#,
    );
    vigilant()
        .args(["check-config", "--config"])
        .arg(cfg.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("detection_count_threshold = 12"))
        .stdout(predicate::str::contains("emergency-call"));
}

#[test]
fn test_check_config_redacts_secrets() {
    let cfg = write_temp(
        r#"
[[channels]]
id = "notification"
min_severity = "MILD"
min_interval_sec = 10

[channels.transport]
type = "telegram"
bot_token = "123456:very-secret"
chat_id = "42"
"#,
    );
    vigilant()
        .args(["check-config", "--config"])
        .arg(cfg.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("very-secret").not());
}

#[test]
fn test_check_config_rejects_missing_credentials() {
    let cfg = write_temp(
        r#"
[[channels]]
id = "notification"
min_severity = "MILD"
min_interval_sec = 10

[channels.transport]
type = "telegram"
"#,
    );
    vigilant()
        .args(["check-config", "--config"])
        .arg(cfg.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid configuration"));
}

#[test]
fn test_broken_config_from_env_fails_fast() {
    let cfg = write_temp("[fusion\nwindow_size_sec = ");
    vigilant()
        .env("VIGILANT_CONFIG", cfg.path())
        .args(["run", "--no-api"])
        .write_stdin("")
        .assert()
        .failure()
        .stderr(predicate::str::contains("VIGILANT_CONFIG"));
}

#[test]
fn test_run_replays_batches_and_fires() {
    let cfg = write_temp("[logging]\nlevel = \"warn\"\n");

    let mut lines = String::new();
    for i in 0..3 {
        let records: Vec<String> = (0..10)
            .map(|_| r#"{"confidence": 0.5, "class": "fight"}"#.to_string())
            .collect();
        lines.push_str(&format!(
            "{{\"offset_ms\": {}, \"detectors\": {{\"primary\": [{}]}}}}\n",
            i * 100,
            records.join(", ")
        ));
    }
    lines.push_str("not json\n");
    let source = write_temp(&lines);

    vigilant()
        .args(["run", "--no-api", "--config"])
        .arg(cfg.path())
        .arg("--source")
        .arg(source.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Frames:           3"))
        .stdout(predicate::str::contains("Skipped ticks:    1"))
        .stdout(predicate::str::contains("Alerts fired:     1"));
}

#[test]
fn test_run_reads_stdin() {
    vigilant()
        .args(["run", "--no-api"])
        .write_stdin("{\"offset_ms\": 0, \"detectors\": {}}\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Frames:           1"));
}
