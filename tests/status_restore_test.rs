mod common;

use common::slack_cmd;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const NO_API: &str = "http://127.0.0.1:9/api";

fn seed_archive(out_dir: &Path, channels: &str) {
    let data = out_dir.join("data");
    fs::create_dir_all(&data).expect("mkdir data");
    fs::write(data.join("channels.json"), channels).expect("channels");
}

#[test]
fn status_reports_progress_and_last_run() {
    let tmp = tempdir().expect("tempdir");
    let out_dir = tmp.path().join("slack-archive");
    seed_archive(
        &out_dir,
        r#"[{"id":"C1","name":"general"},{"id":"C2","name":"old-project","is_archived":true}]"#,
    );
    fs::write(
        out_dir.join("data/slack-archive.json"),
        r#"{"auth":{"ok":true,"user":"archiver","team":"Acme"},"channels":{"C1":{"fullyDownloaded":false,"messages":2},"C2":{"fullyDownloaded":true,"messages":7}}}"#,
    )
    .expect("state");
    fs::write(out_dir.join(".last-successful-run"), "2024-05-01T12:30:00.250Z").expect("marker");

    slack_cmd(tmp.path(), NO_API)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("channel.C1=general messages=2 complete=false"))
        .stdout(predicate::str::contains("channel.C2=old-project messages=7 complete=true"))
        .stdout(predicate::str::contains("messages.total=9"))
        .stdout(predicate::str::contains("auth.user=archiver team=Acme"))
        .stdout(predicate::str::contains("last_run=2024-05-01T12:30:00"))
        .stdout(predicate::str::contains("backups.count=0"));
}

#[test]
fn status_json_flags_missing_token() {
    let tmp = tempdir().expect("tempdir");

    slack_cmd(tmp.path(), NO_API)
        .env_remove("SLACK_TOKEN")
        .args(["status", "--json"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("\"ok\": false"))
        .stdout(predicate::str::contains("no Slack token"))
        .stdout(predicate::str::contains("last_run=never"));
}

#[test]
fn restore_without_backups_reports_issue() {
    let tmp = tempdir().expect("tempdir");

    slack_cmd(tmp.path(), NO_API)
        .arg("restore")
        .assert()
        .failure()
        .stdout(predicate::str::contains("no backups found"));
}

#[test]
fn restore_replaces_archive_with_newest_snapshot() {
    let tmp = tempdir().expect("tempdir");
    let out_dir = tmp.path().join("slack-archive");
    let backups = tmp.path().join("backup");
    seed_archive(&out_dir, "[]\n");
    fs::write(out_dir.join("data/C9.json"), "[]\n").expect("stray");
    seed_archive(
        &backups.join("backup-20240501-120000-000"),
        r#"[{"id":"C0","name":"older"}]"#,
    );
    seed_archive(
        &backups.join("backup-20240502-120000-000"),
        r#"[{"id":"C1","name":"general"}]"#,
    );

    slack_cmd(tmp.path(), NO_API)
        .arg("restore")
        .assert()
        .success()
        .stdout(predicate::str::contains("restored=backup-20240502-120000-000"));

    let restored = fs::read_to_string(out_dir.join("data/channels.json")).expect("read");
    assert!(restored.contains("general"));
    assert!(!out_dir.join("data/C9.json").exists());
    assert!(backups.join("backup-20240502-120000-000").is_dir());
}

#[test]
fn restore_by_name_picks_that_snapshot() {
    let tmp = tempdir().expect("tempdir");
    let out_dir = tmp.path().join("slack-archive");
    let backups = tmp.path().join("backup");
    seed_archive(
        &backups.join("backup-20240501-120000-000"),
        r#"[{"id":"C0","name":"older"}]"#,
    );
    seed_archive(
        &backups.join("backup-20240502-120000-000"),
        r#"[{"id":"C1","name":"general"}]"#,
    );

    slack_cmd(tmp.path(), NO_API)
        .args(["restore", "backup-20240501-120000-000"])
        .assert()
        .success();

    let restored = fs::read_to_string(out_dir.join("data/channels.json")).expect("read");
    assert!(restored.contains("older"));

    slack_cmd(tmp.path(), NO_API)
        .args(["restore", "backup-19990101-000000-000"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("not found"));
}
