//! End-to-end CLI tests for the attachment-downloader binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn bin() -> Command {
    let mut cmd = Command::cargo_bin("attachment-downloader").unwrap();
    cmd.env_remove("EXPORT_TOKEN").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    bin()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Download the files attached"));
}

#[test]
fn test_binary_version_displays_version() {
    bin()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("attachment-downloader"));
}

#[test]
fn test_binary_missing_output_flag_fails() {
    bin()
        .arg("files.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--output"));
}

#[test]
fn test_binary_missing_manifest_file_fails() {
    let tmp = TempDir::new().unwrap();
    bin()
        .arg(tmp.path().join("nope.json"))
        .arg("-o")
        .arg(tmp.path().join("out"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read manifest"));
}

#[test]
fn test_binary_malformed_manifest_fails() {
    let tmp = TempDir::new().unwrap();
    bin()
        .arg("-")
        .arg("-o")
        .arg(tmp.path())
        .write_stdin(r#"{"not": "an array"}"#)
        .assert()
        .failure()
        .stderr(predicate::str::contains("JSON array"));
}

#[test]
fn test_binary_invalid_config_file_fails() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("config.json");
    std::fs::write(&config, r#"{"workers": 0}"#).unwrap();

    bin()
        .arg("-")
        .arg("-o")
        .arg(tmp.path().join("out"))
        .arg("--config")
        .arg(&config)
        .write_stdin("[]")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid worker count"));
}

#[test]
fn test_binary_empty_manifest_creates_private_dir() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("export");

    bin()
        .arg("-")
        .arg("-o")
        .arg(&out)
        .write_stdin("[]")
        .assert()
        .success()
        .stdout(predicate::str::contains("0 of 0 files downloaded"));

    assert!(out.is_dir());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&out).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}

#[tokio::test]
async fn test_binary_downloads_manifest_files() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/F1"))
        .and(header("authorization", "Bearer xoxp-cli"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"first".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/F2"))
        .and(header("authorization", "Bearer xoxp-cli"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"second".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let manifest = tmp.path().join("files.json");
    std::fs::write(
        &manifest,
        format!(
            r#"[
                {{"id": "F1", "name": "a.txt", "url": "{uri}/files/F1", "size": 5}},
                {{"id": "F2", "name": "b.txt", "url": "{uri}/files/F2", "size": 6}},
                {{"id": "F1", "name": "a.txt", "url": "{uri}/files/F1", "size": 5}}
            ]"#,
            uri = server.uri()
        ),
    )
    .unwrap();
    let out = tmp.path().join("out");

    let assert = {
        let out = out.clone();
        tokio::task::spawn_blocking(move || {
            bin()
                .arg(&manifest)
                .arg("-o")
                .arg(&out)
                .args(["-l", "0", "-w", "2"])
                .env("EXPORT_TOKEN", "xoxp-cli")
                .assert()
        })
        .await
        .unwrap()
    };

    assert
        .success()
        .stdout(predicate::str::contains("2 of 2 files downloaded (11 bytes), 0 failed"));
    assert_eq!(std::fs::read(out.join("F1-a.txt")).unwrap(), b"first");
    assert_eq!(std::fs::read(out.join("F2-b.txt")).unwrap(), b"second");
}

#[tokio::test]
async fn test_binary_reports_failed_files() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let stdin = format!(
        r#"[{{"id": "F1", "name": "a.txt", "url": "{}/files/F1", "size": 5}}]"#,
        server.uri()
    );
    let out = tmp.path().join("out");

    let assert = tokio::task::spawn_blocking(move || {
        bin()
            .arg("-")
            .arg("-o")
            .arg(&out)
            .args(["-l", "0"])
            .write_stdin(stdin)
            .assert()
    })
    .await
    .unwrap();

    assert
        .failure()
        .stdout(predicate::str::contains("0 of 1 files downloaded"))
        .stderr(predicate::str::contains("1 file(s) failed"));
}
