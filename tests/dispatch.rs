use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use cassa_print::{DispatchClient, QueueName};
use helpers::FakeLp;

mod helpers;

fn write_script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("lp");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn queue(name: &str) -> QueueName {
    QueueName::parse(name).unwrap()
}

#[tokio::test]
async fn successful_print_returns_command_output() {
    let lp = FakeLp::succeeding();
    let client = lp.client();

    let result = client
        .send(&queue("cucina"), "  *** COMANDA CUCINA ***\n")
        .await
        .expect("Failed to send");

    assert!(result.success);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.raw_output, "request id is fake-1 (1 file(s))");
    assert_eq!(lp.queues(), vec!["cucina"]);
    assert_eq!(lp.payloads(), "  *** COMANDA CUCINA ***\n");
}

#[tokio::test]
async fn failing_print_keeps_exit_code_and_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(&dir, "echo 'lp: Error - no such destination' >&2\nexit 3");
    let client = DispatchClient::new(&path, Duration::from_secs(5));

    let result = client.send(&queue("bar"), "x").await.expect("Failed to send");

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.raw_output, "lp: Error - no such destination");
    assert_eq!(result.failure_message(), "lp: Error - no such destination");
}

#[tokio::test]
async fn silent_failure_mentions_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(&dir, "exit 2");
    let client = DispatchClient::new(&path, Duration::from_secs(5));

    let result = client.send(&queue("bar"), "x").await.expect("Failed to send");

    assert_eq!(result.failure_message(), "print command exited with status 2");
}

#[tokio::test]
async fn hung_print_command_is_killed_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_script(&dir, "sleep 30");
    let client = DispatchClient::new(&path, Duration::from_millis(200));

    let start = Instant::now();
    let result = client.send(&queue("cassa"), "x").await.expect("Failed to send");

    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(!result.success);
    assert_eq!(result.exit_code, None);
    assert_eq!(result.raw_output, "print command timed out after 200 ms");
}

#[tokio::test]
async fn payload_file_is_removed_after_sending() {
    let dir = tempfile::tempdir().unwrap();
    let seen = dir.path().join("seen");
    let path = write_script(&dir, &format!("echo \"$3\" > '{}'", seen.display()));
    let client = DispatchClient::new(&path, Duration::from_secs(5));

    let result = client
        .send(&queue("cucina"), "ticket")
        .await
        .expect("Failed to send");
    assert!(result.success);

    let file = PathBuf::from(std::fs::read_to_string(&seen).unwrap().trim());
    let name = file.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("comanda_"));
    assert!(name.ends_with(".txt"));
    assert!(!file.exists());
}

#[tokio::test]
async fn arguments_reach_the_command_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let args = dir.path().join("args");
    let path = write_script(
        &dir,
        &format!("printf '%s|' \"$#\" \"$1\" \"$2\" > '{}'", args.display()),
    );
    let client = DispatchClient::new(&path, Duration::from_secs(5));

    client
        .send(&queue("lan.printer-2"), "$(touch /tmp/pwned); `id`")
        .await
        .expect("Failed to send");

    assert_eq!(
        std::fs::read_to_string(&args).unwrap(),
        "3|-d|lan.printer-2|"
    );
}
