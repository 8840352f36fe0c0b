use std::io::Write;
use std::net::TcpListener;
use std::time::Duration;

use reqwest::Client;
use tempfile::{NamedTempFile, TempDir};
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Config without ticketing system or gateway: the API serves the journal only.
fn minimal_config(port: u16, db_path: &str) -> String {
    format!(
        r#"
[server]
host = "127.0.0.1"
port = {}

[database]
path = "{}"

[notifier]
distribution_list = "mail-ops@example.com"
"#,
        port, db_path
    )
}

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Spawn the server and return a handle
async fn spawn_server(config_path: &std::path::Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_qrelease"))
        .env("QRELEASE_CONFIG", config_path)
        .env("RUST_LOG", "error") // Quiet logs during tests
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Run the binary to completion and return whether it exited successfully.
async fn run_to_exit(config_path: &std::path::Path) -> bool {
    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_qrelease"))
            .env("QRELEASE_CONFIG", config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    result.status.success()
}

#[tokio::test]
async fn test_server_starts_in_journal_only_mode() {
    let port = get_available_port();
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("qrelease.db");
    let config = write_config(&minimal_config(port, db_path.to_str().unwrap()));

    let mut server = spawn_server(config.path()).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let health: serde_json::Value = client
        .get(format!("http://127.0.0.1:{}/api/v1/health", port))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(health["status"], "ok");

    let status: serde_json::Value = client
        .get(format!("http://127.0.0.1:{}/api/v1/engine/status", port))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(status["available"], false);

    assert!(db_path.exists(), "Database file should be created");

    server.kill().await.ok();
}

#[tokio::test]
async fn test_config_endpoint_reports_defaults() {
    let port = get_available_port();
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("qrelease.db");
    let config = write_config(&minimal_config(port, db_path.to_str().unwrap()));

    let mut server = spawn_server(config.path()).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let json: serde_json::Value = Client::new()
        .get(format!("http://127.0.0.1:{}/api/v1/config", port))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");

    assert_eq!(json["server"]["port"], port);
    assert_eq!(json["notifier"]["subject_prefix"], "[qrelease]");
    assert_eq!(json["engine"]["retry_max_attempts"], 3);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    assert!(!run_to_exit(std::path::Path::new("/nonexistent/config.toml")).await);
}

#[tokio::test]
async fn test_missing_notifier_section_exits_with_error() {
    let config = write_config(
        r#"
[server]
port = 8080
"#,
    );

    assert!(!run_to_exit(config.path()).await);
}

#[tokio::test]
async fn test_invalid_engine_config_exits_with_error() {
    let config = write_config(
        r#"
[notifier]
distribution_list = "mail-ops@example.com"

[engine]
max_concurrent_tickets = 0
"#,
    );

    assert!(!run_to_exit(config.path()).await);
}
