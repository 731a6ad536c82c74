//! End-to-end tests running the `app-mock` binary as a child process.

use reqwest::StatusCode;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

const BIN: &str = env!("CARGO_BIN_EXE_app-mock");

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn spawn_mock(port: u16) -> Child {
    let port = port.to_string();
    Command::new(BIN)
        .args([
            port.as_str(),
            "/lifecycle",
            "v1",
            "http://127.0.0.1:9",
            "--bind",
            "127.0.0.1",
        ])
        .env("MESOS_TASK_ID", "lifecycle.1")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("spawn app-mock")
}

async fn wait_until_up(client: &reqwest::Client, port: u16) {
    let url = format!("http://127.0.0.1:{port}/ping");
    for _ in 0..100 {
        if let Ok(response) = client.get(&url).send().await {
            assert_eq!(response.text().await.unwrap(), "Pong /lifecycle");
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("app-mock did not come up on port {port}");
}

async fn suicide(client: &reqwest::Client, child: &mut Child, port: u16) {
    let response = client
        .delete(format!("http://127.0.0.1:{port}/suicide"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
        .await
        .expect("app-mock kept running after suicide")
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn test_suicide_terminates_process() {
    let port = free_port();
    let client = reqwest::Client::new();
    let mut child = spawn_mock(port);

    wait_until_up(&client, port).await;
    suicide(&client, &mut child, port).await;

    let after = client
        .get(format!("http://127.0.0.1:{port}/ping"))
        .send()
        .await;
    assert!(after.is_err());
}

#[tokio::test]
async fn test_port_rebinds_after_shutdown() {
    let port = free_port();
    let client = reqwest::Client::new();

    let mut first = spawn_mock(port);
    wait_until_up(&client, port).await;
    suicide(&client, &mut first, port).await;

    let mut second = spawn_mock(port);
    wait_until_up(&client, port).await;
    suicide(&client, &mut second, port).await;
}

#[tokio::test]
async fn test_sigterm_stops_server() {
    let port = free_port();
    let client = reqwest::Client::new();
    let mut child = spawn_mock(port);
    wait_until_up(&client, port).await;

    let pid = child.id().expect("child pid");
    let pid = nix::unistd::Pid::from_raw(i32::try_from(pid).unwrap());
    nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM).unwrap();

    let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
        .await
        .expect("app-mock ignored SIGTERM")
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn test_bind_conflict_exits_with_failure() {
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let mut child = spawn_mock(port);
    let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
        .await
        .expect("app-mock kept running despite the port being taken")
        .unwrap();

    assert!(!status.success());
    drop(holder);
}
