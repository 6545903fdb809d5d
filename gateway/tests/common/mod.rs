#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::print_stdout,
    clippy::allow_attributes
)]
use std::{net::SocketAddr, process::Stdio};

use reqwest::Response;
use tempfile::NamedTempFile;
use tokio::{
    io::AsyncBufReadExt,
    process::{Child, Command},
    sync::mpsc::UnboundedReceiver,
};

const LISTENING_MARKER: &str = "listening on 127.0.0.1:";

pub fn gateway_path() -> String {
    // Compatibility with 'cargo nextest archive': https://nexte.st/docs/ci-features/archiving/#making-tests-relocatable
    std::env::var("NEXTEST_BIN_EXE_admission-gateway")
        .unwrap_or_else(|_| env!("CARGO_BIN_EXE_admission-gateway").to_string())
}

fn write_config(config_str: &str) -> NamedTempFile {
    let tmpfile = NamedTempFile::new().unwrap();
    std::fs::write(tmpfile.path(), config_str).unwrap();
    tmpfile
}

fn gateway_command(config_file: &NamedTempFile, extra_args: &[&str]) -> Command {
    let mut builder = Command::new(gateway_path());
    builder
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .args([
            "--config-file",
            config_file.path().to_str().unwrap(),
            "--log-format",
            "json",
        ])
        .args(extra_args)
        // Make sure we don't inherit `RUST_LOG` from the outer `cargo test/nextest` invocation
        .env_remove("RUST_LOG")
        .kill_on_drop(true);
    builder
}

/// Starts the gateway on a random loopback port with `rate_limiting_config` as the
/// `[rate_limiting]` table, and waits until it is listening.
pub async fn start_gateway_on_random_port(rate_limiting_config: &str) -> ChildData {
    let config_file = write_config(&format!(
        r#"
        [gateway]
        bind_address = "127.0.0.1:0"

        [rate_limiting]
        {rate_limiting_config}
        "#
    ));

    let mut child = gateway_command(&config_file, &[]).spawn().unwrap();
    let mut stdout = tokio::io::BufReader::new(child.stdout.take().unwrap()).lines();

    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(line) = stdout.next_line().await.unwrap() {
            println!("{line}");
            let _ = line_tx.send(line);
        }
    });

    let mut listening_line = None;
    let mut output = Vec::new();
    while let Some(line) = line_rx.recv().await {
        output.push(line.clone());
        if line.contains(LISTENING_MARKER) {
            // The listening line is the last line of the startup message
            listening_line = Some(line);
            break;
        }
    }

    let port = listening_line
        .expect("Gateway exited before listening")
        .split_once(LISTENING_MARKER)
        .expect("Gateway didn't log listening line")
        .1
        .split('"')
        .next()
        .unwrap()
        .parse::<u16>()
        .unwrap();

    ChildData {
        addr: format!("127.0.0.1:{port}").parse::<SocketAddr>().unwrap(),
        output,
        stdout: line_rx,
        child,
        _config_file: config_file,
    }
}

/// Runs the gateway with a config file and extra CLI args that should make it exit during
/// startup, and returns everything it logged.
pub async fn start_gateway_expect_failure(config_str: &str, extra_args: &[&str]) -> Vec<String> {
    let config_file = write_config(config_str);
    let output = gateway_command(&config_file, extra_args)
        .output()
        .await
        .unwrap();
    assert!(
        !output.status.success(),
        "Gateway should have failed to start"
    );
    String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[expect(dead_code)] // Not all tests use all fields
pub struct ChildData {
    pub addr: SocketAddr,
    pub output: Vec<String>,
    pub stdout: UnboundedReceiver<String>,
    // This kills the child on drop
    pub child: Child,
    _config_file: NamedTempFile,
}

impl ChildData {
    pub async fn get(&self, path: &str) -> Response {
        reqwest::Client::new()
            .get(format!("http://{}{path}", self.addr))
            .send()
            .await
            .unwrap()
    }
}
