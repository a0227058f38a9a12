// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use request_logger::app::App;
use request_logger::capture::CaptureLog;
use request_logger::lifecycle::TunnelManager;
use request_logger::server::run_server;
use request_logger::store::CaptureStore;
use request_logger::tunnel::TunnelProvider;

pub struct Running {
    pub handle: tokio::task::JoinHandle<()>,
    pub addr: SocketAddr,
    pub app: Arc<App>,
    pub log: CaptureLog,
    pub log_path: PathBuf,
}

pub fn make_temp_log_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "request_logger_integ_{}_{}.txt",
        name,
        uuid::Uuid::new_v4()
    ))
}

// Bind, wire the app around `provider` and serve in the background.
pub async fn start_server(provider: Box<dyn TunnelProvider>) -> anyhow::Result<Running> {
    let log_path = make_temp_log_path("server");
    let log = CaptureLog::new(log_path.clone());
    let store = Arc::new(CaptureStore::new(Some(log.clone())));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let tunnel = Arc::new(TunnelManager::new(provider, store.clone(), addr.port()));
    let app = Arc::new(App::new(tunnel, store));

    let app_for_spawn = app.clone();
    let handle = tokio::spawn(async move {
        let _ = run_server(listener, app_for_spawn).await;
    });

    Ok(Running {
        handle,
        addr,
        app,
        log,
        log_path,
    })
}

/// Send one HTTP/1.1 request and return `(status, body)`.
pub async fn send(
    addr: SocketAddr,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> anyhow::Result<(u16, serde_json::Value)> {
    let mut stream = TcpStream::connect(addr).await?;
    let body = body.unwrap_or("");
    let req = format!(
        "{method} {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(req.as_bytes()).await?;

    let mut buf = Vec::new();
    timeout(Duration::from_secs(5), stream.read_to_end(&mut buf)).await??;
    let text = String::from_utf8_lossy(&buf).to_string();

    let (head, payload) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| anyhow::anyhow!("malformed response: {text}"))?;
    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("missing status: {head}"))?
        .parse()?;
    let value = if payload.trim().is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_str(payload.trim())?
    };
    Ok((status, value))
}
