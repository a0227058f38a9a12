// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Native client for the localtunnel protocol.
//!
//! `GET {host}/?new` (or `GET {host}/{subdomain}`) asks the server for a
//! tunnel and returns the public URL plus a TCP port on the server. The
//! client then keeps up to `max_conn_count` raw TCP connections open to that
//! port and pipes each one to the local server. The server refusing a
//! connection to that port means it dropped the tunnel.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Uri};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use std::io::ErrorKind;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

use super::TunnelProvider;
use crate::error::ProviderError;

const MAX_CONNECTIONS: usize = 10;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

type HttpClient = LegacyClient<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

// Shared by the workers of one tunnel; the first to find it dead reports it.
type ClosedSender = Arc<Mutex<Option<oneshot::Sender<String>>>>;

/// Server reply to a tunnel request.
#[derive(Debug, Deserialize)]
struct Assignment {
    id: String,
    url: String,
    port: u16,
    #[serde(default)]
    max_conn_count: Option<usize>,
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerMessage {
    message: String,
}

pub struct LocalTunnel {
    client: HttpClient,
    host: Uri,
    subdomain: Option<String>,
    workers: Option<JoinSet<()>>,
    closed: Option<oneshot::Receiver<String>>,
}

impl LocalTunnel {
    pub fn new(host: &str, subdomain: Option<String>) -> anyhow::Result<Self> {
        let host: Uri = host.trim_end_matches('/').parse()?;
        if host.host().is_none() {
            anyhow::bail!("localtunnel host {host} has no hostname");
        }

        let https = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client: HttpClient = LegacyClient::builder(TokioExecutor::new()).build(https);

        Ok(Self {
            client,
            host,
            subdomain,
            workers: None,
            closed: None,
        })
    }

    fn request_uri(&self) -> Result<Uri, ProviderError> {
        let base = self.host.to_string();
        let base = base.trim_end_matches('/');
        let s = match &self.subdomain {
            Some(sub) => format!("{}/{}", base, sub),
            None => format!("{}/?new", base),
        };
        s.parse()
            .map_err(|e| ProviderError::new(format!("invalid localtunnel request uri {s}: {e}")))
    }

    async fn request_assignment(&self) -> Result<Assignment, ProviderError> {
        let uri = self.request_uri()?;
        let req = Request::builder()
            .method("GET")
            .uri(uri.clone())
            .body(Full::new(Bytes::new()))
            .map_err(|e| ProviderError::new(format!("failed to build request: {e}")))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| ProviderError::new(format!("localtunnel request to {uri} failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| ProviderError::new(format!("failed to read localtunnel response: {e}")))?
            .to_bytes();

        if !status.is_success() {
            let detail = serde_json::from_slice::<ServerMessage>(&body)
                .map(|m| m.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            return Err(ProviderError::new(format!(
                "localtunnel server returned {}: {}",
                status.as_u16(),
                detail
            )));
        }

        serde_json::from_slice(&body)
            .map_err(|e| ProviderError::new(format!("unexpected localtunnel response: {e}")))
    }
}

#[async_trait]
impl TunnelProvider for LocalTunnel {
    fn name(&self) -> &str {
        "localtunnel"
    }

    async fn open(&mut self, local_port: u16) -> Result<String, ProviderError> {
        self.close().await?;

        let assignment = self.request_assignment().await?;
        let remote_host = assignment
            .ip
            .clone()
            .or_else(|| self.host.host().map(str::to_string))
            .ok_or_else(|| ProviderError::new("localtunnel host has no hostname"))?;
        let conns = assignment
            .max_conn_count
            .unwrap_or(1)
            .clamp(1, MAX_CONNECTIONS);

        let (closed_tx, closed_rx) = oneshot::channel();
        let closed_tx: ClosedSender = Arc::new(Mutex::new(Some(closed_tx)));
        let mut workers = JoinSet::new();
        for slot in 0..conns {
            workers.spawn(pump(
                slot,
                remote_host.clone(),
                assignment.port,
                local_port,
                closed_tx.clone(),
            ));
        }
        self.workers = Some(workers);
        self.closed = Some(closed_rx);

        info!(id = %assignment.id, url = %assignment.url, conns, "localtunnel assigned");
        Ok(assignment.url)
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        self.closed = None;
        if let Some(mut workers) = self.workers.take() {
            workers.shutdown().await;
            debug!("localtunnel connections closed");
        }
        Ok(())
    }

    fn closed_signal(&mut self) -> Option<oneshot::Receiver<String>> {
        self.closed.take()
    }
}

// Keep one tunnel connection alive, re-dialing whenever it ends. Stops for
// good once the server refuses the tunnel port.
async fn pump(
    slot: usize,
    remote_host: String,
    remote_port: u16,
    local_port: u16,
    closed: ClosedSender,
) {
    loop {
        let mut remote = match TcpStream::connect((remote_host.as_str(), remote_port)).await {
            Ok(remote) => remote,
            Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                warn!(slot, error = %e, "localtunnel server refused connection");
                let sender = closed.lock().ok().and_then(|mut s| s.take());
                if let Some(sender) = sender {
                    let _ = sender.send(format!(
                        "tunnel closed: {remote_host}:{remote_port} refused connection"
                    ));
                }
                return;
            }
            Err(e) => {
                debug!(slot, error = %e, "tunnel connection failed");
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        match forward(&mut remote, local_port).await {
            Ok((up, down)) => {
                trace!(slot, up, down, "tunnel connection finished");
                if up == 0 && down == 0 {
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
            Err(e) => {
                debug!(slot, error = %e, "tunnel connection failed");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

async fn forward(remote: &mut TcpStream, local_port: u16) -> std::io::Result<(u64, u64)> {
    let mut local = TcpStream::connect(("127.0.0.1", local_port)).await?;
    tokio::io::copy_bidirectional(remote, &mut local).await
}
