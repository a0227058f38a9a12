// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Tunnel backed by an external program such as `ngrok`.
//!
//! The program is started with `{port}` substituted in its arguments. The
//! first `http://` or `https://` URL it prints on stdout that does not point
//! at a loopback host is taken as the public address. The child is killed
//! on `close` and when the provider is dropped. If the program exits on its
//! own afterwards, the closed signal fires.

use async_trait::async_trait;
use hyper::Uri;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::TunnelProvider;
use crate::error::ProviderError;

const PORT_PLACEHOLDER: &str = "{port}";

pub struct CommandTunnel {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    child: Option<Child>,
    drain: Option<JoinHandle<()>>,
    closed: Option<oneshot::Receiver<String>>,
}

impl CommandTunnel {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self {
            program,
            args,
            env: Vec::new(),
            child: None,
            drain: None,
            closed: None,
        }
    }

    /// Set an environment variable for the spawned program.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn command(&self, local_port: u16) -> Command {
        let port = local_port.to_string();
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|a| a.replace(PORT_PLACEHOLDER, &port)))
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TunnelProvider for CommandTunnel {
    fn name(&self) -> &str {
        "command"
    }

    async fn open(&mut self, local_port: u16) -> Result<String, ProviderError> {
        self.close().await?;

        let mut child = self
            .command(local_port)
            .spawn()
            .map_err(|e| ProviderError::new(format!("failed to start {}: {}", self.program, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::new("tunnel program stdout not captured"))?;
        let mut lines = BufReader::new(stdout).lines();

        loop {
            let line = lines.next_line().await.map_err(|e| {
                ProviderError::new(format!("failed to read {} output: {}", self.program, e))
            })?;
            let Some(line) = line else {
                let status = child.wait().await.map_err(|e| {
                    ProviderError::new(format!("failed to wait for {}: {}", self.program, e))
                })?;
                return Err(ProviderError::new(format!(
                    "{} exited ({}) before reporting a public url",
                    self.program, status
                )));
            };
            trace!(%line, "tunnel program output");
            if let Some(url) = find_public_url(&line) {
                info!(program = %self.program, pid = child.id(), %url, "tunnel program started");
                let (closed_tx, closed_rx) = oneshot::channel();
                self.drain = Some(tokio::spawn(drain(lines, self.program.clone(), closed_tx)));
                self.closed = Some(closed_rx);
                self.child = Some(child);
                return Ok(url);
            }
        }
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        // stop the drain first so a deliberate kill never reads as a crash
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
        self.closed = None;

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Ok(Some(status)) = child.try_wait() {
            warn!(program = %self.program, %status, "tunnel program had already exited");
            return Ok(());
        }
        child
            .kill()
            .await
            .map_err(|e| ProviderError::new(format!("failed to stop {}: {}", self.program, e)))?;
        debug!(program = %self.program, "tunnel program stopped");
        Ok(())
    }

    fn closed_signal(&mut self) -> Option<oneshot::Receiver<String>> {
        self.closed.take()
    }
}

// Keep reading so the child never blocks on a full pipe. End of output
// means the program is gone.
async fn drain(
    mut lines: tokio::io::Lines<BufReader<ChildStdout>>,
    program: String,
    closed: oneshot::Sender<String>,
) {
    while let Ok(Some(line)) = lines.next_line().await {
        trace!(%line, "tunnel program output");
    }
    warn!(%program, "tunnel program output ended");
    let _ = closed.send(format!("tunnel closed: {program} exited"));
}

/// Pick the first non-loopback http(s) URL out of a line of program output.
///
/// Handles bare URLs as well as `key=value` (logfmt) and quoted forms.
pub fn find_public_url(line: &str) -> Option<String> {
    let mut rest = line;
    while let Some(start) = rest.find("http") {
        let candidate = &rest[start..];
        let end = candidate
            .find(|c: char| c.is_whitespace() || c == '"' || c == '\'' || c == ',')
            .unwrap_or(candidate.len());
        let token = candidate[..end].trim_end_matches(['.', ')', ']']);

        if token.starts_with("http://") || token.starts_with("https://") {
            if let Ok(uri) = token.parse::<Uri>() {
                if let Some(host) = uri.host() {
                    if !is_loopback(host) {
                        return Some(token.to_string());
                    }
                }
            }
        }
        rest = &candidate[end.max(4)..];
    }
    None
}

fn is_loopback(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback() || ip.is_unspecified())
            .unwrap_or(false)
}
