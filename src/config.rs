// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Configuration loading.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Listen address, e.g. 127.0.0.1:5000
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path of the append-only capture log
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

fn default_listen() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_log_file() -> String {
    "capturedLogs.txt".to_string()
}

fn default_tunnel_host() -> String {
    "http://requestlogger.site".to_string()
}

fn default_command() -> String {
    "ngrok".to_string()
}

fn default_command_args() -> Vec<String> {
    ["http", "{port}", "--log", "stdout", "--log-format", "logfmt"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_file: default_log_file(),
        }
    }
}

/// Which tunnel provider backs the public endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Native localtunnel protocol client
    #[default]
    Localtunnel,
    /// External tunnel program that prints its public URL (e.g. ngrok)
    Command,
    /// Externally managed, fixed public address
    Fixed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    /// localtunnel server
    #[serde(default = "default_tunnel_host")]
    pub host: String,

    /// Requested localtunnel subdomain
    #[serde(default)]
    pub subdomain: Option<String>,

    /// Exported to the command provider as NGROK_AUTHTOKEN
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default = "default_command")]
    pub command: String,

    /// Arguments for `command`; `{port}` is replaced with the local port
    #[serde(default = "default_command_args")]
    pub args: Vec<String>,

    /// Public address reported by the fixed provider
    #[serde(default)]
    pub address: Option<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            host: default_tunnel_host(),
            subdomain: None,
            auth_token: None,
            command: default_command(),
            args: default_command_args(),
            address: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub tunnel: TunnelConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Every section and key is optional:
    ///
    /// [general]
    /// listen = "127.0.0.1:5000"
    /// log_file = "capturedLogs.txt"
    ///
    /// [tunnel]
    /// provider = "command"
    /// command = "ngrok"
    /// args = ["http", "{port}", "--log", "stdout", "--log-format", "logfmt"]
    pub async fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let s = tokio::fs::read_to_string(path.as_ref()).await?;
        let cfg: Self = toml::from_str(&s)?;
        Ok(cfg)
    }
}
