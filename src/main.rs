// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

use clap::Parser;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use request_logger::app::App;
use request_logger::capture::CaptureLog;
use request_logger::config::{self, ProviderKind};
use request_logger::lifecycle::TunnelManager;
use request_logger::store::CaptureStore;
use request_logger::{server, tunnel};

#[derive(Parser, Debug)]
#[command(name = "request-logger")]
struct Args {
    /// Listen address, e.g. 127.0.0.1:5000
    #[arg(long)]
    listen: Option<String>,

    /// Path of the append-only capture log
    #[arg(long)]
    log_file: Option<String>,

    /// Tunnel provider
    #[arg(long, value_enum)]
    provider: Option<ProviderKind>,

    /// Optional config TOML path
    #[arg(long)]
    config: Option<String>,
}

async fn load_config(args: &Args) -> config::Config {
    let mut cfg = if let Some(ref p) = args.config {
        config::Config::load_from_path(p).await.unwrap_or_else(|e| {
            warn!(%p, %e, "failed to load config, using defaults");
            config::Config::default()
        })
    } else {
        config::Config::default()
    };

    if let Some(listen) = &args.listen {
        cfg.general.listen = listen.clone();
    }
    if let Some(log_file) = &args.log_file {
        cfg.general.log_file = log_file.clone();
    }
    if let Some(provider) = args.provider {
        cfg.tunnel.provider = provider;
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let cfg = Arc::new(load_config(&args).await);
    let addr: SocketAddr = cfg.general.listen.parse()?;

    let listener = TcpListener::bind(addr).await?;
    let local_port = listener.local_addr()?.port();

    let log = CaptureLog::new(&cfg.general.log_file);
    let store = Arc::new(CaptureStore::new(Some(log.clone())));
    let provider = tunnel::build_provider(&cfg.tunnel)?;
    let tunnel = Arc::new(TunnelManager::new(provider, store.clone(), local_port));
    let app = Arc::new(App::new(tunnel.clone(), store));

    let opener = tunnel.clone();
    tokio::spawn(async move {
        opener.open().await;
    });

    serve_until(listener, app, log, shutdown_signal()?).await;
    Ok(())
}

/// Serve until the server fails or `stop` resolves, then release the tunnel
/// and drain the capture log. Both steps run on every exit path.
async fn serve_until<F>(listener: TcpListener, app: Arc<App>, log: CaptureLog, stop: F)
where
    F: Future<Output = &'static str>,
{
    let tunnel = app.tunnel().clone();
    tokio::select! {
        res = server::run_server(listener, app) => {
            if let Err(e) = res {
                error!(%e, "server error");
            }
        }
        name = stop => {
            info!(signal = name, "shutting down");
        }
    }

    tunnel.shutdown().await;
    log.flush().await;
}

/// Resolves with the name of the first termination signal received.
/// Handlers are installed before this returns.
#[cfg(unix)]
fn shutdown_signal() -> anyhow::Result<impl Future<Output = &'static str>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    let mut hup = signal(SignalKind::hangup())?;
    Ok(async move {
        tokio::select! {
            _ = signal::ctrl_c() => "SIGINT",
            _ = term.recv() => "SIGTERM",
            _ = hup.recv() => "SIGHUP",
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> anyhow::Result<impl Future<Output = &'static str>> {
    Ok(async {
        let _ = signal::ctrl_c().await;
        "ctrl-c"
    })
}
