// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Local HTTP server: accept loop and connection serving.

use hyper::body::Incoming;
use hyper::{service::service_fn, Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoConnBuilder;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

use crate::app::App;
use crate::routes::{handle_request, ResponseBody};

type ServiceFuture = Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, Infallible>> + Send>>;

/// Serve `app` on an already bound listener until an accept error occurs.
///
/// The listener is bound by the caller so the tunnel can be pointed at the
/// actual local port before traffic arrives.
pub async fn run_server(listener: TcpListener, app: Arc<App>) -> anyhow::Result<()> {
    run_server_with_limit(listener, app, None).await
}

/// Testable variant of `run_server` that accepts an optional `accept_limit`.
/// When `accept_limit` is `Some(n)`, the loop returns after accepting the Nth
/// connection. Connection handlers are spawned and may still be running when
/// this function returns.
pub async fn run_server_with_limit(
    listener: TcpListener,
    app: Arc<App>,
    accept_limit: Option<usize>,
) -> anyhow::Result<()> {
    info!(listen = %listener.local_addr()?, "listening");

    let server_builder = AutoConnBuilder::new(TokioExecutor::new());

    let mut remaining = accept_limit;
    loop {
        if let Some(0) = remaining {
            break;
        }

        let (stream, remote_addr) = listener.accept().await?;

        if let Some(ref mut n) = remaining {
            *n -= 1;
        }

        let app = app.clone();
        let builder = server_builder.clone();
        let span = tracing::debug_span!("conn", id = %Uuid::new_v4(), remote = %remote_addr);
        tokio::spawn(
            async move {
                debug!("accepted");
                let service = service_fn(move |req: Request<Incoming>| {
                    let app = app.clone();
                    let fut: ServiceFuture = Box::pin(handle_request(req, app));
                    fut
                });

                let io = TokioIo::new(stream);
                if let Err(e) = builder.serve_connection(io, service).await {
                    error!(%e, "connection error");
                }
            }
            .instrument(span),
        );
    }

    Ok(())
}
