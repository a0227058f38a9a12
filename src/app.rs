// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Shared application handle passed to every request handler.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::error;

use crate::lifecycle::{TunnelManager, TunnelState};
use crate::store::{CaptureStore, CapturedRequest};

/// Public endpoint as reported to clients. Absent values are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointStatus {
    pub url: String,
    pub error: String,
}

impl From<&TunnelState> for EndpointStatus {
    fn from(state: &TunnelState) -> Self {
        Self {
            url: state.address().unwrap_or_default().to_string(),
            error: state.last_error().unwrap_or_default().to_string(),
        }
    }
}

pub struct App {
    tunnel: Arc<TunnelManager>,
    store: Arc<CaptureStore>,
}

impl App {
    pub fn new(tunnel: Arc<TunnelManager>, store: Arc<CaptureStore>) -> Self {
        Self { tunnel, store }
    }

    pub fn tunnel(&self) -> &Arc<TunnelManager> {
        &self.tunnel
    }

    pub fn store(&self) -> &Arc<CaptureStore> {
        &self.store
    }

    pub fn status(&self) -> EndpointStatus {
        EndpointStatus::from(&self.tunnel.state())
    }

    /// Captured requests, newest first.
    pub fn history(&self) -> Vec<CapturedRequest> {
        self.store.list()
    }

    pub fn record(&self, payload: Value) -> CapturedRequest {
        self.store.record(payload)
    }

    /// Rotate the tunnel, then report the new endpoint.
    ///
    /// The rotation runs on its own task: a caller that goes away mid-way
    /// does not cancel it, so the tunnel never stays stuck in `Opening`.
    pub async fn rotate_and_status(&self) -> EndpointStatus {
        let tunnel = self.tunnel.clone();
        match tokio::spawn(async move { tunnel.rotate().await }).await {
            Ok(state) => EndpointStatus::from(&state),
            Err(e) => {
                error!(error = %e, "rotation task failed");
                self.status()
            }
        }
    }
}
