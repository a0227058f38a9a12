// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Shared test utilities to reduce duplication across test modules.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::app::App;
use crate::error::ProviderError;
use crate::lifecycle::TunnelManager;
use crate::store::CaptureStore;
use crate::tunnel::TunnelProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCall {
    Open,
    Close,
}

#[derive(Default)]
struct TapState {
    calls: Vec<ProviderCall>,
    in_flight: bool,
    overlapped: bool,
    lose_tunnel: Option<oneshot::Sender<String>>,
}

/// Observes a [`ScriptedProvider`] from the outside.
#[derive(Clone, Default)]
pub struct ProviderTap {
    inner: Arc<Mutex<TapState>>,
}

impl ProviderTap {
    fn enter(&self, call: ProviderCall) {
        let mut s = self.inner.lock().expect("tap lock");
        if s.in_flight {
            s.overlapped = true;
        }
        s.in_flight = true;
        s.calls.push(call);
    }

    fn leave(&self) {
        self.inner.lock().expect("tap lock").in_flight = false;
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.inner.lock().expect("tap lock").calls.clone()
    }

    pub fn count(&self, call: ProviderCall) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    /// True if any two provider calls were ever in progress at once.
    pub fn overlapped(&self) -> bool {
        self.inner.lock().expect("tap lock").overlapped
    }

    /// Make the currently open tunnel go away with `reason`. Returns false
    /// when there is no open tunnel to lose.
    pub fn lose_tunnel(&self, reason: &str) -> bool {
        let sender = self.inner.lock().expect("tap lock").lose_tunnel.take();
        match sender {
            Some(tx) => tx.send(reason.to_string()).is_ok(),
            None => false,
        }
    }

    fn arm(&self, tx: oneshot::Sender<String>) {
        self.inner.lock().expect("tap lock").lose_tunnel = Some(tx);
    }

    fn disarm(&self) {
        self.inner.lock().expect("tap lock").lose_tunnel = None;
    }
}

/// Provider that returns queued outcomes, or numbered URLs once the queue
/// is empty, optionally pausing inside every call.
pub struct ScriptedProvider {
    tap: ProviderTap,
    outcomes: VecDeque<Result<String, ProviderError>>,
    close_error: Option<String>,
    delay: Duration,
    opened: usize,
    closed: Option<oneshot::Receiver<String>>,
}

impl ScriptedProvider {
    pub fn new() -> (Self, ProviderTap) {
        let tap = ProviderTap::default();
        let provider = Self {
            tap: tap.clone(),
            outcomes: VecDeque::new(),
            close_error: None,
            delay: Duration::ZERO,
            opened: 0,
            closed: None,
        };
        (provider, tap)
    }

    pub fn fail_next_open(mut self, message: &str) -> Self {
        self.outcomes.push_back(Err(ProviderError::new(message)));
        self
    }

    pub fn succeed_next_open(mut self, url: &str) -> Self {
        self.outcomes.push_back(Ok(url.to_string()));
        self
    }

    pub fn fail_close(mut self, message: &str) -> Self {
        self.close_error = Some(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TunnelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&mut self, _local_port: u16) -> Result<String, ProviderError> {
        self.tap.enter(ProviderCall::Open);
        tokio::time::sleep(self.delay).await;
        self.opened += 1;
        let outcome = self
            .outcomes
            .pop_front()
            .unwrap_or_else(|| Ok(format!("https://tunnel-{}.example.test", self.opened)));
        if outcome.is_ok() {
            let (tx, rx) = oneshot::channel();
            self.tap.arm(tx);
            self.closed = Some(rx);
        }
        self.tap.leave();
        outcome
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        self.tap.enter(ProviderCall::Close);
        tokio::time::sleep(self.delay).await;
        self.tap.disarm();
        self.closed = None;
        self.tap.leave();
        match &self.close_error {
            Some(m) => Err(ProviderError::new(m.clone())),
            None => Ok(()),
        }
    }

    fn closed_signal(&mut self) -> Option<oneshot::Receiver<String>> {
        self.closed.take()
    }
}

/// Manager and store wired to a scripted provider, without a durable log.
pub fn make_test_manager(provider: ScriptedProvider) -> (Arc<TunnelManager>, Arc<CaptureStore>) {
    let store = Arc::new(CaptureStore::new(None));
    let manager = Arc::new(TunnelManager::new(Box::new(provider), store.clone(), 5000));
    (manager, store)
}

pub fn make_test_app(provider: ScriptedProvider) -> Arc<App> {
    let (manager, store) = make_test_manager(provider);
    Arc::new(App::new(manager, store))
}

pub fn make_temp_log_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("request_logger_{}_{}.txt", name, uuid::Uuid::new_v4()))
}
