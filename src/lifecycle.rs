// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Tunnel lifecycle: the single owner of the tunnel state.
//!
//! ```text
//! Closed --open--> Opening --ok--> Open
//!                  Opening --err-> Error
//! Open --closed by provider--> Error
//! Open|Error --rotate--> Opening      (close, clear captures, open)
//! Open|Error --shutdown--> Closed     (terminal)
//! ```
//!
//! `open`, `rotate` and `shutdown` run one at a time behind the provider
//! lock; a caller that arrives while another operation is in flight waits
//! for it and then acts on the resulting state.

use std::sync::{Arc, RwLock, RwLockWriteGuard};
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info, warn};

use crate::store::CaptureStore;
use crate::tunnel::TunnelProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    Closed,
    Opening,
    Open,
    Error,
}

/// Current tunnel state. An address exists only while open and an error
/// message only after a failed open or a tunnel lost while open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TunnelState {
    #[default]
    Closed,
    Opening,
    Open {
        address: String,
    },
    Error {
        message: String,
    },
}

impl TunnelState {
    pub fn status(&self) -> TunnelStatus {
        match self {
            TunnelState::Closed => TunnelStatus::Closed,
            TunnelState::Opening => TunnelStatus::Opening,
            TunnelState::Open { .. } => TunnelStatus::Open,
            TunnelState::Error { .. } => TunnelStatus::Error,
        }
    }

    pub fn address(&self) -> Option<&str> {
        match self {
            TunnelState::Open { address } => Some(address),
            _ => None,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        match self {
            TunnelState::Error { message } => Some(message),
            _ => None,
        }
    }
}

struct Slot {
    provider: Box<dyn TunnelProvider>,
    shut_down: bool,
}

// `epoch` changes on every transition, so a close notice for an earlier
// tunnel can tell it is stale.
#[derive(Default)]
struct Published {
    state: TunnelState,
    epoch: u64,
}

pub struct TunnelManager {
    slot: Mutex<Slot>,
    state: Arc<RwLock<Published>>,
    store: Arc<CaptureStore>,
    provider_name: String,
    local_port: u16,
}

impl TunnelManager {
    /// `local_port` is the port the tunnel forwards to.
    pub fn new(provider: Box<dyn TunnelProvider>, store: Arc<CaptureStore>, local_port: u16) -> Self {
        let provider_name = provider.name().to_string();
        Self {
            slot: Mutex::new(Slot {
                provider,
                shut_down: false,
            }),
            state: Arc::new(RwLock::new(Published::default())),
            store,
            provider_name,
            local_port,
        }
    }

    /// Snapshot of the current state. Never waits on a tunnel operation.
    pub fn state(&self) -> TunnelState {
        match self.state.read() {
            Ok(p) => p.state.clone(),
            Err(poisoned) => {
                warn!("tunnel state lock poisoned during read");
                poisoned.into_inner().state.clone()
            }
        }
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Open the tunnel unless it is already open.
    pub async fn open(&self) -> TunnelState {
        let mut slot = self.slot.lock().await;
        if slot.shut_down {
            warn!("open requested after shutdown, ignoring");
            return self.state();
        }
        match self.state().status() {
            TunnelStatus::Open | TunnelStatus::Opening => self.state(),
            TunnelStatus::Closed | TunnelStatus::Error => self.open_locked(&mut slot).await,
        }
    }

    /// Replace the tunnel with a fresh one and drop every captured request.
    ///
    /// Close failures are logged and ignored. The captures stay cleared even
    /// when the new tunnel fails to open; the state is then `Error`.
    pub async fn rotate(&self) -> TunnelState {
        let mut slot = self.slot.lock().await;
        if slot.shut_down {
            warn!("rotate requested after shutdown, ignoring");
            return self.state();
        }

        if let Err(e) = slot.provider.close().await {
            warn!(provider = %self.provider_name, error = %e, "failed to close tunnel during rotation");
        }
        self.store.clear();
        self.open_locked(&mut slot).await
    }

    /// Close the tunnel for good. Later `open` and `rotate` calls are no-ops.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        if slot.shut_down {
            return;
        }
        slot.shut_down = true;

        if let Err(e) = slot.provider.close().await {
            error!(provider = %self.provider_name, error = %e, "failed to close tunnel on shutdown");
        }
        self.set_state(TunnelState::Closed);
        info!(provider = %self.provider_name, "tunnel closed");
    }

    async fn open_locked(&self, slot: &mut Slot) -> TunnelState {
        self.set_state(TunnelState::Opening);

        match slot.provider.open(self.local_port).await {
            Ok(address) => {
                info!(provider = %self.provider_name, %address, "tunnel open");
                let next = TunnelState::Open { address };
                let epoch = self.set_state(next.clone());
                if let Some(closed) = slot.provider.closed_signal() {
                    self.watch_for_close(closed, epoch);
                }
                next
            }
            Err(e) => {
                error!(provider = %self.provider_name, error = %e, "failed to open tunnel");
                let next = TunnelState::Error {
                    message: e.message().to_string(),
                };
                self.set_state(next.clone());
                next
            }
        }
    }

    // Move to `Error` if the tunnel opened at `epoch` goes away on its own
    // while nothing else has changed the state since.
    fn watch_for_close(&self, closed: oneshot::Receiver<String>, epoch: u64) {
        let state = self.state.clone();
        let provider = self.provider_name.clone();
        tokio::spawn(async move {
            let Ok(message) = closed.await else {
                return;
            };
            let mut published = write_published(&state);
            if published.epoch != epoch {
                return;
            }
            warn!(%provider, %message, "tunnel lost");
            published.state = TunnelState::Error { message };
            published.epoch += 1;
        });
    }

    /// Publish `next` and return its epoch.
    fn set_state(&self, next: TunnelState) -> u64 {
        let mut published = write_published(&self.state);
        published.state = next;
        published.epoch += 1;
        published.epoch
    }
}

fn write_published(state: &RwLock<Published>) -> RwLockWriteGuard<'_, Published> {
    state.write().unwrap_or_else(|poisoned| {
        warn!("tunnel state lock poisoned during write");
        poisoned.into_inner()
    })
}
