// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Tunnel providers: the capability of exposing a local port at a public
//! address.
//!
//! The lifecycle manager only ever talks to a `Box<dyn TunnelProvider>`;
//! which implementation backs it is a configuration choice.

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::config::{ProviderKind, TunnelConfig};
use crate::error::ProviderError;

pub mod command;
pub mod fixed;
pub mod localtunnel;

pub use command::CommandTunnel;
pub use fixed::FixedAddress;
pub use localtunnel::LocalTunnel;

/// Opens and closes a public-to-local HTTP tunnel.
///
/// Implementations must:
/// - treat `close` on a closed tunnel as success;
/// - close any existing tunnel before opening a new one;
/// - not retry on their own.
#[async_trait]
pub trait TunnelProvider: Send {
    /// Short provider name, for logs.
    fn name(&self) -> &str;

    /// Expose `local_port` and return the public address.
    async fn open(&mut self, local_port: u16) -> Result<String, ProviderError>;

    async fn close(&mut self) -> Result<(), ProviderError>;

    /// Fires with a reason if the tunnel from the last successful `open`
    /// goes away without `close` being called. Handed out once per open;
    /// the sender is dropped on `close`.
    fn closed_signal(&mut self) -> Option<oneshot::Receiver<String>> {
        None
    }
}

/// Build the provider selected by `cfg`.
pub fn build_provider(cfg: &TunnelConfig) -> anyhow::Result<Box<dyn TunnelProvider>> {
    let provider: Box<dyn TunnelProvider> = match cfg.provider {
        ProviderKind::Localtunnel => Box::new(LocalTunnel::new(&cfg.host, cfg.subdomain.clone())?),
        ProviderKind::Command => {
            let mut cmd = CommandTunnel::new(cfg.command.clone(), cfg.args.clone());
            if let Some(token) = &cfg.auth_token {
                cmd = cmd.env("NGROK_AUTHTOKEN", token.clone());
            }
            Box::new(cmd)
        }
        ProviderKind::Fixed => Box::new(FixedAddress::new(cfg.address.clone())),
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ProviderKind::Localtunnel, "localtunnel")]
    #[case(ProviderKind::Command, "command")]
    #[case(ProviderKind::Fixed, "fixed")]
    #[tokio::test]
    async fn build_provider_selects_by_kind(
        #[case] kind: ProviderKind,
        #[case] expected: &str,
    ) -> anyhow::Result<()> {
        let cfg = TunnelConfig {
            provider: kind,
            ..TunnelConfig::default()
        };
        let provider = build_provider(&cfg)?;
        assert_eq!(provider.name(), expected);
        Ok(())
    }
}
