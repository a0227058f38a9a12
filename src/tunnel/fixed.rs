// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Externally managed tunnel with a known public address.

use async_trait::async_trait;

use super::TunnelProvider;
use crate::error::ProviderError;

pub struct FixedAddress {
    address: Option<String>,
    open: bool,
}

impl FixedAddress {
    pub fn new(address: Option<String>) -> Self {
        Self {
            address,
            open: false,
        }
    }
}

#[async_trait]
impl TunnelProvider for FixedAddress {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn open(&mut self, _local_port: u16) -> Result<String, ProviderError> {
        let address = self
            .address
            .clone()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| ProviderError::new("no fixed tunnel address configured"))?;
        self.open = true;
        Ok(address)
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        self.open = false;
        Ok(())
    }
}
