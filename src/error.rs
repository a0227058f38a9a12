// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Error kinds, each contained by the component that produces it.

use thiserror::Error;

/// A tunnel could not be opened or closed.
///
/// Only the message is kept: callers record it into the tunnel state and
/// report it through the status API, nothing more.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ProviderError {
    message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An inbound request could not be turned into a captured payload.
#[derive(Debug, Error)]
pub enum IngestionError {
    #[error("failed to read request body: {0}")]
    Body(String),

    #[error("request body exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("request body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// The durable log could not be appended to.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append to log file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
