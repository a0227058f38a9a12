// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Public HTTP endpoint over a pluggable tunnel, capturing every request.
//!
//! This library provides the tunnel lifecycle, the capture store with its
//! durable log, and the local HTTP server that ingests and serves captures.

pub mod app;
pub mod capture;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod routes;
pub mod server;
pub mod store;
pub mod tunnel;

#[cfg(test)]
mod test_helpers;
