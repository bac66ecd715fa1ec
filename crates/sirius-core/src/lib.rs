// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sirius — Core types, error taxonomy, and gateway configuration shared
// across all crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::GatewayConfig;
pub use error::SiriusError;
pub use types::*;
