// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Sirius.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DeviceAddress, PrintId};

/// Top-level error type for all Sirius operations.
#[derive(Debug, Error)]
pub enum SiriusError {
    // -- Dispatch errors --
    #[error("device {0} has never connected")]
    DeviceUnknown(DeviceAddress),

    #[error("device {0} is offline")]
    DeviceOffline(DeviceAddress),

    #[error("device {address} is busy ({depth} sends already queued)")]
    DeviceBusy { address: DeviceAddress, depth: usize },

    #[error("print {print_id} was not acknowledged within {timeout_ms}ms")]
    AckTimeout { print_id: PrintId, timeout_ms: u64 },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    // -- Encoding errors --
    #[error("encoding failed: {0}")]
    Encoding(String),

    #[error("image processing failed: {0}")]
    Image(String),

    // -- Configuration / plumbing --
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SiriusError {
    /// Classify this error for logging and dispatch records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceUnknown(_) => ErrorKind::DeviceUnknown,
            Self::DeviceOffline(_) => ErrorKind::DeviceOffline,
            Self::DeviceBusy { .. } => ErrorKind::DeviceBusy,
            Self::AckTimeout { .. } => ErrorKind::AckTimeout,
            Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::Encoding(_) | Self::Image(_) => ErrorKind::Encoding,
            Self::Config(_) | Self::Io(_) | Self::Serialization(_) => ErrorKind::Internal,
        }
    }
}

/// Flat classification of a failed dispatch, suitable for audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No registry entry for the address.
    DeviceUnknown,
    /// Session exists but is not online.
    DeviceOffline,
    /// Per-device send queue is full.
    DeviceBusy,
    /// Wrong raster width or undecodable source image; nothing was sent.
    Encoding,
    /// Frame was written but no matching ack arrived in time.
    AckTimeout,
    /// Unexpected or malformed frame from the device.
    ProtocolViolation,
    /// Local failure unrelated to the device.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::DeviceUnknown => "device-unknown",
            Self::DeviceOffline => "device-offline",
            Self::DeviceBusy => "device-busy",
            Self::Encoding => "encoding-error",
            Self::AckTimeout => "ack-timeout",
            Self::ProtocolViolation => "protocol-violation",
            Self::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SiriusError>;
