// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Gateway configuration.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SiriusError};
use crate::types::RASTER_WIDTH;

/// Settings for the device listener and protocol sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address the device listener binds to.
    pub bind_address: IpAddr,
    /// TCP port devices connect to.
    pub port: u16,
    /// Raster width every bitmap must have, in dots.
    pub raster_width: u32,
    /// How long a send waits for the device to acknowledge.
    pub ack_timeout_ms: u64,
    /// Silence after which a connected device is considered gone.
    pub heartbeat_timeout_ms: u64,
    /// Time a fresh connection has to send its HELLO frame.
    pub handshake_timeout_ms: u64,
    /// Sends that may wait behind the active one, per device.
    pub queue_depth: usize,
    /// Largest inbound frame accepted from a device.
    pub max_frame_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            port: 4500,
            raster_width: RASTER_WIDTH,
            ack_timeout_ms: 10_000,
            heartbeat_timeout_ms: 60_000,
            handshake_timeout_ms: 10_000,
            queue_depth: 16,
            max_frame_bytes: 4 * 1024 * 1024,
        }
    }
}

impl GatewayConfig {
    /// Load settings from a JSON file.  A missing file yields defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(SiriusError::Io(e)),
        };
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        info!(path = %path.display(), "gateway configuration loaded");
        Ok(config)
    }

    /// Write settings as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.raster_width == 0 {
            return Err(SiriusError::Config("raster_width must be non-zero".into()));
        }
        if self.raster_width > u32::from(u16::MAX) {
            return Err(SiriusError::Config(format!(
                "raster_width {} exceeds the frame limit of {}",
                self.raster_width,
                u16::MAX
            )));
        }
        if self.queue_depth == 0 {
            return Err(SiriusError::Config("queue_depth must be non-zero".into()));
        }
        if self.ack_timeout_ms == 0
            || self.heartbeat_timeout_ms == 0
            || self.handshake_timeout_ms == 0
        {
            return Err(SiriusError::Config("timeouts must be non-zero".into()));
        }
        if self.max_frame_bytes < 8 {
            return Err(SiriusError::Config("max_frame_bytes is too small".into()));
        }
        Ok(())
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
