// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Sirius print gateway.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SiriusError};

/// Native raster width of the printer head, in dots.
pub const RASTER_WIDTH: u32 = 385;

/// Opaque, stable identifier of one physical printer.  The only routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Per-device print identifier.  Issued in strictly increasing order and
/// never reused while the process lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrintId(pub u32);

impl std::fmt::Display for PrintId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one transport connection.  A device that reconnects gets a new
/// connection id under the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a protocol session.
///
/// `AwaitingHello → Online ⇄ Sending → Offline`.  `Offline` is terminal; a
/// reconnect creates a fresh session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Transport is up, device has not identified itself yet.
    AwaitingHello,
    /// Idle and ready to accept a send.
    Online,
    /// A frame is on the wire and the session is waiting for its ack.
    Sending,
    /// Disconnected or heartbeat expired.
    Offline,
}

impl SessionState {
    /// Whether sends may be queued against a session in this state.
    pub fn accepts_sends(&self) -> bool {
        matches!(self, Self::Online | Self::Sending)
    }
}

/// Lifecycle of the device listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}

/// Bi-level raster stored as packed bits.
///
/// Rows are row-major, most-significant bit first, each padded to a whole
/// byte.  A set bit is a printed (black) dot.  Padding bits are always zero,
/// so two buffers with the same cells have byte-identical payloads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Bytes needed for one packed row of `width` dots.
    pub fn stride_for(width: u32) -> usize {
        (width as usize).div_ceil(8)
    }

    /// A buffer with every dot set to `on`.
    pub fn filled(width: u32, height: u32, on: bool) -> Self {
        let stride = Self::stride_for(width);
        let mut data = vec![0u8; stride * height as usize];
        if on {
            for row in data.chunks_mut(stride.max(1)) {
                fill_row(row, width);
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Pack one-byte-per-dot cells (each 0 or 1) into a buffer.
    pub fn from_cells(width: u32, height: u32, cells: &[u8]) -> Result<Self> {
        let expected = width as usize * height as usize;
        if cells.len() != expected {
            return Err(SiriusError::Encoding(format!(
                "expected {expected} cells for {width}x{height}, got {}",
                cells.len()
            )));
        }
        if let Some(bad) = cells.iter().find(|&&c| c > 1) {
            return Err(SiriusError::Encoding(format!(
                "cell value {bad} is not bi-level"
            )));
        }

        let stride = Self::stride_for(width);
        let mut data = vec![0u8; stride * height as usize];
        if width > 0 {
            for (y, row) in cells.chunks(width as usize).enumerate() {
                let out = &mut data[y * stride..(y + 1) * stride];
                for (x, &cell) in row.iter().enumerate() {
                    if cell == 1 {
                        out[x / 8] |= 0x80 >> (x % 8);
                    }
                }
            }
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build a buffer by asking `dot` for every cell.
    ///
    /// `dot` is called exactly once per cell, in row-major reading order, so
    /// it may carry state from one cell to the next.
    pub fn from_fn(width: u32, height: u32, mut dot: impl FnMut(u32, u32) -> bool) -> Self {
        let stride = Self::stride_for(width);
        let mut data = vec![0u8; stride * height as usize];
        for y in 0..height {
            let row = y as usize * stride;
            for x in 0..width {
                if dot(x, y) {
                    data[row + x as usize / 8] |= 0x80 >> (x % 8);
                }
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Wrap an already-packed payload.  Padding bits must be zero.
    pub fn from_packed(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let stride = Self::stride_for(width);
        if data.len() != stride * height as usize {
            return Err(SiriusError::Encoding(format!(
                "packed payload is {} bytes, {width}x{height} needs {}",
                data.len(),
                stride * height as usize
            )));
        }
        let spare = (stride * 8) as u32 - width;
        if spare > 0 {
            let mask = (1u8 << spare) - 1;
            if data.chunks(stride).any(|row| row[stride - 1] & mask != 0) {
                return Err(SiriusError::Encoding(
                    "row padding bits must be zero".into(),
                ));
            }
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        Self::stride_for(self.width)
    }

    /// The packed payload, `stride() * height()` bytes.
    pub fn packed(&self) -> &[u8] {
        &self.data
    }

    /// Packed bytes of row `y`.
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.stride();
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    /// Whether the dot at (`x`, `y`) is printed.
    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let byte = self.row(y)[x as usize / 8];
        byte & (0x80 >> (x % 8)) != 0
    }

    /// Number of printed dots in row `y`.
    pub fn count_on_in_row(&self, y: u32) -> u32 {
        self.row(y).iter().map(|b| b.count_ones()).sum()
    }

    /// Number of printed dots in the whole buffer.
    pub fn count_on(&self) -> u64 {
        self.data.iter().map(|b| u64::from(b.count_ones())).sum()
    }
}

fn fill_row(row: &mut [u8], width: u32) {
    let full = (width / 8) as usize;
    for byte in &mut row[..full] {
        *byte = 0xFF;
    }
    let rem = width % 8;
    if rem > 0 {
        row[full] = 0xFFu8 << (8 - rem);
    }
}
