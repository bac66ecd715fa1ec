// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Dispatch façade — the one entry point callers use to print on a device.
//
// `send` resolves the device through the registry, encodes the message
// before anything touches the wire, queues it on the device's session and
// reports `(success, print_id)` together with an error kind and a job
// record the caller can persist.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sirius_core::config::GatewayConfig;
use sirius_core::error::{ErrorKind, SiriusError};
use sirius_core::types::{DeviceAddress, PrintId};
use tracing::{info, instrument, warn};

use crate::codec::MessageEncoder;
use crate::messages::{Message, MessageKind};
use crate::registry::ConnectionRegistry;
use crate::session::{Delivery, PrintIdAllocator};

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// How a transmitted print ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Acknowledged,
    TimedOut,
    /// The device went away before acknowledging.
    Disconnected,
}

/// Record of one transmitted print, for the caller's audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintJob {
    pub print_id: PrintId,
    pub device: DeviceAddress,
    pub kind: MessageKind,
    /// Hex SHA-256 of the command payload (tag, count and bitmaps).
    pub payload_sha256: String,
    pub payload_bytes: usize,
    pub sent_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    pub status: JobStatus,
}

/// Result of one `send`.
///
/// `print_id` is present exactly when a frame was written, so
/// `(false, None)` means nothing reached the device and `(false, Some(_))`
/// means it was sent but not acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub print_id: Option<PrintId>,
    pub error: Option<ErrorKind>,
    pub job: Option<PrintJob>,
}

impl DispatchOutcome {
    fn rejected(error: &SiriusError) -> Self {
        Self {
            success: false,
            print_id: None,
            error: Some(error.kind()),
            job: None,
        }
    }

    /// The `(success, print_id)` pair.
    pub fn as_pair(&self) -> (bool, Option<PrintId>) {
        (self.success, self.print_id)
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes print commands to device sessions.
///
/// Cheap to clone; clones share the registry and print id counters.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    allocator: Arc<PrintIdAllocator>,
    config: Arc<GatewayConfig>,
    encoder: MessageEncoder,
}

impl Dispatcher {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_registry(config, Arc::new(ConnectionRegistry::new()))
    }

    pub fn with_registry(config: GatewayConfig, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            allocator: Arc::new(PrintIdAllocator::new()),
            encoder: MessageEncoder::new(config.raster_width),
            config: Arc::new(config),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn allocator(&self) -> &Arc<PrintIdAllocator> {
        &self.allocator
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Deliver `message` to the device at `address`.
    ///
    /// Blocks until the device acknowledges, the ack wait times out, or the
    /// send is rejected.  Never retries.
    #[instrument(skip_all, fields(device = %address, kind = ?message.kind()))]
    pub async fn send(&self, address: &DeviceAddress, message: &Message) -> DispatchOutcome {
        let Some(session) = self.registry.lookup(address) else {
            let err = SiriusError::DeviceUnknown(address.clone());
            warn!(error = %err, kind = %err.kind(), "dispatch rejected");
            return DispatchOutcome::rejected(&err);
        };

        if !session.state().accepts_sends() {
            let err = SiriusError::DeviceOffline(address.clone());
            warn!(error = %err, kind = %err.kind(), "dispatch rejected");
            return DispatchOutcome::rejected(&err);
        }

        let encoded = match self.encoder.encode(message) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(error = %err, kind = %err.kind(), "dispatch rejected");
                return DispatchOutcome::rejected(&err);
            }
        };
        let payload_sha256 = hex::encode(Sha256::digest(encoded.payload()));
        let payload_bytes = encoded.payload().len();
        let kind = encoded.kind();

        let Delivery {
            print_id,
            sent_at,
            resolved_at,
            result,
        } = session.submit(encoded).await;

        let Some(print_id) = print_id else {
            let err = result
                .err()
                .unwrap_or_else(|| SiriusError::DeviceOffline(address.clone()));
            warn!(error = %err, kind = %err.kind(), "dispatch rejected");
            return DispatchOutcome::rejected(&err);
        };

        let status = match &result {
            Ok(()) => JobStatus::Acknowledged,
            Err(SiriusError::AckTimeout { .. }) => JobStatus::TimedOut,
            Err(_) => JobStatus::Disconnected,
        };
        let job = PrintJob {
            print_id,
            device: address.clone(),
            kind,
            payload_sha256,
            payload_bytes,
            sent_at: sent_at.unwrap_or(resolved_at),
            resolved_at,
            status,
        };

        match result {
            Ok(()) => {
                info!(%print_id, "print acknowledged");
                DispatchOutcome {
                    success: true,
                    print_id: Some(print_id),
                    error: None,
                    job: Some(job),
                }
            }
            Err(err) => {
                warn!(%print_id, error = %err, kind = %err.kind(), "print not acknowledged");
                DispatchOutcome {
                    success: false,
                    print_id: Some(print_id),
                    error: Some(err.kind()),
                    job: Some(job),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirius_core::types::PixelBuffer;

    fn message() -> Message {
        Message::SetDelivery {
            pixels: PixelBuffer::filled(385, 8, false),
        }
    }

    #[tokio::test]
    async fn unknown_device_is_rejected_without_an_id() {
        let dispatcher = Dispatcher::new(GatewayConfig::default());
        let outcome = dispatcher
            .send(&DeviceAddress::new("never-seen"), &message())
            .await;
        assert_eq!(outcome.as_pair(), (false, None));
        assert_eq!(outcome.error, Some(ErrorKind::DeviceUnknown));
        assert!(outcome.job.is_none());
        assert_eq!(
            dispatcher.allocator().last_issued(&DeviceAddress::new("never-seen")),
            None
        );
    }

    #[test]
    fn outcome_serialises_for_persistence() {
        let outcome = DispatchOutcome {
            success: false,
            print_id: Some(PrintId(3)),
            error: Some(ErrorKind::AckTimeout),
            job: None,
        };
        let json = serde_json::to_string(&outcome).unwrap();
        let back: DispatchOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }
}
