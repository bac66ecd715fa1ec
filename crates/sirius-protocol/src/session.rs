// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Protocol session — one per connected device.
//
// The session owns the write half of the device connection.  Sends are
// queued on a bounded FIFO and drained by a single worker task, so frames to
// one device go out strictly one at a time in arrival order.  The read half
// is driven by `read_loop`, which forwards acks to the worker and watches the
// heartbeat.
//
//   AwaitingHello -> Online <-> Sending -> Offline

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sirius_core::config::GatewayConfig;
use sirius_core::error::{Result, SiriusError};
use sirius_core::types::{ConnectionId, DeviceAddress, PrintId, SessionState};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::codec::{self, DeviceFrame, EncodedMessage};

// ---------------------------------------------------------------------------
// Print id allocation
// ---------------------------------------------------------------------------

/// Per-device print id counters, shared by every session the process opens.
///
/// A device that reconnects keeps counting from where its previous session
/// stopped.  Counters live in memory only and restart at 1 with the process.
#[derive(Debug, Default)]
pub struct PrintIdAllocator {
    counters: Mutex<HashMap<DeviceAddress, Arc<AtomicU32>>>,
}

impl PrintIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter for `address`, created on first use.
    pub fn counter(&self, address: &DeviceAddress) -> Arc<AtomicU32> {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(counters.entry(address.clone()).or_default())
    }

    /// Last id handed out to `address`, if any.
    pub fn last_issued(&self, address: &DeviceAddress) -> Option<PrintId> {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters
            .get(address)
            .map(|c| c.load(Ordering::SeqCst))
            .filter(|&n| n > 0)
            .map(PrintId)
    }
}

// ---------------------------------------------------------------------------
// Offline reasons
// ---------------------------------------------------------------------------

/// Why a session left the online states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReason {
    /// The device closed the connection.
    Disconnected,
    /// Nothing arrived within the heartbeat timeout.
    HeartbeatTimeout,
    /// The same device connected again and took over the address.
    Replaced,
    /// Writing a command to the device failed.
    WriteFailed,
    /// The inbound stream broke or could not be resynchronised.
    ReadFailed,
    /// The gateway is shutting down.
    Shutdown,
}

impl std::fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::HeartbeatTimeout => "heartbeat timeout",
            Self::Replaced => "replaced by reconnect",
            Self::WriteFailed => "write failure",
            Self::ReadFailed => "read failure",
            Self::Shutdown => "shutdown",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Send results
// ---------------------------------------------------------------------------

/// What happened to one queued send.
#[derive(Debug)]
pub struct Delivery {
    /// Allocated id; `None` when the session was already offline.
    pub print_id: Option<PrintId>,
    /// When the frame was written.
    pub sent_at: Option<DateTime<Utc>>,
    /// When the ack arrived or the wait ended.
    pub resolved_at: DateTime<Utc>,
    pub result: Result<()>,
}

impl Delivery {
    fn offline(address: &DeviceAddress) -> Self {
        Self {
            print_id: None,
            sent_at: None,
            resolved_at: Utc::now(),
            result: Err(SiriusError::DeviceOffline(address.clone())),
        }
    }
}

struct SendRequest {
    encoded: EncodedMessage,
    reply: oneshot::Sender<Delivery>,
}

enum AckEvent {
    Ack(PrintId),
    Disconnected,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Status {
    state: SessionState,
    in_flight: Option<PrintId>,
    offline_reason: Option<OfflineReason>,
}

struct Shared {
    address: DeviceAddress,
    status: Mutex<Status>,
    acks: mpsc::UnboundedSender<AckEvent>,
    /// Wakes the reader loop.
    offline: Notify,
    /// Wakes a worker stuck writing to a device that stopped reading.
    write_abort: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `Offline`.  Returns false if the session was already offline.
    fn go_offline(&self, reason: OfflineReason) -> bool {
        {
            let mut status = self.lock();
            if status.state == SessionState::Offline {
                return false;
            }
            status.state = SessionState::Offline;
            status.offline_reason = Some(reason);
        }
        // Wake a worker blocked on a write or an ack, and the reader loop.
        let _ = self.acks.send(AckEvent::Disconnected);
        self.write_abort.notify_one();
        self.offline.notify_one();
        info!(device = %self.address, %reason, "device offline");
        true
    }
}

// ---------------------------------------------------------------------------
// DeviceSession
// ---------------------------------------------------------------------------

/// Handle to one device connection.
pub struct DeviceSession {
    address: DeviceAddress,
    connection_id: ConnectionId,
    shared: Arc<Shared>,
    queue: mpsc::Sender<SendRequest>,
    queue_depth: usize,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("address", &self.address)
            .field("connection_id", &self.connection_id)
            .field("state", &self.state())
            .finish()
    }
}

impl DeviceSession {
    /// Start a session for a device that has completed its handshake.
    ///
    /// Spawns the worker that owns `writer`.  The session starts
    /// `AwaitingHello` and rejects sends until [`mark_online`](Self::mark_online).
    /// `counter` is the device's print id counter from [`PrintIdAllocator`].
    pub fn spawn<W>(
        address: DeviceAddress,
        writer: W,
        counter: Arc<AtomicU32>,
        config: &GatewayConfig,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_depth.max(1));
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            address: address.clone(),
            status: Mutex::new(Status {
                state: SessionState::AwaitingHello,
                in_flight: None,
                offline_reason: None,
            }),
            acks: ack_tx,
            offline: Notify::new(),
            write_abort: Notify::new(),
        });

        let worker = Worker {
            shared: Arc::clone(&shared),
            writer,
            counter,
            acks: ack_rx,
            ack_timeout: config.ack_timeout(),
        };
        tokio::spawn(worker.run(queue_rx));

        Arc::new(Self {
            address,
            connection_id: ConnectionId::new(),
            shared,
            queue: queue_tx,
            queue_depth: config.queue_depth,
        })
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Print id currently awaiting its ack.
    pub fn in_flight(&self) -> Option<PrintId> {
        self.shared.lock().in_flight
    }

    /// Why the session went offline, once it has.
    pub fn offline_reason(&self) -> Option<OfflineReason> {
        self.shared.lock().offline_reason
    }

    /// Queue an encoded command and wait for its outcome.
    ///
    /// Fails without queueing when the session is offline or the queue is
    /// full.  Otherwise resolves once the worker has written the frame and
    /// the ack arrived, the ack wait timed out, or the device went away.
    pub async fn submit(&self, encoded: EncodedMessage) -> Delivery {
        if !self.state().accepts_sends() {
            return Delivery::offline(&self.address);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = SendRequest {
            encoded,
            reply: reply_tx,
        };
        if let Err(e) = self.queue.try_send(request) {
            let error = match e {
                mpsc::error::TrySendError::Full(_) => SiriusError::DeviceBusy {
                    address: self.address.clone(),
                    depth: self.queue_depth,
                },
                mpsc::error::TrySendError::Closed(_) => {
                    SiriusError::DeviceOffline(self.address.clone())
                }
            };
            return Delivery {
                print_id: None,
                sent_at: None,
                resolved_at: Utc::now(),
                result: Err(error),
            };
        }

        reply_rx
            .await
            .unwrap_or_else(|_| Delivery::offline(&self.address))
    }

    /// Route an ack from the device to the waiting send.
    ///
    /// Only the first ack for the in-flight print id is accepted; anything
    /// else, a repeat included, is a protocol violation and leaves the
    /// session untouched.
    pub fn deliver_ack(&self, print_id: PrintId) -> Result<()> {
        let mut status = self.shared.lock();
        match status.in_flight {
            Some(expected) if expected == print_id => {
                status.in_flight = None;
                let _ = self.shared.acks.send(AckEvent::Ack(print_id));
                Ok(())
            }
            Some(expected) => Err(SiriusError::ProtocolViolation(format!(
                "ack for print {print_id} while print {expected} is in flight"
            ))),
            None => Err(SiriusError::ProtocolViolation(format!(
                "ack for print {print_id} with nothing in flight"
            ))),
        }
    }

    /// Move from `AwaitingHello` to `Online` once the device has identified
    /// itself.  Returns false in any other state.
    pub fn mark_online(&self) -> bool {
        let mut status = self.shared.lock();
        if status.state != SessionState::AwaitingHello {
            return false;
        }
        status.state = SessionState::Online;
        true
    }

    /// Take the session offline.  Idempotent.
    pub fn mark_offline(&self, reason: OfflineReason) -> bool {
        self.shared.go_offline(reason)
    }

    /// Drive the device's inbound stream until the session ends.
    ///
    /// Returns why the session went offline.  Malformed or unexpected frames
    /// are logged and skipped; only transport failures, silence beyond
    /// `heartbeat_timeout`, or an external `mark_offline` end the loop.
    #[instrument(skip_all, fields(device = %self.address))]
    pub async fn read_loop<R>(
        &self,
        mut reader: R,
        heartbeat_timeout: Duration,
        max_frame_bytes: usize,
    ) -> OfflineReason
    where
        R: AsyncRead + Unpin,
    {
        let reason = loop {
            let next = tokio::select! {
                _ = self.shared.offline.notified() => break None,
                next = tokio::time::timeout(
                    heartbeat_timeout,
                    codec::read_frame(&mut reader, max_frame_bytes),
                ) => next,
            };

            let frame = match next {
                Err(_) => break Some(OfflineReason::HeartbeatTimeout),
                Ok(Ok(None)) => break Some(OfflineReason::Disconnected),
                Ok(Err(e)) => {
                    warn!(error = %e, "device stream failed");
                    break Some(OfflineReason::ReadFailed);
                }
                Ok(Ok(Some(frame))) => frame,
            };

            match DeviceFrame::parse(&frame) {
                Ok(DeviceFrame::Ack(print_id)) => {
                    if let Err(e) = self.deliver_ack(print_id) {
                        warn!(error = %e, "protocol violation");
                    } else {
                        debug!(%print_id, "ack received");
                    }
                }
                Ok(DeviceFrame::Heartbeat) => debug!("heartbeat"),
                Ok(DeviceFrame::Hello(other)) => {
                    warn!(hello = %other, "protocol violation: HELLO after handshake");
                }
                Err(e) => warn!(error = %e, "protocol violation"),
            }
        };

        match reason {
            Some(reason) => {
                self.mark_offline(reason);
                reason
            }
            // Taken offline from outside the reader.
            None => self.offline_reason().unwrap_or(OfflineReason::Shutdown),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker<W> {
    shared: Arc<Shared>,
    writer: W,
    counter: Arc<AtomicU32>,
    acks: mpsc::UnboundedReceiver<AckEvent>,
    ack_timeout: Duration,
}

impl<W> Worker<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn run(mut self, mut queue: mpsc::Receiver<SendRequest>) {
        while let Some(request) = queue.recv().await {
            let delivery = self.process(request.encoded).await;
            let _ = request.reply.send(delivery);

            let offline = self.shared.lock().state == SessionState::Offline;
            if offline {
                break;
            }
        }

        // Fail whatever is still queued and stop accepting more.
        queue.close();
        while let Some(request) = queue.recv().await {
            let _ = request.reply.send(Delivery::offline(&self.shared.address));
        }
        debug!(device = %self.shared.address, "session worker stopped");
    }

    async fn process(&mut self, encoded: EncodedMessage) -> Delivery {
        let address = self.shared.address.clone();

        let print_id = {
            let mut status = self.shared.lock();
            if !status.state.accepts_sends() {
                return Delivery::offline(&address);
            }
            let id = PrintId(self.counter.fetch_add(1, Ordering::SeqCst) + 1);
            status.state = SessionState::Sending;
            status.in_flight = Some(id);
            id
        };

        let frame = encoded.command_frame(print_id);
        let sent_at = Utc::now();
        debug!(device = %address, %print_id, kind = ?encoded.kind(), bytes = frame.body.len(), "writing command");

        // A device that stops reading fills the transport buffer, so the
        // write gets the same bound as the ack wait.
        let write = tokio::time::timeout(
            self.ack_timeout,
            codec::write_frame(&mut self.writer, &frame),
        );
        let written = tokio::select! {
            _ = self.shared.write_abort.notified() => None,
            written = write => Some(written),
        };

        let result = match written {
            Some(Ok(Ok(()))) => self.await_ack(print_id).await,
            Some(Ok(Err(e))) => {
                warn!(device = %address, %print_id, error = %e, "command write failed");
                self.shared.go_offline(OfflineReason::WriteFailed);
                Err(SiriusError::DeviceOffline(address.clone()))
            }
            Some(Err(_)) => {
                warn!(
                    device = %address,
                    %print_id,
                    timeout_ms = self.ack_timeout.as_millis() as u64,
                    "command write stalled"
                );
                self.shared.go_offline(OfflineReason::WriteFailed);
                Err(SiriusError::DeviceOffline(address.clone()))
            }
            None => {
                debug!(device = %address, %print_id, "command write abandoned");
                Err(SiriusError::DeviceOffline(address.clone()))
            }
        };

        {
            let mut status = self.shared.lock();
            status.in_flight = None;
            if status.state == SessionState::Sending {
                status.state = SessionState::Online;
            }
        }

        Delivery {
            print_id: Some(print_id),
            sent_at: Some(sent_at),
            resolved_at: Utc::now(),
            result,
        }
    }

    async fn await_ack(&mut self, print_id: PrintId) -> Result<()> {
        let address = &self.shared.address;
        let acks = &mut self.acks;
        let wait = async {
            loop {
                match acks.recv().await {
                    Some(AckEvent::Ack(id)) if id == print_id => return Ok(()),
                    // Late ack for an earlier print that already timed out.
                    Some(AckEvent::Ack(_)) => continue,
                    Some(AckEvent::Disconnected) | None => {
                        return Err(SiriusError::DeviceOffline(address.clone()));
                    }
                }
            }
        };

        match tokio::time::timeout(self.ack_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(SiriusError::AckTimeout {
                print_id,
                timeout_ms: self.ack_timeout.as_millis() as u64,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{KIND_COMMAND, MessageEncoder, decode_command, read_frame, write_frame};
    use crate::messages::Message;
    use sirius_core::types::PixelBuffer;
    use std::time::Instant;
    use tokio::io::DuplexStream;

    fn config() -> GatewayConfig {
        GatewayConfig {
            ack_timeout_ms: 200,
            queue_depth: 2,
            ..GatewayConfig::default()
        }
    }

    fn encoded() -> EncodedMessage {
        let message = Message::SetDelivery {
            pixels: PixelBuffer::filled(385, 4, true),
        };
        MessageEncoder::default().encode(&message).unwrap()
    }

    /// Online session whose writer is the gateway side of a duplex pipe.
    fn session(config: &GatewayConfig) -> (Arc<DeviceSession>, DuplexStream) {
        session_with_buffer(config, 64 * 1024)
    }

    fn session_with_buffer(
        config: &GatewayConfig,
        buffer: usize,
    ) -> (Arc<DeviceSession>, DuplexStream) {
        let (gateway, device) = tokio::io::duplex(buffer);
        let session = DeviceSession::spawn(
            DeviceAddress::new("dev-1"),
            gateway,
            Arc::new(AtomicU32::new(0)),
            config,
        );
        assert!(session.mark_online());
        (session, device)
    }

    /// A strip too large for a small duplex buffer to absorb.
    fn large_encoded() -> EncodedMessage {
        let message = Message::SetDelivery {
            pixels: PixelBuffer::filled(385, 100, true),
        };
        MessageEncoder::default().encode(&message).unwrap()
    }

    #[test]
    fn allocator_shares_counters_per_address() {
        let allocator = PrintIdAllocator::new();
        let a = DeviceAddress::new("a");
        assert_eq!(allocator.last_issued(&a), None);
        allocator.counter(&a).fetch_add(3, Ordering::SeqCst);
        assert_eq!(allocator.counter(&a).load(Ordering::SeqCst), 3);
        assert_eq!(allocator.last_issued(&a), Some(PrintId(3)));
        assert_eq!(allocator.counter(&DeviceAddress::new("b")).load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn session_rejects_sends_until_online() {
        let config = config();
        let (gateway, _device) = tokio::io::duplex(1024);
        let session = DeviceSession::spawn(
            DeviceAddress::new("dev-1"),
            gateway,
            Arc::new(AtomicU32::new(0)),
            &config,
        );
        assert_eq!(session.state(), SessionState::AwaitingHello);

        let delivery = session.submit(encoded()).await;
        assert_eq!(delivery.print_id, None);
        assert!(matches!(delivery.result, Err(SiriusError::DeviceOffline(_))));

        assert!(session.mark_online());
        assert_eq!(session.state(), SessionState::Online);
        assert!(!session.mark_online());

        session.mark_offline(OfflineReason::Shutdown);
        assert!(!session.mark_online());
        assert_eq!(session.state(), SessionState::Offline);
    }

    #[tokio::test]
    async fn acked_send_succeeds() {
        let config = config();
        let (session, mut device) = session(&config);

        let device_task = tokio::spawn(async move {
            let frame = read_frame(&mut device, 1 << 20).await.unwrap().unwrap();
            assert_eq!(frame.kind, KIND_COMMAND);
            let (id, _) = decode_command(&frame.body).unwrap();
            (id, device)
        });

        let submit = session.submit(encoded());
        let ack = async {
            let (id, device) = device_task.await.unwrap();
            assert_eq!(session.in_flight(), Some(id));
            session.deliver_ack(id).unwrap();
            device
        };
        let (delivery, _device) = tokio::join!(submit, ack);

        assert_eq!(delivery.print_id, Some(PrintId(1)));
        assert!(delivery.result.is_ok());
        assert_eq!(session.state(), SessionState::Online);
    }

    #[tokio::test]
    async fn missing_ack_times_out_but_stays_online() {
        let config = config();
        let (session, _device) = session(&config);

        let started = Instant::now();
        let delivery = session.submit(encoded()).await;

        assert!(started.elapsed() >= config.ack_timeout());
        assert_eq!(delivery.print_id, Some(PrintId(1)));
        assert!(matches!(
            delivery.result,
            Err(SiriusError::AckTimeout { print_id: PrintId(1), .. })
        ));
        assert_eq!(session.state(), SessionState::Online);
        assert_eq!(session.in_flight(), None);
    }

    #[tokio::test]
    async fn repeated_ack_is_a_violation() {
        let config = GatewayConfig {
            ack_timeout_ms: 10_000,
            ..config()
        };
        let (session, _device) = session(&config);

        let waiter = Arc::clone(&session);
        let pending = tokio::spawn(async move { waiter.submit(encoded()).await });
        let id = loop {
            if let Some(id) = session.in_flight() {
                break id;
            }
            tokio::task::yield_now().await;
        };

        session.deliver_ack(id).unwrap();
        let err = session.deliver_ack(id).unwrap_err();
        assert!(matches!(err, SiriusError::ProtocolViolation(_)));

        let delivery = pending.await.unwrap();
        assert_eq!(delivery.print_id, Some(id));
        assert!(delivery.result.is_ok());
        assert_eq!(session.state(), SessionState::Online);
    }

    #[tokio::test]
    async fn write_failure_takes_the_session_offline() {
        let config = config();
        let (session, device) = session(&config);
        drop(device);

        let (first, second) = tokio::join!(session.submit(encoded()), session.submit(encoded()));

        assert_eq!(first.print_id, Some(PrintId(1)));
        assert!(first.sent_at.is_some());
        assert!(matches!(first.result, Err(SiriusError::DeviceOffline(_))));
        assert_eq!(session.state(), SessionState::Offline);
        assert_eq!(session.offline_reason(), Some(OfflineReason::WriteFailed));

        // The queued send fails without consuming an id.
        assert_eq!(second.print_id, None);
        assert!(matches!(second.result, Err(SiriusError::DeviceOffline(_))));

        let later = session.submit(encoded()).await;
        assert_eq!(later.print_id, None);
        assert!(matches!(later.result, Err(SiriusError::DeviceOffline(_))));
    }

    #[tokio::test]
    async fn device_that_stops_reading_fails_the_send() {
        let config = config();
        let (session, _device) = session_with_buffer(&config, 64);

        let started = Instant::now();
        let delivery = tokio::time::timeout(Duration::from_secs(2), session.submit(large_encoded()))
            .await
            .expect("stalled write resolves");

        assert!(started.elapsed() >= config.ack_timeout());
        assert_eq!(delivery.print_id, Some(PrintId(1)));
        assert!(matches!(delivery.result, Err(SiriusError::DeviceOffline(_))));
        assert_eq!(session.state(), SessionState::Offline);
        assert_eq!(session.offline_reason(), Some(OfflineReason::WriteFailed));
        assert_eq!(session.in_flight(), None);
    }

    #[tokio::test]
    async fn going_offline_releases_a_stalled_write() {
        let config = GatewayConfig {
            ack_timeout_ms: 10_000,
            ..config()
        };
        let (session, _device) = session_with_buffer(&config, 64);

        let waiter = Arc::clone(&session);
        let pending = tokio::spawn(async move { waiter.submit(large_encoded()).await });
        while session.in_flight().is_none() {
            tokio::task::yield_now().await;
        }
        // Let the worker fill the pipe and block.
        tokio::time::sleep(Duration::from_millis(50)).await;

        session.mark_offline(OfflineReason::Disconnected);
        let delivery = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("offline releases the send")
            .unwrap();

        assert_eq!(delivery.print_id, Some(PrintId(1)));
        assert!(matches!(delivery.result, Err(SiriusError::DeviceOffline(_))));
        assert_eq!(session.offline_reason(), Some(OfflineReason::Disconnected));
    }

    #[tokio::test]
    async fn stray_ack_is_a_violation() {
        let config = config();
        let (session, _device) = session(&config);
        let err = session.deliver_ack(PrintId(5)).unwrap_err();
        assert!(matches!(err, SiriusError::ProtocolViolation(_)));
        assert_eq!(session.state(), SessionState::Online);
    }

    #[tokio::test]
    async fn offline_session_fails_without_an_id() {
        let config = config();
        let (session, _device) = session(&config);
        assert!(session.mark_offline(OfflineReason::Disconnected));
        assert!(!session.mark_offline(OfflineReason::Disconnected));

        let delivery = session.submit(encoded()).await;
        assert_eq!(delivery.print_id, None);
        assert!(matches!(delivery.result, Err(SiriusError::DeviceOffline(_))));
    }

    #[tokio::test]
    async fn disconnect_during_ack_wait_resolves_early() {
        let config = GatewayConfig {
            ack_timeout_ms: 10_000,
            ..config()
        };
        let (session, _device) = session(&config);

        let waiter = Arc::clone(&session);
        let pending = tokio::spawn(async move { waiter.submit(encoded()).await });
        while session.in_flight().is_none() {
            tokio::task::yield_now().await;
        }

        let started = Instant::now();
        session.mark_offline(OfflineReason::Disconnected);
        let delivery = pending.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(delivery.print_id, Some(PrintId(1)));
        assert!(matches!(delivery.result, Err(SiriusError::DeviceOffline(_))));
    }

    #[tokio::test]
    async fn full_queue_reports_busy() {
        let config = GatewayConfig {
            ack_timeout_ms: 10_000,
            queue_depth: 1,
            ..config()
        };
        let (session, _device) = session(&config);

        // First send occupies the worker, second fills the queue.
        let first = Arc::clone(&session);
        let _a = tokio::spawn(async move { first.submit(encoded()).await });
        while session.in_flight().is_none() {
            tokio::task::yield_now().await;
        }
        let second = Arc::clone(&session);
        let _b = tokio::spawn(async move { second.submit(encoded()).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let delivery = session.submit(encoded()).await;
        assert_eq!(delivery.print_id, None);
        assert!(matches!(
            delivery.result,
            Err(SiriusError::DeviceBusy { depth: 1, .. })
        ));
    }

    #[tokio::test]
    async fn read_loop_reports_disconnect_and_heartbeat() {
        let config = config();

        let (session, _device) = session(&config);
        let (mut device_tx, gateway_rx) = tokio::io::duplex(1024);
        write_frame(&mut device_tx, &DeviceFrame::Heartbeat.to_frame())
            .await
            .unwrap();
        drop(device_tx);
        let reason = session
            .read_loop(gateway_rx, Duration::from_secs(5), 1024)
            .await;
        assert_eq!(reason, OfflineReason::Disconnected);
        assert_eq!(session.state(), SessionState::Offline);

        let (session, _device) = self::session(&config);
        let (_device_tx, gateway_rx) = tokio::io::duplex(1024);
        let reason = session
            .read_loop(gateway_rx, Duration::from_millis(100), 1024)
            .await;
        assert_eq!(reason, OfflineReason::HeartbeatTimeout);
        assert_eq!(session.state(), SessionState::Offline);
    }

    #[tokio::test]
    async fn read_loop_survives_garbage_frames() {
        let config = config();
        let (session, _device) = session(&config);
        let (mut device_tx, gateway_rx) = tokio::io::duplex(1024);

        write_frame(&mut device_tx, &codec::Frame::new(codec::KIND_ACK, vec![1]))
            .await
            .unwrap();
        write_frame(&mut device_tx, &DeviceFrame::Ack(PrintId(99)).to_frame())
            .await
            .unwrap();
        write_frame(&mut device_tx, &codec::Frame::new(0x55, vec![]))
            .await
            .unwrap();
        drop(device_tx);

        let reason = session
            .read_loop(gateway_rx, Duration::from_secs(5), 1024)
            .await;
        assert_eq!(reason, OfflineReason::Disconnected);
    }

    #[tokio::test]
    async fn read_loop_ends_when_session_is_replaced() {
        let config = config();
        let (session, _device) = session(&config);
        let (_device_tx, gateway_rx) = tokio::io::duplex(1024);

        session.mark_offline(OfflineReason::Replaced);
        let reason = session
            .read_loop(gateway_rx, Duration::from_secs(30), 1024)
            .await;
        assert_eq!(reason, OfflineReason::Replaced);
    }
}
