// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device listener — accepts persistent device connections.
//
// Each accepted connection runs in its own task: HELLO handshake within the
// configured timeout, session creation and registration, then the inbound
// read loop until the device disconnects or goes silent.  A device that
// reconnects replaces its previous session.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use sirius_core::error::{Result, SiriusError};
use sirius_core::types::{DeviceAddress, ServerStatus};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{self, DeviceFrame};
use crate::dispatch::Dispatcher;
use crate::session::{DeviceSession, OfflineReason};

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

/// Run one device connection from handshake to teardown.
///
/// Returns the device address and why its session ended.  Fails if the
/// handshake does not complete.
#[instrument(skip_all, fields(peer = %peer))]
pub async fn serve_connection<S>(
    dispatcher: &Dispatcher,
    stream: S,
    peer: &str,
) -> Result<(DeviceAddress, OfflineReason)>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let config = dispatcher.config();
    let (mut reader, writer) = tokio::io::split(stream);

    let address = handshake(&mut reader, dispatcher).await?;
    info!(device = %address, "handshake completed");

    let counter = dispatcher.allocator().counter(&address);
    let session = DeviceSession::spawn(address.clone(), writer, counter, config);
    let connection = session.connection_id();
    session.mark_online();

    if let Some(previous) = dispatcher.registry().register(Arc::clone(&session)) {
        previous.mark_offline(OfflineReason::Replaced);
    }
    info!(device = %address, %connection, "device online");

    let reason = session
        .read_loop(reader, config.heartbeat_timeout(), config.max_frame_bytes)
        .await;
    dispatcher
        .registry()
        .unregister_connection(&address, connection);

    Ok((address, reason))
}

/// Wait for the device's HELLO frame.
async fn handshake<R>(reader: &mut R, dispatcher: &Dispatcher) -> Result<DeviceAddress>
where
    R: AsyncRead + Unpin,
{
    let config = dispatcher.config();
    let first = tokio::time::timeout(
        config.handshake_timeout(),
        codec::read_frame(reader, config.max_frame_bytes),
    )
    .await
    .map_err(|_| {
        SiriusError::ProtocolViolation(format!(
            "no HELLO within {}ms",
            config.handshake_timeout_ms
        ))
    })??;

    let frame = first.ok_or_else(|| {
        SiriusError::ProtocolViolation("connection closed before HELLO".into())
    })?;
    match DeviceFrame::parse(&frame)? {
        DeviceFrame::Hello(address) => Ok(address),
        other => Err(SiriusError::ProtocolViolation(format!(
            "expected HELLO, got {other:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// DeviceServer
// ---------------------------------------------------------------------------

/// TCP listener for device connections.
///
/// Created `Stopped`; [`start`](Self::start) binds and spawns the accept
/// loop, [`stop`](Self::stop) signals it to exit and takes every registered
/// device offline.
pub struct DeviceServer {
    dispatcher: Dispatcher,
    status: ServerStatus,
    local_addr: Option<SocketAddr>,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
}

impl DeviceServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            status: ServerStatus::Stopped,
            local_addr: None,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Bind the configured address and start accepting devices.
    pub async fn start(&mut self) -> Result<()> {
        if self.status == ServerStatus::Running {
            debug!("device server already running");
            return Ok(());
        }

        self.status = ServerStatus::Starting;
        let config = self.dispatcher.config();
        let bind_addr = SocketAddr::new(config.bind_address, config.port);
        let listener = match TcpListener::bind(bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.status = ServerStatus::Error;
                return Err(SiriusError::Io(std::io::Error::new(
                    e.kind(),
                    format!("bind {bind_addr}: {e}"),
                )));
            }
        };
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "device server listening");

        let shutdown = Arc::clone(&self.shutdown_signal);
        let connections = Arc::clone(&self.active_connections);
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, connections, dispatcher).await;
        });

        self.local_addr = Some(local_addr);
        self.task_handle = Some(handle);
        self.status = ServerStatus::Running;
        Ok(())
    }

    /// Stop accepting and take every connected device offline.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        info!("stopping device server");
        self.shutdown_signal.notify_one();
        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| SiriusError::Io(std::io::Error::other(format!("task join: {e}"))))?;
        }

        for session in self.dispatcher.registry().drain() {
            session.mark_offline(OfflineReason::Shutdown);
        }

        self.status = ServerStatus::Stopped;
        info!("device server stopped");
        Ok(())
    }

    async fn accept_loop(
        listener: TcpListener,
        shutdown: Arc<Notify>,
        connections: Arc<AtomicU32>,
        dispatcher: Dispatcher,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("accept loop received shutdown signal");
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            info!(peer = %peer_addr, "device connection accepted");
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(peer = %peer_addr, error = %e, "set_nodelay failed");
                            }
                            let dispatcher = dispatcher.clone();
                            let connections = Arc::clone(&connections);
                            tokio::spawn(async move {
                                connections.fetch_add(1, Ordering::Relaxed);
                                let peer = peer_addr.to_string();
                                match serve_connection(&dispatcher, stream, &peer).await {
                                    Ok((device, reason)) => {
                                        debug!(peer = %peer_addr, %device, %reason, "connection closed");
                                    }
                                    Err(e) => {
                                        warn!(peer = %peer_addr, error = %e, "handshake failed");
                                    }
                                }
                                connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::write_frame;
    use sirius_core::config::GatewayConfig;
    use sirius_core::types::SessionState;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn config() -> GatewayConfig {
        GatewayConfig {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            handshake_timeout_ms: 200,
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn initial_status_is_stopped() {
        let server = DeviceServer::new(Dispatcher::new(config()));
        assert_eq!(server.status(), ServerStatus::Stopped);
        assert_eq!(server.active_connections(), 0);
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn handshake_requires_hello_first() {
        let dispatcher = Dispatcher::new(config());
        let (gateway, mut device) = tokio::io::duplex(1024);
        write_frame(&mut device, &DeviceFrame::Heartbeat.to_frame())
            .await
            .unwrap();

        let err = serve_connection(&dispatcher, gateway, "test").await.unwrap_err();
        assert!(matches!(err, SiriusError::ProtocolViolation(_)));
        assert!(dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn silent_device_fails_handshake() {
        let dispatcher = Dispatcher::new(config());
        let (gateway, _device) = tokio::io::duplex(1024);
        let err = serve_connection(&dispatcher, gateway, "test").await.unwrap_err();
        assert!(err.to_string().contains("no HELLO"));
    }

    #[tokio::test]
    async fn device_registers_over_tcp() {
        let mut server = DeviceServer::new(Dispatcher::new(config()));
        server.start().await.unwrap();
        assert_eq!(server.status(), ServerStatus::Running);
        let addr = server.local_addr().unwrap();

        let mut device = tokio::net::TcpStream::connect(addr).await.unwrap();
        let hello = DeviceFrame::Hello(DeviceAddress::new("tcp-device"));
        write_frame(&mut device, &hello.to_frame()).await.unwrap();

        let registry = Arc::clone(server.dispatcher().registry());
        let mut registered = false;
        for _ in 0..100 {
            if registry.lookup(&DeviceAddress::new("tcp-device")).is_some() {
                registered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registered);

        let session = registry.lookup(&DeviceAddress::new("tcp-device")).unwrap();
        assert_eq!(session.state(), SessionState::Online);

        server.stop().await.unwrap();
        assert_eq!(server.status(), ServerStatus::Stopped);
        assert_eq!(session.state(), SessionState::Offline);
        assert!(registry.is_empty());
    }
}
