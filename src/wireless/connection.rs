//! Ownership of the single radio channel.
//!
//! [`ConnectionManager`] is the only component that performs raw I/O. The
//! transport lives inside a `tokio::sync::Mutex` that is held for an entire
//! exchange, so two sends can never interleave on the wire. Driver calls are
//! blocking and run on tokio's blocking pool: the boxed transport is moved
//! into the blocking closure and handed back when it returns.
//!
//! Any driver error other than a plain timeout leaves the radio in an unknown
//! state. The manager then closes the channel before reporting the error, so a
//! following [`ConnectionManager::open`] starts from scratch.
//!
//! The caller's timeout holds even when the driver ignores it: an exchange
//! still running after `timeout + DRIVER_GRACE` is reported as a timeout and
//! the stuck transport is abandoned.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, MutexGuard};

use super::address::{NodeAddress, WireAddress};
use super::errors::{TransportError, WirelessError};
use super::frame::TxStatus;
use super::transport::{
    Connector, HostParams, InboundPacket, Transport, TxRequest, ALLOWED_BAUD_RATES,
};
use crate::events::{Event, EventBus, EventKind, EventSource};

/// Slack past the caller's timeout before a still-running driver call is cut off.
pub const DRIVER_GRACE: Duration = Duration::from_millis(250);

type Channel = Option<Box<dyn Transport>>;

pub struct ConnectionManager {
    bus: Arc<EventBus>,
    connector: Arc<dyn Connector>,
    channel: Mutex<Channel>,
    connected: AtomicBool,
    params: StdMutex<Option<HostParams>>,
    inbound: StdMutex<Option<mpsc::UnboundedReceiver<InboundPacket>>>,
    next_frame_id: AtomicU8,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connected", &self.is_connected())
            .field("params", &self.host_params())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(bus: Arc<EventBus>, connector: Arc<dyn Connector>) -> Self {
        Self {
            bus,
            connector,
            channel: Mutex::new(None),
            connected: AtomicBool::new(false),
            params: StdMutex::new(None),
            inbound: StdMutex::new(None),
            next_frame_id: AtomicU8::new(1),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Parameters of the currently (or most recently) open channel.
    pub fn host_params(&self) -> Option<HostParams> {
        self.params.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Receiver of unsolicited packets from remote nodes for the current
    /// channel. Handed out once per successful `open`.
    pub fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<InboundPacket>> {
        self.inbound.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn emit(&self, kind: EventKind, message: Option<String>) {
        let mut event = Event::new(kind, EventSource::Connection);
        if let Some(m) = message {
            event = event.with_message(m);
        }
        self.bus.emit(event);
    }

    /// Frame ids cycle through 1..=255; 0 would suppress the TX status.
    fn next_frame_id(&self) -> u8 {
        let prev = self
            .next_frame_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
                Some(if id == u8::MAX { 1 } else { id + 1 })
            })
            .unwrap_or(1);
        prev.max(1)
    }

    /// Claim the radio. An already open channel is closed first.
    pub async fn open(&self, params: HostParams) -> Result<(), WirelessError> {
        if !ALLOWED_BAUD_RATES.contains(&params.baud_rate) {
            let cause = format!("unsupported baud rate, expected one of {ALLOWED_BAUD_RATES:?}");
            warn!("Refusing to open {} at {} baud: {}", params.port, params.baud_rate, cause);
            self.emit(EventKind::HostConnectFailed, Some(cause.clone()));
            return Err(WirelessError::Connection {
                port: params.port,
                baud: params.baud_rate,
                cause,
            });
        }
        let mut guard = self.channel.lock().await;
        if guard.is_some() {
            info!("Closing existing channel before reopening");
            if let Err(e) = self.close_locked(&mut guard).await {
                warn!("Previous channel did not close cleanly: {}", e);
            }
        }
        self.emit(
            EventKind::HostConnecting,
            Some(format!("{} @ {} baud", params.port, params.baud_rate)),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = self.connector.clone();
        let attempt = params.clone();
        let result = tokio::task::spawn_blocking(move || connector.connect(&attempt, tx))
            .await
            .unwrap_or_else(|join| {
                Err(TransportError::Protocol(format!("connector panicked: {join}")))
            });
        match result {
            Ok(transport) => {
                *guard = Some(transport);
                self.connected.store(true, Ordering::SeqCst);
                *self.params.lock().unwrap_or_else(|e| e.into_inner()) = Some(params.clone());
                *self.inbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(rx);
                drop(guard);
                info!(
                    "Connected to local radio on {} at {} baud",
                    params.port, params.baud_rate
                );
                self.emit(EventKind::HostConnected, None);
                Ok(())
            }
            Err(e) => {
                drop(guard);
                error!(
                    "Unable to connect to local radio on {} at {} baud: {}",
                    params.port, params.baud_rate, e
                );
                self.emit(EventKind::HostConnectFailed, Some(e.to_string()));
                Err(WirelessError::Connection {
                    port: params.port,
                    baud: params.baud_rate,
                    cause: e.to_string(),
                })
            }
        }
    }

    /// Release the radio. A no-op when nothing is open.
    pub async fn close(&self) -> Result<(), WirelessError> {
        let mut guard = self.channel.lock().await;
        self.close_locked(&mut guard).await
    }

    async fn close_locked(&self, guard: &mut MutexGuard<'_, Channel>) -> Result<(), WirelessError> {
        let Some(mut transport) = guard.take() else {
            return Ok(());
        };
        self.emit(EventKind::HostDisconnecting, None);
        self.connected.store(false, Ordering::SeqCst);
        let result = tokio::task::spawn_blocking(move || transport.close())
            .await
            .unwrap_or_else(|join| {
                Err(TransportError::Protocol(format!("close panicked: {join}")))
            });
        match result {
            Ok(()) => {
                info!("Disconnected from local radio");
                self.emit(EventKind::HostDisconnected, None);
                Ok(())
            }
            Err(e) => {
                error!("Failed to close local radio: {}", e);
                self.emit(EventKind::HostDisconnectFailed, Some(e.to_string()));
                Err(WirelessError::TransportFault(e.to_string()))
            }
        }
    }

    /// The transport is gone (panicked or hung in the driver); record the
    /// disconnect without a close call.
    fn abandon(&self, cause: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.emit(EventKind::HostDisconnecting, Some(cause.to_string()));
        self.emit(EventKind::HostDisconnected, Some(cause.to_string()));
    }

    /// Run one blocking exchange against the open transport.
    ///
    /// `fatal` decides which driver errors invalidate the channel.
    async fn exchange<T, F>(
        &self,
        timeout: Duration,
        call: F,
        fatal: fn(&TransportError) -> bool,
    ) -> Result<Result<T, TransportError>, WirelessError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn Transport) -> Result<T, TransportError> + Send + 'static,
    {
        let mut guard = self.channel.lock().await;
        let mut transport = guard.take().ok_or(WirelessError::NotConnected)?;
        let handle = tokio::task::spawn_blocking(move || {
            let result = call(transport.as_mut());
            (transport, result)
        });
        match tokio::time::timeout(timeout + DRIVER_GRACE, handle).await {
            Ok(Ok((transport, Ok(value)))) => {
                *guard = Some(transport);
                Ok(Ok(value))
            }
            Ok(Ok((transport, Err(e)))) => {
                *guard = Some(transport);
                if fatal(&e) {
                    warn!("Transport fault, closing channel: {}", e);
                    if let Err(close_err) = self.close_locked(&mut guard).await {
                        debug!("Close after fault also failed: {}", close_err);
                    }
                    return Err(WirelessError::TransportFault(e.to_string()));
                }
                Ok(Err(e))
            }
            Ok(Err(join)) => {
                let cause = format!("driver panicked: {join}");
                error!("{}", cause);
                self.abandon(&cause);
                Err(WirelessError::TransportFault(cause))
            }
            Err(_) => {
                // The transport stays with the stuck driver call; the channel is lost
                let cause = format!(
                    "driver did not return within {} ms",
                    (timeout + DRIVER_GRACE).as_millis()
                );
                error!("{}", cause);
                self.abandon(&cause);
                Ok(Err(TransportError::Timeout))
            }
        }
    }

    /// Send `data` to one address and wait for the local radio's TX status.
    ///
    /// `Ok` carries the delivery status, delivered or not. A timeout surfaces as
    /// [`WirelessError::TransmitTimeout`]; anything else closes the channel.
    pub async fn send_synchronous(
        &self,
        dest: WireAddress,
        data: Vec<u8>,
        timeout: Duration,
    ) -> Result<TxStatus, WirelessError> {
        let request = TxRequest {
            frame_id: self.next_frame_id(),
            dest,
            data,
        };
        debug!(
            "TX frame {} to {} ({} bytes)",
            request.frame_id,
            dest,
            request.data.len()
        );
        let outcome = self
            .exchange(
                timeout,
                move |t| t.send_synchronous(&request, timeout),
                |e| !matches!(e, TransportError::Timeout),
            )
            .await?;
        match outcome {
            Ok(report) => Ok(report.status),
            Err(_) => Err(WirelessError::TransmitTimeout {
                address: NodeAddress::from(dest).to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Query the 16-bit address (`MY`) of the local radio (`None`) or a remote node.
    pub async fn query_address(
        &self,
        target: Option<WireAddress>,
        timeout: Duration,
    ) -> Result<WireAddress, WirelessError> {
        let frame_id = self.next_frame_id();
        let outcome = self
            .exchange(
                timeout,
                move |t| t.query_address(frame_id, target, timeout),
                |e| {
                    !matches!(
                        e,
                        TransportError::Timeout
                            | TransportError::Protocol(_)
                            | TransportError::Unsupported(_)
                    )
                },
            )
            .await?;
        match outcome {
            Ok(address) => Ok(address),
            Err(TransportError::Timeout) => Err(WirelessError::TransmitTimeout {
                address: target.map_or_else(|| "local".to_string(), |t| t.to_string()),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Err(e) => Err(WirelessError::QueryFailed(e.to_string())),
        }
    }
}
