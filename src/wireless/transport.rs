//! Driver seam between the connection manager and the physical radio.
//!
//! A [`Connector`] claims the channel and hands back a [`Transport`]. Both are
//! blocking by nature (serial I/O); the connection manager runs them on
//! tokio's blocking pool. Tests substitute scripted connectors here.
//!
//! The serial implementation speaks escaped XBee API frames (see
//! [`super::frame`]). A reader thread owns a clone of the port, decodes frames
//! continuously, routes status/AT responses back to the sender waiting in
//! [`Transport::send_synchronous`], and forwards unsolicited RX packets to the
//! inbound channel.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;

use super::address::WireAddress;
use super::errors::TransportError;
use super::frame::TxStatus;

#[cfg(feature = "serial")]
use log::{debug, error, info, trace, warn};

/// Baud rates the local radio can be configured for.
pub const ALLOWED_BAUD_RATES: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Connection parameters of the local host radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostParams {
    pub port: String,
    pub baud_rate: u32,
}

impl HostParams {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
        }
    }
}

/// A 16-bit addressed transmit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRequest {
    /// Correlates the radio's status frame with this request; never 0 (0 disables the status).
    pub frame_id: u8,
    pub dest: WireAddress,
    pub data: Vec<u8>,
}

/// Transmit status reported by the local radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxReport {
    pub frame_id: u8,
    pub status: TxStatus,
}

/// Data a remote node sent to the host unprompted (or in reply to a command).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPacket {
    pub source: WireAddress,
    /// Received signal strength as `-dBm`.
    pub rssi: u8,
    pub data: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// An open channel to the local radio.
pub trait Transport: Send {
    /// Write one TX request and block until the matching status arrives or `timeout` elapses.
    ///
    /// Implementations return [`TransportError::Timeout`] when the window elapses; any
    /// other error is treated as a fault that leaves the channel in an unknown state.
    fn send_synchronous(
        &mut self,
        request: &TxRequest,
        timeout: Duration,
    ) -> Result<TxReport, TransportError>;

    /// Ask a radio for its 16-bit address (`MY`). `None` queries the local radio.
    fn query_address(
        &mut self,
        _frame_id: u8,
        _target: Option<WireAddress>,
        _timeout: Duration,
    ) -> Result<WireAddress, TransportError> {
        Err(TransportError::Unsupported("address query".to_string()))
    }

    /// Release the channel. Must tolerate being called more than once.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Claims the radio channel.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        params: &HostParams,
        inbound: mpsc::UnboundedSender<InboundPacket>,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Serial port names visible on this machine.
pub fn available_ports() -> Result<Vec<String>, TransportError> {
    #[cfg(feature = "serial")]
    {
        Ok(serialport::available_ports()?
            .into_iter()
            .map(|p| p.port_name)
            .collect())
    }
    #[cfg(not(feature = "serial"))]
    {
        Err(TransportError::Unsupported(
            "serial support not compiled in".to_string(),
        ))
    }
}

/// Opens the local radio over a serial port.
#[derive(Debug, Default, Clone)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    #[cfg(feature = "serial")]
    fn connect(
        &self,
        params: &HostParams,
        inbound: mpsc::UnboundedSender<InboundPacket>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let transport = serial::SerialTransport::open(params, inbound)?;
        Ok(Box::new(transport))
    }

    #[cfg(not(feature = "serial"))]
    fn connect(
        &self,
        params: &HostParams,
        _inbound: mpsc::UnboundedSender<InboundPacket>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        log::warn!(
            "Serial support not compiled in, cannot open {} at {} baud",
            params.port,
            params.baud_rate
        );
        Err(TransportError::Unsupported(
            "serial support not compiled in".to_string(),
        ))
    }
}

#[cfg(feature = "serial")]
mod serial {
    use super::*;
    use crate::logutil::hex_snippet;
    use crate::wireless::frame::{FrameDecoder, InboundFrame, OutboundFrame};
    use serialport::SerialPort;
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Instant;

    const READ_TIMEOUT: Duration = Duration::from_millis(500);
    const AT_OK: u8 = 0;

    pub struct SerialTransport {
        port_name: String,
        port: Box<dyn SerialPort>,
        responses: std_mpsc::Receiver<InboundFrame>,
        stop: Arc<AtomicBool>,
        reader: Option<JoinHandle<()>>,
    }

    impl SerialTransport {
        pub fn open(
            params: &HostParams,
            inbound: mpsc::UnboundedSender<InboundPacket>,
        ) -> Result<Self, TransportError> {
            debug!(
                "Opening serial port {} at {} baud",
                params.port, params.baud_rate
            );
            let mut builder = serialport::new(&params.port, params.baud_rate).timeout(READ_TIMEOUT);
            // Some USB serial adapters need explicit settings
            #[cfg(unix)]
            {
                builder = builder
                    .data_bits(serialport::DataBits::Eight)
                    .stop_bits(serialport::StopBits::One)
                    .parity(serialport::Parity::None);
            }
            let mut port = builder.open()?;
            let _ = port.write_data_terminal_ready(true);
            let _ = port.write_request_to_send(true);
            // Small settle delay
            std::thread::sleep(Duration::from_millis(150));
            // Clear any buffered startup noise
            let mut purge_buf = [0u8; 512];
            if let Ok(available) = port.bytes_to_read() {
                if available > 0 {
                    let _ = port.read(&mut purge_buf);
                }
            }
            let reader_port = port.try_clone()?;
            let (resp_tx, resp_rx) = std_mpsc::channel();
            let stop = Arc::new(AtomicBool::new(false));
            let reader_stop = stop.clone();
            let port_name = params.port.clone();
            let reader = std::thread::Builder::new()
                .name(format!("xbee-reader-{}", port_name))
                .spawn(move || read_loop(reader_port, resp_tx, inbound, reader_stop))?;
            info!(
                "Serial port {} open at {} baud",
                params.port, params.baud_rate
            );
            Ok(Self {
                port_name,
                port,
                responses: resp_rx,
                stop,
                reader: Some(reader),
            })
        }

        fn write_frame(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
            // Drop status frames left over from an exchange that already timed out
            while self.responses.try_recv().is_ok() {}
            let bytes = frame.encode();
            trace!("TX {} bytes: {}", bytes.len(), hex_snippet(&bytes, 64));
            self.port.write_all(&bytes)?;
            self.port.flush()?;
            Ok(())
        }

        /// Wait for the first response the predicate accepts.
        fn await_response<T>(
            &mut self,
            timeout: Duration,
            mut accept: impl FnMut(InboundFrame) -> Option<T>,
        ) -> Result<T, TransportError> {
            let deadline = Instant::now() + timeout;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(TransportError::Timeout);
                }
                match self.responses.recv_timeout(remaining) {
                    Ok(frame) => {
                        if let Some(v) = accept(frame) {
                            return Ok(v);
                        }
                    }
                    Err(std_mpsc::RecvTimeoutError::Timeout) => return Err(TransportError::Timeout),
                    Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                        return Err(TransportError::Closed)
                    }
                }
            }
        }
    }

    impl Transport for SerialTransport {
        fn send_synchronous(
            &mut self,
            request: &TxRequest,
            timeout: Duration,
        ) -> Result<TxReport, TransportError> {
            let frame = OutboundFrame::TxRequest16 {
                frame_id: request.frame_id,
                dest: request.dest,
                options: 0,
                data: request.data.clone(),
            };
            self.write_frame(&frame)?;
            let wanted = request.frame_id;
            self.await_response(timeout, |f| match f {
                InboundFrame::TxStatus { frame_id, status } if frame_id == wanted => {
                    Some(TxReport { frame_id, status })
                }
                other => {
                    debug!("Ignoring unrelated response while awaiting TX status: {:?}", other);
                    None
                }
            })
        }

        fn query_address(
            &mut self,
            frame_id: u8,
            target: Option<WireAddress>,
            timeout: Duration,
        ) -> Result<WireAddress, TransportError> {
            let frame = match target {
                Some(dest) => OutboundFrame::RemoteAtRequest {
                    frame_id,
                    dest,
                    command: *b"MY",
                    parameter: Vec::new(),
                },
                None => OutboundFrame::AtCommand {
                    frame_id,
                    command: *b"MY",
                    parameter: Vec::new(),
                },
            };
            self.write_frame(&frame)?;
            let answer = self.await_response(timeout, |f| match f {
                InboundFrame::AtResponse {
                    frame_id: id,
                    status,
                    value,
                    ..
                }
                | InboundFrame::RemoteAtResponse {
                    frame_id: id,
                    status,
                    value,
                    ..
                } if id == frame_id => Some((status, value)),
                _ => None,
            })?;
            match answer {
                (AT_OK, value) if value.len() == 2 => Ok(WireAddress::new(value[0], value[1])),
                (AT_OK, value) => Err(TransportError::Protocol(format!(
                    "MY response carried {} bytes",
                    value.len()
                ))),
                (status, _) => Err(TransportError::Protocol(format!(
                    "MY query failed with AT status {status}"
                ))),
            }
        }

        fn close(&mut self) -> Result<(), TransportError> {
            self.stop.store(true, Ordering::SeqCst);
            if let Some(handle) = self.reader.take() {
                if handle.join().is_err() {
                    warn!("Reader thread for {} panicked", self.port_name);
                }
                info!("Closed serial port {}", self.port_name);
            }
            Ok(())
        }
    }

    impl Drop for SerialTransport {
        fn drop(&mut self) {
            let _ = self.close();
        }
    }

    fn read_loop(
        mut port: Box<dyn SerialPort>,
        responses: std_mpsc::Sender<InboundFrame>,
        inbound: mpsc::UnboundedSender<InboundPacket>,
        stop: Arc<AtomicBool>,
    ) {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 256];
        while !stop.load(Ordering::SeqCst) {
            match port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    trace!("RX {} bytes: {}", n, hex_snippet(&buf[..n], 64));
                    decoder.push(&buf[..n]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    // Dropping `responses` on exit turns the pending wait into TransportError::Closed
                    error!("Serial read failed, stopping reader: {}", e);
                    break;
                }
            }
            while let Some(result) = decoder.next_frame() {
                match result {
                    Ok(InboundFrame::Rx16 {
                        source, rssi, data, ..
                    }) => {
                        let packet = InboundPacket {
                            source,
                            rssi,
                            data,
                            received_at: Utc::now(),
                        };
                        if inbound.send(packet).is_err() {
                            debug!("Inbound receiver gone; dropping RX from {}", source);
                        }
                    }
                    Ok(InboundFrame::Unknown { api_id, data }) => {
                        debug!(
                            "Unhandled API frame {:#04x}: {}",
                            api_id,
                            hex_snippet(&data, 32)
                        );
                    }
                    Ok(frame) => {
                        let _ = responses.send(frame);
                    }
                    Err(e) => warn!("Discarding malformed API frame: {}", e),
                }
            }
        }
    }
}
