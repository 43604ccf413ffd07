//! Transport handles: open duplex byte streams to the device.
//!
//! A transport is anything implementing [`TransportIO`] — a serial port, a TCP
//! socket, or an in-memory duplex stream in tests. The managers split a
//! [`DynTransport`] into a read half owned by the link's reader task and a write
//! half kept under the link's mutex for sends.

use crate::error::{LinkError, Result};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::task;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::debug;

/// Async duplex byte stream usable as a device link transport.
///
/// Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` qualifies:
/// - `tokio_serial::SerialStream` (real serial hardware)
/// - `tokio::net::TcpStream` (network links)
/// - `tokio::io::DuplexStream` (testing)
pub trait TransportIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> TransportIO for T {}

/// Type-erased boxed transport.
pub type DynTransport = Box<dyn TransportIO>;

/// Open a serial port with the device's fixed framing: 8 data bits, no parity,
/// one stop bit, no flow control.
///
/// The blocking open runs inside `spawn_blocking` so the runtime is never
/// stalled by a slow driver.
pub async fn open_serial_port(path: &str, baud_rate: u32) -> Result<SerialStream> {
    let path_owned = path.to_string();

    let stream = task::spawn_blocking(move || {
        tokio_serial::new(&path_owned, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|err| LinkError::Io(std::io::Error::new(std::io::ErrorKind::Other, err)))??;

    debug!(port = path, baud_rate, "serial port opened");
    Ok(stream)
}

/// Dial a TCP endpoint with a bounded connect timeout.
pub async fn dial(target: &str, connect_timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(connect_timeout, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => {
            debug!(target, "tcp connection established");
            Ok(stream)
        }
        Ok(Err(source)) => Err(LinkError::ConnectFailed {
            target: target.to_string(),
            source,
        }),
        Err(_) => Err(LinkError::ConnectTimeout(target.to_string())),
    }
}
