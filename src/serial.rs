//! The serial link manager: one active serial connection to the device.
//!
//! The device exposes a single configuration console over its serial port, so
//! the manager enforces exactly one active link at a time: connecting while a
//! link is active fails with [`LinkError::AlreadyConnected`] and the caller must
//! disconnect first.
//!
//! Call flow: [`SerialLinkManager::connect_to_port`] opens the port and starts
//! the reader task, [`SerialLinkManager::send`] writes one command frame, and
//! [`SerialLinkManager::get_response`] blocks (up to a timeout) for the next
//! response line. [`SerialLinkManager::disconnect`] sends a best-effort logout
//! frame, stops the reader, and releases the port — and is a no-op when nothing
//! is connected.

use crate::config::SerialSettings;
use crate::error::{LinkError, Result};
use crate::framing::strip_delimiter;
use crate::reader::{event_queue, run_reader, ErrorPolicy, LinkEvent, ReaderConfig};
use crate::transport::{open_serial_port, DynTransport};
use crate::LOGOUT_FRAME;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{split, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// State of the one active serial link.
struct SerialLink {
    port_name: String,
    /// Distinguishes this link from any successor, so a reader that dies late
    /// never clears state belonging to a newer connection.
    generation: u64,
    writer: WriteHalf<DynTransport>,
    shutdown: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
}

/// Manages the single serial connection to the device.
///
/// Explicitly constructed and shared by reference — there is no ambient global
/// link. All link state lives behind one mutex; the event-queue receiver lives
/// behind its own, so a caller blocked in [`get_response`](Self::get_response)
/// never stalls a concurrent [`send`](Self::send) or
/// [`disconnect`](Self::disconnect).
pub struct SerialLinkManager {
    settings: SerialSettings,
    state: Arc<Mutex<Option<SerialLink>>>,
    events: Arc<Mutex<Option<mpsc::Receiver<LinkEvent>>>>,
    next_generation: AtomicU64,
}

impl SerialLinkManager {
    /// Create a manager with the given settings.
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            state: Arc::new(Mutex::new(None)),
            events: Arc::new(Mutex::new(None)),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Enumerate serial ports on this machine.
    ///
    /// An empty enumeration is the distinct [`LinkError::NoPortsFound`] error so
    /// callers can tell "no hardware" apart from an enumeration failure.
    pub async fn list_ports(&self) -> Result<Vec<String>> {
        let ports = task::spawn_blocking(tokio_serial::available_ports)
            .await
            .map_err(|err| {
                LinkError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
            })??;

        if ports.is_empty() {
            return Err(LinkError::NoPortsFound);
        }
        Ok(ports.into_iter().map(|info| info.port_name).collect())
    }

    /// Open the named port and start its reader loop.
    ///
    /// Fails with [`LinkError::AlreadyConnected`] while another serial link is
    /// active; the previous link is never silently replaced.
    pub async fn connect_to_port(&self, port_name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(link) = state.as_ref() {
            return Err(LinkError::AlreadyConnected(link.port_name.clone()));
        }

        let stream = open_serial_port(port_name, self.settings.baud_rate).await?;
        self.attach(&mut state, port_name, Box::new(stream)).await;

        info!(port = port_name, "serial link connected");
        Ok(())
    }

    /// Connect over an already-open transport. Test seam for the same install
    /// path `connect_to_port` uses with real hardware.
    #[cfg(test)]
    async fn connect_transport(&self, port_name: &str, transport: DynTransport) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(link) = state.as_ref() {
            return Err(LinkError::AlreadyConnected(link.port_name.clone()));
        }
        self.attach(&mut state, port_name, transport).await;
        Ok(())
    }

    /// Install a link for an open transport: split it, wire up the event queue,
    /// and spawn the reader. Caller holds the state lock and has verified no
    /// link is active.
    async fn attach(
        &self,
        state: &mut Option<SerialLink>,
        port_name: &str,
        transport: DynTransport,
    ) {
        let (read_half, writer) = split(transport);
        let (events_tx, events_rx) = event_queue(self.settings.queue_capacity, port_name);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let config = ReaderConfig {
            label: port_name.to_string(),
            chunk_size: self.settings.chunk_size,
            read_deadline: None,
            idle_backoff: Some(self.settings.idle_backoff),
            error_policy: ErrorPolicy::Surface,
        };

        let owner = Arc::clone(&self.state);
        let reader = tokio::spawn(async move {
            run_reader(read_half, config, events_tx, shutdown_rx).await;
            // A reader that exits on its own (fatal error, port vanished) must
            // clear the active link so a later connect can succeed. The
            // generation check keeps a late exit from clearing a newer link.
            let mut state = owner.lock().await;
            if state.as_ref().map(|link| link.generation) == Some(generation) {
                *state = None;
            }
        });

        *state = Some(SerialLink {
            port_name: port_name.to_string(),
            generation,
            writer,
            shutdown: Some(shutdown_tx),
            reader: Some(reader),
        });
        *self.events.lock().await = Some(events_rx);
    }

    /// Write one command frame: the payload followed by `\n`, as a single
    /// write under the link mutex.
    pub async fn send(&self, data: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(link) = state.as_mut() else {
            return Err(LinkError::NotConnected);
        };

        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.extend_from_slice(data.as_bytes());
        frame.push(b'\n');

        link.writer.write_all(&frame).await?;
        link.writer.flush().await?;
        debug!(port = %link.port_name, bytes = frame.len(), "sent frame");
        Ok(())
    }

    /// Wait up to `timeout` for the next response line.
    ///
    /// Dequeues at most one event per call: a data frame yields its payload
    /// with the trailing `\n` trimmed, the reader's terminal error propagates
    /// as-is, and an empty queue yields [`LinkError::Timeout`] once the timeout
    /// elapses.
    pub async fn get_response(&self, timeout: Duration) -> Result<String> {
        let mut events = self.events.lock().await;
        let Some(receiver) = events.as_mut() else {
            return Err(LinkError::NotConnected);
        };

        match tokio::time::timeout(timeout, receiver.recv()).await {
            Err(_) => Err(LinkError::Timeout),
            Ok(Some(LinkEvent::Data(frame))) => Ok(strip_delimiter(frame)),
            Ok(Some(LinkEvent::Error(err))) => Err(err),
            // Queue closed: the reader is gone and the link torn down.
            Ok(None) => Err(LinkError::NotConnected),
        }
    }

    /// Name of the currently connected port, if any.
    pub async fn current_port(&self) -> Option<String> {
        self.state.lock().await.as_ref().map(|link| link.port_name.clone())
    }

    /// Tear the link down: best-effort logout frame, stop and join the reader,
    /// release the port. Idempotent — with no active link this is a no-op.
    pub async fn disconnect(&self) -> Result<()> {
        // The device forgets the session on logout; a dead link must not stop
        // the teardown, so the send result is only logged.
        if let Err(err) = self.send(LOGOUT_FRAME).await {
            debug!(error = %err, "logout frame not sent");
        }

        let link = self.state.lock().await.take();
        let Some(mut link) = link else {
            return Ok(());
        };

        if let Some(shutdown) = link.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(reader) = link.reader.take() {
            if let Err(err) = reader.await {
                warn!(port = %link.port_name, error = %err, "serial reader task panicked");
            }
        }
        // Both halves are gone after this, which closes the port.
        drop(link.writer);

        info!(port = %link.port_name, "serial link disconnected");
        Ok(())
    }
}

impl Default for SerialLinkManager {
    fn default() -> Self {
        Self::new(SerialSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Instant;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_test::assert_ok;

    /// Connect the manager to one end of an in-memory duplex stream and hand
    /// back the host end, which plays the device.
    async fn connect_duplex(manager: &SerialLinkManager, port_name: &str) -> DuplexStream {
        let (host, device) = tokio::io::duplex(1024);
        manager
            .connect_transport(port_name, Box::new(device))
            .await
            .unwrap();
        host
    }

    /// Transport whose reads fail immediately with a non-disconnect error and
    /// whose writes succeed, to drive the fatal-exit path.
    struct BrokenReadTransport;

    impl tokio::io::AsyncRead for BrokenReadTransport {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "framing garbage",
            )))
        }
    }

    impl tokio::io::AsyncWrite for BrokenReadTransport {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn send_without_connect_never_writes() {
        let manager = SerialLinkManager::default();
        match manager.send("{\"type\":\"ping\"}").await {
            Err(LinkError::NotConnected) => {}
            other => panic!("expected NotConnected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_response_without_connect_errors() {
        let manager = SerialLinkManager::default();
        match manager.get_response(Duration::from_millis(10)).await {
            Err(LinkError::NotConnected) => {}
            other => panic!("expected NotConnected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let manager = SerialLinkManager::default();
        let _host = connect_duplex(&manager, "COM7").await;

        let (_other_host, other_device) = tokio::io::duplex(64);
        match manager.connect_transport("COM8", Box::new(other_device)).await {
            Err(LinkError::AlreadyConnected(port)) => assert_eq!(port, "COM7"),
            other => panic!("expected AlreadyConnected, got {other:?}"),
        }
        assert_eq!(manager.current_port().await.as_deref(), Some("COM7"));
    }

    #[tokio::test]
    async fn responses_arrive_in_order_and_trimmed() {
        let manager = SerialLinkManager::default();
        let mut host = connect_duplex(&manager, "COM7").await;

        host.write_all(b"{\"seq\":1}\n{\"seq\":2}\n").await.unwrap();

        let first = manager.get_response(Duration::from_secs(1)).await.unwrap();
        let second = manager.get_response(Duration::from_secs(1)).await.unwrap();
        assert_eq!(first, "{\"seq\":1}");
        assert_eq!(second, "{\"seq\":2}");
    }

    #[tokio::test]
    async fn get_response_times_out_in_bounds() {
        let manager = SerialLinkManager::default();
        let _host = connect_duplex(&manager, "COM7").await;

        let timeout = Duration::from_millis(100);
        let start = Instant::now();
        let result = manager.get_response(timeout).await;
        let elapsed = start.elapsed();

        match result {
            Err(LinkError::Timeout) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
        assert!(elapsed >= timeout, "returned early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(1), "hung: {elapsed:?}");
    }

    #[tokio::test]
    async fn send_appends_exactly_one_newline() {
        let manager = SerialLinkManager::default();
        let mut host = connect_duplex(&manager, "COM7").await;

        manager.send("{\"type\":\"ping\"}").await.unwrap();

        let mut received = vec![0u8; 64];
        let n = host.read(&mut received).await.unwrap();
        assert_eq!(&received[..n], b"{\"type\":\"ping\"}\n");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let manager = SerialLinkManager::default();
        tokio_test::assert_ok!(manager.disconnect().await);
        tokio_test::assert_ok!(manager.disconnect().await);
    }

    #[tokio::test]
    async fn disconnect_sends_logout_then_allows_reconnect() {
        let manager = SerialLinkManager::default();
        let mut host = connect_duplex(&manager, "COM7").await;

        manager.disconnect().await.unwrap();
        assert_eq!(manager.current_port().await, None);

        let mut received = Vec::new();
        host.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"{\"type\":\"logout\"}\n");

        // No orphaned active state: an immediate reconnect succeeds.
        let _host = connect_duplex(&manager, "COM7").await;
        assert_eq!(manager.current_port().await.as_deref(), Some("COM7"));
    }

    #[tokio::test]
    async fn fatal_reader_exit_surfaces_and_clears_state() {
        let manager = SerialLinkManager::default();
        manager
            .connect_transport("COM7", Box::new(BrokenReadTransport))
            .await
            .unwrap();

        // The reader's terminal error reaches the blocked caller.
        match manager.get_response(Duration::from_secs(1)).await {
            Err(LinkError::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::InvalidData),
            other => panic!("expected Io error, got {other:?}"),
        }

        // The dead link cleared its own state, so connecting again works.
        let deadline = Instant::now() + Duration::from_secs(1);
        while manager.current_port().await.is_some() {
            assert!(Instant::now() < deadline, "state never cleared");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let _host = connect_duplex(&manager, "COM7").await;
    }
}
