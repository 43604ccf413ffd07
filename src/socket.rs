//! The socket link manager: a registry of TCP links to devices on the network.
//!
//! Links are keyed by `address:port`. Unlike the serial side, any number may be
//! open at once, and callers drain already-framed response lines non-blockingly
//! instead of waiting on a single response. Connecting to a key that already
//! has an active link succeeds without redialing.
//!
//! Locking is two-level: the registry's own lock guards the map, each link's
//! lock guards its fields, and the registry lock is always taken first — a link
//! lock is never held while acquiring the registry lock.

use crate::config::SocketSettings;
use crate::error::{LinkError, Result};
use crate::framing::{strip_delimiter, FrameBuffer};
use crate::reader::{event_queue, run_reader, ErrorPolicy, LinkEvent, ReaderConfig};
use crate::transport::{dial, DynTransport};
use crate::LOGOUT_FRAME;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{split, AsyncWriteExt, WriteHalf};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Mutable state of one TCP link, behind the link's own lock.
struct SocketLinkState {
    active: bool,
    writer: Option<WriteHalf<DynTransport>>,
    shutdown: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
    /// Retained unterminated remainder for [`SocketLinkManager::get_all_socket_data`].
    frames: FrameBuffer,
}

/// One TCP link: its state and its event-queue receiver.
///
/// The receiver sits behind its own lock so draining never contends with
/// sends on the state lock.
struct SocketLink {
    key: String,
    state: Mutex<SocketLinkState>,
    events: Mutex<mpsc::Receiver<LinkEvent>>,
}

impl SocketLink {
    async fn ensure_active(&self) -> Result<()> {
        if self.state.lock().await.active {
            Ok(())
        } else {
            Err(LinkError::LinkInactive(self.key.clone()))
        }
    }
}

/// Manages the set of TCP links, keyed by `address:port`.
pub struct SocketLinkManager {
    settings: SocketSettings,
    links: Arc<RwLock<HashMap<String, Arc<SocketLink>>>>,
}

fn link_key(address: &str, port: &str) -> String {
    format!("{address}:{port}")
}

impl SocketLinkManager {
    /// Create a manager with the given settings.
    pub fn new(settings: SocketSettings) -> Self {
        Self {
            settings,
            links: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Dial `address:port` and start a reader loop for the new link.
    ///
    /// Idempotent: if an active link already exists for the key this returns
    /// success without touching it. A stale (inactive) entry is removed first.
    /// The registry lock is held across the dial, so two concurrent connects
    /// for the same key produce exactly one link.
    pub async fn connect(&self, address: &str, port: &str) -> Result<()> {
        let key = link_key(address, port);
        let mut links = self.links.write().await;

        if let Some(existing) = links.get(&key) {
            if existing.state.lock().await.active {
                debug!(link = %key, "already connected");
                return Ok(());
            }
            links.remove(&key);
        }

        let stream = dial(&key, self.settings.connect_timeout).await?;
        let transport: DynTransport = Box::new(stream);
        let (read_half, writer) = split(transport);
        let (events_tx, events_rx) = event_queue(self.settings.queue_capacity, &key);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let link = Arc::new(SocketLink {
            key: key.clone(),
            state: Mutex::new(SocketLinkState {
                active: true,
                writer: Some(writer),
                shutdown: Some(shutdown_tx),
                reader: None,
                frames: FrameBuffer::new(),
            }),
            events: Mutex::new(events_rx),
        });

        let config = ReaderConfig {
            label: key.clone(),
            chunk_size: self.settings.chunk_size,
            read_deadline: Some(self.settings.read_deadline),
            idle_backoff: None,
            error_policy: ErrorPolicy::Silent,
        };

        let registry = Arc::clone(&self.links);
        let reader_link = Arc::clone(&link);
        let handle = tokio::spawn(async move {
            run_reader(read_half, config, events_tx, shutdown_rx).await;
            // The link is dead however the loop ended. Deactivate it and drop
            // its own registry entry so a later connect for this key redials.
            // Registry lock before link lock, as everywhere.
            let mut links = registry.write().await;
            let still_registered = links
                .get(&reader_link.key)
                .is_some_and(|entry| Arc::ptr_eq(entry, &reader_link));
            if still_registered {
                links.remove(&reader_link.key);
            }
            drop(links);

            let mut state = reader_link.state.lock().await;
            state.active = false;
            state.writer = None;
            state.shutdown = None;
        });

        link.state.lock().await.reader = Some(handle);
        links.insert(key.clone(), link);

        info!(link = %key, "socket link connected");
        Ok(())
    }

    /// Write one command frame to the link: the payload bytes followed by a
    /// single `0x0A` byte, as one write under the link's lock, bounded by the
    /// write deadline.
    pub async fn send(&self, address: &str, port: &str, data: &str) -> Result<()> {
        let key = link_key(address, port);
        let link = self.get_link(&key).await?;

        let mut state = link.state.lock().await;
        if !state.active {
            return Err(LinkError::LinkInactive(key));
        }
        let Some(writer) = state.writer.as_mut() else {
            return Err(LinkError::LinkInactive(key));
        };

        // The device treats the payload as opaque bytes; only the trailing
        // 0x0A is part of this layer's contract.
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.extend_from_slice(data.as_bytes());
        frame.push(0x0A);

        match tokio::time::timeout(self.settings.write_deadline, writer.write_all(&frame)).await {
            Err(_) => return Err(LinkError::WriteTimeout(key)),
            Ok(result) => result?,
        }
        writer.flush().await?;

        debug!(link = %key, bytes = frame.len(), "sent frame");
        Ok(())
    }

    /// Pop one already-framed response line, non-blockingly.
    ///
    /// Returns [`LinkError::NoData`] when the queue is empty.
    pub async fn get_socket_data(&self, address: &str, port: &str) -> Result<String> {
        let key = link_key(address, port);
        let link = self.get_link(&key).await?;
        link.ensure_active().await?;

        let mut events = link.events.lock().await;
        match events.try_recv() {
            Ok(LinkEvent::Data(frame)) => Ok(strip_delimiter(frame)),
            Ok(LinkEvent::Error(err)) => Err(err),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => Err(LinkError::NoData(key)),
        }
    }

    /// Drain everything currently queued, returning all completed lines.
    ///
    /// Drained bytes pass through the link's own frame buffer, so an
    /// unterminated remainder is retained on the link and completed by a later
    /// drain. An empty result is `Ok` — no data is not an error here.
    pub async fn get_all_socket_data(&self, address: &str, port: &str) -> Result<Vec<String>> {
        let key = link_key(address, port);
        let link = self.get_link(&key).await?;
        link.ensure_active().await?;

        let mut lines = Vec::new();
        let mut events = link.events.lock().await;
        let mut state = link.state.lock().await;
        loop {
            match events.try_recv() {
                Ok(LinkEvent::Data(chunk)) => {
                    for frame in state.frames.feed(&chunk) {
                        lines.push(strip_delimiter(frame));
                    }
                }
                Ok(LinkEvent::Error(err)) => {
                    debug!(link = %key, error = %err, "dropping stray error event in drain");
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        Ok(lines)
    }

    /// Tear one link down: best-effort logout frame, remove the registry
    /// entry, stop and join the reader, close the socket.
    ///
    /// Fails with [`LinkError::NoSuchLink`] when the key is absent.
    pub async fn disconnect(&self, address: &str, port: &str) -> Result<()> {
        // Logout is advisory; a dead peer must not stop the teardown.
        if let Err(err) = self.send(address, port, LOGOUT_FRAME).await {
            debug!(error = %err, "logout frame not sent");
        }

        let key = link_key(address, port);
        let link = {
            self.links
                .write()
                .await
                .remove(&key)
                .ok_or_else(|| LinkError::NoSuchLink(key.clone()))?
        };

        let (shutdown, reader, writer) = {
            let mut state = link.state.lock().await;
            state.active = false;
            (
                state.shutdown.take(),
                state.reader.take(),
                state.writer.take(),
            )
        };

        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        if let Some(reader) = reader {
            if let Err(err) = reader.await {
                warn!(link = %key, error = %err, "socket reader task panicked");
            }
        }
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }

        info!(link = %key, "socket link disconnected");
        Ok(())
    }

    /// Keys of all links currently active.
    pub async fn list_active(&self) -> Vec<String> {
        let links = self.links.read().await;
        let mut active = Vec::new();
        for (key, link) in links.iter() {
            if link.state.lock().await.active {
                active.push(key.clone());
            }
        }
        active
    }

    /// Whether an active link exists for `address:port`.
    pub async fn check_connection(&self, address: &str, port: &str) -> bool {
        let key = link_key(address, port);
        let link = { self.links.read().await.get(&key).cloned() };
        match link {
            Some(link) => link.state.lock().await.active,
            None => false,
        }
    }

    async fn get_link(&self, key: &str) -> Result<Arc<SocketLink>> {
        self.links
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| LinkError::NoSuchLink(key.to_string()))
    }
}

impl Default for SocketLinkManager {
    fn default() -> Self {
        Self::new(SocketSettings::default())
    }
}
