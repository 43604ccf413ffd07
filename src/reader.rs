//! The per-link reader loop.
//!
//! Every open link runs exactly one reader task. It pulls fixed-size chunks
//! from the transport's read half, feeds them through a [`FrameBuffer`], and
//! pushes completed frames into the link's bounded event queue. The queue never
//! blocks the reader: when it is full the newest event is dropped.
//!
//! The loop exits on the first of:
//! - the shutdown signal (checked every iteration, and able to interrupt an
//!   in-flight read),
//! - the transport closing (a zero-byte read, or an expected-disconnect error
//!   raised when our own disconnect pulls the handle out from under the read),
//! - any other read error, which is terminal. Under [`ErrorPolicy::Surface`]
//!   one `Error` event is enqueued best-effort first; under
//!   [`ErrorPolicy::Silent`] the loop just ends, and callers discover the death
//!   through their next request.
//!
//! Read-deadline elapses (TCP links) are a polling mechanism, not a failure.

use crate::error::LinkError;
use crate::framing::FrameBuffer;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// One event on a link's queue.
#[derive(Debug)]
pub enum LinkEvent {
    /// A complete newline-terminated frame, delimiter included.
    Data(Vec<u8>),
    /// Terminal failure. At most one is ever enqueued per link; the reader
    /// exits immediately after and enqueues nothing further.
    Error(LinkError),
}

/// What the reader does with an unexpected read error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Enqueue one terminal [`LinkEvent::Error`] for the waiting caller (serial).
    Surface,
    /// Exit without enqueueing; the link's inactive state tells the story (TCP).
    Silent,
}

/// Per-link reader parameters.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Port name or `address:port`, for log lines.
    pub label: String,
    /// Bytes requested from the transport per iteration.
    pub chunk_size: usize,
    /// Optional per-read deadline; elapsing means "poll again", not failure.
    pub read_deadline: Option<Duration>,
    /// When set, a zero-byte read means "no data yet": sleep this long and
    /// retry. When unset, a zero-byte read means the stream closed.
    pub idle_backoff: Option<Duration>,
    /// Disposition of unexpected read errors.
    pub error_policy: ErrorPolicy,
}

/// Producer side of a link's bounded event queue.
///
/// `push` never blocks: a full queue drops the newest event, trading
/// completeness for reader liveness.
pub struct EventSender {
    tx: mpsc::Sender<LinkEvent>,
    label: String,
}

impl EventSender {
    /// Enqueue an event best-effort.
    pub fn push(&self, event: LinkEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(link = %self.label, "event queue full, dropping newest event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(link = %self.label, "event queue consumer gone");
            }
        }
    }
}

/// Create a bounded event queue for one link.
pub fn event_queue(capacity: usize, label: &str) -> (EventSender, mpsc::Receiver<LinkEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        EventSender {
            tx,
            label: label.to_string(),
        },
        rx,
    )
}

/// Whether a read error is the expected signal that the transport was closed
/// underneath the reader by our own disconnect.
///
/// Serial drivers report this inconsistently across platforms, hence the
/// message matching alongside the EOF kind.
pub(crate) fn is_expected_disconnect(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        return true;
    }
    let text = err.to_string();
    text.contains("aborted") || text.contains("disconnected") || text.contains("handle is invalid")
}

/// Run one link's reader loop until shutdown or a terminal condition.
pub async fn run_reader<R>(
    mut source: R,
    config: ReaderConfig,
    events: EventSender,
    mut shutdown: oneshot::Receiver<()>,
) where
    R: AsyncRead + Unpin + Send,
{
    debug!(link = %config.label, "reader loop started");

    let mut chunk = vec![0u8; config.chunk_size];
    let mut frames = FrameBuffer::new();

    loop {
        // The shutdown branch of the select fires even mid-read, so teardown
        // never waits on a stalled transport.
        let read = match config.read_deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = &mut shutdown => break,
                    timed = tokio::time::timeout(deadline, source.read(&mut chunk)) => {
                        match timed {
                            Err(_) => continue,
                            Ok(result) => result,
                        }
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = &mut shutdown => break,
                    result = source.read(&mut chunk) => result,
                }
            }
        };

        match read {
            Ok(0) => match config.idle_backoff {
                Some(backoff) => {
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                None => {
                    debug!(link = %config.label, "transport closed, reader exiting");
                    break;
                }
            },
            Ok(n) => {
                for frame in frames.feed(&chunk[..n]) {
                    events.push(LinkEvent::Data(frame));
                }
            }
            Err(err) if is_expected_disconnect(&err) => {
                debug!(link = %config.label, error = %err, "link closed, reader exiting");
                break;
            }
            Err(err) => {
                warn!(link = %config.label, error = %err, "unexpected read error, reader exiting");
                if config.error_policy == ErrorPolicy::Surface {
                    events.push(LinkEvent::Error(LinkError::Io(err)));
                }
                break;
            }
        }
    }

    debug!(link = %config.label, "reader loop stopped");
}
