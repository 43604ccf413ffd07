//! # Device Link Layer
//!
//! This crate implements the link layer between a desktop configuration tool and a
//! remote measurement/logging device. Commands and responses travel as single lines
//! of UTF-8 text terminated by `\n`; the payload (JSON in practice) is opaque to
//! this layer — encoding and decoding belong to the callers.
//!
//! Two kinds of links are supported:
//!
//! - **Serial**: exactly one active serial port at a time, managed by
//!   [`SerialLinkManager`]. Callers send a command and block (with a timeout) for
//!   the next response line.
//! - **TCP**: any number of simultaneous connections, keyed by `address:port` and
//!   managed by [`SocketLinkManager`]. Callers send commands and drain already
//!   framed response lines non-blockingly.
//!
//! Every open link runs its own reader task that pulls bytes from the transport,
//! reassembles newline-terminated frames, and pushes them into a bounded per-link
//! event queue. When the queue is full the newest event is dropped: the reader's
//! liveness is favored over completeness.
//!
//! ## Module structure
//!
//! - [`config`]: strongly-typed settings (baud rate, deadlines, queue sizes)
//!   loadable from `devlink.toml` and `DEVLINK_*` environment variables.
//! - [`error`]: the [`LinkError`] taxonomy shared by both managers.
//! - [`framing`]: the newline frame splitter with its retained partial tail.
//! - [`transport`]: type-erased duplex byte streams (serial port or TCP socket)
//!   and the open/dial helpers.
//! - [`reader`]: the per-link reader loop and its event queue.
//! - [`serial`]: the single-port serial link manager.
//! - [`socket`]: the keyed TCP link registry.

pub mod config;
pub mod error;
pub mod framing;
pub mod reader;
pub mod serial;
pub mod socket;
pub mod transport;

pub use config::{LinkSettings, SerialSettings, SocketSettings};
pub use error::{LinkError, Result};
pub use serial::SerialLinkManager;
pub use socket::SocketLinkManager;

/// Frame sent best-effort to the device just before a link is torn down.
pub(crate) const LOGOUT_FRAME: &str = r#"{"type":"logout"}"#;
