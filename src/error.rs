//! Error types for the device link layer.
//!
//! [`LinkError`] consolidates the failure modes of both link managers:
//!
//! - **Configuration errors** (`NoPortsFound`, `Config`) are surfaced immediately
//!   and never retried.
//! - **Connection errors** (`ConnectFailed`, `ConnectTimeout`, `Serial`) mean the
//!   link was never created.
//! - **State errors** (`NotConnected`, `AlreadyConnected`, `NoSuchLink`,
//!   `LinkInactive`) are request-validation failures; no I/O was attempted.
//! - **Timeout errors** (`Timeout`, `WriteTimeout`) are distinguishable from data
//!   and connection errors so callers can poll again.
//! - **`Io`** carries unexpected transport failures, including the terminal error
//!   a serial reader delivers through the event queue.
//!
//! Expected-disconnect errors (the transport closed by our own disconnect) never
//! appear here; the reader loop swallows them and exits cleanly.

use thiserror::Error;

/// Convenience alias for results using the link layer error type.
pub type Result<T> = std::result::Result<T, LinkError>;

/// All errors produced by the device link layer.
#[derive(Error, Debug)]
pub enum LinkError {
    /// Port enumeration found no serial ports on this machine.
    #[error("no serial ports found")]
    NoPortsFound,

    /// A serial link is already active; it must be disconnected first.
    #[error("already connected to '{0}', disconnect first")]
    AlreadyConnected(String),

    /// The operation requires an active serial link and there is none.
    #[error("serial port not connected")]
    NotConnected,

    /// Dialing or opening the transport failed.
    #[error("failed to connect to {target}: {source}")]
    ConnectFailed {
        /// The port name or `address:port` that was dialed.
        target: String,
        /// The underlying transport error.
        #[source]
        source: std::io::Error,
    },

    /// The TCP dial did not complete within the connect timeout.
    #[error("connecting to {0} timed out")]
    ConnectTimeout(String),

    /// No response arrived within the caller's timeout.
    #[error("timed out waiting for a response")]
    Timeout,

    /// No link exists for the given `address:port` key.
    #[error("no link for {0}")]
    NoSuchLink(String),

    /// A link exists for the key but is no longer active.
    #[error("link {0} is no longer active")]
    LinkInactive(String),

    /// The link's event queue held no new data.
    #[error("no new data from {0}")]
    NoData(String),

    /// A socket write did not complete within the write deadline.
    #[error("write to {0} timed out")]
    WriteTimeout(String),

    /// An unexpected transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A serial port error from the underlying driver.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Settings could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
}
