//! Link layer settings.
//!
//! Configuration is loaded from:
//! 1. a `devlink.toml` file (base configuration)
//! 2. environment variables (prefixed with `DEVLINK_`)
//!
//! Every field has a default reproducing the device's fixed wire parameters, so
//! `LinkSettings::default()` is a fully working configuration and a missing file
//! is not an error.
//!
//! # Example
//! ```no_run
//! use devlink::config::LinkSettings;
//!
//! let settings = LinkSettings::load()?;
//! println!("serial baud rate: {}", settings.serial.baud_rate);
//! # Ok::<(), figment::Error>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level link layer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Serial link settings.
    #[serde(default)]
    pub serial: SerialSettings,
    /// TCP socket link settings.
    #[serde(default)]
    pub socket: SocketSettings,
}

/// Settings for the single serial link.
///
/// The device speaks fixed 115200 baud, 8 data bits, no parity, one stop bit;
/// only the baud rate is configurable here, and only because bench setups with
/// protocol analyzers in the middle occasionally need to slow it down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialSettings {
    /// Baud rate for the port (8N1 framing is fixed).
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Bytes read from the port per loop iteration.
    #[serde(default = "default_serial_chunk")]
    pub chunk_size: usize,
    /// Capacity of the bounded event queue between reader and caller.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Pause before retrying when the port reports zero bytes without closing.
    #[serde(default = "default_idle_backoff", with = "humantime_serde")]
    pub idle_backoff: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            chunk_size: default_serial_chunk(),
            queue_capacity: default_queue_capacity(),
            idle_backoff: default_idle_backoff(),
        }
    }
}

/// Settings shared by all TCP socket links.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketSettings {
    /// Bytes read from the socket per loop iteration.
    #[serde(default = "default_socket_chunk")]
    pub chunk_size: usize,
    /// Capacity of the bounded event queue between reader and caller.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound on the TCP dial.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Read deadline, re-armed before every read; elapsing is a poll, not a failure.
    #[serde(default = "default_read_deadline", with = "humantime_serde")]
    pub read_deadline: Duration,
    /// Write deadline, re-armed before every send.
    #[serde(default = "default_write_deadline", with = "humantime_serde")]
    pub write_deadline: Duration,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_socket_chunk(),
            queue_capacity: default_queue_capacity(),
            connect_timeout: default_connect_timeout(),
            read_deadline: default_read_deadline(),
            write_deadline: default_write_deadline(),
        }
    }
}

// Default value functions
fn default_baud_rate() -> u32 {
    115_200
}

fn default_serial_chunk() -> usize {
    128
}

fn default_socket_chunk() -> usize {
    4096
}

fn default_queue_capacity() -> usize {
    100
}

fn default_idle_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_read_deadline() -> Duration {
    Duration::from_secs(30)
}

fn default_write_deadline() -> Duration {
    Duration::from_secs(10)
}

impl LinkSettings {
    /// Load configuration from `devlink.toml` and the environment.
    ///
    /// Environment variables override file values with the prefix `DEVLINK_`,
    /// using `__` as the section separator.
    /// Example: `DEVLINK_SERIAL__BAUD_RATE=9600`.
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from("devlink.toml")
    }

    /// Load configuration from a specific file path.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DEVLINK_").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_device_parameters() {
        let settings = LinkSettings::default();
        assert_eq!(settings.serial.baud_rate, 115_200);
        assert_eq!(settings.serial.chunk_size, 128);
        assert_eq!(settings.serial.queue_capacity, 100);
        assert_eq!(settings.serial.idle_backoff, Duration::from_millis(100));
        assert_eq!(settings.socket.chunk_size, 4096);
        assert_eq!(settings.socket.queue_capacity, 100);
        assert_eq!(settings.socket.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.socket.read_deadline, Duration::from_secs(30));
        assert_eq!(settings.socket.write_deadline, Duration::from_secs(10));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = LinkSettings::load_from("/nonexistent/devlink.toml")
            .unwrap_or_else(|err| panic!("load failed: {err}"));
        assert_eq!(settings.serial.baud_rate, 115_200);
    }

    #[test]
    fn toml_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("devlink-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap_or_else(|err| panic!("temp dir: {err}"));
        let path = dir.join("devlink.toml");
        std::fs::write(
            &path,
            r#"
            [serial]
            baud_rate = 9600

            [socket]
            read_deadline = "5s"
            "#,
        )
        .unwrap_or_else(|err| panic!("write config: {err}"));

        let settings =
            LinkSettings::load_from(&path).unwrap_or_else(|err| panic!("load failed: {err}"));
        assert_eq!(settings.serial.baud_rate, 9600);
        assert_eq!(settings.socket.read_deadline, Duration::from_secs(5));
        // Untouched fields keep their defaults.
        assert_eq!(settings.serial.chunk_size, 128);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
