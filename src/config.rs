//! Tunables for the protocol client and the device table location.
//!
//! Both structs deserialize with defaults for every missing field so a host
//! application can embed them in its own configuration document.

use crate::protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SETTINGS_PATH: &str = "settings.json";

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_RECV_BUFFER: usize = 1024;

/// Settings for [`ProtocolClient`](crate::client::ProtocolClient).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// UDP port on the plug
    pub port: u16,
    /// Deadline for the hello exchange
    #[serde(with = "millis")]
    pub handshake_timeout: Duration,
    /// Deadline for sending a command and reading its reply
    #[serde(with = "millis")]
    pub command_timeout: Duration,
    /// Receive buffer size for a single datagram
    pub recv_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            recv_buffer: DEFAULT_RECV_BUFFER,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_recv_buffer(mut self, size: usize) -> Self {
        self.recv_buffer = size;
        self
    }
}

/// Where the device table lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_SETTINGS_PATH),
        }
    }
}

impl StoreConfig {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
