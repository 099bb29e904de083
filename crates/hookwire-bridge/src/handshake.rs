//! Process-start handshake between host and plugin.
//!
//! The host hands the magic cookie to the plugin through its environment.
//! The plugin's first frame, on the control stream, repeats the cookie and
//! announces the protocol version it speaks. Any mismatch aborts the
//! connection before hook traffic starts.

use std::env;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BridgeError, TransportError};
use crate::stream::StreamId;
use crate::transport::{FrameReader, FrameWriter};

const HANDSHAKE_TARGET: &str = "hookwire_bridge::handshake";

/// Version of the bridge protocol spoken by this crate.
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the magic cookie to a plugin process.
pub const MAGIC_COOKIE_KEY: &str = "HOOKWIRE_PLUGIN_MAGIC_COOKIE";

/// Expected magic cookie value.
pub const MAGIC_COOKIE_VALUE: &str = "7c1e5b0f3a9d4e22b8f6c0a14d9e3b57";

/// Handshake message sent by the plugin on the control stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Protocol version spoken by the plugin.
    pub protocol_version: u32,
    /// Cookie key the plugin was launched with.
    pub magic_cookie_key: String,
    /// Cookie value the plugin was launched with.
    pub magic_cookie_value: String,
}

/// Expected handshake parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    protocol_version: u32,
    cookie_key: String,
    cookie_value: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            cookie_key: MAGIC_COOKIE_KEY.to_owned(),
            cookie_value: MAGIC_COOKIE_VALUE.to_owned(),
        }
    }
}

impl HandshakeConfig {
    /// Creates a configuration with a custom cookie.
    #[must_use]
    pub fn new(
        protocol_version: u32,
        cookie_key: impl Into<String>,
        cookie_value: impl Into<String>,
    ) -> Self {
        Self {
            protocol_version,
            cookie_key: cookie_key.into(),
            cookie_value: cookie_value.into(),
        }
    }

    /// Environment variable name for the cookie.
    #[must_use]
    pub fn cookie_key(&self) -> &str {
        &self.cookie_key
    }

    /// Expected cookie value.
    #[must_use]
    pub fn cookie_value(&self) -> &str {
        &self.cookie_value
    }

    /// Builds the message a plugin sends.
    #[must_use]
    pub fn handshake(&self) -> Handshake {
        Handshake {
            protocol_version: self.protocol_version,
            magic_cookie_key: self.cookie_key.clone(),
            magic_cookie_value: self.cookie_value.clone(),
        }
    }

    /// Returns true when the current process was launched with the cookie.
    #[must_use]
    pub fn launched_by_host(&self) -> bool {
        env::var(&self.cookie_key).is_ok_and(|value| value == self.cookie_value)
    }

    /// Checks a handshake offered by a plugin.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Handshake` on a version or cookie mismatch.
    pub fn verify(&self, offered: &Handshake) -> Result<(), BridgeError> {
        if offered.protocol_version != self.protocol_version {
            return Err(BridgeError::Handshake {
                reason: format!(
                    "protocol version {} is not supported, expected {}",
                    offered.protocol_version, self.protocol_version
                ),
            });
        }
        if offered.magic_cookie_key != self.cookie_key
            || offered.magic_cookie_value != self.cookie_value
        {
            return Err(BridgeError::Handshake {
                reason: "magic cookie mismatch".to_owned(),
            });
        }
        Ok(())
    }

    /// Writes the plugin's handshake frame.
    ///
    /// # Errors
    ///
    /// Returns a transport or codec error if the frame cannot be written.
    pub fn send<W: Write>(&self, writer: &mut FrameWriter<W>) -> Result<(), BridgeError> {
        let payload = serde_json::to_vec(&self.handshake())?;
        writer.write_frame(StreamId::CONTROL, &payload)?;
        Ok(())
    }

    /// Reads and verifies the plugin's handshake frame.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Handshake` if the first frame is not a valid
    /// handshake on the control stream, or if it does not match.
    pub fn receive<R: Read>(&self, reader: &mut FrameReader<R>) -> Result<Handshake, BridgeError> {
        let frame = reader.read_frame().map_err(|error| match error {
            TransportError::Closed => BridgeError::Handshake {
                reason: "plugin exited before completing the handshake".to_owned(),
            },
            other => BridgeError::Transport(other),
        })?;
        if frame.stream != StreamId::CONTROL {
            return Err(BridgeError::Handshake {
                reason: format!("expected handshake on stream 0, got stream {}", frame.stream),
            });
        }
        let offered: Handshake =
            serde_json::from_slice(&frame.payload).map_err(|error| BridgeError::Handshake {
                reason: format!("malformed handshake: {error}"),
            })?;
        self.verify(&offered)?;
        debug!(
            target: HANDSHAKE_TARGET,
            protocol_version = offered.protocol_version,
            "handshake accepted"
        );
        Ok(offered)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use rstest::rstest;

    use super::*;

    fn frames_for(config: &HandshakeConfig) -> Vec<u8> {
        let mut buffer = Vec::new();
        config
            .send(&mut FrameWriter::new(&mut buffer))
            .expect("send handshake");
        buffer
    }

    #[rstest]
    fn accepts_matching_handshake() {
        let config = HandshakeConfig::default();
        let bytes = frames_for(&config);

        let offered = config
            .receive(&mut FrameReader::new(Cursor::new(bytes)))
            .expect("handshake accepted");

        assert_eq!(offered.protocol_version, PROTOCOL_VERSION);
    }

    #[rstest]
    #[case::version(HandshakeConfig::new(2, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE))]
    #[case::cookie_value(HandshakeConfig::new(PROTOCOL_VERSION, MAGIC_COOKIE_KEY, "stale"))]
    #[case::cookie_key(HandshakeConfig::new(PROTOCOL_VERSION, "OTHER", MAGIC_COOKIE_VALUE))]
    fn rejects_mismatched_handshake(#[case] plugin: HandshakeConfig) {
        let bytes = frames_for(&plugin);

        let result = HandshakeConfig::default().receive(&mut FrameReader::new(Cursor::new(bytes)));

        assert!(matches!(result, Err(BridgeError::Handshake { .. })));
    }

    #[rstest]
    fn rejects_handshake_on_wrong_stream() {
        let mut buffer = Vec::new();
        let payload = serde_json::to_vec(&HandshakeConfig::default().handshake()).expect("encode");
        FrameWriter::new(&mut buffer)
            .write_frame(StreamId::HOOKS, &payload)
            .expect("write");

        let result = HandshakeConfig::default().receive(&mut FrameReader::new(Cursor::new(buffer)));

        assert!(matches!(result, Err(BridgeError::Handshake { .. })));
    }

    #[rstest]
    fn reports_early_exit_as_handshake_failure() {
        let result =
            HandshakeConfig::default().receive(&mut FrameReader::new(Cursor::new(Vec::new())));

        assert!(matches!(result, Err(BridgeError::Handshake { .. })));
    }
}
