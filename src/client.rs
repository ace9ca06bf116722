//! UDP transport for the miio protocol.
//! Every exchange is a fresh hello handshake followed by exactly one command.

use crate::config::ClientConfig;
use crate::crypto::MiioCipher;
use crate::error::{MiioError, Result};
use crate::protocol::{self, Command, PropReply, Session};
use log::{debug, warn};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout, timeout_at};

/// How strongly a command exchange depends on the plug's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The exchange fails unless a reply arrives before the deadline.
    Required,
    /// A reply is read if one arrives; a read error or timeout still counts as sent.
    BestEffort,
}

/// Stateless miio client. Cheap to clone and safe to share between tasks.
#[derive(Debug, Clone, Default)]
pub struct ProtocolClient {
    config: ClientConfig,
}

impl ProtocolClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send the hello packet to `address` and read the session identifiers from the reply.
    pub async fn discover(&self, address: &str) -> Result<Session> {
        let socket = self.connect(address).await?;
        let hello = protocol::hello_packet();
        let mut buf = vec![0u8; self.config.recv_buffer];

        debug!("Sending hello to {}", address);
        let n = timeout(self.config.handshake_timeout, async {
            socket.send(&hello).await?;
            Ok::<_, std::io::Error>(socket.recv(&mut buf).await?)
        })
        .await
        .map_err(|_| MiioError::HandshakeTimeout)??;

        debug!("Handshake reply from {}: {} bytes", address, n);
        Session::from_hello_reply(&buf[..n])
    }

    /// Encrypt `command`, send it for `session` and read the reply according to `confirmation`.
    ///
    /// Returns the raw reply packet, or `None` when a best-effort read produced nothing.
    pub async fn exchange(
        &self,
        address: &str,
        cipher: &MiioCipher,
        session: &Session,
        command: &Command,
        confirmation: Confirmation,
    ) -> Result<Option<Vec<u8>>> {
        let packet = protocol::encode(&command.to_bytes()?, cipher, session)?;
        let socket = self.connect(address).await?;
        let deadline = Instant::now() + self.config.command_timeout;

        debug!(
            "Sending {} to {} ({} bytes)",
            command.method,
            address,
            packet.len()
        );
        timeout_at(deadline, socket.send(&packet))
            .await
            .map_err(|_| MiioError::CommandTimeout)??;

        let mut buf = vec![0u8; self.config.recv_buffer];
        let reply = timeout_at(deadline, socket.recv(&mut buf)).await;

        match (confirmation, reply) {
            (_, Ok(Ok(n))) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            (Confirmation::Required, Ok(Err(e))) => Err(e.into()),
            (Confirmation::Required, Err(_)) => Err(MiioError::CommandTimeout),
            (Confirmation::BestEffort, Ok(Err(e))) => {
                debug!("Ignoring ack read error from {}: {}", address, e);
                Ok(None)
            }
            (Confirmation::BestEffort, Err(_)) => {
                debug!("No ack from {} before deadline", address);
                Ok(None)
            }
        }
    }

    /// Handshake, then send `set_power`. Succeeds once the command is on the wire.
    pub async fn set_power(&self, address: &str, cipher: &MiioCipher, on: bool) -> Result<()> {
        let session = self.discover(address).await?;
        self.exchange(
            address,
            cipher,
            &session,
            &Command::set_power(on),
            Confirmation::BestEffort,
        )
        .await?;
        Ok(())
    }

    /// Handshake, then ask for the `power` property and decode the reply.
    pub async fn query_power(&self, address: &str, cipher: &MiioCipher) -> Result<bool> {
        let session = self.discover(address).await?;
        let reply = self
            .exchange(
                address,
                cipher,
                &session,
                &Command::get_power(),
                Confirmation::Required,
            )
            .await?
            .ok_or_else(|| MiioError::InvalidResponse("no reply".into()))?;

        let header = protocol::parse_header(&reply)?;
        if !header.verify(cipher.token(), &reply[protocol::HEADER_LEN..]) {
            debug!("Checksum mismatch in reply from {}", address);
        }

        let plaintext = protocol::decode(&reply, cipher)?;
        PropReply::parse(&plaintext)?.power()
    }

    async fn connect(&self, address: &str) -> Result<UdpSocket> {
        let target = tokio::net::lookup_host((address, self.config.port))
            .await?
            .next()
            .ok_or_else(|| MiioError::Io(format!("Could not resolve {}", address)))?;

        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(target).await.inspect_err(|e| {
            warn!("Failed to connect UDP socket to {}: {}", target, e);
        })?;
        Ok(socket)
    }
}
