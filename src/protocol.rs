//! miio wire protocol implementation.
//! Handles the hello handshake, packet framing, MD5 checksums and the JSON command envelope.

use crate::crypto::{MiioCipher, md5_concat};
use crate::error::{MiioError, Result};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{Cursor, Read};

pub const MAGIC: u16 = 0x2131;
/// Fixed header in front of every packet's ciphertext
pub const HEADER_LEN: usize = 32;
/// UDP port every plug listens on
pub const DEFAULT_PORT: u16 = 54321;
/// Shortest hello reply that still carries a device id and stamp
pub const MIN_HELLO_REPLY_LEN: usize = 16;

const METHOD_SET_POWER: &str = "set_power";
const METHOD_GET_PROP: &str = "get_prop";
const PROP_POWER: &str = "power";
const POWER_ON: &str = "on";
const POWER_OFF: &str = "off";

/// The 32-byte hello packet: magic, length 0x0020, then 0xFF filler.
pub fn hello_packet() -> [u8; HEADER_LEN] {
    let mut packet = [0xFFu8; HEADER_LEN];
    BigEndian::write_u16(&mut packet[0..2], MAGIC);
    BigEndian::write_u16(&mut packet[2..4], HEADER_LEN as u16);
    packet
}

/// Identifiers handed out by a plug in its hello reply.
///
/// Valid for exactly one command; a fresh handshake precedes every exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub device_id: [u8; 4],
    pub stamp: [u8; 4],
}

impl Session {
    /// Take device id (bytes 8..12) and stamp (bytes 12..16) from a raw hello reply.
    ///
    /// Only the length is checked, the reply magic is not.
    pub fn from_hello_reply(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_HELLO_REPLY_LEN {
            return Err(MiioError::MalformedHandshake(data.len()));
        }
        let mut device_id = [0u8; 4];
        let mut stamp = [0u8; 4];
        device_id.copy_from_slice(&data[8..12]);
        stamp.copy_from_slice(&data[12..16]);
        Ok(Self { device_id, stamp })
    }
}

/// miio packet header structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub magic: u16,
    /// Total packet length (header + ciphertext)
    pub length: u16,
    pub reserved: u32,
    pub device_id: [u8; 4],
    pub stamp: [u8; 4],
    pub checksum: [u8; 16],
}

impl PacketHeader {
    /// Recompute the checksum for `ciphertext` and compare it with the one on the wire.
    pub fn verify(&self, token: &[u8], ciphertext: &[u8]) -> bool {
        let mut head = Vec::with_capacity(16);
        // Writes into a Vec cannot fail.
        let _ = head.write_u16::<BigEndian>(self.magic);
        let _ = head.write_u16::<BigEndian>(self.length);
        let _ = head.write_u32::<BigEndian>(self.reserved);
        head.extend_from_slice(&self.device_id);
        head.extend_from_slice(&self.stamp);
        md5_concat(&[&head, token, ciphertext]) == self.checksum
    }
}

/// Parse the 32-byte header at the start of a packet.
pub fn parse_header(data: &[u8]) -> Result<PacketHeader> {
    if data.len() < HEADER_LEN {
        return Err(MiioError::InvalidResponse(format!(
            "packet too short ({} bytes)",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let magic = cursor.read_u16::<BigEndian>()?;
    let length = cursor.read_u16::<BigEndian>()?;
    let reserved = cursor.read_u32::<BigEndian>()?;
    let mut device_id = [0u8; 4];
    let mut stamp = [0u8; 4];
    let mut checksum = [0u8; 16];
    cursor.read_exact(&mut device_id)?;
    cursor.read_exact(&mut stamp)?;
    cursor.read_exact(&mut checksum)?;

    Ok(PacketHeader {
        magic,
        length,
        reserved,
        device_id,
        stamp,
        checksum,
    })
}

/// Frame an already encrypted payload for `session`.
pub fn pack_packet(session: &Session, token: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let total = HEADER_LEN + ciphertext.len();
    let length = u16::try_from(total).map_err(|_| MiioError::EncryptionFailed)?;

    let mut data = Vec::with_capacity(total);
    data.write_u16::<BigEndian>(MAGIC)?;
    data.write_u16::<BigEndian>(length)?;
    data.write_u32::<BigEndian>(0)?;
    data.extend_from_slice(&session.device_id);
    data.extend_from_slice(&session.stamp);

    let checksum = md5_concat(&[&data, token, ciphertext]);
    data.extend_from_slice(&checksum);
    data.extend_from_slice(ciphertext);
    Ok(data)
}

/// Encrypt `plaintext` and frame it into a complete packet.
pub fn encode(plaintext: &[u8], cipher: &MiioCipher, session: &Session) -> Result<Vec<u8>> {
    let ciphertext = cipher.encrypt(plaintext);
    pack_packet(session, cipher.token(), &ciphertext)
}

/// Strip the header of `packet` and decrypt the rest.
pub fn decode(packet: &[u8], cipher: &MiioCipher) -> Result<Vec<u8>> {
    if packet.len() < HEADER_LEN {
        return Err(MiioError::InvalidResponse(format!(
            "response too short ({} bytes)",
            packet.len()
        )));
    }
    cipher.decrypt(&packet[HEADER_LEN..])
}

/// JSON-RPC style envelope carried inside every command packet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub id: u32,
    pub method: String,
    pub params: Vec<Value>,
}

impl Command {
    pub fn new<M: Into<String>>(method: M, params: Vec<Value>) -> Self {
        Self {
            id: 1,
            method: method.into(),
            params,
        }
    }

    /// `set_power` with `["on"]` or `["off"]`.
    pub fn set_power(on: bool) -> Self {
        let state = if on { POWER_ON } else { POWER_OFF };
        Self::new(METHOD_SET_POWER, vec![Value::from(state)])
    }

    /// `get_prop` for the `power` property.
    pub fn get_power() -> Self {
        Self::new(METHOD_GET_PROP, vec![Value::from(PROP_POWER)])
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Decrypted reply to a `get_prop` command.
#[derive(Debug, Clone, Deserialize)]
pub struct PropReply {
    #[serde(default)]
    pub result: Vec<String>,
}

impl PropReply {
    pub fn parse(plaintext: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(plaintext)?)
    }

    /// First result entry interpreted as a power state.
    pub fn power(&self) -> Result<bool> {
        self.result
            .first()
            .map(|state| state == POWER_ON)
            .ok_or_else(|| MiioError::InvalidResponse("no power state in response".into()))
    }
}
