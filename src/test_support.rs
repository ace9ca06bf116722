//! Loopback stand-in for a miio plug, used by the async tests.

use crate::config::ClientConfig;
use crate::crypto::MiioCipher;
use crate::protocol::{self, Session};
use crate::store::{DeviceCollection, DeviceRecord};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

pub const TOKEN_HEX: &str = "000102030405060708090a0b0c0d0e0f";

/// Client settings with short deadlines, aimed at a plug on `port`.
pub fn fast_config(port: u16) -> ClientConfig {
    ClientConfig::new()
        .with_port(port)
        .with_handshake_timeout(Duration::from_millis(500))
        .with_command_timeout(Duration::from_millis(300))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlugBehavior {
    /// Answers hellos and commands.
    Normal,
    /// Answers hellos with 8 bytes.
    ShortHello,
    /// Never answers anything.
    Silent,
    /// Answers hellos, applies commands, never acknowledges them.
    NoAck,
    /// Answers commands with a packet shorter than the header.
    ShortReply,
}

#[derive(Default)]
struct PlugState {
    power: bool,
    last_command: Option<String>,
    packets: usize,
}

pub struct FakePlug {
    port: u16,
    state: Arc<Mutex<PlugState>>,
    task: JoinHandle<()>,
}

impl Drop for FakePlug {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl FakePlug {
    pub const DEVICE_ID: [u8; 4] = [0x04, 0x8a, 0x2b, 0x11];
    pub const STAMP: [u8; 4] = [0x00, 0x00, 0x12, 0x34];

    pub async fn spawn(behavior: PlugBehavior) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let state = Arc::new(Mutex::new(PlugState::default()));
        let cipher = MiioCipher::from_hex(TOKEN_HEX).unwrap();

        let task_state = state.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
                let data = &buf[..n];
                task_state.lock().packets += 1;
                if behavior == PlugBehavior::Silent {
                    continue;
                }

                if data == &protocol::hello_packet()[..] {
                    let reply = if behavior == PlugBehavior::ShortHello {
                        vec![0x21, 0x31, 0x00, 0x08, 0, 0, 0, 0]
                    } else {
                        let mut r = protocol::hello_packet();
                        r[4..8].fill(0);
                        r[8..12].copy_from_slice(&Self::DEVICE_ID);
                        r[12..16].copy_from_slice(&Self::STAMP);
                        r.to_vec()
                    };
                    let _ = socket.send_to(&reply, peer).await;
                    continue;
                }

                let Some(reply) = Self::handle_command(data, &cipher, &task_state) else {
                    continue;
                };
                match behavior {
                    PlugBehavior::NoAck => {}
                    PlugBehavior::ShortReply => {
                        let _ = socket.send_to(&reply[..20], peer).await;
                    }
                    _ => {
                        let _ = socket.send_to(&reply, peer).await;
                    }
                }
            }
        });

        Self { port, state, task }
    }

    fn handle_command(
        data: &[u8],
        cipher: &MiioCipher,
        state: &Mutex<PlugState>,
    ) -> Option<Vec<u8>> {
        let plaintext = protocol::decode(data, cipher).ok()?;
        let cmd: serde_json::Value = serde_json::from_slice(&plaintext).ok()?;
        let method = cmd["method"].as_str()?;
        let param = cmd["params"][0].as_str().unwrap_or_default();

        let mut st = state.lock();
        st.last_command = Some(format!("{}:{}", method, param));
        let body = match method {
            "set_power" => {
                st.power = param == "on";
                json!({"id": 1, "result": ["ok"]})
            }
            "get_prop" => json!({"id": 1, "result": [if st.power { "on" } else { "off" }]}),
            _ => json!({"id": 1, "error": {"code": -32601, "message": "Method not found"}}),
        };

        let session = Session {
            device_id: Self::DEVICE_ID,
            stamp: Self::STAMP,
        };
        protocol::encode(&serde_json::to_vec(&body).ok()?, cipher, &session).ok()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn power_state(&self) -> bool {
        self.state.lock().power
    }

    pub fn set_power_state(&self, on: bool) {
        self.state.lock().power = on;
    }

    pub fn last_command(&self) -> Option<String> {
        self.state.lock().last_command.clone()
    }

    pub fn packets_received(&self) -> usize {
        self.state.lock().packets
    }
}

/// `n` binary switches at `address`, all sharing [`TOKEN_HEX`].
pub fn sample_collection(n: usize, address: &str) -> DeviceCollection {
    let devices = (0..n)
        .map(|i| DeviceRecord {
            address: address.to_string(),
            token: TOKEN_HEX.to_string(),
            name: format!("Plug {}", i),
            device_type: "chuangmi.plug.m1".to_string(),
            number: i as u32,
            unique_id: format!("plug-{}", i),
            id: i as u32,
            custom_name: String::new(),
            min: 0,
            max: 1,
            step: 1,
            can_write: true,
            value: 0,
        })
        .collect();
    DeviceCollection {
        connected: false,
        devices,
    }
}
