use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::UdpSocket;
use tracing::info;

use crate::config::RadioConfig;

/// Errors raised by a single outbound send. Callers at the dispatch
/// boundary catch and log these; they never cross a poll cycle.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid radio target: {0}")]
    BadTarget(String),
}

/// Outbound mesh messaging channel. Fire-and-forget: no delivery
/// acknowledgment exists on the mesh side.
#[async_trait]
pub trait MeshTransport {
    /// Broadcast a node announcement for the synthetic node `!{token}`.
    /// The identity is also stamped on subsequent text/position packets.
    async fn announce_identity(
        &self,
        token: &str,
        long_label: &str,
        short_label: &str,
    ) -> Result<(), TransportError>;

    async fn send_text(&self, message: &str) -> Result<(), TransportError>;

    async fn send_position(
        &self,
        latitude: f64,
        longitude: f64,
        altitude_m: i32,
    ) -> Result<(), TransportError>;
}

/// Datagram payloads shared by every node on the multicast group.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum MeshPacket<'a> {
    NodeInfo {
        node_id: &'a str,
        long_name: &'a str,
        short_name: &'a str,
        channel: &'a str,
        key: &'a str,
    },
    Text {
        node_id: &'a str,
        channel: &'a str,
        key: &'a str,
        message: &'a str,
    },
    Position {
        node_id: &'a str,
        channel: &'a str,
        key: &'a str,
        latitude: f64,
        longitude: f64,
        altitude: i32,
    },
}

/// UDP multicast mesh radio sender.
#[derive(Debug)]
pub struct MeshRadio {
    socket: UdpSocket,
    target: SocketAddr,
    channel: String,
    key: String,
    /// Identity of the most recently announced node, stamped on
    /// text/position packets the way a radio keeps its configured node id.
    node_id: Mutex<Option<String>>,
}

impl MeshRadio {
    /// Bind a sender socket and resolve the configured target group.
    pub async fn bind(config: &RadioConfig) -> Result<Self, TransportError> {
        let group: IpAddr = config
            .group
            .parse()
            .map_err(|_| TransportError::BadTarget(config.group.clone()))?;
        let target = SocketAddr::new(group, config.port);

        let domain = if target.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        let bind_addr: SocketAddr = if target.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        socket.bind(&bind_addr.into())?;
        socket.set_nonblocking(true)?;

        if let IpAddr::V4(v4) = group {
            if v4.is_multicast() {
                socket.set_multicast_ttl_v4(1)?;
                socket.set_multicast_loop_v4(true)?;
            }
        }

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket)?;

        info!("Mesh radio bound, target {target}");

        Ok(Self {
            socket: tokio_socket,
            target,
            channel: config.channel.clone(),
            key: config.key.clone(),
            node_id: Mutex::new(None),
        })
    }

    fn current_node_id(&self) -> String {
        self.node_id
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default()
    }

    async fn send_packet(&self, packet: &MeshPacket<'_>) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(packet)?;
        self.socket.send_to(&payload, self.target).await?;
        Ok(())
    }
}

#[async_trait]
impl MeshTransport for MeshRadio {
    async fn announce_identity(
        &self,
        token: &str,
        long_label: &str,
        short_label: &str,
    ) -> Result<(), TransportError> {
        let node_id = format!("!{token}");
        self.send_packet(&MeshPacket::NodeInfo {
            node_id: &node_id,
            long_name: long_label,
            short_name: short_label,
            channel: &self.channel,
            key: &self.key,
        })
        .await?;
        *self.node_id.lock().unwrap() = Some(node_id);
        Ok(())
    }

    async fn send_text(&self, message: &str) -> Result<(), TransportError> {
        let node_id = self.current_node_id();
        self.send_packet(&MeshPacket::Text {
            node_id: &node_id,
            channel: &self.channel,
            key: &self.key,
            message,
        })
        .await
    }

    async fn send_position(
        &self,
        latitude: f64,
        longitude: f64,
        altitude_m: i32,
    ) -> Result<(), TransportError> {
        let node_id = self.current_node_id();
        self.send_packet(&MeshPacket::Position {
            node_id: &node_id,
            channel: &self.channel,
            key: &self.key,
            latitude,
            longitude,
            altitude: altitude_m,
        })
        .await
    }
}

/// Transport that logs every send and transmits nothing. Used by
/// `--dry-run`.
pub struct NoopTransport;

#[async_trait]
impl MeshTransport for NoopTransport {
    async fn announce_identity(
        &self,
        token: &str,
        long_label: &str,
        short_label: &str,
    ) -> Result<(), TransportError> {
        info!("[dry-run] announce !{token} \"{long_label}\" ({short_label})");
        Ok(())
    }

    async fn send_text(&self, message: &str) -> Result<(), TransportError> {
        info!("[dry-run] text: {}", message.replace('\n', " | "));
        Ok(())
    }

    async fn send_position(
        &self,
        latitude: f64,
        longitude: f64,
        altitude_m: i32,
    ) -> Result<(), TransportError> {
        info!("[dry-run] position: {latitude:.4}, {longitude:.4} alt {altitude_m}m");
        Ok(())
    }
}
