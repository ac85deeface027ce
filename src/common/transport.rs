//! # UDP Datagram Endpoint
//!
//! Wraps a tokio `UdpSocket` with message encoding for the chat protocol.
//!
//! ## Wire Protocol
//!
//! One JSON-encoded [`Message`] per datagram, at most
//! [`MAX_DATAGRAM_SIZE`] bytes. There is no framing, ordering or delivery
//! guarantee: datagrams may be lost, duplicated or reordered.

use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

use super::config::NetworkConfig;
use super::error::Result;
use super::messages::{Message, MAX_DATAGRAM_SIZE};

/// UDP socket wrapper that sends and receives [`Message`]s.
///
/// All methods take `&self`, so one endpoint can be shared between the
/// tasks that read from it and the tasks that write to it.
pub struct Endpoint {
    socket: UdpSocket,
}

impl Endpoint {
    /// Bind the shared multicast rendezvous socket.
    ///
    /// Several processes on one host must be able to bind the same discovery
    /// port, so address (and, where available, port) reuse is enabled before
    /// binding. Multicast loopback stays on: a server hears its own beacons.
    pub fn bind_group(network: &NetworkConfig) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, network.discovery_port);
        socket.bind(&SocketAddr::V4(bind_addr).into())?;
        socket.join_multicast_v4(&network.multicast_group, &Ipv4Addr::UNSPECIFIED)?;
        socket.set_multicast_ttl_v4(network.multicast_ttl)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            socket: UdpSocket::from_std(socket.into())?,
        })
    }

    /// Bind a plain unicast socket on all interfaces. Port 0 picks an
    /// ephemeral port.
    pub async fn bind_unicast(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
        Ok(Self { socket })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Read one datagram.
    ///
    /// # Returns
    /// - `Ok(Some((message, from)))`: a well-formed message and its source
    /// - `Ok(None)`: a datagram arrived but was not a valid message (dropped)
    /// - `Err`: socket error
    pub async fn read_message(&self) -> Result<Option<(Message, SocketAddr)>> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = self.socket.recv_from(&mut buf).await?;

        match Message::from_bytes(&buf[..len]) {
            Ok(message) => Ok(Some((message, from))),
            Err(e) => {
                debug!("🗑️  Dropping malformed datagram from {}: {}", from, e);
                Ok(None)
            }
        }
    }

    /// Send one message to `to` (a peer, a client, or the multicast group).
    pub async fn write_message(&self, message: &Message, to: SocketAddr) -> Result<()> {
        let data = message.to_bytes()?;
        self.socket.send_to(&data, to).await?;
        Ok(())
    }
}

/// Best guess at the address other hosts on the segment reach us by.
///
/// Routing a UDP socket toward a public address selects the outbound
/// interface without sending anything. Falls back to loopback when there is
/// no route.
pub fn detect_local_ip() -> IpAddr {
    let route_lookup = || -> std::io::Result<IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    route_lookup().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
