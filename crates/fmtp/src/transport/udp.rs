// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP send/receive wrappers for the multicast channel.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use super::multicast::{create_recv_socket, create_send_socket};

/// Poll interval for ingress loops: a blocked `recv` wakes this often so the
/// stop flag is observed promptly.
pub const RECV_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Sending side of the multicast channel. Single-writer: all sends go
/// through the egress thread, preserving BOP/DATA/EOP ordering.
pub struct McastSender {
    socket: UdpSocket,
    group: SocketAddr,
}

impl McastSender {
    pub fn new(group: SocketAddr, iface: Option<Ipv4Addr>, ttl: u32) -> io::Result<McastSender> {
        let socket = create_send_socket(group, iface, ttl)?;
        Ok(McastSender { socket, group })
    }

    /// Send one assembled datagram to the group.
    pub fn send(&self, datagram: &[u8]) -> io::Result<()> {
        let n = self.socket.send_to(datagram, self.group)?;
        if n != datagram.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "short multicast send",
            ));
        }
        Ok(())
    }

    pub fn group(&self) -> SocketAddr {
        self.group
    }
}

/// Receiving side of the multicast channel.
pub struct McastReceiver {
    socket: UdpSocket,
}

impl McastReceiver {
    pub fn new(group: SocketAddr, iface: Option<Ipv4Addr>) -> io::Result<McastReceiver> {
        let socket = create_recv_socket(group, iface)?;
        socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;
        Ok(McastReceiver { socket })
    }

    /// Receive one datagram into `buf`.
    ///
    /// Returns `Ok(None)` on the poll timeout so the caller can check its
    /// stop flag between reads.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.recv_from(buf) {
            Ok((len, _src)) => Ok(Some(len)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e),
        }
    }
}
