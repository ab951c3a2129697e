// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multicast group management and interface discovery.
//!
//! Handles joining the product multicast group, discovering network
//! interfaces, and configuring TTL and the outbound interface.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};

/// Join the product multicast group on all suitable interfaces.
///
/// Joining on every non-loopback interface mirrors what the big DDS stacks
/// do; a receiver on a multi-homed host should hear the group regardless of
/// which NIC carries it.
pub fn join_multicast_group(socket: &UdpSocket, group: Ipv4Addr) -> io::Result<Ipv4Addr> {
    let interfaces = get_multicast_interfaces()?;

    if interfaces.is_empty() {
        log::debug!("[MCAST] no suitable interfaces found, joining on UNSPECIFIED");
        socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    } else {
        for iface in &interfaces {
            match socket.join_multicast_v4(&group, iface) {
                Ok(()) => {
                    log::debug!("[MCAST] join_multicast_v4({}) on interface {}", group, iface);
                }
                Err(e) if e.raw_os_error() == Some(98) => {
                    // EADDRINUSE (98) Linux: already joined on same physical NIC
                    log::debug!(
                        "[MCAST] join_multicast_v4({}) on {} - already joined, skipping",
                        group,
                        iface
                    );
                }
                Err(e) => {
                    // Non-fatal: skip interfaces that can't join multicast
                    log::debug!(
                        "[MCAST] join_multicast_v4({}) on {} failed (non-fatal): {}",
                        group,
                        iface,
                        e
                    );
                }
            }
        }
    }

    socket.set_multicast_loop_v4(true)?;

    Ok(interfaces.first().copied().unwrap_or(Ipv4Addr::UNSPECIFIED))
}

/// Get all non-loopback IPv4 interfaces suitable for multicast.
///
/// Honors the `FMTP_MULTICAST_IF` environment variable as an override for
/// testing and multi-homed deployments.
pub fn get_multicast_interfaces() -> io::Result<Vec<Ipv4Addr>> {
    if let Ok(var) = std::env::var("FMTP_MULTICAST_IF") {
        if let Ok(addr) = var.parse::<Ipv4Addr>() {
            log::debug!("[MCAST] using FMTP_MULTICAST_IF override: {}", addr);
            return Ok(vec![addr]);
        }
        log::warn!(
            "[MCAST] invalid FMTP_MULTICAST_IF='{}' - falling back to auto-detect",
            var
        );
    }

    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            log::debug!("[MCAST] failed to list network interfaces: {}", e);
            return Ok(vec![]);
        }
    };

    let mut addrs = Vec::new();
    for (_name, ip) in interfaces {
        if let IpAddr::V4(ipv4) = ip {
            if !ipv4.is_loopback() {
                addrs.push(ipv4);
            }
        }
    }

    log::debug!("[MCAST] discovered {} non-loopback interfaces", addrs.len());
    Ok(addrs)
}

/// Build the sending socket for multicast egress.
///
/// Binds an ephemeral port, sets the TTL and the outbound interface
/// (explicit `iface` wins over the first discovered interface).
pub fn create_send_socket(
    group: SocketAddr,
    iface: Option<Ipv4Addr>,
    ttl: u32,
) -> io::Result<UdpSocket> {
    let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket2.set_reuse_address(true)?;
    let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, 0).into();
    socket2.bind(&bind_addr.into())?;

    let outbound = match iface {
        Some(addr) => addr,
        None => get_multicast_interfaces()?
            .first()
            .copied()
            .unwrap_or(Ipv4Addr::UNSPECIFIED),
    };
    if !outbound.is_unspecified() {
        socket2.set_multicast_if_v4(&outbound)?;
    }

    let socket: UdpSocket = socket2.into();

    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_multicast_loop_v4(true)?;
    log::debug!(
        "[MCAST] send socket ready group={} ttl={} iface={}",
        group,
        ttl,
        outbound
    );
    Ok(socket)
}

/// Build the receiving socket for multicast ingress.
///
/// Binds the group port with `SO_REUSEADDR` (several receivers may share a
/// host) and joins the group. The group IP must be a multicast address;
/// callers validate that at configuration time.
pub fn create_recv_socket(group: SocketAddr, iface: Option<Ipv4Addr>) -> io::Result<UdpSocket> {
    let socket2 = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket2.set_reuse_address(true)?;
    let bind_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, group.port()).into();
    socket2.bind(&bind_addr.into())?;
    let socket: UdpSocket = socket2.into();

    let group_v4 = match group.ip() {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "FMTP multicast is IPv4-only",
            ));
        }
    };

    match iface {
        Some(addr) => {
            socket.join_multicast_v4(&group_v4, &addr)?;
            socket.set_multicast_loop_v4(true)?;
            log::debug!("[MCAST] joined {} on {}", group_v4, addr);
        }
        None => {
            join_multicast_group(&socket, group_v4)?;
        }
    }
    Ok(socket)
}
