//! Small IPv4 helpers used by configuration defaulting.

use std::net::{Ipv4Addr, UdpSocket};

/// Detect the host's primary IPv4 address by opening a UDP socket toward a
/// public address. No packets are sent; the kernel picks the source address
/// that would be used for the route.
pub fn detect_host_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:53").ok()?;
    match socket.local_addr().ok()? {
        std::net::SocketAddr::V4(addr) => Some(*addr.ip()),
        _ => None,
    }
}

/// Parse an IPv4 CIDR like `10.254.0.0/16` into (network, prefix length).
pub fn parse_ipv4_cidr(s: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, prefix) = s.split_once('/')?;
    let addr: Ipv4Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    if prefix > 32 {
        return None;
    }
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    Some((Ipv4Addr::from(u32::from(addr) & mask), prefix))
}

/// Return the nth address within the subnet, or None when the index falls
/// outside of it.
pub fn indexed_ip(cidr: &str, index: u32) -> Option<Ipv4Addr> {
    let (network, prefix) = parse_ipv4_cidr(cidr)?;
    if prefix >= 32 {
        return None;
    }
    let size = 1u64 << (32 - prefix);
    if u64::from(index) >= size {
        return None;
    }
    Some(Ipv4Addr::from(u32::from(network) + index))
}

/// The virtual IP assigned to the API service: the first address in the
/// service subnet.
pub fn service_api_ip(service_subnet: &str) -> Option<Ipv4Addr> {
    indexed_ip(service_subnet, 1)
}

/// The cluster DNS service IP: the tenth address in the service subnet.
pub fn dns_ip(service_subnet: &str) -> Option<Ipv4Addr> {
    indexed_ip(service_subnet, 10)
}
