//! Advertised-host resolution.
//!
//! Order: explicit host, basic-config host, the local address routed towards
//! the first reachable registry, the machine hostname's address, and finally
//! `127.0.0.1` with a warning. Blank hosts and `0.0.0.0` count as absent.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use crate::address::Address;

pub const LOOPBACK_HOST: &str = "127.0.0.1";
const ANY_HOST: &str = "0.0.0.0";

/// Whether `host` is unset for advertising purposes.
#[must_use]
pub fn is_absent_host(host: Option<&str>) -> bool {
    host.is_none_or(|h| {
        let h = h.trim();
        h.is_empty() || h == ANY_HOST
    })
}

/// Splits `host:port`; `None` when either part is missing or the port is not a `u16`.
#[must_use]
pub fn split_host_port(entry: &str) -> Option<(String, u16)> {
    let (host, port) = entry.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    Some((host.to_owned(), port.parse().ok()?))
}

#[must_use]
pub fn resolve_advertised_host(
    explicit: Option<&str>,
    basic: Option<&str>,
    registries: &[Address],
) -> String {
    if let Some(host) = [explicit, basic]
        .into_iter()
        .find(|h| !is_absent_host(*h))
        .flatten()
    {
        return host.trim().to_owned();
    }
    if let Some(ip) = registries.iter().find_map(local_ip_towards) {
        return ip.to_string();
    }
    if let Some(ip) = hostname_ip() {
        return ip.to_string();
    }
    tracing::warn!(
        fallback = LOOPBACK_HOST,
        "could not determine a routable local address; advertising loopback"
    );
    LOOPBACK_HOST.to_owned()
}

fn is_advertisable(ip: IpAddr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return false;
    }
    match ip {
        IpAddr::V4(v4) => !v4.is_link_local(),
        IpAddr::V6(v6) => !v6.is_unicast_link_local(),
    }
}

/// Local address the OS would use to reach `registry`. A UDP connect sends nothing.
fn local_ip_towards(registry: &Address) -> Option<IpAddr> {
    if registry.port() == 0 {
        return None;
    }
    let target: SocketAddr = (registry.host(), registry.port())
        .to_socket_addrs()
        .ok()?
        .next()?;
    let bind: SocketAddr = if target.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(target).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    is_advertisable(ip).then_some(ip)
}

fn hostname_ip() -> Option<IpAddr> {
    let name = hostname::get().ok()?.to_string_lossy().into_owned();
    (name.as_str(), 0)
        .to_socket_addrs()
        .ok()?
        .map(|sa| sa.ip())
        .find(|ip| is_advertisable(*ip))
}
