//! Local IPv4 address discovery for advertising stream URLs.

use std::net::{IpAddr, Ipv4Addr};

pub const FALLBACK_HOST: &str = "localhost";

const PREFERRED_PREFIXES: [&str; 3] = ["en", "eth", "wlan"];

/// One address as reported by interface enumeration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub name: String,
    pub up: bool,
    pub loopback: bool,
    pub addr: IpAddr,
}

/// Pick a private IPv4 address to advertise.
///
/// Interfaces that are down or loopback are ignored, as are non-private
/// and IPv6 addresses. An address on an `en*`/`eth*`/`wlan*` interface
/// wins; otherwise the first remaining candidate; otherwise `None`.
pub fn select_ipv4(candidates: &[InterfaceAddr]) -> Option<Ipv4Addr> {
    let mut fallback = None;
    for candidate in candidates {
        if !candidate.up || candidate.loopback {
            continue;
        }
        let IpAddr::V4(addr) = candidate.addr else {
            continue;
        };
        if addr.is_loopback() || !addr.is_private() {
            continue;
        }
        if PREFERRED_PREFIXES
            .iter()
            .any(|prefix| candidate.name.starts_with(prefix))
        {
            return Some(addr);
        }
        fallback.get_or_insert(addr);
    }
    fallback
}

#[cfg(unix)]
pub fn interface_addresses() -> anyhow::Result<Vec<InterfaceAddr>> {
    use anyhow::Context;
    use nix::net::if_::InterfaceFlags;

    let addrs = nix::ifaddrs::getifaddrs().context("enumerate network interfaces")?;
    let mut out = Vec::new();
    for ifaddr in addrs {
        let Some(address) = ifaddr.address else {
            continue;
        };
        let addr = if let Some(v4) = address.as_sockaddr_in() {
            IpAddr::V4(v4.ip())
        } else if let Some(v6) = address.as_sockaddr_in6() {
            IpAddr::V6(v6.ip())
        } else {
            continue;
        };
        out.push(InterfaceAddr {
            name: ifaddr.interface_name.clone(),
            up: ifaddr.flags.contains(InterfaceFlags::IFF_UP),
            loopback: ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK),
            addr,
        });
    }
    Ok(out)
}

#[cfg(not(unix))]
pub fn interface_addresses() -> anyhow::Result<Vec<InterfaceAddr>> {
    Err(anyhow::anyhow!(
        "interface enumeration is not supported on this platform"
    ))
}

/// The host to put in advertised URLs: a selected private IPv4 address, or
/// `localhost` when there is none or enumeration fails.
pub fn local_host() -> String {
    match interface_addresses() {
        Ok(candidates) => match select_ipv4(&candidates) {
            Some(addr) => addr.to_string(),
            None => {
                log::warn!("no private IPv4 address found; using '{}'", FALLBACK_HOST);
                FALLBACK_HOST.to_string()
            }
        },
        Err(err) => {
            log::warn!("could not determine local IP: {:#}", err);
            FALLBACK_HOST.to_string()
        }
    }
}
