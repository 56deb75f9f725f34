use anyhow::{Context, Result};
use if_addrs::{get_if_addrs, IfAddr};
use ipnet::Ipv4Net;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use tracing::debug;

/// Range used when no local interface can be found.
pub fn fallback_range() -> Ipv4Net {
    ipv4_to_default_cidr(Ipv4Addr::new(192, 168, 1, 0))
}

/// Detect local non-loopback IPv4 addresses and convert each to a default /24 network.
///
/// For example, an interface IP `192.168.1.42` becomes `192.168.1.0/24`.
/// Duplicates are removed and the result is sorted.
pub fn detect_local_cidrs() -> Result<Vec<Ipv4Net>> {
    let mut set = BTreeSet::<Ipv4Net>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            if v4.ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_cidr(v4.ip));
        }
    }
    Ok(set.into_iter().collect())
}

/// The /24 of the first local interface, or [`fallback_range`].
pub fn detect_local_network() -> Ipv4Net {
    match detect_local_cidrs() {
        Ok(cidrs) if !cidrs.is_empty() => cidrs[0],
        Ok(_) => fallback_range(),
        Err(e) => {
            debug!("interface detection failed: {e}");
            fallback_range()
        }
    }
}

/// Parse a scan range: CIDR notation with host bits allowed (`192.168.1.1/24`), or a
/// bare IPv4 address treated as `/32`.
pub fn parse_range(s: &str) -> Result<Ipv4Net> {
    let s = s.trim();
    if s.contains('/') {
        let net: Ipv4Net = s.parse().with_context(|| format!("invalid CIDR: {s}"))?;
        Ok(net.trunc())
    } else {
        let ip: Ipv4Addr = s.parse().with_context(|| format!("invalid IPv4 address: {s}"))?;
        Ok(Ipv4Net::from(ip))
    }
}

/// Host addresses of a network: network and broadcast are excluded unless the prefix is /31 or /32.
pub fn expand_hosts(net: Ipv4Net) -> Vec<Ipv4Addr> {
    net.hosts().collect()
}

/// Helper: convert an IPv4 address into its default /24 network.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    let net = Ipv4Addr::new(o[0], o[1], o[2], 0);
    Ipv4Net::new(net, 24).unwrap_or_else(|_| Ipv4Net::from(net))
}
