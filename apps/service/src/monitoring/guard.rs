//! Address safety guard.
//!
//! Blocks probes whose host resolves to a private, loopback or otherwise
//! reserved address. The lookup is repeated before every request and every
//! redirect hop. [`GuardedResolver`] applies the same rule again when the HTTP
//! client connects, so an answer that changes after the guard ran is refused.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use thiserror::Error;
use tracing::{debug, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Decides whether a host may be probed.
#[async_trait::async_trait]
pub trait AddressGuard: Send + Sync {
    /// `true` if any address the host maps to is off-limits.
    ///
    /// Resolution failures and malformed input are not a security signal and
    /// return `false`; the probe then reports the connectivity problem itself.
    async fn is_unsafe(&self, host: &str) -> bool;
}

/// Guard backed by the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsAddressGuard;

impl DnsAddressGuard {
    pub fn new() -> Self {
        Self
    }

    async fn resolve(host: &str) -> Vec<IpAddr> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return vec![ip];
        }

        match tokio::net::lookup_host((host, 0)).await {
            Ok(addrs) => addrs.map(|addr| addr.ip()).collect(),
            Err(e) => {
                debug!(host, error = %e, "DNS resolution failed, letting the probe report it");
                Vec::new()
            }
        }
    }
}

#[async_trait::async_trait]
impl AddressGuard for DnsAddressGuard {
    async fn is_unsafe(&self, host: &str) -> bool {
        let host = host.trim().trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return false;
        }

        let addrs = Self::resolve(host).await;
        match first_restricted(&addrs) {
            Some(ip) => {
                warn!(host, address = %ip, "Host resolves to a restricted address");
                true
            }
            None => false,
        }
    }
}

/// Resolver installed on the probe client. Names mapping to any restricted
/// address fail to resolve with [`RestrictedAddress`].
#[derive(Debug, Default, Clone, Copy)]
pub struct GuardedResolver;

#[derive(Debug, Error)]
#[error("{host} resolves to restricted address {address}")]
pub struct RestrictedAddress {
    pub host: String,
    pub address: IpAddr,
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_checked(name.as_str().to_string()))
    }
}

async fn resolve_checked(host: String) -> Result<Addrs, BoxError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0)).await?.collect();
    let ips: Vec<IpAddr> = addrs.iter().map(SocketAddr::ip).collect();

    if let Some(address) = first_restricted(&ips) {
        warn!(host = %host, %address, "Refusing to connect to a restricted address");
        return Err(Box::new(RestrictedAddress { host, address }));
    }

    Ok(Box::new(addrs.into_iter()))
}

/// First restricted entry of a resolved address set. One internal address is
/// enough to refuse the whole host, whatever else it resolves to.
pub fn first_restricted(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs.iter().copied().find(|ip| is_restricted(*ip))
}

/// Whether a single address lies in a private, loopback or reserved range.
pub fn is_restricted(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_restricted_v4(v4),
        IpAddr::V6(v6) => is_restricted_v6(v6),
    }
}

fn is_restricted_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();

    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_unspecified()
        // 0.0.0.0/8 "this network"
        || a == 0
        // 100.64.0.0/10 shared address space
        || (a == 100 && (b & 0xc0) == 64)
        // 192.0.0.0/24 protocol assignments
        || (a == 192 && b == 0 && c == 0)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || a >= 240
}

fn is_restricted_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_restricted_v4(v4);
    }

    let segments = ip.segments();

    // 64:ff9b::/96 NAT64 carries an IPv4 address in the low 32 bits
    if segments[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        return is_restricted_v4(embedded_v4(segments[6], segments[7]));
    }
    // ::/96 IPv4-compatible, covers :: and ::1 as 0.0.0.0 and 0.0.0.1
    if segments[..6] == [0; 6] {
        return is_restricted_v4(embedded_v4(segments[6], segments[7]));
    }
    // 2002::/16 6to4 carries an IPv4 address right after the prefix
    if segments[0] == 0x2002 {
        return is_restricted_v4(embedded_v4(segments[1], segments[2]));
    }

    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // ::/8 reserved, includes 64:ff9b:1::/48 local-use NAT64
        || (segments[0] & 0xff00) == 0
        // 100::/64 discard
        || segments[..4] == [0x100, 0, 0, 0]
        // 2001::/23 IETF protocol assignments
        || (segments[0] == 0x2001 && segments[1] < 0x200)
        // 2001:db8::/32 documentation
        || (segments[0] == 0x2001 && segments[1] == 0x0db8)
        // fc00::/7 unique local
        || (segments[0] & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (segments[0] & 0xffc0) == 0xfe80
        // fec0::/10 site local
        || (segments[0] & 0xffc0) == 0xfec0
}

fn embedded_v4(hi: u16, lo: u16) -> Ipv4Addr {
    Ipv4Addr::from((u32::from(hi) << 16) | u32::from(lo))
}
