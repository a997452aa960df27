//! Network-origin admission, evaluated before any bytes are read from a
//! connection.
//!
//! Accepts loopback unconditionally, plus the Tailscale CGNAT range
//! (`100.64.0.0/10`) when restricted. This is admission control, not rate
//! limiting — there is no per-IP state and nothing is ever banned here.

use std::net::{IpAddr, Ipv4Addr};

#[derive(Debug, Clone, Copy)]
pub struct OriginFilter {
    restrict_to_tailscale: bool,
}

impl OriginFilter {
    pub fn new(restrict_to_tailscale: bool) -> Self {
        Self { restrict_to_tailscale }
    }

    pub fn is_allowed(&self, peer: IpAddr) -> bool {
        if !self.restrict_to_tailscale {
            return true;
        }
        match normalize(peer) {
            IpAddr::V4(v4) if v4.is_loopback() => true,
            IpAddr::V6(v6) if v6.is_loopback() => true,
            IpAddr::V4(v4) => is_cgnat(v4),
            IpAddr::V6(_) => false,
        }
    }
}

/// Strip the IPv4-mapped-in-IPv6 prefix (`::ffff:a.b.c.d`) so CGNAT/loopback
/// checks see the underlying IPv4 address.
fn normalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
        other => other,
    }
}

fn is_cgnat(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    octets[0] == 100 && (64..=127).contains(&octets[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_loopback_always_allowed() {
        let filter = OriginFilter::new(true);
        assert!(filter.is_allowed(v4("127.0.0.1")));
        assert!(filter.is_allowed("::1".parse().unwrap()));
    }

    #[test]
    fn test_cgnat_boundaries() {
        let filter = OriginFilter::new(true);
        assert!(!filter.is_allowed(v4("100.63.255.255")));
        assert!(filter.is_allowed(v4("100.64.0.0")));
        assert!(filter.is_allowed(v4("100.127.255.255")));
        assert!(!filter.is_allowed(v4("100.128.0.0")));
    }

    #[test]
    fn test_public_ip_rejected() {
        let filter = OriginFilter::new(true);
        assert!(!filter.is_allowed(v4("192.0.2.1")));
    }

    #[test]
    fn test_unrestricted_accepts_everything() {
        let filter = OriginFilter::new(false);
        assert!(filter.is_allowed(v4("192.0.2.1")));
    }

    #[test]
    fn test_ipv4_mapped_ipv6_normalized() {
        let filter = OriginFilter::new(true);
        let mapped: IpAddr = "::ffff:100.64.0.1".parse().unwrap();
        assert!(filter.is_allowed(mapped));
    }
}
