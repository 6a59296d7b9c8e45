//! Host address resolution for socket and broker specs.

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use crate::PortError;

/// Resolve a host name or literal address plus port to a `SocketAddr`.
///
/// Literal IPs are used as-is; hostnames go through the system resolver
/// and the first result wins (dual-stack hosts resolve to whatever the
/// resolver lists first).
pub fn resolve_target_addr(host: &str, port: u16) -> Result<SocketAddr, PortError> {
    // 1. Literal IP (e.g., "192.168.1.55" or "::1")
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    // 2. Hostname (e.g., "printer01.local")
    if let Ok(mut addrs) = (host, port).to_socket_addrs()
        && let Some(addr) = addrs.next()
    {
        return Ok(addr);
    }

    Err(PortError::NoAddressFound(host.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_ipv4() {
        let addr = resolve_target_addr("192.168.1.55", 7436).unwrap();
        assert_eq!(addr.ip().to_string(), "192.168.1.55");
        assert_eq!(addr.port(), 7436);
    }

    #[test]
    fn literal_ipv6() {
        let addr = resolve_target_addr("::1", 7435).unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 7435);
    }

    #[test]
    fn localhost_resolves() {
        let addr = resolve_target_addr("localhost", 9100).unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 9100);
    }

    #[test]
    fn unresolvable_hostname() {
        match resolve_target_addr("no-such-host.invalid", 1).unwrap_err() {
            PortError::NoAddressFound(s) => assert_eq!(s, "no-such-host.invalid"),
            other => panic!("expected NoAddressFound, got {:?}", other),
        }
    }
}
