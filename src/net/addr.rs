//! Dual-stack bind address selection.
//!
//! The listener must bind an address the redirected client can actually
//! reach. The policy here is deliberately small and pluggable: prefer the
//! unspecified address of the client's own family, fall back to the other
//! family. Swap this function to change the tie-break.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Bind candidates for a listener that must be reachable from `client`,
/// in preference order.
pub fn bind_candidates(client: IpAddr) -> [IpAddr; 2] {
    match client {
        IpAddr::V4(_) => [
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        ],
        IpAddr::V6(_) => [
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        ],
    }
}
