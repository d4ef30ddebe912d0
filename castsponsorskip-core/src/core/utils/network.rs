use std::net::IpAddr;

use itertools::Itertools;
use local_ip_address::list_afinet_netifas;

/// Resolve the address of the network interface with the given name.
///
/// When the interface carries multiple addresses, the IPv4 address is preferred.
pub fn interface_addr(name: &str) -> Option<IpAddr> {
    list_afinet_netifas()
        .ok()?
        .into_iter()
        .filter(|(ifname, _)| ifname == name)
        .map(|(_, addr)| addr)
        .find_or_first(|addr| addr.is_ipv4())
}
