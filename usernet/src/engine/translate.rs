//! Address translation between the virtual network and the host.
//!
//! Outbound, the guest's destination is resolved once when a flow is created. Special addresses
//! of the virtual network are rewritten to what they stand for on the host, stream flows may be
//! redirected to a proxy. The result is cached on the socket. Inbound, connections accepted from
//! the host's own loopback appear to the guest as coming from the loopback alias.
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::addr::{Family, Protocol};
use crate::config::Config;

/// Where the host socket of a new flow connects or sends to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Route {
    /// The effective destination on the host network.
    pub target: SocketAddr,
    /// Whether `target` is the proxy rather than the guest's destination.
    pub via_proxy: bool,
}

/// Resolve the host destination of a new flow.
///
/// The guest's original destination is not part of the result, it remains the foreign address of
/// the flow tuple and is available to the proxy handshake from there.
pub fn translate_outbound(config: &Config, protocol: Protocol, dest: SocketAddr) -> Route {
    if let Some(target) = remap(config, dest) {
        return Route { target, via_proxy: false };
    }

    match &config.proxy {
        Some(proxy) if protocol.is_stream() && !proxy.bypass.contains(&dest.ip()) => Route {
            target: proxy.endpoint,
            via_proxy: true,
        },
        _ => Route { target: dest, via_proxy: false },
    }
}

/// The address under which a host peer appears to the guest.
pub fn translate_inbound(config: &Config, from: SocketAddr) -> SocketAddr {
    match config.remap.loopback_alias {
        Some(alias) if from.ip().is_loopback() && same_family(alias, from.ip()) => {
            SocketAddr::new(alias, from.port())
        },
        _ => from,
    }
}

fn remap(config: &Config, dest: SocketAddr) -> Option<SocketAddr> {
    let remap = &config.remap;
    let ip = dest.ip();
    let family = Family::of(&dest);

    if remap.loopback_alias == Some(ip) {
        return Some(SocketAddr::new(family.loopback(), dest.port()));
    }

    if let Some((virtual_dns, real_dns)) = remap.dns {
        if virtual_dns == ip {
            return Some(SocketAddr::new(real_dns, dest.port()));
        }
    }

    if ip == IpAddr::V4(Ipv4Addr::BROADCAST) || remap.broadcast.contains(&ip) {
        return Some(SocketAddr::new(family.loopback(), dest.port()));
    }

    None
}

fn same_family(a: IpAddr, b: IpAddr) -> bool {
    a.is_ipv4() == b.is_ipv4()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Proxy, Remap};

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn config() -> Config {
        Config {
            remap: Remap {
                loopback_alias: Some("10.0.2.2".parse().unwrap()),
                dns: Some(("10.0.2.3".parse().unwrap(), "192.0.2.53".parse().unwrap())),
                broadcast: vec!["10.0.2.255".parse().unwrap()],
            },
            ..Config::default()
        }
    }

    #[test]
    fn verbatim() {
        let route = translate_outbound(&config(), Protocol::Tcp, addr("93.184.216.34:80"));
        assert_eq!(route, Route { target: addr("93.184.216.34:80"), via_proxy: false });
    }

    #[test]
    fn special_addresses() {
        let config = config();
        let route = translate_outbound(&config, Protocol::Tcp, addr("10.0.2.2:8080"));
        assert_eq!(route.target, addr("127.0.0.1:8080"));
        let route = translate_outbound(&config, Protocol::Udp, addr("10.0.2.3:53"));
        assert_eq!(route.target, addr("192.0.2.53:53"));
        let route = translate_outbound(&config, Protocol::Udp, addr("10.0.2.255:67"));
        assert_eq!(route.target, addr("127.0.0.1:67"));
        let route = translate_outbound(&config, Protocol::Udp, addr("255.255.255.255:67"));
        assert_eq!(route.target, addr("127.0.0.1:67"));
    }

    #[test]
    fn proxy_streams_only() {
        let mut config = config();
        config.proxy = Some(Proxy {
            endpoint: addr("192.0.2.1:3128"),
            bypass: vec!["198.51.100.7".parse().unwrap()],
        });

        let route = translate_outbound(&config, Protocol::Tcp, addr("93.184.216.34:80"));
        assert_eq!(route, Route { target: addr("192.0.2.1:3128"), via_proxy: true });
        let route = translate_outbound(&config, Protocol::Udp, addr("93.184.216.34:53"));
        assert!(!route.via_proxy);
        let route = translate_outbound(&config, Protocol::Tcp, addr("198.51.100.7:80"));
        assert!(!route.via_proxy);
        // The host itself is never reached through the proxy.
        let route = translate_outbound(&config, Protocol::Tcp, addr("10.0.2.2:22"));
        assert_eq!(route, Route { target: addr("127.0.0.1:22"), via_proxy: false });
    }

    #[test]
    fn inbound_loopback() {
        let config = config();
        assert_eq!(translate_inbound(&config, addr("127.0.0.1:5000")), addr("10.0.2.2:5000"));
        assert_eq!(translate_inbound(&config, addr("[::1]:5000")), addr("[::1]:5000"));
        assert_eq!(translate_inbound(&config, addr("192.0.2.9:5000")), addr("192.0.2.9:5000"));
    }
}
