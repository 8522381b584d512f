//! Socket setup shared by responders, outlets and resolvers

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};

use crate::context::Config;

/// UDP socket bound with address (and, on Unix, port) reuse so several
/// contexts on one host can share the discovery port
pub(crate) fn bind_reuse_udp(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// Ports tried for outlet sockets, in order
fn candidate_ports(config: &Config) -> impl Iterator<Item = u16> + '_ {
    let first = config.base_port;
    (0..config.port_range).filter_map(move |i| first.checked_add(i))
}

/// Bind a TCP listener in the configured port range
pub(crate) async fn bind_tcp_in_range(config: &Config) -> io::Result<TcpListener> {
    let mut last_err = None;
    for port in candidate_ports(config) {
        match TcpListener::bind(SocketAddr::new(config.listen_address, port)).await {
            Ok(l) => return Ok(l),
            Err(e) => last_err = Some(e),
        }
    }
    if config.allow_random_ports {
        return TcpListener::bind(SocketAddr::new(config.listen_address, 0)).await;
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrInUse, "no port available in the configured range")
    }))
}

/// Bind a UDP socket in the configured port range
pub(crate) async fn bind_udp_in_range(config: &Config) -> io::Result<UdpSocket> {
    let mut last_err = None;
    for port in candidate_ports(config) {
        match UdpSocket::bind(SocketAddr::new(config.listen_address, port)).await {
            Ok(s) => return Ok(s),
            Err(e) => last_err = Some(e),
        }
    }
    if config.allow_random_ports {
        return UdpSocket::bind(SocketAddr::new(config.listen_address, 0)).await;
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrInUse, "no port available in the configured range")
    }))
}

/// Socket used to send discovery queries and receive their replies
///
/// Binds synchronously so resolvers can fail fast at construction; must be
/// called from within a tokio runtime.
pub(crate) fn bind_query_socket(config: &Config) -> io::Result<UdpSocket> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.set_nonblocking(true)?;
    if config.broadcast {
        socket.set_broadcast(true)?;
    }
    socket.set_multicast_ttl_v4(config.multicast_ttl)?;
    UdpSocket::from_std(socket)
}

/// Destinations of one discovery wave
pub(crate) fn query_targets(config: &Config) -> Vec<SocketAddr> {
    let mut targets: Vec<SocketAddr> = config
        .multicast_addresses
        .iter()
        .map(|group| SocketAddr::new(IpAddr::V4(*group), config.multicast_port))
        .collect();
    if config.broadcast {
        targets.push(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::BROADCAST),
            config.multicast_port,
        ));
    }
    for peer in &config.known_peers {
        targets.push(SocketAddr::new(*peer, config.multicast_port));
        targets.extend(candidate_ports(config).map(|port| SocketAddr::new(*peer, port)));
    }
    targets
}

/// Host name reported in stream descriptors
pub(crate) fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}

/// Address to reach a socket bound to `bound` from this host
pub(crate) fn loopback_if_unspecified(bound: SocketAddr) -> SocketAddr {
    if bound.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), bound.port())
    } else {
        bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_targets() {
        let config = Config::default()
            .ports(20000, 2)
            .known_peer("10.0.0.9".parse().unwrap());
        let targets = query_targets(&config);

        assert!(targets.contains(&"224.0.0.183:16571".parse().unwrap()));
        assert!(targets.contains(&"239.255.172.215:16571".parse().unwrap()));
        assert!(targets.contains(&"255.255.255.255:16571".parse().unwrap()));
        assert!(targets.contains(&"10.0.0.9:16571".parse().unwrap()));
        assert!(targets.contains(&"10.0.0.9:20000".parse().unwrap()));
        assert!(targets.contains(&"10.0.0.9:20001".parse().unwrap()));
        assert_eq!(targets.len(), 6);

        let quiet = Config::default().disable_broadcast().multicast_addresses(vec![]);
        assert!(query_targets(&quiet).is_empty());
    }

    #[tokio::test]
    async fn test_bind_in_range_falls_back() {
        let config = Config::default()
            .listen_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
            .ports(0, 0);
        let listener = bind_tcp_in_range(&config).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);

        let mut strict = config.clone();
        strict.allow_random_ports = false;
        assert!(bind_udp_in_range(&strict).await.is_err());
    }

    #[tokio::test]
    async fn test_reuse_socket_shares_port() {
        let a = bind_reuse_udp("127.0.0.1:0".parse().unwrap()).unwrap();
        let port = a.local_addr().unwrap().port();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        assert!(bind_reuse_udp(addr).is_ok());
    }

    #[tokio::test]
    async fn test_query_socket() {
        let socket = bind_query_socket(&Config::default()).unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn test_loopback_if_unspecified() {
        let addr = loopback_if_unspecified("0.0.0.0:5000".parse().unwrap());
        assert_eq!(addr, "127.0.0.1:5000".parse().unwrap());
    }
}
