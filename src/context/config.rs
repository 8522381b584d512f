//! Context configuration

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::protocol::constants::*;

/// Network and timing options shared by everything created in a
/// [`Context`](super::Context)
#[derive(Debug, Clone)]
pub struct Config {
    /// Streams are only visible to resolvers with the same session id
    pub session_id: String,

    /// UDP port of the discovery responder
    pub multicast_port: u16,

    /// First port tried for outlet data and service sockets
    pub base_port: u16,

    /// Number of ports tried from `base_port`
    pub port_range: u16,

    /// Fall back to an OS-assigned port when the range is exhausted
    pub allow_random_ports: bool,

    /// Address outlets listen on
    pub listen_address: IpAddr,

    /// Multicast groups joined by the responder and targeted by resolvers
    pub multicast_addresses: Vec<Ipv4Addr>,

    /// Time-to-live of outgoing multicast queries
    pub multicast_ttl: u32,

    /// Also send queries to the IPv4 broadcast address
    pub broadcast: bool,

    /// Hosts queried directly (unicast) in addition to multicast
    pub known_peers: Vec<IpAddr>,

    /// Spacing of query waves during a one-shot resolve
    pub resolve_wave_interval: Duration,

    /// Spacing of query waves of a continuous resolver
    pub continuous_resolve_interval: Duration,

    /// Minimum time a one-shot resolve keeps listening before returning early
    pub resolve_minimum_time: Duration,

    /// Probes per time-correction wave
    pub time_probe_count: u32,

    /// Spacing of probes within a wave
    pub time_probe_interval: Duration,

    /// Probes with a longer round trip are discarded
    pub time_probe_max_rtt: Duration,

    /// Interval between background time-correction updates
    pub time_update_interval: Duration,

    /// Clock reset when remote and local time advance differ by more than this
    /// (seconds)
    pub clock_reset_threshold: f64,

    /// Clock reset when the offset jumps by more than this (seconds)
    pub clock_reset_offset_threshold: f64,

    /// Default half-time of the dejitter filter (seconds)
    pub smoothing_halftime: f64,

    /// Timeout for establishing a data connection
    pub connect_timeout: Duration,

    /// Pause between recovery attempts of a lost inlet
    pub recover_interval: Duration,

    /// Run the context's multicast discovery responder
    pub discovery_responder: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_id: "default".to_string(),
            multicast_port: DEFAULT_MULTICAST_PORT,
            base_port: DEFAULT_BASE_PORT,
            port_range: DEFAULT_PORT_RANGE,
            allow_random_ports: true,
            listen_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            multicast_addresses: vec![
                Ipv4Addr::new(224, 0, 0, 183),
                Ipv4Addr::new(239, 255, 172, 215),
            ],
            multicast_ttl: 1,
            broadcast: true,
            known_peers: Vec::new(),
            resolve_wave_interval: Duration::from_millis(500),
            continuous_resolve_interval: Duration::from_millis(500),
            resolve_minimum_time: Duration::from_millis(50),
            time_probe_count: 8,
            time_probe_interval: Duration::from_millis(64),
            time_probe_max_rtt: Duration::from_millis(128),
            time_update_interval: Duration::from_secs(2),
            clock_reset_threshold: 5.0,
            clock_reset_offset_threshold: 1.0,
            smoothing_halftime: 90.0,
            connect_timeout: Duration::from_secs(2),
            recover_interval: Duration::from_millis(500),
            discovery_responder: true,
        }
    }
}

impl Config {
    /// Create a config with a custom session id
    pub fn with_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    /// Set the session id
    pub fn session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = id.into();
        self
    }

    /// Set the discovery port
    pub fn multicast_port(mut self, port: u16) -> Self {
        self.multicast_port = port;
        self
    }

    /// Set the outlet port range
    pub fn ports(mut self, base: u16, range: u16) -> Self {
        self.base_port = base;
        self.port_range = range;
        self
    }

    /// Set the address outlets listen on
    pub fn listen_address(mut self, addr: IpAddr) -> Self {
        self.listen_address = addr;
        self
    }

    /// Replace the multicast groups
    pub fn multicast_addresses(mut self, addrs: Vec<Ipv4Addr>) -> Self {
        self.multicast_addresses = addrs;
        self
    }

    /// Add a unicast peer
    pub fn known_peer(mut self, addr: IpAddr) -> Self {
        self.known_peers.push(addr);
        self
    }

    /// Disable broadcast queries
    pub fn disable_broadcast(mut self) -> Self {
        self.broadcast = false;
        self
    }

    /// Do not run a multicast discovery responder
    pub fn disable_responder(mut self) -> Self {
        self.discovery_responder = false;
        self
    }

    /// Set the resolve wave interval
    pub fn resolve_wave_interval(mut self, interval: Duration) -> Self {
        self.resolve_wave_interval = interval;
        self
    }

    /// Set the background time-correction interval
    pub fn time_update_interval(mut self, interval: Duration) -> Self {
        self.time_update_interval = interval;
        self
    }

    /// Set the default dejitter half-time
    pub fn smoothing_halftime(mut self, seconds: f64) -> Self {
        self.smoothing_halftime = seconds;
        self
    }

    /// Set the data connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the pause between recovery attempts
    pub fn recover_interval(mut self, interval: Duration) -> Self {
        self.recover_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.session_id, "default");
        assert_eq!(config.multicast_port, 16571);
        assert_eq!(config.base_port, 16572);
        assert_eq!(config.port_range, 32);
        assert_eq!(config.multicast_addresses.len(), 2);
        assert_eq!(config.time_probe_count, 8);
        assert_eq!(config.smoothing_halftime, 90.0);
        assert!(config.allow_random_ports);
        assert!(config.discovery_responder);
    }

    #[test]
    fn test_with_session() {
        let config = Config::with_session("lab-7");

        assert_eq!(config.session_id, "lab-7");
        assert_eq!(config.base_port, DEFAULT_BASE_PORT);
    }

    #[test]
    fn test_builder_pattern() {
        let config = Config::default()
            .session_id("s")
            .ports(20000, 4)
            .known_peer("10.0.0.5".parse().unwrap())
            .disable_broadcast()
            .disable_responder()
            .resolve_wave_interval(Duration::from_millis(100))
            .smoothing_halftime(30.0);

        assert_eq!(config.session_id, "s");
        assert_eq!(config.base_port, 20000);
        assert_eq!(config.port_range, 4);
        assert_eq!(config.known_peers.len(), 1);
        assert!(!config.broadcast);
        assert!(!config.discovery_responder);
        assert_eq!(config.resolve_wave_interval, Duration::from_millis(100));
        assert_eq!(config.smoothing_halftime, 30.0);
    }
}
