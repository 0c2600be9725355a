//! Embedded MQTT broker using rumqttd
//!
//! Lets a single-box farm install run without a separate Mosquitto: collars,
//! gate and feed station publish straight to the gateway.

use crate::infra::config::Config as AppConfig;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Collars, gate readers and feed stations on one farm, plus gateway clients
const MAX_FARM_CONNECTIONS: usize = 256;

/// Largest device payload is a few hundred bytes of JSON
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Start the embedded broker if enabled; returns the address it listens on
pub fn start_embedded_broker(app_config: &AppConfig) -> Option<SocketAddr> {
    if !app_config.broker_embedded() {
        return None;
    }

    let listen = match listen_address(app_config.broker_bind_address(), app_config.broker_port()) {
        Ok(addr) => addr,
        Err(e) => {
            warn!(error = %e, bind_address = %app_config.broker_bind_address(), "broker_invalid_bind_address");
            return None;
        }
    };

    let config = broker_config(listen);
    let spawned = thread::Builder::new().name("mqtt-broker".to_string()).spawn(move || {
        let mut broker = Broker::new(config);
        // start() blocks for the lifetime of the broker
        if let Err(e) = broker.start() {
            warn!(error = %e, "broker_start_failed");
        }
    });
    if let Err(e) = spawned {
        warn!(error = %e, "broker_thread_spawn_failed");
        return None;
    }

    if wait_until_listening(listen, Duration::from_secs(1)) {
        info!(listen = %listen, "broker_started");
    } else {
        warn!(listen = %listen, "broker_not_listening_yet");
    }
    Some(listen)
}

fn listen_address(bind_address: &str, port: u16) -> Result<SocketAddr, std::net::AddrParseError> {
    let ip: IpAddr = bind_address.trim().parse()?;
    Ok(SocketAddr::new(ip, port))
}

/// rumqttd configuration with a single MQTT v4 listener
fn broker_config(listen: SocketAddr) -> Config {
    let router = RouterConfig {
        max_segment_size: 10 * 1024 * 1024,
        max_segment_count: 10,
        max_connections: MAX_FARM_CONNECTIONS,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    };

    let mut v4 = HashMap::new();
    v4.insert(
        "farm".to_string(),
        ServerSettings {
            name: "farm".to_string(),
            listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                max_payload_size: MAX_PAYLOAD_BYTES,
                max_inflight_count: 100,
                auth: None,
                dynamic_filters: false,
                external_auth: None,
            },
        },
    );

    Config {
        id: 0,
        router,
        v4: Some(v4),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    }
}

/// Wait for the listener so the connector's first attempt finds it up
fn wait_until_listening(listen: SocketAddr, limit: Duration) -> bool {
    // A wildcard bind is reachable on loopback
    let target = if listen.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), listen.port())
    } else {
        listen
    };

    let step = Duration::from_millis(25);
    let mut waited = Duration::ZERO;
    while waited < limit {
        if TcpStream::connect_timeout(&target, step).is_ok() {
            return true;
        }
        thread::sleep(step);
        waited += step * 2;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_address() {
        let addr = listen_address("0.0.0.0", 1883).unwrap();
        assert!(addr.ip().is_unspecified());
        assert_eq!(addr.port(), 1883);
        assert_eq!(listen_address(" ::1 ", 1884).unwrap().to_string(), "[::1]:1884");
        assert!(listen_address("barn.local", 1883).is_err());
    }

    #[test]
    fn test_single_v4_listener() {
        let listen = listen_address("127.0.0.1", 18830).unwrap();
        let config = broker_config(listen);
        let servers = config.v4.unwrap();
        assert_eq!(servers.len(), 1);
        let server = &servers["farm"];
        assert_eq!(server.listen, listen);
        assert_eq!(server.connections.max_payload_size, MAX_PAYLOAD_BYTES);
        assert!(config.v5.is_none());
        assert_eq!(config.router.max_connections, MAX_FARM_CONNECTIONS);
    }

    #[test]
    fn test_disabled_broker_not_started() {
        let config = AppConfig::from_toml_str("[broker]\nembedded = false\n", "test").unwrap();
        assert_eq!(start_embedded_broker(&config), None);
    }
}
