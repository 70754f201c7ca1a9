//! In-process MQTT broker (rumqttd) for single-box events
//!
//! Carries both the vote feed topics and the retained display topic when no
//! external broker is available.

use crate::infra::config::Config as AppConfig;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Small router limits: one display, a handful of feed subscriptions and the TUI
fn router_config() -> RouterConfig {
    RouterConfig {
        max_segment_size: 10 * 1024 * 1024,
        max_segment_count: 4,
        max_connections: 64,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    }
}

fn listen_address(app_config: &AppConfig) -> Option<SocketAddr> {
    let addr_str = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    match addr_str.parse() {
        Ok(addr) => Some(addr),
        Err(e) => {
            warn!(error = %e, addr = %addr_str, "broker_invalid_bind_address");
            None
        }
    }
}

/// Start the embedded broker when `broker.enabled` is set. Returns whether it was started.
pub fn start_embedded_broker(app_config: &AppConfig) -> bool {
    if !app_config.broker_enabled() {
        return false;
    }
    let Some(listen_addr) = listen_address(app_config) else {
        return false;
    };

    let mut servers = HashMap::new();
    servers.insert(
        "v4".to_string(),
        ServerSettings {
            name: "v4".to_string(),
            listen: listen_addr,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                max_payload_size: 64 * 1024,
                max_inflight_count: 100,
                auth: None,
                dynamic_filters: true,
                external_auth: None,
            },
        },
    );

    let config = Config {
        id: 0,
        router: router_config(),
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    };

    thread::spawn(move || {
        let mut broker = Broker::new(config);
        // start() blocks for the lifetime of the broker
        if let Err(e) = broker.start() {
            warn!(error = %e, "broker_start_failed");
        }
    });

    // Let the listener bind before clients connect
    thread::sleep(Duration::from_millis(100));
    info!(addr = %listen_addr, "broker_started");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::TomlConfig;

    #[test]
    fn test_disabled_broker_is_not_started() {
        let config = AppConfig::default();
        assert!(!config.broker_enabled());
        assert!(!start_embedded_broker(&config));
    }

    #[test]
    fn test_invalid_bind_address_is_rejected() {
        let toml: TomlConfig =
            toml::from_str("[broker]\nenabled = true\nbind_address = \"not an ip\"\n").unwrap();
        let config = AppConfig::from_toml(toml, "test".to_string());
        assert!(listen_address(&config).is_none());
        assert!(!start_embedded_broker(&config));
    }
}
