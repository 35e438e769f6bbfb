use std::net::SocketAddr;

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    /// Upstream topic carrying instance state-change notifications.
    pub event_topic: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("VDESK_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let log_level = std::env::var("VDESK_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("VDESK_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let event_topic = std::env::var("VDESK_EVENT_TOPIC")
            .unwrap_or_else(|_| "vdesk-instance-events".to_string());

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            event_topic,
        })
    }
}
