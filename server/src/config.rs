//! Server configuration

use shared::RECONNECT_GRACE_PERIOD;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to
    pub bind_addr: String,

    /// How long a dropped player keeps their seat
    pub grace_period: Duration,

    /// Sessions idle longer than this are evicted
    pub session_ttl: Duration,

    /// How often idle sessions are swept
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            grace_period: RECONNECT_GRACE_PERIOD,
            session_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}
