//! Shared realtime connection, room membership and event fan-out.

pub mod connector;
pub mod manager;

use std::time::Duration;

pub use connector::{Connection, Connector, WsConnector};
pub use manager::{DistributionManager, Subscription};

/// lifecycle of the shared connection as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// nothing has asked for the connection yet, or it was shut down
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// retry budget spent; the next subscription request starts over
    Abandoned,
}

/// exponential backoff between reconnect attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
    /// `None` never gives up
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
            factor: 2,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// delay before reconnect attempt `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.max(1).saturating_pow(exponent);
        self.initial.saturating_mul(multiplier).min(self.max)
    }
}
