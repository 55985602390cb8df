use std::{fmt, net::SocketAddr, time::Duration};

use crate::protocol::MAX_DATAGRAM_SIZE;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Shortest poll interval; sockets reject a zero read timeout.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(50);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Direction an endpoint moves messages in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Receive datagrams and queue the decoded messages.
    Ingress,
    /// Send queued messages to `peer`.
    Egress { peer: SocketAddr },
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Ingress => write!(f, "ingress"),
            Role::Egress { .. } => write!(f, "egress"),
        }
    }
}

/// Reopen schedule after socket failures.
///
/// The n-th consecutive failure (counting from 0) waits
/// `min(initial_backoff * 2^n, max_backoff)`. With `max_retries` set the
/// endpoint gives up once that many consecutive retries have failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_retries: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial_backoff.checked_mul(factor))
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_retries.is_some_and(|max| failures > max)
    }
}

/// Settings of one endpoint, fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Local address the socket binds to.
    pub address: SocketAddr,
    pub role: Role,
    /// Receive buffer; longer datagrams are truncated by the OS.
    pub recv_buffer_size: usize,
    /// Upper bound on how long the endpoint blocks before checking for shutdown.
    /// Values below [MIN_POLL_INTERVAL] are raised to it.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl EndpointConfig {
    pub fn ingress(address: SocketAddr) -> Self {
        Self::new(address, Role::Ingress)
    }

    pub fn egress(address: SocketAddr, peer: SocketAddr) -> Self {
        Self::new(address, Role::Egress { peer })
    }

    fn new(address: SocketAddr, role: Role) -> Self {
        Self {
            address,
            role,
            recv_buffer_size: MAX_DATAGRAM_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Poll interval actually used, never below [MIN_POLL_INTERVAL].
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy::default()
            .with_initial_backoff(Duration::from_millis(10))
            .with_max_backoff(Duration::from_millis(70));

        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
        assert_eq!(policy.backoff(3), Duration::from_millis(70));
        assert_eq!(policy.backoff(200), Duration::from_millis(70));
    }

    #[test]
    fn unlimited_retries_never_exhaust() {
        assert!(!RetryPolicy::default().exhausted(u32::MAX));
    }

    #[test]
    fn bounded_retries_exhaust() {
        let policy = RetryPolicy::default().with_max_retries(2);
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }

    #[test]
    fn zero_poll_interval_is_raised() {
        let address = "127.0.0.1:0".parse().unwrap();
        let config = EndpointConfig::ingress(address).with_poll_interval(Duration::ZERO);
        assert_eq!(config.poll_interval, MIN_POLL_INTERVAL);

        let mut config = EndpointConfig::ingress(address);
        config.poll_interval = Duration::ZERO;
        assert_eq!(config.poll_interval(), MIN_POLL_INTERVAL);
    }

    #[test]
    fn role_names() {
        let peer = "127.0.0.1:9000".parse().unwrap();
        let config = EndpointConfig::egress("0.0.0.0:0".parse().unwrap(), peer);
        assert_eq!(config.role, Role::Egress { peer });
        assert_eq!(config.role.to_string(), "egress");
        assert_eq!(Role::Ingress.to_string(), "ingress");
    }
}
