// ── Runtime session configuration ──
//
// These types describe *how* sessions behave: reconnect schedule, grace
// windows, token skew, HTTP tuning. They never touch disk. The CLI (via
// chorus-config) constructs a `ClientConfig` and hands it in.

use std::time::Duration;

use chorus_api::{TlsMode, TransportConfig};

/// Reconnect delays, indexed by attempt and clamped to the last entry.
pub const DEFAULT_BACKOFF: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Connection lifecycle tuning shared by every instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Delay before reconnect attempt `k` is `backoff[min(k, len - 1)]`.
    pub backoff: Vec<Duration>,
    /// How long a connection with zero subscribers lingers before teardown.
    pub unsubscribe_grace: Duration,
    /// A token this close to expiry is treated as expired.
    pub token_skew: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF.to_vec(),
            unsubscribe_grace: Duration::from_millis(100),
            token_skew: Duration::from_secs(30),
        }
    }
}

impl SessionConfig {
    /// Reconnect delay for the given attempt number.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, &self.backoff)
    }
}

/// Clamp-indexed lookup into a backoff schedule. An empty schedule
/// falls back to [`DEFAULT_BACKOFF`].
pub fn backoff_delay(attempt: u32, schedule: &[Duration]) -> Duration {
    let schedule = if schedule.is_empty() {
        &DEFAULT_BACKOFF[..]
    } else {
        schedule
    };
    let index = usize::try_from(attempt)
        .unwrap_or(usize::MAX)
        .min(schedule.len() - 1);
    schedule[index]
}

/// Everything a [`Client`](crate::Client) needs besides its instances.
///
/// Built by the CLI, passed to `Client` -- core never reads config files.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub session: SessionConfig,
    /// HTTP request timeout.
    pub timeout: Duration,
    pub tls: TlsMode,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            session: SessionConfig::default(),
            timeout: transport.timeout,
            tls: transport.tls,
            user_agent: transport.user_agent,
        }
    }
}

impl ClientConfig {
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: self.tls.clone(),
            timeout: self.timeout,
            user_agent: self.user_agent.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_schedule_then_clamps() {
        let config = SessionConfig::default();
        let secs: Vec<u64> = (0..8).map(|k| config.backoff_delay(k).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 5, 10, 30, 30, 30, 30]);
    }

    #[test]
    fn empty_schedule_uses_default() {
        assert_eq!(backoff_delay(0, &[]), Duration::from_secs(1));
        assert_eq!(backoff_delay(u32::MAX, &[]), Duration::from_secs(30));
    }

    #[test]
    fn session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.unsubscribe_grace, Duration::from_millis(100));
        assert_eq!(config.token_skew, Duration::from_secs(30));
    }
}
