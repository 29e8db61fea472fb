use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Timing and retry settings for a transport
///
/// The defaults are the values the transports are designed around; overrides
/// exist for diagnostics and tests. Durations are given in milliseconds when
/// deserialised.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// Number of dial attempts before giving up
    pub max_attempts: u32,

    /// Delay between consecutive dial attempts
    #[serde(deserialize_with = "millis")]
    pub retry_delay: Duration,

    /// How long a fresh connection may stay silent before it is considered
    /// stolen and redialled
    #[serde(deserialize_with = "millis")]
    pub approval_timeout: Duration,

    /// Delay before the first dial, giving the debuggee time to start listening
    #[serde(deserialize_with = "millis")]
    pub settle_delay: Duration,

    /// Socket read timeout; bounds how long a reader takes to notice a stop
    /// request
    #[serde(deserialize_with = "millis")]
    pub read_timeout: Duration,

    /// How long a listening transport waits for the debuggee to connect
    #[serde(deserialize_with = "millis")]
    pub accept_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_millis(150),
            approval_timeout: Duration::from_millis(1000),
            settle_delay: Duration::from_millis(500),
            read_timeout: Duration::from_secs(1),
            accept_timeout: Duration::from_secs(60),
        }
    }
}

impl ConnectionConfig {
    /// Delays between attempts, one fewer than the number of attempts
    pub(crate) fn retry_delays(&self) -> impl Iterator<Item = Duration> + use<> {
        let millis = u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX);
        retry::delay::Fixed::from_millis(millis).take(self.max_attempts.saturating_sub(1) as usize)
    }
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.retry_delay, Duration::from_millis(150));
        assert_eq!(config.approval_timeout, Duration::from_millis(1000));
        assert_eq!(config.settle_delay, Duration::from_millis(500));
    }

    #[test]
    fn retry_delays_between_attempts() {
        let config = ConnectionConfig::default();
        let delays: Vec<_> = config.retry_delays().collect();
        assert_eq!(delays.len(), 9);
        assert!(delays.iter().all(|d| *d == Duration::from_millis(150)));
    }

    #[test]
    fn single_attempt_has_no_delays() {
        let config = ConnectionConfig {
            max_attempts: 1,
            ..Default::default()
        };
        assert_eq!(config.retry_delays().count(), 0);
    }

    #[test]
    fn partial_overrides_from_json() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"approvalTimeout": 250, "maxAttempts": 3}"#).unwrap();
        assert_eq!(config.approval_timeout, Duration::from_millis(250));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(150));
    }
}
