use std::time::Duration;

/// Retry and deadline policy of one session.
///
/// The sender retransmits a DATA block up to `max_retries` times, waiting
/// `ack_timeout` for its ACK each time. The receiver waits `data_timeout` for
/// the next DATA block, re-polling silently `data_polls` times with
/// `poll_interval` in between before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub max_retries: u8,
    pub ack_timeout: Duration,
    pub data_timeout: Duration,
    pub data_polls: u8,
    pub poll_interval: Duration,
}

impl TransferConfig {
    pub fn server() -> Self {
        Self {
            max_retries: crate::MAX_RETRY_COUNT,
            ack_timeout: Duration::from_secs(1),
            data_timeout: Duration::from_secs(3),
            data_polls: 3,
            poll_interval: Duration::from_millis(200),
        }
    }

    /// Client side: a fixed deadline, no silent re-polls.
    pub fn client() -> Self {
        Self {
            max_retries: crate::MAX_RETRY_COUNT,
            ack_timeout: Duration::from_secs(3),
            data_timeout: Duration::from_secs(3),
            data_polls: 1,
            poll_interval: Duration::ZERO,
        }
    }

    pub fn with_timeouts(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self.data_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u8) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::server()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.ack_timeout, Duration::from_secs(1));
        assert_eq!(config.data_timeout, Duration::from_secs(3));
        assert_eq!(config.data_polls, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(200));
    }

    #[test]
    fn retries_never_zero() {
        let config = TransferConfig::client().with_retries(0);
        assert_eq!(config.max_retries, 1);
    }
}
