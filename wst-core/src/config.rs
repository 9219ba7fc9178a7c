//! Options shared by the client and the server.

use clap::Args;
use std::time::Duration;

/// Default time budget for establishing the outbound leg, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default send timeout in seconds.
pub const DEFAULT_SEND_TIMEOUT_SECS: u64 = 60;

/// Default linger delay in milliseconds.
pub const DEFAULT_LINGER_MS: u64 = 2000;

/// Timeouts applied to every tunneled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingConfig {
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub send_timeout: Duration,
    pub linger_delay: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
            linger_delay: Duration::from_millis(DEFAULT_LINGER_MS),
        }
    }
}

/// Command-line and environment form of [`TimingConfig`].
#[derive(Args, Debug, Clone)]
pub struct TimingArgs {
    /// Timeout for establishing the other tunnel leg, in seconds
    #[arg(long, env = "WST_CONNECT_TIMEOUT", default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// Close a connection after this many seconds without inbound data
    #[arg(long, env = "WST_IDLE_TIMEOUT", default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    pub idle_timeout: u64,

    /// Timeout for a single write, in seconds
    #[arg(long, env = "WST_SEND_TIMEOUT", default_value_t = DEFAULT_SEND_TIMEOUT_SECS)]
    pub send_timeout: u64,

    /// Time to keep draining after one side closes, in milliseconds
    #[arg(long = "linger-ms", env = "WST_LINGER_MS", default_value_t = DEFAULT_LINGER_MS)]
    pub linger_ms: u64,
}

impl TimingArgs {
    pub fn timing(&self) -> TimingConfig {
        TimingConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            idle_timeout: Duration::from_secs(self.idle_timeout),
            send_timeout: Duration::from_secs(self.send_timeout),
            linger_delay: Duration::from_millis(self.linger_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        timing: TimingArgs,
    }

    #[test]
    fn test_defaults_match() {
        let cli = TestCli::parse_from(["wst"]);
        assert_eq!(cli.timing.timing(), TimingConfig::default());
    }

    #[test]
    fn test_overrides() {
        let cli = TestCli::parse_from([
            "wst",
            "--connect-timeout",
            "5",
            "--idle-timeout",
            "10",
            "--send-timeout",
            "3",
            "--linger-ms",
            "150",
        ]);
        let timing = cli.timing.timing();

        assert_eq!(timing.connect_timeout, Duration::from_secs(5));
        assert_eq!(timing.idle_timeout, Duration::from_secs(10));
        assert_eq!(timing.send_timeout, Duration::from_secs(3));
        assert_eq!(timing.linger_delay, Duration::from_millis(150));
    }
}
