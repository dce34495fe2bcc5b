use std::time::Duration;

/// Configuration for the transport dispatcher.
#[derive(Clone)]
pub struct Config {
    /// Worker/thread configuration.
    pub worker: WorkerConfig,
    /// TCP listen backlog.
    pub backlog: i32,
    /// Idle timeout for pending outbound connects. `None` disables eviction.
    pub ioc_timeout: Option<Duration>,
    /// SO_RCVBUF hint applied to handed-off channels, in bytes.
    pub max_input_buffer_size: u32,
    /// SO_SNDBUF hint applied to handed-off channels, in bytes.
    pub max_output_buffer_size: u32,
    /// Whether handed-off channels should be written eagerly rather than
    /// queued. Carried as a tuning hint on [`Channel`](crate::Channel).
    pub direct_write: bool,
    /// Enable TCP_NODELAY on accepted and outbound sockets.
    pub tcp_nodelay: bool,
    /// Emit a periodic per-worker stats line via `log`.
    pub log_stats: bool,
    /// Maximum time in milliseconds one event-loop iteration will block in
    /// `poll` when no timer is due sooner.
    pub tick_timeout_ms: u64,
    /// Interval between stats lines when `log_stats` is on.
    pub stats_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            backlog: 1024,
            ioc_timeout: None,
            max_input_buffer_size: 64 * 1024,
            max_output_buffer_size: 64 * 1024,
            direct_write: false,
            tcp_nodelay: true,
            log_stats: false,
            tick_timeout_ms: 100,
            stats_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.backlog <= 0 {
            return Err(crate::error::Error::Config(
                "backlog must be > 0".into(),
            ));
        }
        if self.max_input_buffer_size == 0 {
            return Err(crate::error::Error::Config(
                "max_input_buffer_size must be > 0".into(),
            ));
        }
        if self.max_output_buffer_size == 0 {
            return Err(crate::error::Error::Config(
                "max_output_buffer_size must be > 0".into(),
            ));
        }
        if self.tick_timeout_ms == 0 {
            return Err(crate::error::Error::Config(
                "tick_timeout_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the worker pool.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Number of worker threads. 0 = number of CPUs.
    pub threads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { threads: 0 }
    }
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use fanline::ConfigBuilder;
/// use std::time::Duration;
///
/// let config = ConfigBuilder::new()
///     .workers(4)
///     .backlog(512)
///     .tcp_nodelay(true)
///     .ioc_timeout(Some(Duration::from_secs(5)))
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Worker settings ──────────────────────────────────────────────

    /// Set the number of worker threads. 0 = number of CPUs.
    pub fn workers(mut self, n: usize) -> Self {
        self.config.worker.threads = n;
        self
    }

    /// Set the TCP listen backlog.
    pub fn backlog(mut self, n: i32) -> Self {
        self.config.backlog = n;
        self
    }

    // ── Tuning ───────────────────────────────────────────────────────

    /// Set the idle timeout for pending outbound connects.
    pub fn ioc_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.ioc_timeout = timeout;
        self
    }

    /// Set the SO_RCVBUF hint for handed-off channels.
    pub fn max_input_buffer_size(mut self, bytes: u32) -> Self {
        self.config.max_input_buffer_size = bytes;
        self
    }

    /// Set the SO_SNDBUF hint for handed-off channels.
    pub fn max_output_buffer_size(mut self, bytes: u32) -> Self {
        self.config.max_output_buffer_size = bytes;
        self
    }

    /// Enable or disable the direct-write tuning hint.
    pub fn direct_write(mut self, enable: bool) -> Self {
        self.config.direct_write = enable;
        self
    }

    /// Enable or disable TCP_NODELAY on all sockets.
    pub fn tcp_nodelay(mut self, enable: bool) -> Self {
        self.config.tcp_nodelay = enable;
        self
    }

    /// Enable or disable the periodic per-worker stats line.
    pub fn log_stats(mut self, enable: bool) -> Self {
        self.config.log_stats = enable;
        self
    }

    // ── Timing ───────────────────────────────────────────────────────

    /// Set the maximum poll block per loop iteration, in milliseconds.
    pub fn tick_timeout_ms(mut self, ms: u64) -> Self {
        self.config.tick_timeout_ms = ms;
        self
    }

    /// Set the interval between stats lines.
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.config.stats_interval = interval;
        self
    }

    // ── Terminal ─────────────────────────────────────────────────────

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, crate::error::Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn builder_sets_fields() {
        let config = ConfigBuilder::new()
            .workers(3)
            .backlog(128)
            .tcp_nodelay(false)
            .direct_write(true)
            .max_input_buffer_size(8192)
            .build()
            .unwrap();
        assert_eq!(config.worker.threads, 3);
        assert_eq!(config.backlog, 128);
        assert!(!config.tcp_nodelay);
        assert!(config.direct_write);
        assert_eq!(config.max_input_buffer_size, 8192);
    }

    #[test]
    fn zero_buffer_rejected() {
        let result = ConfigBuilder::new().max_input_buffer_size(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn zero_backlog_rejected() {
        let result = ConfigBuilder::new().backlog(0).build();
        assert!(result.is_err());
    }
}
