use crate::{
    error::{Result, RmuxError},
    header::MAX_FRAME_LENGTH,
    setup::MAX_MIME_LENGTH,
};
use std::time::Duration;

/// Configuration for an rmux session.
///
/// Covers the SETUP-negotiated parameters (keepalive timing, MIME types)
/// and local resource bounds (frame size, queue capacities).
///
/// # Examples
///
/// ```rust
/// use rmux::{Config, ConfigBuilder};
/// use std::time::Duration;
///
/// let config = Config::default();
/// assert_eq!(config.keepalive_interval, Duration::from_secs(30));
///
/// let config = ConfigBuilder::new()
///     .keepalive_interval(Duration::from_secs(10))
///     .max_lifetime(Duration::from_secs(60))
///     .data_mime_type("application/json")
///     .build()
///     .expect("valid configuration");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// How often a KEEPALIVE with RESPOND set is emitted.
    pub keepalive_interval: Duration,
    /// How long to tolerate silence before declaring the connection dead.
    pub max_lifetime: Duration,
    pub metadata_mime_type: String,
    pub data_mime_type: String,
    /// Upper bound on a single encoded frame, inbound and outbound.
    pub max_frame_size: usize,
    /// Capacity of the outbound frame queue feeding the transport writer.
    pub frame_queue_size: usize,
    /// Capacity of the inbound request queue drained by `accept`.
    pub accept_queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(120),
            metadata_mime_type: "application/octet-stream".to_string(),
            data_mime_type: "application/octet-stream".to_string(),
            max_frame_size: 1024 * 1024, // 1MB
            frame_queue_size: 256,
            accept_queue_size: 16,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.keepalive_interval.is_zero() {
            return Err(RmuxError::Config(
                "keepalive interval cannot be zero".to_string(),
            ));
        }

        if self.max_lifetime <= self.keepalive_interval {
            return Err(RmuxError::Config(
                "max lifetime must be greater than the keepalive interval".to_string(),
            ));
        }

        // Both durations travel in u32 millisecond fields of SETUP.
        for (name, duration) in [
            ("keepalive interval", self.keepalive_interval),
            ("max lifetime", self.max_lifetime),
        ] {
            if duration.as_millis() > u32::MAX as u128 {
                return Err(RmuxError::Config(format!(
                    "{name} does not fit the wire's u32 millisecond field"
                )));
            }
        }

        for (name, mime_type) in [
            ("metadata MIME type", &self.metadata_mime_type),
            ("data MIME type", &self.data_mime_type),
        ] {
            if mime_type.len() > MAX_MIME_LENGTH {
                return Err(RmuxError::Config(format!(
                    "{name} exceeds {MAX_MIME_LENGTH} bytes"
                )));
            }
        }

        if self.max_frame_size == 0 {
            return Err(RmuxError::Config("max frame size cannot be 0".to_string()));
        }

        if self.max_frame_size > MAX_FRAME_LENGTH {
            return Err(RmuxError::Config(format!(
                "max frame size cannot exceed the u24 length field ({MAX_FRAME_LENGTH} bytes)"
            )));
        }

        if self.frame_queue_size == 0 || self.accept_queue_size == 0 {
            return Err(RmuxError::Config("queue sizes cannot be 0".to_string()));
        }

        Ok(())
    }
}

/// Builder for creating custom `Config` instances.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_lifetime = lifetime;
        self
    }

    pub fn metadata_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.config.metadata_mime_type = mime_type.into();
        self
    }

    pub fn data_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.config.data_mime_type = mime_type.into();
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn frame_queue_size(mut self, size: usize) -> Self {
        self.config.frame_queue_size = size;
        self
    }

    pub fn accept_queue_size(mut self, size: usize) -> Self {
        self.config.accept_queue_size = size;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
