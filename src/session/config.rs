//! Session configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use discord_presence_ipc::SessionConfig;
//!
//! let config = SessionConfig::new("1234567890")
//!     .with_reconnect_delay(Duration::from_secs(2))
//!     .with_max_reconnect_attempts(5);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default base delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

/// Default number of reconnection attempts before giving up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Default per-endpoint connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default timeout for correlated commands.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default liveness timer period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Scopes requested by a token-less `AUTHORIZE`.
pub const DEFAULT_AUTHORIZE_SCOPES: [&str; 2] = ["rpc", "identify"];

// ============================================================================
// SessionConfig
// ============================================================================

/// Session engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Application client ID sent in the handshake.
    pub client_id: String,

    /// Emit per-frame trace records.
    pub debug: bool,

    /// Queue sends while disconnected and reconnect after unexpected closes.
    pub auto_reconnect: bool,

    /// Base delay for exponential reconnection backoff.
    pub reconnect_delay: Duration,

    /// Reconnection attempts before giving up.
    pub max_reconnect_attempts: u32,

    /// Timeout for dialing a single endpoint.
    pub connect_timeout: Duration,

    /// Default timeout for correlated commands.
    pub request_timeout: Duration,

    /// Liveness timer period.
    pub heartbeat_interval: Duration,

    /// Scopes requested by token-less authorization.
    pub authorize_scopes: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            debug: false,
            auto_reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            authorize_scopes: DEFAULT_AUTHORIZE_SCOPES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl SessionConfig {
    /// Creates a config with defaults for `client_id`.
    #[inline]
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Enables per-frame trace records.
    #[inline]
    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Enables or disables automatic reconnection.
    #[inline]
    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Sets the base reconnection delay.
    #[inline]
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the maximum reconnection attempts.
    #[inline]
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the per-endpoint connect timeout.
    #[inline]
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the default command timeout.
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the liveness timer period.
    #[inline]
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the scopes for token-less authorization.
    #[must_use]
    pub fn with_authorize_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authorize_scopes = scopes.into_iter().map(Into::into).collect();
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SessionConfig {
    /// Checks that every duration is usable.
    ///
    /// The client ID is not checked here; `handshake` rejects an empty one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first zero duration.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("reconnect_delay", self.reconnect_delay),
            ("connect_timeout", self.connect_timeout),
            ("request_timeout", self.request_timeout),
            ("heartbeat_interval", self.heartbeat_interval),
        ];

        match durations.iter().find(|(_, d)| d.is_zero()) {
            Some((name, _)) => Err(Error::config(format!("{name} must be greater than zero"))),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
