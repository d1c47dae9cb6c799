//! Builder pattern for session configuration.
//!
//! Provides a fluent API for configuring and starting a [`Session`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use discord_presence_ipc::Session;
//!
//! # async fn example() -> discord_presence_ipc::Result<()> {
//! let session = Session::builder("1234567890")
//!     .auto_reconnect(true)
//!     .reconnect_delay(Duration::from_secs(2))
//!     .max_reconnect_attempts(5)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tracing::{Dispatch, debug, dispatcher};

use crate::error::{Error, Result};
use crate::transport::{Dialer, IpcAddress, LocalDialer};

use super::client::{Session, Shared};
use super::config::SessionConfig;
use super::engine::Engine;
use super::event::EVENT_CHANNEL_CAPACITY;
use super::state::SessionStatus;

// ============================================================================
// SessionBuilder
// ============================================================================

/// Builder for configuring a [`Session`].
///
/// Use [`Session::builder()`] to create one.
pub struct SessionBuilder {
    /// Engine configuration.
    config: SessionConfig,
    /// Custom dialer; defaults to [`LocalDialer`].
    dialer: Option<Arc<dyn Dialer>>,
    /// Fixed candidate list; defaults to the platform endpoints.
    candidates: Option<Vec<IpcAddress>>,
    /// Injected log sink.
    dispatch: Option<Dispatch>,
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("custom_dialer", &self.dialer.is_some())
            .field("candidates", &self.candidates)
            .field("log_dispatch", &self.dispatch.is_some())
            .finish()
    }
}

// ============================================================================
// SessionBuilder Implementation
// ============================================================================

impl SessionBuilder {
    /// Creates a builder with default settings for `client_id`.
    #[inline]
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::from_config(SessionConfig::new(client_id))
    }

    /// Creates a builder from a complete configuration.
    #[inline]
    #[must_use]
    pub fn from_config(config: SessionConfig) -> Self {
        Self {
            config,
            dialer: None,
            candidates: None,
            dispatch: None,
        }
    }

    /// Enables per-frame debug records.
    #[inline]
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Enables or disables queueing and reconnection.
    #[inline]
    #[must_use]
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Sets the base reconnection delay.
    #[inline]
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Sets the number of reconnection attempts before giving up.
    #[inline]
    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the per-endpoint connect timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the default timeout for correlated commands.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the liveness timer period.
    #[inline]
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Sets the scopes requested by token-less authorization.
    #[must_use]
    pub fn authorize_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config = self.config.with_authorize_scopes(scopes);
        self
    }

    /// Replaces the dialer used to open candidate endpoints.
    #[must_use]
    pub fn dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Some(Arc::new(dialer));
        self
    }

    /// Uses a fixed candidate list instead of the platform endpoints.
    #[must_use]
    pub fn candidates(mut self, candidates: Vec<IpcAddress>) -> Self {
        self.candidates = Some(candidates);
        self
    }

    /// Sends the session's log records to `dispatch` instead of the global
    /// subscriber.
    #[must_use]
    pub fn log_dispatch(mut self, dispatch: impl Into<Dispatch>) -> Self {
        self.dispatch = Some(dispatch.into());
        self
    }

    /// Validates the configuration and starts the session engine.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a duration is zero
    /// - [`Error::Config`] if called outside a Tokio runtime
    pub fn build(self) -> Result<Session> {
        self.config.validate()?;
        if Handle::try_current().is_err() {
            return Err(Error::config(
                "Session must be built inside a Tokio runtime.\n\
                 Example: call Session::builder(..).build() from a #[tokio::main] function",
            ));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            status: Mutex::new(SessionStatus::new(self.config.client_id.clone())),
            config: self.config,
            dialer: self
                .dialer
                .unwrap_or_else(|| Arc::new(LocalDialer) as Arc<dyn Dialer>),
            candidates: self.candidates,
            events,
            dispatch: self.dispatch,
        });

        let engine = Engine::new(Arc::clone(&shared), command_tx.downgrade(), transport_tx);
        shared.spawn(engine.run(command_rx, transport_rx));
        dispatcher::with_default(&shared.dispatch(), || {
            debug!(client_id = %shared.config.client_id, "Session built");
        });

        Ok(Session::from_parts(command_tx, shared))
    }
}

// ============================================================================
// Tests
// ============================================================================
