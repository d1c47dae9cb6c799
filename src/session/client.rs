//! Public session handle.
//!
//! [`Session`] is a cheap, cloneable handle to the engine task. Every
//! operation is a message to the engine; operations that wait on the remote
//! (connect, authenticate, correlated commands) await a reply channel
//! without blocking the engine itself.
//!
//! # Example
//!
//! ```no_run
//! use discord_presence_ipc::{Activity, Session};
//!
//! # async fn example() -> discord_presence_ipc::Result<()> {
//! let session = Session::builder("1234567890").build()?;
//! let mut events = session.events();
//!
//! session.connect().await?;
//! session.handshake().await?;
//! session.authenticate(None).await?;
//!
//! session
//!     .set_activity(Activity::named("Editing").with_details("main.rs"))
//!     .await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::instrument::{WithDispatch, WithSubscriber};
use tracing::{Dispatch, debug, dispatcher, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{Activity, Command, Opcode};
use crate::transport::{Dialer, IpcAddress, candidate_addresses, connect_first};

use super::builder::SessionBuilder;
use super::config::SessionConfig;
use super::engine::{AuthGrant, EngineCommand, ResumePlan};
use super::event::SessionEvent;
use super::state::{AuthMode, SessionStatus};

// ============================================================================
// Shared
// ============================================================================

/// State shared between handles and the engine.
pub(crate) struct Shared {
    /// Validated configuration.
    pub(crate) config: SessionConfig,
    /// How candidate addresses become streams.
    pub(crate) dialer: Arc<dyn Dialer>,
    /// Fixed candidate list; `None` resolves the platform defaults per connect.
    pub(crate) candidates: Option<Vec<IpcAddress>>,
    /// Notification fan-out.
    pub(crate) events: broadcast::Sender<SessionEvent>,
    /// Latest status published by the engine.
    pub(crate) status: Mutex<SessionStatus>,
    /// Injected log sink.
    pub(crate) dispatch: Option<Dispatch>,
}

impl Shared {
    /// Publishes a notification. Having no subscribers is not an error.
    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    /// Dispatcher that session log records go to.
    pub(crate) fn dispatch(&self) -> Dispatch {
        match &self.dispatch {
            Some(dispatch) => dispatch.clone(),
            None => dispatcher::get_default(Dispatch::clone),
        }
    }

    /// Wraps `future` so its log records go to the session's dispatcher.
    pub(crate) fn traced<F: Future>(&self, future: F) -> WithDispatch<F> {
        future.with_subscriber(self.dispatch())
    }

    /// Spawns `future` under the session's dispatcher.
    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(self.traced(future))
    }
}

// ============================================================================
// Session
// ============================================================================

/// Handle to a rich presence IPC session.
///
/// Clones share one engine. The engine stops once every handle is dropped,
/// rejecting whatever is still pending with [`Error::SessionClosed`].
#[derive(Clone)]
pub struct Session {
    /// Engine command channel.
    commands: mpsc::UnboundedSender<EngineCommand>,
    /// State shared with the engine.
    pub(crate) shared: Arc<Shared>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.shared.status.lock();
        f.debug_struct("Session")
            .field("client_id", &self.shared.config.client_id)
            .field("state", &status.state)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Construction & Status
// ============================================================================

impl Session {
    /// Creates a builder for a session with `client_id`.
    #[inline]
    #[must_use]
    pub fn builder(client_id: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(client_id)
    }

    pub(crate) fn from_parts(
        commands: mpsc::UnboundedSender<EngineCommand>,
        shared: Arc<Shared>,
    ) -> Self {
        Self { commands, shared }
    }

    /// Subscribes to session notifications.
    ///
    /// Each receiver sees every notification emitted after it was created.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Returns a snapshot of the session status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.shared.status.lock().clone()
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Returns `true` while a stream is established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.status.lock().connected
    }

    /// Returns `true` once authentication completed (possibly degraded).
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.shared.status.lock().authenticated
    }
}

// ============================================================================
// Session - Lifecycle
// ============================================================================

impl Session {
    /// Connects to the first reachable IPC endpoint.
    ///
    /// Does nothing if already connected. Re-enables auto-reconnect if the
    /// configuration allows it.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionFailure`] if no candidate accepted, carrying
    ///   remediation guidance
    /// - [`Error::ConnectionClosed`] if `disconnect()` was called while dialing
    pub async fn connect(&self) -> Result<()> {
        self.shared.traced(self.open(false)).await.map(|_| ())
    }

    /// Sends the handshake frame. Does not wait for a reply.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no client ID is configured
    /// - [`Error::NotConnected`] if there is no connection
    pub async fn handshake(&self) -> Result<()> {
        self.call(|reply| EngineCommand::Handshake { reply }).await?
    }

    /// Authenticates the session.
    ///
    /// With a token, sends `AUTHENTICATE` and propagates its failure.
    /// Without one, sends `AUTHORIZE` with the configured scopes; if that is
    /// rejected by the remote or times out, the session continues in
    /// [`AuthMode::Basic`]. Either way the outbound queue is flushed once
    /// authentication completes.
    ///
    /// # Errors
    ///
    /// Returns the `AUTHENTICATE` failure, or any `AUTHORIZE` failure other
    /// than a remote error or timeout.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<AuthMode> {
        let token = token.map(str::to_owned);
        self.shared.traced(self.authenticate_with(token)).await
    }

    async fn authenticate_with(&self, token: Option<String>) -> Result<AuthMode> {
        self.call(|reply| EngineCommand::BeginAuthenticate { reply }).await?;

        let outcome = match token {
            Some(token) => {
                let args = json!({ "access_token": token });
                self.send_command(Command::Authenticate, args)
                    .await
                    .map(|_| AuthGrant {
                        mode: AuthMode::Token,
                        token: Some(token),
                    })
            }

            None => {
                let config = &self.shared.config;
                let args = json!({
                    "client_id": config.client_id,
                    "scopes": config.authorize_scopes,
                });

                let mode = match self.send_command(Command::Authorize, args).await {
                    Ok(_) => Ok(AuthMode::Authorized),
                    Err(e @ (Error::RemoteError { .. } | Error::CommandTimeout { .. })) => {
                        warn!(
                            error = %e,
                            "Authorization failed, continuing with basic functionality"
                        );
                        Ok(AuthMode::Basic)
                    }
                    Err(e) => Err(e),
                };
                mode.map(|mode| AuthGrant { mode, token: None })
            }
        };

        let grant = outcome.as_ref().ok().cloned();
        self.call(|reply| EngineCommand::FinishAuthenticate { grant, reply }).await?;

        outcome.map(|grant| grant.mode)
    }

    /// Disconnects and disables auto-reconnect. Idempotent.
    ///
    /// Pending requests are rejected with [`Error::ConnectionClosed`] and
    /// the outbound queue is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the engine has stopped.
    pub async fn disconnect(&self) -> Result<()> {
        self.call(|reply| EngineCommand::Disconnect { reply }).await
    }

    /// Dials and attaches a connection. Returns `false` if already connected.
    async fn open(&self, resume: bool) -> Result<bool> {
        let Some(epoch) = self
            .call(|reply| EngineCommand::BeginConnect { resume, reply })
            .await??
        else {
            return Ok(false);
        };

        let candidates = match &self.shared.candidates {
            Some(candidates) => candidates.clone(),
            None => candidate_addresses(),
        };
        debug!(count = candidates.len(), "Dialing IPC endpoints");

        let outcome = connect_first(
            self.shared.dialer.as_ref(),
            &candidates,
            self.shared.config.connect_timeout,
        )
        .await;

        self.call(|reply| EngineCommand::Attach {
            epoch,
            outcome,
            reply,
        })
        .await??;
        Ok(true)
    }

    /// Reconnect chain run when the reconnect timer fires.
    pub(crate) async fn resume(&self, plan: ResumePlan) -> Result<()> {
        match self.open(true).await {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(Error::ConnectionClosed) => {
                debug!("Reconnect cancelled");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        self.handshake().await?;

        if let Some(grant) = plan.auth {
            let token = match grant.mode {
                AuthMode::Token => grant.token,
                AuthMode::Authorized | AuthMode::Basic => None,
            };
            self.authenticate_with(token).await?;
        }

        if let Some(activity) = plan.activity {
            self.set_activity(activity).await?;
        }

        info!("Session resumed");
        Ok(())
    }
}

// ============================================================================
// Session - Messaging
// ============================================================================

impl Session {
    /// Sends a raw frame, or queues it while disconnected with
    /// auto-reconnect enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if disconnected and auto-reconnect
    /// is off.
    pub async fn send(&self, opcode: Opcode, data: Value) -> Result<()> {
        self.call(|reply| EngineCommand::Send {
            opcode,
            data,
            reply,
        })
        .await?
    }

    /// Sends a correlated command with the configured request timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::CommandTimeout`] if no response arrives in time
    /// - [`Error::RemoteError`] if the remote answers with an error
    /// - [`Error::ConnectionClosed`] if the connection goes away first
    pub async fn send_command(&self, command: Command, args: Value) -> Result<Value> {
        self.request(command, args, None, self.shared.config.request_timeout)
            .await
    }

    /// Sends a correlated command with an explicit timeout.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn send_command_with_timeout(
        &self,
        command: Command,
        args: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.request(command, args, None, timeout).await
    }

    async fn request(
        &self,
        command: Command,
        args: Value,
        event: Option<String>,
        timeout: Duration,
    ) -> Result<Value> {
        self.call(|reply| EngineCommand::Request {
            command,
            args,
            event,
            timeout,
            reply,
        })
        .await?
    }

    /// Sends one message to the engine and waits for its reply.
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> EngineCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }
}

// ============================================================================
// Session - Activity & Queries
// ============================================================================

impl Session {
    /// Publishes a rich presence activity.
    ///
    /// The activity is remembered first, so it is resubmitted after a
    /// reconnect even if this call fails.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn set_activity(&self, activity: Activity) -> Result<Value> {
        let payload = serde_json::to_value(&activity)?;
        self.commands
            .send(EngineCommand::RecordActivity(Some(activity)))
            .map_err(|_| Error::SessionClosed)?;

        let args = json!({ "pid": std::process::id(), "activity": payload });
        self.send_command(Command::SetActivity, args).await
    }

    /// Clears the rich presence activity.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn clear_activity(&self) -> Result<Value> {
        self.commands
            .send(EngineCommand::RecordActivity(None))
            .map_err(|_| Error::SessionClosed)?;

        let args = json!({ "pid": std::process::id() });
        self.send_command(Command::SetActivity, args).await
    }

    /// Subscribes to a dispatch event.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn subscribe(&self, event: impl Into<String>, args: Value) -> Result<Value> {
        let timeout = self.shared.config.request_timeout;
        self.request(Command::Subscribe, args, Some(event.into()), timeout)
            .await
    }

    /// Unsubscribes from a dispatch event.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn unsubscribe(&self, event: impl Into<String>, args: Value) -> Result<Value> {
        let timeout = self.shared.config.request_timeout;
        self.request(Command::Unsubscribe, args, Some(event.into()), timeout)
            .await
    }

    /// Fetches a user by ID.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn get_user(&self, user_id: &str) -> Result<Value> {
        self.send_command(Command::GetUser, json!({ "id": user_id }))
            .await
    }

    /// Fetches the guilds of the authenticated user.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn get_guilds(&self) -> Result<Value> {
        self.send_command(Command::GetGuilds, json!({})).await
    }

    /// Fetches the channels of a guild.
    ///
    /// # Errors
    ///
    /// See [`send_command`](Self::send_command).
    pub async fn get_channels(&self, guild_id: &str) -> Result<Value> {
        self.send_command(Command::GetChannels, json!({ "guild_id": guild_id }))
            .await
    }
}
