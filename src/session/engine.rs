//! Session engine event loop.
//!
//! The engine is a single task that owns every piece of mutable session
//! state: the transport, the pending-request table, the outbound queue and
//! the lifecycle flags. It reacts to two sources in one `select!` loop:
//!
//! - [`EngineCommand`]s from `Session` handles and from its own timers
//! - transport events from the current connection's reader task
//!
//! Nothing else mutates session state, so no two state changes interleave.
//! Operations that must wait on the remote (authenticate, reconnect) are
//! composed by `Session` out of engine commands and never block this loop.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at, sleep};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::Nonce;
use crate::protocol::{
    Activity, Command, CommandFrame, Frame, FrameDecoder, Handshake, InboundMessage, Opcode,
    message::{EVENT_ERROR, EVENT_READY},
};
use crate::transport::{
    FrameSink, IpcAddress, IpcStream, Transport, TransportEvent, TransportEventSender,
};

use super::backoff::reconnect_delay;
use super::client::{Session, Shared};
use super::correlator::{PendingRequest, ReplySender, RequestCorrelator};
use super::event::SessionEvent;
use super::queue::OutboundQueue;
use super::state::{AuthMode, ConnectionState, SessionStatus};

// ============================================================================
// Types
// ============================================================================

/// How a completed authentication can be repeated after reconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AuthGrant {
    /// Resulting mode.
    pub mode: AuthMode,
    /// Access token, for [`AuthMode::Token`].
    pub token: Option<String>,
}

/// State to restore on a scheduled reconnect.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResumePlan {
    /// Re-authenticate the same way as before.
    pub auth: Option<AuthGrant>,
    /// Resubmit this activity.
    pub activity: Option<Activity>,
}

/// Messages the engine accepts.
pub(crate) enum EngineCommand {
    /// Start a connect. Replies with the connect epoch if the caller
    /// should dial, `None` if already connected.
    BeginConnect {
        resume: bool,
        reply: oneshot::Sender<Result<Option<u64>>>,
    },
    /// Hand over the dial outcome of the connect started in `epoch`.
    Attach {
        epoch: u64,
        outcome: Result<(IpcAddress, IpcStream)>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Send the handshake frame.
    Handshake { reply: oneshot::Sender<Result<()>> },
    /// Authentication command is about to be sent.
    BeginAuthenticate { reply: oneshot::Sender<()> },
    /// Authentication finished; `None` if it failed.
    FinishAuthenticate {
        grant: Option<AuthGrant>,
        reply: oneshot::Sender<()>,
    },
    /// Send or queue a raw frame.
    Send {
        opcode: Opcode,
        data: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Send a correlated command.
    Request {
        command: Command,
        args: Value,
        event: Option<String>,
        timeout: Duration,
        reply: ReplySender,
    },
    /// Remember (or forget) the current activity.
    RecordActivity(Option<Activity>),
    /// Tear everything down.
    Disconnect { reply: oneshot::Sender<()> },
    /// A request timer fired.
    RequestExpired(Nonce),
    /// The reconnect timer fired.
    ReconnectDue,
    /// The liveness timer fired.
    Heartbeat,
}

// ============================================================================
// Engine
// ============================================================================

/// Single owner of session state.
pub(crate) struct Engine {
    /// Config, status snapshot and event fan-out.
    shared: Arc<Shared>,
    /// Own command channel, for timers and reconnect tasks.
    commands: mpsc::WeakUnboundedSender<EngineCommand>,
    /// Handed to each transport's reader task.
    transport_tx: TransportEventSender,
    /// Current connection.
    transport: Option<Transport>,
    /// Id for the next connection.
    next_transport_id: u64,
    /// Bumped by `disconnect()`; dials started in an older epoch are dropped.
    connect_epoch: u64,
    /// Inbound frame reassembly for the current connection.
    decoder: FrameDecoder,
    /// Lifecycle state.
    state: ConnectionState,
    /// Authentication completed on the current connection.
    authenticated: bool,
    /// Last successful authentication, repeated on reconnect.
    grant: Option<AuthGrant>,
    /// Runtime auto-reconnect switch; `disconnect()` turns it off.
    auto_reconnect: bool,
    /// Attempts since the last successful connect.
    reconnect_attempts: u32,
    /// Pending reconnect timer.
    reconnect_timer: Option<JoinHandle<()>>,
    /// Liveness timer.
    heartbeat_timer: Option<JoinHandle<()>>,
    /// Last liveness tick or pong.
    last_heartbeat: Option<Instant>,
    /// Last activity set.
    current_activity: Option<Activity>,
    /// Pending correlated requests.
    correlator: RequestCorrelator,
    /// Frames deferred while disconnected.
    queue: OutboundQueue,
}

impl Engine {
    /// Creates an idle engine.
    pub(crate) fn new(
        shared: Arc<Shared>,
        commands: mpsc::WeakUnboundedSender<EngineCommand>,
        transport_tx: TransportEventSender,
    ) -> Self {
        let auto_reconnect = shared.config.auto_reconnect;
        Self {
            shared,
            commands,
            transport_tx,
            transport: None,
            next_transport_id: 0,
            connect_epoch: 0,
            decoder: FrameDecoder::new(),
            state: ConnectionState::Disconnected,
            authenticated: false,
            grant: None,
            auto_reconnect,
            reconnect_attempts: 0,
            reconnect_timer: None,
            heartbeat_timer: None,
            last_heartbeat: None,
            current_activity: None,
            correlator: RequestCorrelator::new(),
            queue: OutboundQueue::new(),
        }
    }

    /// Runs until every `Session` handle is dropped.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
        mut transport_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    ) {
        debug!(client_id = %self.shared.config.client_id, "Session engine started");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }

                Some((id, event)) = transport_rx.recv() => {
                    self.handle_transport_event(id, event).await;
                }
            }
        }

        self.shutdown().await;
        debug!("Session engine terminated");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::BeginConnect { resume, reply } => {
                let _ = reply.send(self.begin_connect(resume));
            }

            EngineCommand::Attach {
                epoch,
                outcome,
                reply,
            } => {
                let _ = reply.send(self.attach(epoch, outcome));
            }

            EngineCommand::Handshake { reply } => {
                let _ = reply.send(self.handshake().await);
            }

            EngineCommand::BeginAuthenticate { reply } => {
                if self.transport.is_some() && self.state < ConnectionState::Authenticating {
                    self.state = ConnectionState::Authenticating;
                    self.publish();
                }
                let _ = reply.send(());
            }

            EngineCommand::FinishAuthenticate { grant, reply } => {
                self.finish_authenticate(grant).await;
                let _ = reply.send(());
            }

            EngineCommand::Send {
                opcode,
                data,
                reply,
            } => {
                let _ = reply.send(self.send_or_queue(opcode, data).await);
            }

            EngineCommand::Request {
                command,
                args,
                event,
                timeout,
                reply,
            } => {
                self.request(command, args, event, timeout, reply).await;
            }

            EngineCommand::RecordActivity(activity) => {
                self.current_activity = activity;
                self.publish();
            }

            EngineCommand::Disconnect { reply } => {
                self.disconnect().await;
                let _ = reply.send(());
            }

            EngineCommand::RequestExpired(nonce) => {
                self.correlator.expire(&nonce);
            }

            EngineCommand::ReconnectDue => self.start_resume(),

            EngineCommand::Heartbeat => {
                self.last_heartbeat = Some(Instant::now());
                trace!("Heartbeat");
                self.publish();
            }
        }
    }

    fn begin_connect(&mut self, resume: bool) -> Result<Option<u64>> {
        if resume && !self.auto_reconnect {
            debug!("Reconnect skipped, auto-reconnect disabled");
            return Err(Error::NotConnected);
        }
        if self.transport.is_some() {
            return Ok(None);
        }
        if !resume {
            self.auto_reconnect = self.shared.config.auto_reconnect;
        }

        self.state = ConnectionState::Connecting;
        self.publish();
        Ok(Some(self.connect_epoch))
    }

    fn attach(&mut self, epoch: u64, outcome: Result<(IpcAddress, IpcStream)>) -> Result<()> {
        if epoch != self.connect_epoch {
            debug!(
                epoch,
                current = self.connect_epoch,
                "Connect cancelled by disconnect, dropping dial outcome"
            );
            return Err(Error::ConnectionClosed);
        }

        let (address, stream) = match outcome {
            Ok(connected) => connected,
            Err(e) => {
                if self.transport.is_none() {
                    self.state = ConnectionState::Disconnected;
                    self.publish();
                }
                warn!(error = %e, "Connect failed");
                return Err(e);
            }
        };

        if self.transport.is_some() {
            debug!(%address, "Already connected, dropping extra stream");
            return Ok(());
        }

        let id = self.next_transport_id;
        self.next_transport_id += 1;

        info!(%address, id, "Connected to Discord IPC");
        self.transport = Some(Transport::spawn(
            id,
            address,
            stream,
            self.transport_tx.clone(),
        ));
        self.decoder.reset();
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.publish();
        self.emit(SessionEvent::Connected);
        Ok(())
    }

    async fn handshake(&mut self) -> Result<()> {
        let config = &self.shared.config;
        if config.client_id.is_empty() {
            return Err(Error::config("client id is required for the handshake"));
        }
        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::NotConnected);
        };

        let data = serde_json::to_value(Handshake::new(&config.client_id))?;
        transport.send_frame(Opcode::Handshake, &data).await?;
        debug!(client_id = %config.client_id, "Handshake sent");

        if self.state < ConnectionState::Handshaking {
            self.state = ConnectionState::Handshaking;
        }
        self.start_heartbeat();
        self.publish();
        Ok(())
    }

    async fn finish_authenticate(&mut self, grant: Option<AuthGrant>) {
        let Some(grant) = grant else {
            if self.state == ConnectionState::Authenticating {
                self.state = ConnectionState::Handshaking;
                self.publish();
            }
            return;
        };

        let mode = grant.mode;
        self.authenticated = true;
        self.grant = Some(grant);
        if self.transport.is_some() {
            self.state = ConnectionState::Ready;
        }
        self.publish();

        info!(?mode, "Authenticated");
        self.emit(SessionEvent::Authenticated { mode });
        self.flush_queue().await;
    }

    async fn flush_queue(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if self.queue.is_empty() {
            return;
        }

        match self.queue.flush(transport).await {
            Ok(sent) => debug!(sent, "Outbound queue flushed"),
            Err(e) => warn!(error = %e, remaining = self.queue.len(), "Queue flush interrupted"),
        }
    }

    async fn send_or_queue(&mut self, opcode: Opcode, data: Value) -> Result<()> {
        if let Some(transport) = self.transport.as_mut() {
            if self.shared.config.debug {
                debug!(?opcode, payload = %data, "Frame out");
            }
            return transport.send_frame(opcode, &data).await;
        }

        if self.auto_reconnect {
            self.queue.push(opcode, data);
            debug!(queued = self.queue.len(), "Not connected, frame queued");
            return Ok(());
        }

        Err(Error::NotConnected)
    }

    async fn request(
        &mut self,
        command: Command,
        args: Value,
        event: Option<String>,
        timeout: Duration,
        reply: ReplySender,
    ) {
        if let Err(e) = self.correlator.check_capacity() {
            let _ = reply.send(Err(e));
            return;
        }

        let nonce = self.correlator.next_nonce();
        let frame = CommandFrame::new(command, nonce, args).with_event(event);
        let data = match serde_json::to_value(&frame) {
            Ok(data) => data,
            Err(e) => {
                let _ = reply.send(Err(Error::Json(e)));
                return;
            }
        };

        let timer = self.spawn_after(timeout, EngineCommand::RequestExpired(nonce));
        self.correlator.register(
            nonce,
            PendingRequest {
                command,
                timeout,
                reply,
                timer,
            },
        );

        if let Err(e) = self.send_or_queue(Opcode::Frame, data).await {
            self.correlator.fail(&nonce, e);
        }
    }

    async fn disconnect(&mut self) {
        self.auto_reconnect = false;
        self.connect_epoch += 1;
        self.stop_timers();

        let was_active = self.transport.is_some() || self.state != ConnectionState::Disconnected;
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }

        self.correlator.reject_all(|| Error::ConnectionClosed);
        let dropped = self.queue.clear();
        self.decoder.reset();
        self.authenticated = false;
        self.grant = None;
        self.state = ConnectionState::Disconnected;
        self.publish();

        if was_active {
            info!(dropped, "Disconnected");
            self.emit(SessionEvent::Disconnected);
        }
    }

    async fn shutdown(&mut self) {
        self.stop_timers();
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.correlator.reject_all(|| Error::SessionClosed);
        self.queue.clear();
    }

    // ========================================================================
    // Transport Events
    // ========================================================================

    async fn handle_transport_event(&mut self, id: u64, event: TransportEvent) {
        if self.transport.as_ref().map(Transport::id) != Some(id) {
            trace!(id, "Ignoring event from stale connection");
            return;
        }

        match event {
            TransportEvent::Data(chunk) => {
                self.decoder.push(&chunk);
                loop {
                    match self.decoder.next_frame() {
                        Ok(Some(frame)) => self.handle_frame(frame).await,
                        Ok(None) => break,
                        Err(e) => {
                            // Framing is lost; the rest of the stream is unusable.
                            warn!(error = %e, "Inbound stream corrupt, closing connection");
                            self.emit(SessionEvent::error(e));
                            self.connection_lost().await;
                            break;
                        }
                    }
                    // A Close frame may have torn the connection down.
                    if self.transport.is_none() {
                        break;
                    }
                }
            }

            TransportEvent::Error(e) => {
                self.emit(SessionEvent::error(Error::Io(e)));
            }

            TransportEvent::Closed => self.connection_lost().await,
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        if self.shared.config.debug {
            debug!(opcode = frame.opcode, len = frame.len(), "Frame in");
        }

        match frame.kind() {
            Some(Opcode::Frame) => self.handle_message(&frame),

            Some(Opcode::Ping) => {
                let pong = Frame::new(Opcode::Pong.as_u32(), frame.payload).to_bytes();
                if let Some(transport) = self.transport.as_mut()
                    && let Err(e) = transport.send(&pong).await
                {
                    warn!(error = %e, "Failed to answer ping");
                }
            }

            Some(Opcode::Pong) => {
                self.last_heartbeat = Some(Instant::now());
                self.publish();
            }

            Some(Opcode::Close) => {
                let err = match frame.json() {
                    Ok(value) => {
                        let code = value.get("code").and_then(Value::as_i64);
                        let message = value
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("connection closed by remote");
                        Error::remote(code, message)
                    }
                    Err(e) => e,
                };
                warn!(error = %err, "Remote closed the connection");
                self.emit(SessionEvent::error(err));
                self.connection_lost().await;
            }

            Some(Opcode::Handshake) | None => {
                let err = Error::protocol_decode(format!("unexpected opcode {}", frame.opcode));
                warn!(error = %err, "Dropping frame");
                self.emit(SessionEvent::error(err));
            }
        }
    }

    fn handle_message(&mut self, frame: &Frame) {
        let raw = match frame.json() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Dropping frame");
                self.emit(SessionEvent::error(e));
                return;
            }
        };

        let message = match serde_json::from_value::<InboundMessage>(raw.clone()) {
            Ok(message) => message,
            Err(e) => {
                let err = Error::protocol_decode(format!("malformed message: {e}"));
                warn!(error = %err, "Dropping frame");
                self.emit(SessionEvent::error(err));
                return;
            }
        };

        let Some(message) = self.correlator.resolve(message) else {
            return;
        };

        if !message.is_dispatch() {
            self.emit(SessionEvent::Message(raw));
            return;
        }

        match message.evt.as_deref() {
            Some(EVENT_READY) => {
                info!("Client ready");
                self.emit(SessionEvent::Ready(message.data));
            }
            Some(EVENT_ERROR) => {
                let err = message.remote_error();
                warn!(error = %err, "Client dispatched an error");
                self.emit(SessionEvent::error(err));
            }
            Some(event) => {
                let event = event.to_string();
                self.emit(SessionEvent::Dispatch {
                    event,
                    data: message.data,
                });
            }
            None => self.emit(SessionEvent::Message(raw)),
        }
    }

    async fn connection_lost(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        transport.close().await;
        warn!(address = %transport.address(), "Connection lost");

        if let Some(timer) = self.heartbeat_timer.take() {
            timer.abort();
        }
        self.decoder.reset();
        self.authenticated = false;
        self.state = ConnectionState::Disconnected;
        self.correlator.reject_all(|| Error::ConnectionClosed);
        self.emit(SessionEvent::Disconnected);

        if self.auto_reconnect {
            self.schedule_reconnect();
        }
        self.publish();
    }

    // ========================================================================
    // Reconnection
    // ========================================================================

    fn schedule_reconnect(&mut self) {
        let max = self.shared.config.max_reconnect_attempts;
        if self.reconnect_attempts >= max {
            warn!(attempts = self.reconnect_attempts, "Giving up on reconnecting");
            self.emit(SessionEvent::error(Error::ReconnectExhausted {
                attempts: self.reconnect_attempts,
            }));
            return;
        }

        self.reconnect_attempts += 1;
        let delay = reconnect_delay(self.shared.config.reconnect_delay, self.reconnect_attempts);
        info!(
            attempt = self.reconnect_attempts,
            max,
            delay_ms = delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        if let Some(previous) = self.reconnect_timer.take() {
            previous.abort();
        }
        self.reconnect_timer = Some(self.spawn_after(delay, EngineCommand::ReconnectDue));
    }

    fn start_resume(&mut self) {
        self.reconnect_timer = None;
        if !self.auto_reconnect || self.transport.is_some() {
            return;
        }
        let Some(session) = self.handle() else {
            return;
        };

        let plan = ResumePlan {
            auth: self.grant.clone(),
            activity: self.current_activity.clone(),
        };
        let attempt = self.reconnect_attempts;

        self.shared.spawn(async move {
            if let Err(e) = session.resume(plan).await {
                warn!(attempt, error = %e, "Reconnect failed");
                session.shared.emit(SessionEvent::error(e));
            }
        });
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn start_heartbeat(&mut self) {
        if let Some(previous) = self.heartbeat_timer.take() {
            previous.abort();
        }
        self.last_heartbeat = Some(Instant::now());

        let period = self.shared.config.heartbeat_interval;
        let commands = self.commands.clone();
        self.heartbeat_timer = Some(self.shared.spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(tx) = commands.upgrade() else {
                    return;
                };
                if tx.send(EngineCommand::Heartbeat).is_err() {
                    return;
                }
            }
        }));
    }

    fn stop_timers(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.heartbeat_timer.take() {
            timer.abort();
        }
    }

    fn spawn_after(&self, delay: Duration, command: EngineCommand) -> JoinHandle<()> {
        let commands = self.commands.clone();
        self.shared.spawn(async move {
            sleep(delay).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(command);
            }
        })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn handle(&self) -> Option<Session> {
        self.commands
            .upgrade()
            .map(|commands| Session::from_parts(commands, Arc::clone(&self.shared)))
    }

    fn emit(&self, event: SessionEvent) {
        self.shared.emit(event);
    }

    fn publish(&self) {
        let status = SessionStatus {
            state: self.state,
            connected: self.transport.is_some(),
            authenticated: self.authenticated,
            auth_mode: self
                .grant
                .as_ref()
                .filter(|_| self.authenticated)
                .map(|g| g.mode),
            client_id: self.shared.config.client_id.clone(),
            current_activity: self.current_activity.clone(),
            reconnect_attempts: self.reconnect_attempts,
            last_heartbeat: self.last_heartbeat,
        };
        *self.shared.status.lock() = status;
    }
}
