//! Session scenarios against an in-memory Discord client.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

use crate::error::Error;
use crate::protocol::{Activity, Command, Frame, FrameDecoder, MAX_PAYLOAD_SIZE, Opcode, encode};
use crate::transport::{Dialer, IpcAddress, IpcStream};

use super::{AuthMode, ConnectionState, Session, SessionBuilder, SessionEvent};

// ============================================================================
// Fixtures
// ============================================================================

const WAIT: Duration = Duration::from_secs(2);

/// Hands out in-memory streams; the remote ends go to the test.
struct MockDialer {
    remotes: mpsc::UnboundedSender<DuplexStream>,
    reachable: Arc<AtomicBool>,
    latency: Arc<Mutex<Duration>>,
    dials: Arc<AtomicUsize>,
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, address: &IpcAddress) -> io::Result<IpcStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{address} refused"),
            ));
        }
        let (local, remote) = duplex(64 * 1024);
        let _ = self.remotes.send(remote);
        Ok(Box::new(local))
    }
}

struct Harness {
    session: Session,
    events: broadcast::Receiver<SessionEvent>,
    remotes: mpsc::UnboundedReceiver<DuplexStream>,
    reachable: Arc<AtomicBool>,
    /// Delay before each dial completes.
    latency: Arc<Mutex<Duration>>,
    dials: Arc<AtomicUsize>,
}

impl Harness {
    fn new(client_id: &str, configure: impl FnOnce(SessionBuilder) -> SessionBuilder) -> Self {
        let (tx, remotes) = mpsc::unbounded_channel();
        let reachable = Arc::new(AtomicBool::new(true));
        let latency = Arc::new(Mutex::new(Duration::ZERO));
        let dials = Arc::new(AtomicUsize::new(0));
        let dialer = MockDialer {
            remotes: tx,
            reachable: Arc::clone(&reachable),
            latency: Arc::clone(&latency),
            dials: Arc::clone(&dials),
        };

        let builder = Session::builder(client_id)
            .dialer(dialer)
            .candidates(vec![IpcAddress::new("/tmp/discord-ipc-0")])
            .connect_timeout(Duration::from_millis(200));
        let session = configure(builder).build().expect("build session");
        let events = session.events();

        Self {
            session,
            events,
            remotes,
            reachable,
            latency,
            dials,
        }
    }

    fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    fn basic() -> Self {
        Self::new("42", |b| b)
    }

    /// Connects and returns the remote end of the new stream.
    async fn connect(&mut self) -> Remote {
        self.session.connect().await.expect("connect");
        self.accept().await
    }

    /// Waits for the engine to dial.
    async fn accept(&mut self) -> Remote {
        let stream = timeout(WAIT, self.remotes.recv())
            .await
            .expect("dial in time")
            .expect("dialer alive");
        Remote::new(stream)
    }

    /// Connects and consumes the handshake frame.
    async fn handshaken(&mut self) -> Remote {
        let mut remote = self.connect().await;
        self.session.handshake().await.expect("handshake");
        let frame = remote.next_frame().await;
        assert_eq!(frame.kind(), Some(Opcode::Handshake));
        remote
    }

    async fn expect_event<F>(&mut self, matches: F) -> SessionEvent
    where
        F: Fn(&SessionEvent) -> bool,
    {
        timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.expect("event channel open");
                if matches(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("event in time")
    }

    /// Drains buffered notifications.
    fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

/// Discord's side of one connection.
struct Remote {
    stream: DuplexStream,
    decoder: FrameDecoder,
}

impl Remote {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
        }
    }

    async fn next_frame(&mut self) -> Frame {
        let mut buf = vec![0u8; 4096];
        loop {
            if let Some(frame) = self.decoder.next_frame().expect("well-formed frame") {
                return frame;
            }
            let n = timeout(WAIT, self.stream.read(&mut buf))
                .await
                .expect("frame in time")
                .expect("read");
            assert!(n > 0, "stream closed while waiting for a frame");
            self.decoder.push(&buf[..n]);
        }
    }

    /// Next opcode-1 payload.
    async fn next_command(&mut self) -> Value {
        let frame = self.next_frame().await;
        assert_eq!(frame.kind(), Some(Opcode::Frame));
        frame.json().expect("json payload")
    }

    async fn send(&mut self, opcode: Opcode, data: Value) {
        let bytes = encode(opcode, &data).expect("encode");
        self.stream.write_all(&bytes).await.expect("write");
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write");
    }

    /// Answers `request` with `data`.
    async fn reply(&mut self, request: &Value, data: Value) {
        let response = json!({
            "cmd": request["cmd"],
            "nonce": request["nonce"],
            "evt": null,
            "data": data,
        });
        self.send(Opcode::Frame, response).await;
    }

    async fn reply_error(&mut self, request: &Value, code: i64, message: &str) {
        let response = json!({
            "cmd": request["cmd"],
            "nonce": request["nonce"],
            "evt": "ERROR",
            "data": {"code": code, "message": message},
        });
        self.send(Opcode::Frame, response).await;
    }

    /// Reads until the session closes its end.
    async fn expect_eof(&mut self) {
        let mut buf = vec![0u8; 4096];
        let result = timeout(WAIT, async {
            loop {
                match self.stream.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => continue,
                }
            }
        })
        .await;
        assert!(result.is_ok(), "session did not close the stream");
    }
}

// ============================================================================
// Connect & Handshake
// ============================================================================

#[tokio::test]
async fn test_connect_emits_connected() {
    let mut h = Harness::basic();
    let _remote = h.connect().await;

    h.expect_event(|e| matches!(e, SessionEvent::Connected)).await;
    let status = h.session.status();
    assert!(status.connected);
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.reconnect_attempts, 0);

    // Already connected: no second dial.
    assert_ok!(h.session.connect().await);
    assert!(h.remotes.try_recv().is_err());
}

#[tokio::test]
async fn test_connect_failure_carries_guidance() {
    let h = Harness::basic();
    h.reachable.store(false, Ordering::SeqCst);

    let err = h.session.connect().await.expect_err("unreachable");
    match &err {
        Error::ConnectionFailure { failures, .. } => assert_eq!(failures.len(), 1),
        other => panic!("expected connection failure, got {other:?}"),
    }
    assert!(err.guidance().is_some());
    assert_eq!(h.session.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_handshake_payload_and_heartbeat() {
    let mut h = Harness::basic();
    let mut remote = h.connect().await;

    h.session.handshake().await.expect("handshake");
    let frame = remote.next_frame().await;

    assert_eq!(frame.kind(), Some(Opcode::Handshake));
    assert_eq!(frame.json().expect("json"), json!({"v": 1, "client_id": "42"}));
    let status = h.session.status();
    assert_eq!(status.state, ConnectionState::Handshaking);
    assert!(status.last_heartbeat.is_some());
}

#[tokio::test]
async fn test_handshake_requires_client_id() {
    let mut h = Harness::new("", |b| b);
    let _remote = h.connect().await;

    let err = h.session.handshake().await.expect_err("no client id");
    assert!(matches!(err, Error::Config { .. }));
}

#[tokio::test]
async fn test_handshake_requires_connection() {
    let h = Harness::basic();
    assert!(matches!(
        h.session.handshake().await,
        Err(Error::NotConnected)
    ));
}

// ============================================================================
// Sending & Correlation
// ============================================================================

#[tokio::test]
async fn test_send_while_disconnected_without_auto_reconnect() {
    let h = Harness::new("42", |b| b.auto_reconnect(false));

    let result = h.session.send(Opcode::Frame, json!({"cmd": "GET_GUILDS"})).await;
    assert!(matches!(result, Err(Error::NotConnected)));
}

#[tokio::test]
async fn test_command_timeout_names_command() {
    let mut h = Harness::basic();
    let mut remote = h.connect().await;

    let session = h.session.clone();
    let call = tokio::spawn(async move {
        session
            .send_command_with_timeout(
                Command::GetUser,
                json!({"user_id": "42"}),
                Duration::from_millis(100),
            )
            .await
    });

    let request = remote.next_command().await;
    assert_eq!(request["cmd"], "GET_USER");
    assert_eq!(request["args"], json!({"user_id": "42"}));

    let err = call.await.expect("join").expect_err("timeout");
    assert!(err.is_timeout());
    assert!(err.to_string().contains("GET_USER"));
}

#[tokio::test]
async fn test_response_resolves_once() -> anyhow::Result<()> {
    let mut h = Harness::basic();
    let mut remote = h.connect().await;

    let session = h.session.clone();
    let call = tokio::spawn(async move { session.get_guilds().await });

    let request = remote.next_command().await;
    assert_eq!(request["cmd"], "GET_GUILDS");
    remote.reply(&request, json!({"guilds": []})).await;
    remote.reply(&request, json!({"guilds": ["late"]})).await;

    assert_eq!(call.await??, json!({"guilds": []}));

    // The duplicate matches nothing and surfaces as a plain message.
    let event = h.expect_event(|e| matches!(e, SessionEvent::Message(_))).await;
    if let SessionEvent::Message(raw) = event {
        assert_eq!(raw["data"], json!({"guilds": ["late"]}));
    }
    Ok(())
}

#[tokio::test]
async fn test_error_response_rejects_caller() {
    let mut h = Harness::basic();
    let mut remote = h.connect().await;

    let session = h.session.clone();
    let call = tokio::spawn(async move { session.get_channels("1337").await });

    let request = remote.next_command().await;
    assert_eq!(request["args"], json!({"guild_id": "1337"}));
    remote.reply_error(&request, 4000, "Invalid guild").await;

    let err = call.await.expect("join").expect_err("remote error");
    match err {
        Error::RemoteError { code, message } => {
            assert_eq!(code, Some(4000));
            assert_eq!(message, "Invalid guild");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_subscribe_carries_event_name() {
    let mut h = Harness::basic();
    let mut remote = h.connect().await;

    let session = h.session.clone();
    let call = tokio::spawn(async move { session.subscribe("ACTIVITY_JOIN", json!({})).await });

    let request = remote.next_command().await;
    assert_eq!(request["cmd"], "SUBSCRIBE");
    assert_eq!(request["evt"], "ACTIVITY_JOIN");
    remote.reply(&request, json!({"evt": "ACTIVITY_JOIN"})).await;

    assert_ok!(call.await.expect("join"));
}

// ============================================================================
// Inbound Classification
// ============================================================================

#[tokio::test]
async fn test_ready_dispatch() {
    let mut h = Harness::basic();
    let mut remote = h.connect().await;

    remote
        .send(
            Opcode::Frame,
            json!({"cmd": "DISPATCH", "evt": "READY", "data": {"v": 1}}),
        )
        .await;

    let event = h.expect_event(|e| matches!(e, SessionEvent::Ready(_))).await;
    if let SessionEvent::Ready(data) = event {
        assert_eq!(data, json!({"v": 1}));
    }
}

#[tokio::test]
async fn test_error_and_other_dispatches() {
    let mut h = Harness::basic();
    let mut remote = h.connect().await;

    remote
        .send(
            Opcode::Frame,
            json!({"cmd": "DISPATCH", "evt": "ERROR", "data": {"code": 1000, "message": "boom"}}),
        )
        .await;
    remote
        .send(
            Opcode::Frame,
            json!({"cmd": "DISPATCH", "evt": "ACTIVITY_JOIN", "data": {"secret": "s"}}),
        )
        .await;

    let event = h.expect_event(|e| matches!(e, SessionEvent::Error(_))).await;
    if let SessionEvent::Error(err) = event {
        assert_eq!(err.to_string(), "Remote error: boom");
    }

    let event = h.expect_event(|e| matches!(e, SessionEvent::Dispatch { .. })).await;
    if let SessionEvent::Dispatch { event, data } = event {
        assert_eq!(event, "ACTIVITY_JOIN");
        assert_eq!(data, json!({"secret": "s"}));
    }
}

#[tokio::test]
async fn test_malformed_payload_does_not_stop_stream() {
    let mut h = Harness::basic();
    let mut remote = h.connect().await;

    remote
        .send_raw(&Frame::new(Opcode::Frame.as_u32(), b"not json".to_vec()).to_bytes())
        .await;
    remote
        .send(Opcode::Frame, json!({"cmd": "DISPATCH", "evt": "READY", "data": {}}))
        .await;

    let event = h.expect_event(|e| matches!(e, SessionEvent::Error(_))).await;
    if let SessionEvent::Error(err) = event {
        assert!(matches!(*err, Error::ProtocolDecode { .. }));
    }
    h.expect_event(|e| matches!(e, SessionEvent::Ready(_))).await;
}

#[tokio::test]
async fn test_oversized_header_closes_connection() {
    let mut h = Harness::new("42", |b| b.auto_reconnect(false));
    let mut remote = h.connect().await;

    // The announced payload is never sent; what follows must not be parsed
    // as a frame of its own.
    let mut bytes = Opcode::Frame.as_u32().to_le_bytes().to_vec();
    bytes.extend_from_slice(&(MAX_PAYLOAD_SIZE + 1).to_le_bytes());
    bytes.extend_from_slice(
        &encode(
            Opcode::Frame,
            &json!({"cmd": "DISPATCH", "evt": "READY", "data": {"forged": true}}),
        )
        .expect("encode"),
    );
    remote.send_raw(&bytes).await;

    let event = h.expect_event(|e| matches!(e, SessionEvent::Error(_))).await;
    if let SessionEvent::Error(err) = event {
        assert!(matches!(*err, Error::ProtocolDecode { .. }));
    }
    h.expect_event(|e| matches!(e, SessionEvent::Disconnected)).await;
    remote.expect_eof().await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let events = h.drain_events();
    assert!(
        !events.iter().any(|e| matches!(e, SessionEvent::Ready(_))),
        "{events:?}"
    );
    assert!(!h.session.is_connected());
    assert_eq!(h.session.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_ping_is_answered_and_pong_refreshes_heartbeat() {
    let mut h = Harness::basic();
    let mut remote = h.connect().await;
    assert!(h.session.status().last_heartbeat.is_none());

    remote.send(Opcode::Ping, json!({"n": 7})).await;
    let pong = remote.next_frame().await;
    assert_eq!(pong.kind(), Some(Opcode::Pong));
    assert_eq!(pong.json().expect("json"), json!({"n": 7}));

    remote.send(Opcode::Pong, json!({})).await;
    timeout(WAIT, async {
        while h.session.status().last_heartbeat.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("heartbeat refreshed");
}

#[tokio::test]
async fn test_close_frame_reports_error_then_disconnects() {
    let mut h = Harness::new("42", |b| b.auto_reconnect(false));
    let mut remote = h.connect().await;

    remote
        .send(Opcode::Close, json!({"code": 4000, "message": "Invalid Client ID"}))
        .await;

    let event = h.expect_event(|e| matches!(e, SessionEvent::Error(_))).await;
    if let SessionEvent::Error(err) = event {
        assert!(matches!(*err, Error::RemoteError { code: Some(4000), .. }));
    }
    h.expect_event(|e| matches!(e, SessionEvent::Disconnected)).await;
    assert!(!h.session.is_connected());
    remote.expect_eof().await;
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_authorize_timeout_degrades_and_flushes_queue() {
    let mut h = Harness::new("42", |b| b.request_timeout(Duration::from_millis(100)));

    // Queued while disconnected.
    for n in 0..3 {
        assert_ok!(h.session.send(Opcode::Frame, json!({"n": n})).await);
    }

    let mut remote = h.handshaken().await;

    let session = h.session.clone();
    let auth = tokio::spawn(async move { session.authenticate(None).await });

    let request = remote.next_command().await;
    assert_eq!(request["cmd"], "AUTHORIZE");
    assert_eq!(request["args"]["client_id"], "42");
    assert_eq!(request["args"]["scopes"], json!(["rpc", "identify"]));

    let mode = auth.await.expect("join").expect("degraded, not failed");
    assert_eq!(mode, AuthMode::Basic);

    let status = h.session.status();
    assert!(status.authenticated);
    assert_eq!(status.auth_mode, Some(AuthMode::Basic));
    assert_eq!(status.state, ConnectionState::Ready);

    for n in 0..3 {
        assert_eq!(remote.next_command().await, json!({"n": n}));
    }
    h.expect_event(|e| matches!(e, SessionEvent::Authenticated { mode: AuthMode::Basic }))
        .await;
}

#[tokio::test]
async fn test_authorize_success() {
    let mut h = Harness::basic();
    let mut remote = h.handshaken().await;

    let session = h.session.clone();
    let auth = tokio::spawn(async move { session.authenticate(None).await });

    let request = remote.next_command().await;
    remote.reply(&request, json!({"code": "abc"})).await;

    assert_eq!(auth.await.expect("join").expect("auth"), AuthMode::Authorized);
    assert_eq!(h.session.status().auth_mode, Some(AuthMode::Authorized));
}

#[tokio::test]
async fn test_token_authentication() {
    let mut h = Harness::basic();
    let mut remote = h.handshaken().await;

    let session = h.session.clone();
    let auth = tokio::spawn(async move { session.authenticate(Some("secret")).await });

    let request = remote.next_command().await;
    assert_eq!(request["cmd"], "AUTHENTICATE");
    assert_eq!(request["args"], json!({"access_token": "secret"}));
    remote.reply(&request, json!({"user": {"id": "1"}})).await;

    assert_eq!(auth.await.expect("join").expect("auth"), AuthMode::Token);
    assert!(h.session.is_authenticated());
    assert_eq!(h.session.status().state, ConnectionState::Ready);
}

#[tokio::test]
async fn test_token_authentication_failure_propagates() {
    let mut h = Harness::basic();
    let mut remote = h.handshaken().await;

    let session = h.session.clone();
    let auth = tokio::spawn(async move { session.authenticate(Some("bad")).await });

    let request = remote.next_command().await;
    remote.reply_error(&request, 4009, "Invalid token").await;

    let err = auth.await.expect("join").expect_err("rejected");
    assert!(matches!(err, Error::RemoteError { code: Some(4009), .. }));

    let status = h.session.status();
    assert!(!status.authenticated);
    assert_eq!(status.auth_mode, None);
    assert_eq!(status.state, ConnectionState::Handshaking);
}

// ============================================================================
// Disconnect & Reconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_rejects_pending_and_is_idempotent() {
    let mut h = Harness::basic();
    let mut remote = h.connect().await;

    let session = h.session.clone();
    let call = tokio::spawn(async move { session.get_user("1").await });
    remote.next_command().await;

    assert_ok!(h.session.disconnect().await);
    let err = call.await.expect("join").expect_err("rejected");
    assert!(matches!(err, Error::ConnectionClosed));
    h.expect_event(|e| matches!(e, SessionEvent::Disconnected)).await;

    assert_ok!(h.session.disconnect().await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        h.events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));

    // Auto-reconnect is now off: sends fail instead of queueing.
    assert_err!(h.session.send(Opcode::Frame, json!({})).await);
    assert!(h.remotes.try_recv().is_err());

    let status = h.session.status();
    assert!(!status.connected);
    assert!(!status.authenticated);
    remote.expect_eof().await;
}

#[tokio::test]
async fn test_unexpected_close_rejects_pending() {
    let mut h = Harness::new("42", |b| b.auto_reconnect(false));
    let mut remote = h.connect().await;

    let session = h.session.clone();
    let call = tokio::spawn(async move { session.get_guilds().await });
    remote.next_command().await;
    drop(remote);

    let err = call.await.expect("join").expect_err("rejected");
    assert!(matches!(err, Error::ConnectionClosed));
    h.expect_event(|e| matches!(e, SessionEvent::Disconnected)).await;
    assert_eq!(h.session.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_restores_authentication_and_activity() {
    let mut h = Harness::new("42", |b| b.reconnect_delay(Duration::from_millis(10)));
    let mut remote = h.handshaken().await;

    let session = h.session.clone();
    let auth = tokio::spawn(async move { session.authenticate(Some("secret")).await });
    let request = remote.next_command().await;
    remote.reply(&request, json!({})).await;
    assert_ok!(auth.await.expect("join"));

    let session = h.session.clone();
    let set = tokio::spawn(async move {
        session
            .set_activity(Activity::named("Testing").with_state("in a test"))
            .await
    });
    let request = remote.next_command().await;
    assert_eq!(request["cmd"], "SET_ACTIVITY");
    remote.reply(&request, json!({})).await;
    assert_ok!(set.await.expect("join"));

    // Connection drops.
    drop(remote);
    h.expect_event(|e| matches!(e, SessionEvent::Disconnected)).await;

    let mut remote = h.accept().await;
    let handshake = remote.next_frame().await;
    assert_eq!(handshake.kind(), Some(Opcode::Handshake));

    let request = remote.next_command().await;
    assert_eq!(request["cmd"], "AUTHENTICATE");
    assert_eq!(request["args"]["access_token"], "secret");
    remote.reply(&request, json!({})).await;

    let request = remote.next_command().await;
    assert_eq!(request["cmd"], "SET_ACTIVITY");
    assert_eq!(request["args"]["activity"]["name"], "Testing");
    assert_eq!(request["args"]["activity"]["state"], "in a test");
    assert_eq!(request["args"]["pid"], std::process::id());
    remote.reply(&request, json!({})).await;

    h.expect_event(|e| matches!(e, SessionEvent::Connected)).await;
    let status = h.session.status();
    assert!(status.connected);
    assert_eq!(status.reconnect_attempts, 0);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_reconnect() {
    let mut h = Harness::new("42", |b| b.reconnect_delay(Duration::from_millis(200)));
    let remote = h.connect().await;
    drop(remote);
    h.expect_event(|e| matches!(e, SessionEvent::Disconnected)).await;

    assert_ok!(h.session.disconnect().await);
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(h.dial_count(), 1);
    assert!(h.remotes.try_recv().is_err());
    assert!(!h.session.is_connected());
    assert_eq!(h.session.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_disconnect_during_reconnect_dial_drops_stream() {
    let mut h = Harness::new("42", |b| {
        b.reconnect_delay(Duration::from_millis(10))
            .connect_timeout(WAIT)
    });
    let remote = h.connect().await;
    *h.latency.lock() = Duration::from_millis(300);
    drop(remote);
    h.expect_event(|e| matches!(e, SessionEvent::Disconnected)).await;

    // Wait until the reconnect is inside the dial.
    timeout(WAIT, async {
        while h.dial_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("reconnect dialing");

    assert_ok!(h.session.disconnect().await);
    assert!(!h.session.is_connected());

    // The late stream is dropped instead of attached.
    let mut late = h.accept().await;
    late.expect_eof().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let status = h.session.status();
    assert!(!status.connected);
    assert_eq!(status.state, ConnectionState::Disconnected);
    let events = h.drain_events();
    assert!(
        !events.iter().any(|e| matches!(e, SessionEvent::Connected | SessionEvent::Error(_))),
        "{events:?}"
    );
    assert_eq!(h.dial_count(), 2);
}

#[tokio::test]
async fn test_reconnect_exhaustion_is_reported() {
    let mut h = Harness::new("42", |b| b.max_reconnect_attempts(0));
    let remote = h.connect().await;
    drop(remote);

    let event = h.expect_event(|e| matches!(e, SessionEvent::Error(_))).await;
    if let SessionEvent::Error(err) = event {
        assert!(matches!(*err, Error::ReconnectExhausted { attempts: 0 }));
    }
    assert!(!h.session.is_connected());
    assert!(h.remotes.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_reconnect_increments_attempts() {
    let mut h = Harness::new("42", |b| b.reconnect_delay(Duration::from_millis(10)));
    let remote = h.connect().await;
    h.reachable.store(false, Ordering::SeqCst);
    drop(remote);

    let event = h.expect_event(|e| matches!(e, SessionEvent::Error(_))).await;
    if let SessionEvent::Error(err) = event {
        assert!(err.is_connection_error());
    }
    let status = h.session.status();
    assert_eq!(status.reconnect_attempts, 1);
    assert_eq!(status.state, ConnectionState::Disconnected);
}

// ============================================================================
// Activity & Lifetime
// ============================================================================

#[tokio::test]
async fn test_clear_activity_forgets_current() {
    let mut h = Harness::basic();
    let mut remote = h.connect().await;

    let session = h.session.clone();
    let set = tokio::spawn(async move { session.set_activity(Activity::named("A")).await });
    let request = remote.next_command().await;
    remote.reply(&request, json!({})).await;
    assert_ok!(set.await.expect("join"));
    assert_eq!(
        h.session.status().current_activity,
        Some(Activity::named("A"))
    );

    let session = h.session.clone();
    let clear = tokio::spawn(async move { session.clear_activity().await });
    let request = remote.next_command().await;
    assert_eq!(request["cmd"], "SET_ACTIVITY");
    assert!(request["args"].get("activity").is_none());
    remote.reply(&request, json!({})).await;
    assert_ok!(clear.await.expect("join"));

    assert_eq!(h.session.status().current_activity, None);
}

#[tokio::test]
async fn test_dropping_last_handle_closes_stream() {
    let mut h = Harness::basic();
    let mut remote = h.connect().await;

    let Harness { session, .. } = h;
    drop(session);

    remote.expect_eof().await;
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Clone, Default)]
struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_log_dispatch_receives_engine_records() {
    let writer = CaptureWriter::default();
    let sink = writer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || sink.clone())
        .finish();

    let mut h = Harness::new("42", |b| b.log_dispatch(subscriber));
    let _remote = h.connect().await;

    let logs = String::from_utf8(writer.0.lock().clone()).expect("utf8");
    assert!(logs.contains("Connected to Discord IPC"), "{logs}");
}
