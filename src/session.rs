use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval, timeout, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Span};
use uuid::Uuid;

use crate::application::{Application, SessionId};
use crate::config::SessionConfig;
use crate::error::FixError;
use crate::message::{message_types, next_frame, skip_to_next_frame, tags, FieldAccess, FixMessage};

/// Outbound frames buffered between callers and the socket writer
const OUTBOUND_CAPACITY: usize = 1000;

/// How long `stop` waits for the counterparty to confirm a logout
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(2);

/// Silence, in heartbeat intervals, before a TestRequest is sent
const TEST_REQUEST_THRESHOLD: f64 = 1.2;

/// Session state
#[derive(Debug, Clone, PartialEq, Copy)]
pub enum SessionState {
    /// Initial state
    Created,

    /// Connecting to counterparty
    Connecting,

    /// Logon sent, waiting for response
    LogonSent,

    /// Session established and active
    Active,

    /// Logout sent, waiting for confirmation
    LogoutSent,

    /// Session disconnected
    Disconnected,
}

/// What the correlation core needs from a session engine
#[async_trait]
pub trait SessionEngine: Send + Sync {
    /// Connect and send the logon; completion is reported via `on_logon`
    async fn start(&self) -> Result<(), FixError>;

    /// Log out and disconnect; `on_logout` fires before this returns
    async fn stop(&self) -> Result<(), FixError>;

    /// Queue an application message; failure is reported here, not later
    async fn send(&self, message: FixMessage) -> Result<(), FixError>;
}

/// Byte stream a session runs over
pub trait FixStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> FixStream for T {}

pub type BoxedStream = Box<dyn FixStream>;

/// Opens the transport for each `start`
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<BoxedStream, FixError>;
}

/// Plain TCP transport.
///
/// TLS is expected to be terminated in front of the process (e.g. stunnel).
pub struct TcpConnector {
    host: String,
    port: u16,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    /// Build from SocketConnectHost / SocketConnectPort
    pub fn from_config(config: &SessionConfig) -> Result<Self, FixError> {
        let host = config
            .host
            .as_deref()
            .ok_or_else(|| FixError::MissingConfiguration(crate::config::SOCKET_CONNECT_HOST.to_string()))?;
        let port = config
            .port
            .ok_or_else(|| FixError::MissingConfiguration(crate::config::SOCKET_CONNECT_PORT.to_string()))?;
        Ok(Self::new(host, port))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<BoxedStream, FixError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// State shared between the initiator and its connection tasks
struct SessionCore {
    config: SessionConfig,
    session_id: SessionId,
    app: Arc<dyn Application>,
    span: Span,

    /// Current session state
    state: Mutex<SessionState>,

    /// Next outbound sequence number
    next_seqnum: AtomicU64,

    /// Writer channel of the live connection; `None` when disconnected
    outbound: Mutex<Option<mpsc::Sender<Bytes>>>,

    /// Cancelled when the live connection ends
    closed: Mutex<CancellationToken>,

    /// When the last inbound frame arrived
    last_received: Mutex<Instant>,

    /// When the unanswered TestRequest went out, if any
    test_request_sent: Mutex<Option<Instant>>,
}

/// What the heartbeat timer should do on a tick
#[derive(Debug, Clone, Copy, PartialEq)]
enum Liveness {
    /// Traffic is flowing; send a heartbeat
    Alive,

    /// Quiet for too long; send a TestRequest
    Stale,

    /// The TestRequest went unanswered
    Dead,
}

/// Client-side FIX session engine.
///
/// Owns one connection at a time, resets sequence numbers on every logon and
/// reports lifecycle and traffic to its [`Application`].
pub struct Initiator {
    core: Arc<SessionCore>,
    connector: Box<dyn Connector>,
}

impl Initiator {
    /// Create an initiator; `on_create` is invoked before this returns
    pub fn new(
        config: SessionConfig,
        connector: Box<dyn Connector>,
        app: Arc<dyn Application>,
        span: Span,
    ) -> Self {
        let session_id = config.session_id();
        app.on_create(&session_id);

        let closed = CancellationToken::new();
        closed.cancel();

        Self {
            core: Arc::new(SessionCore {
                config,
                session_id,
                app,
                span,
                state: Mutex::new(SessionState::Created),
                next_seqnum: AtomicU64::new(1),
                outbound: Mutex::new(None),
                closed: Mutex::new(closed),
                last_received: Mutex::new(Instant::now()),
                test_request_sent: Mutex::new(None),
            }),
            connector,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.core.session_id
    }

    /// Get the current session state
    pub async fn get_state(&self) -> SessionState {
        *self.core.state.lock().await
    }
}

#[async_trait]
impl SessionEngine for Initiator {
    async fn start(&self) -> Result<(), FixError> {
        {
            let mut state = self.core.state.lock().await;
            let current = *state;
            match current {
                SessionState::Created | SessionState::Disconnected => *state = SessionState::Connecting,
                other => {
                    return Err(FixError::ProtocolViolation(format!(
                        "Cannot start session in {:?} state",
                        other
                    )));
                }
            }
        }

        let stream = match self.connector.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                *self.core.state.lock().await = SessionState::Disconnected;
                error!(parent: &self.core.span, error = %e, "Failed to connect");
                return Err(e);
            }
        };
        info!(parent: &self.core.span, session = %self.core.session_id, "Connected");

        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel::<Bytes>(OUTBOUND_CAPACITY);
        let closed = CancellationToken::new();

        self.core.next_seqnum.store(1, Ordering::SeqCst);
        *self.core.last_received.lock().await = Instant::now();
        *self.core.test_request_sent.lock().await = None;
        *self.core.outbound.lock().await = Some(tx);
        *self.core.closed.lock().await = closed.clone();

        tokio::spawn(write_loop(self.core.clone(), writer, rx));
        tokio::spawn(read_loop(self.core.clone(), reader, closed.clone()));
        tokio::spawn(heartbeat_loop(self.core.clone(), closed));

        // The reply may arrive before `send_message` returns
        self.core.transition_state(SessionState::LogonSent).await;

        let heartbeat_secs = self.core.config.heartbeat_interval.as_secs();
        if let Err(e) = self.core.send_message(FixMessage::logon(heartbeat_secs, true)).await {
            self.core.terminate("logon could not be sent").await;
            return Err(e);
        }

        Ok(())
    }

    async fn stop(&self) -> Result<(), FixError> {
        let state = self.core.get_state().await;

        if state == SessionState::Active {
            let closed = self.core.closed.lock().await.clone();

            // The confirmation may arrive before `send_message` returns
            self.core.transition_state(SessionState::LogoutSent).await;

            match self.core.send_message(FixMessage::logout(Some("Normal close"))).await {
                Ok(()) => {
                    if timeout(LOGOUT_TIMEOUT, closed.cancelled()).await.is_err() {
                        warn!(parent: &self.core.span, "Logout was not confirmed in time");
                    }
                }
                Err(e) => warn!(parent: &self.core.span, error = %e, "Failed to send logout"),
            }
        }

        self.core.terminate("local stop").await;
        Ok(())
    }

    async fn send(&self, message: FixMessage) -> Result<(), FixError> {
        if message.is_admin() {
            return Err(FixError::ProtocolViolation(format!(
                "Admin message {} is owned by the session",
                message.msg_type()
            )));
        }

        let state = self.core.get_state().await;
        if state != SessionState::Active {
            return Err(FixError::ConnectionLost(format!("Cannot send message in {:?} state", state)));
        }

        self.core.send_message(message).await
    }
}

impl SessionCore {
    async fn get_state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Run the outbound hook, stamp the sequence number and queue the frame
    async fn send_message(&self, mut message: FixMessage) -> Result<(), FixError> {
        if message.is_admin() {
            self.app.to_admin(&mut message, &self.session_id).await;
        } else {
            self.app.to_app(&mut message, &self.session_id).await?;
        }

        // Sequence assignment and queueing happen under one lock so frames
        // leave in sequence order.
        let outbound = self.outbound.lock().await;
        let sender = outbound
            .as_ref()
            .ok_or_else(|| FixError::ConnectionLost("Not connected".to_string()))?;

        let seq_num = self.next_seqnum.fetch_add(1, Ordering::SeqCst);
        let bytes = message.to_bytes(
            &self.config.begin_string,
            &self.config.sender_comp_id,
            &self.config.target_comp_id,
            seq_num,
        );
        debug!(parent: &self.span, data = %printable(&bytes), "Outgoing message");

        if sender.send(bytes.freeze()).await.is_err() {
            return Err(FixError::ConnectionLost("Failed to send message".to_string()));
        }

        Ok(())
    }

    /// Handle an incoming frame
    async fn handle_message(&self, data: &[u8]) {
        debug!(parent: &self.span, data = %printable(data), "Incoming message");
        *self.last_received.lock().await = Instant::now();

        let message = match FixMessage::from_bytes(data) {
            Ok(msg) => msg,
            Err(e) => {
                error!(parent: &self.span, error = %e, "Failed to parse message");
                return;
            }
        };

        let result = match message.msg_type() {
            message_types::LOGON => self.handle_logon(&message).await,
            message_types::LOGOUT => self.handle_logout(&message).await,
            message_types::TEST_REQUEST => self.handle_test_request(&message).await,
            message_types::RESEND_REQUEST => self.handle_resend_request(&message).await,
            _ if message.is_admin() => self.app.from_admin(&message, &self.session_id).await,
            _ => self.app.from_app(&message, &self.session_id).await,
        };

        if let Err(e) = result {
            warn!(
                parent: &self.span,
                msg_type = message.msg_type(),
                error = %e,
                "Inbound message was not processed"
            );
        }
    }

    /// Handle a logon message
    async fn handle_logon(&self, message: &FixMessage) -> Result<(), FixError> {
        let state = self.get_state().await;
        if state != SessionState::LogonSent {
            return Err(FixError::ProtocolViolation(format!("Received logon in invalid state: {:?}", state)));
        }

        self.app.from_admin(message, &self.session_id).await?;
        self.transition_state(SessionState::Active).await;
        info!(parent: &self.span, session = %self.session_id, "Session established");
        self.app.on_logon(&self.session_id).await;

        Ok(())
    }

    /// Handle a logout message
    async fn handle_logout(&self, message: &FixMessage) -> Result<(), FixError> {
        let result = self.app.from_admin(message, &self.session_id).await;

        match self.get_state().await {
            SessionState::Active => {
                // Counterparty initiated, confirm before closing
                if let Err(e) = self.send_message(FixMessage::logout(None)).await {
                    warn!(parent: &self.span, error = %e, "Failed to confirm logout");
                }
                info!(
                    parent: &self.span,
                    reason = message.get_field(tags::TEXT).unwrap_or(""),
                    "Session logged out by counterparty"
                );
            }
            SessionState::LogoutSent => {
                info!(parent: &self.span, "Session logout completed");
            }
            state => {
                warn!(
                    parent: &self.span,
                    state = ?state,
                    reason = message.get_field(tags::TEXT).unwrap_or(""),
                    "Received logout, closing session"
                );
            }
        }

        self.terminate("logout").await;
        result
    }

    /// Handle a test request message
    async fn handle_test_request(&self, message: &FixMessage) -> Result<(), FixError> {
        self.app.from_admin(message, &self.session_id).await?;

        // A test request requires a heartbeat response with the same TestReqID
        match message.get_field(tags::TEST_REQ_ID) {
            Some(test_req_id) => self.send_message(FixMessage::heartbeat(Some(test_req_id))).await,
            None => {
                warn!(parent: &self.span, "Received test request without TestReqID");
                Ok(())
            }
        }
    }

    /// Handle a resend request message.
    ///
    /// Messages are not stored, so the counterparty is moved past the
    /// requested range with a SequenceReset in reset mode.
    async fn handle_resend_request(&self, message: &FixMessage) -> Result<(), FixError> {
        self.app.from_admin(message, &self.session_id).await?;

        let begin_seq: u64 = message.require_parsed(tags::BEGIN_SEQ_NO)?;
        // 0 means "through the latest"
        let end_seq: u64 = message.require_parsed(tags::END_SEQ_NO)?;
        let reset_seq = self.next_seqnum.load(Ordering::SeqCst);
        debug!(
            parent: &self.span,
            begin_seq,
            end_seq,
            reset_seq,
            "Answering resend request with sequence reset"
        );

        // The reset itself consumes `reset_seq`
        self.send_message(FixMessage::sequence_reset(reset_seq + 1, false)).await
    }

    /// Judge the connection from inbound traffic since the last check
    async fn liveness(&self) -> Liveness {
        let heartbeat_interval = self.config.heartbeat_interval;
        let last_received = *self.last_received.lock().await;
        let mut test_request_sent = self.test_request_sent.lock().await;

        if let Some(sent_at) = *test_request_sent {
            if last_received < sent_at {
                if sent_at.elapsed() >= heartbeat_interval {
                    return Liveness::Dead;
                }
                return Liveness::Alive;
            }
            *test_request_sent = None;
        }

        if last_received.elapsed() >= heartbeat_interval.mul_f64(TEST_REQUEST_THRESHOLD) {
            Liveness::Stale
        } else {
            Liveness::Alive
        }
    }

    /// Transition to a new session state
    async fn transition_state(&self, new_state: SessionState) {
        let mut state = self.state.lock().await;
        let old_state = std::mem::replace(&mut *state, new_state);

        debug!(parent: &self.span, "Session state change: {:?} -> {:?}", old_state, new_state);
    }

    /// End the live connection once and notify the application
    async fn terminate(&self, reason: &str) {
        {
            let mut state = self.state.lock().await;
            if *state == SessionState::Disconnected {
                return;
            }
            *state = SessionState::Disconnected;
        }

        // Dropping the sender lets the writer flush what is queued, then exit
        self.outbound.lock().await.take();
        self.closed.lock().await.cancel();

        info!(parent: &self.span, reason, "Session disconnected");
        self.app.on_logout(&self.session_id).await;
    }
}

async fn read_loop(core: Arc<SessionCore>, mut reader: ReadHalf<BoxedStream>, closed: CancellationToken) {
    let mut buffer = BytesMut::with_capacity(8 * 1024);

    loop {
        let read = tokio::select! {
            _ = closed.cancelled() => return,
            read = reader.read_buf(&mut buffer) => read,
        };

        match read {
            Ok(0) => {
                core.terminate("connection closed by peer").await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(parent: &core.span, error = %e, "Failed to read from connection");
                core.terminate("read failure").await;
                return;
            }
        }

        loop {
            match next_frame(&mut buffer) {
                Ok(Some(frame)) => core.handle_message(&frame).await,
                Ok(None) => break,
                Err(e) => {
                    error!(parent: &core.span, error = %e, "Discarding unframeable input");
                    skip_to_next_frame(&mut buffer);
                }
            }
        }
    }
}

async fn write_loop(core: Arc<SessionCore>, mut writer: WriteHalf<BoxedStream>, mut rx: mpsc::Receiver<Bytes>) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            error!(parent: &core.span, error = %e, "Failed to write to connection");
            // Fail blocked senders before taking the locks they hold
            rx.close();
            core.terminate("write failure").await;
            return;
        }
    }

    let _ = writer.shutdown().await;
}

async fn heartbeat_loop(core: Arc<SessionCore>, closed: CancellationToken) {
    // HeartBtInt=0 disables heartbeats
    if core.config.heartbeat_interval.is_zero() {
        return;
    }

    let mut ticker = interval(core.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = closed.cancelled() => return,
            _ = ticker.tick() => {}
        }

        if core.get_state().await != SessionState::Active {
            continue;
        }

        let message = match core.liveness().await {
            Liveness::Alive => FixMessage::heartbeat(None),
            Liveness::Stale => {
                let test_req_id = Uuid::new_v4().to_string();
                debug!(parent: &core.span, test_req_id = %test_req_id, "No inbound traffic, sending test request");
                *core.test_request_sent.lock().await = Some(Instant::now());
                FixMessage::test_request(&test_req_id)
            }
            Liveness::Dead => {
                warn!(parent: &core.span, "Test request was not answered");
                core.terminate("heartbeat timeout").await;
                return;
            }
        };

        if let Err(e) = core.send_message(message).await {
            error!(parent: &core.span, error = %e, "Failed to send heartbeat");
            return;
        }
    }
}

/// Render a frame for logs with SOH shown as `|`
fn printable(data: &[u8]) -> String {
    String::from_utf8_lossy(data).replace('\x01', "|")
}
