use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Span};

use crate::adapter::SessionAdapter;
use crate::application::Application;
use crate::config::{ClientConfig, ClientOptions, SessionConfig};
use crate::credentials::Credential;
use crate::error::FixError;
use crate::message::{format_utc_timestamp, tags, FixMessage};
use crate::orders::Order;
use crate::session::{Initiator, SessionEngine, TcpConnector};

/// Upper bound on waiting for the server to accept our logon
pub const LOGON_TIMEOUT: Duration = Duration::from_secs(30);

/// How often `start` checks whether the logon completed
const LOGON_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Call-and-wait client over an asynchronous FIX session.
///
/// Every request goes through [`Client::call`], which registers the request
/// id, hands the message to the session engine and waits for the response
/// carrying the same id.
pub struct Client {
    adapter: Arc<SessionAdapter>,
    engine: Arc<dyn SessionEngine>,
    session: SessionConfig,
    span: Span,
}

impl Client {
    /// Build a client over a TCP [`Initiator`].
    ///
    /// Fails if a required session setting is missing or the private key
    /// cannot be loaded. The session is not started.
    pub fn new(config: ClientConfig, options: ClientOptions) -> Result<Self, FixError> {
        let session = SessionConfig::from_settings(&config.settings)?;
        let credential = Credential::from_file(&config.private_key_path)?;
        let connector = TcpConnector::from_config(&session)?;

        Self::with_engine(session, &config.api_key, credential, options, move |session, app, span| {
            let engine: Arc<dyn SessionEngine> = Arc::new(Initiator::new(session, Box::new(connector), app, span));
            Ok(engine)
        })
    }

    /// Build a client over any session engine.
    ///
    /// `build_engine` receives the callback target the engine must drive.
    pub fn with_engine<F>(
        session: SessionConfig,
        api_key: &str,
        credential: Credential,
        options: ClientOptions,
        build_engine: F,
    ) -> Result<Self, FixError>
    where
        F: FnOnce(SessionConfig, Arc<dyn Application>, Span) -> Result<Arc<dyn SessionEngine>, FixError>,
    {
        let span = options.span.clone().unwrap_or_else(|| {
            info_span!(
                "fix_client",
                sender = %session.sender_comp_id,
                target = %session.target_comp_id
            )
        });

        let adapter = Arc::new(SessionAdapter::new(
            api_key,
            credential,
            &session.sender_comp_id,
            &session.target_comp_id,
            options.message_handling,
            options.response_mode,
            span.clone(),
        ));

        let app: Arc<dyn Application> = adapter.clone();
        let engine = build_engine(session.clone(), app, span.clone()).inspect_err(|e| {
            error!(parent: &span, error = %e, "Failed to create session engine");
        })?;

        Ok(Self {
            adapter,
            engine,
            session,
            span,
        })
    }

    /// Start the session and wait until the logon is accepted.
    ///
    /// Gives up with [`FixError::LogonTimeout`] after [`LOGON_TIMEOUT`], or
    /// with [`FixError::Cancelled`] when `cancel` fires first.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), FixError> {
        if let Err(e) = self.engine.start().await {
            error!(parent: &self.span, error = %e, "Failed to start session");
            return Err(e);
        }

        let deadline = Instant::now() + LOGON_TIMEOUT;
        loop {
            if self.is_connected() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                error!(parent: &self.span, "Logon timed out");
                return Err(FixError::LogonTimeout);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(FixError::Cancelled),
                _ = sleep(LOGON_POLL_INTERVAL) => {}
            }
        }
    }

    /// Request a graceful logout; pending calls fail once the session ends
    pub async fn stop(&self) -> Result<(), FixError> {
        info!(parent: &self.span, "Stopping session");
        self.engine.stop().await
    }

    pub fn is_connected(&self) -> bool {
        self.adapter.is_connected()
    }

    /// Number of calls waiting for a response
    pub async fn pending_calls(&self) -> usize {
        self.adapter.table().len().await
    }

    pub fn subscribe_execution_reports(&self) -> broadcast::Receiver<Order> {
        self.adapter.subscribe()
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session
    }

    /// Send `message` and wait for the response correlated by `id`.
    ///
    /// No deadline is applied here: cancel `cancel` (or drop the future) to
    /// stop waiting. The pending entry stays until a response or session
    /// termination clears it.
    pub async fn call(&self, id: &str, mut message: FixMessage, cancel: &CancellationToken) -> Result<FixMessage, FixError> {
        self.add_common_headers(&mut message);

        let pending = self.adapter.table().register(id, message.clone()).await?;

        if let Err(e) = self.engine.send(message).await {
            // Never left the process, so nothing will ever answer it
            self.adapter.table().remove(id).await;
            error!(parent: &self.span, id, error = %e, "Failed to send request");
            return Err(e);
        }

        pending.wait(cancel).await
    }

    fn add_common_headers(&self, message: &mut FixMessage) {
        message.set_field(tags::BEGIN_STRING, &self.session.begin_string);
        message.set_field(tags::TARGET_COMP_ID, &self.session.target_comp_id);
        message.set_field(tags::SENDER_COMP_ID, &self.session.sender_comp_id);
        message.set_field(tags::SENDING_TIME, format_utc_timestamp(&Utc::now()));
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }
}
