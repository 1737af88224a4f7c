use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Span};

use crate::application::{Application, SessionId};
use crate::config::{MessageHandling, ResponseMode};
use crate::correlation::{request_id_tag, CorrelationTable};
use crate::credentials::{sending_time_now, Credential};
use crate::error::FixError;
use crate::message::{message_types, tags, FieldAccess, FixMessage};
use crate::orders::{decode_execution_report, Order};

/// Buffered execution reports per subscriber before it starts lagging
const EXECUTION_REPORT_CAPACITY: usize = 1024;

/// Bridges session-engine callbacks to the correlation table.
///
/// Owns the connected flag: set on logon, cleared on logout, after which
/// every pending call is failed with [`FixError::Closed`].
pub struct SessionAdapter {
    api_key: String,
    credential: Credential,
    sender_comp_id: String,
    target_comp_id: String,
    message_handling: MessageHandling,
    response_mode: ResponseMode,

    connected: Arc<AtomicBool>,
    table: CorrelationTable,
    execution_reports: broadcast::Sender<Order>,
    span: Span,
}

impl SessionAdapter {
    pub fn new(
        api_key: &str,
        credential: Credential,
        sender_comp_id: &str,
        target_comp_id: &str,
        message_handling: MessageHandling,
        response_mode: ResponseMode,
        span: Span,
    ) -> Self {
        let connected = Arc::new(AtomicBool::new(false));
        let (execution_reports, _) = broadcast::channel(EXECUTION_REPORT_CAPACITY);

        Self {
            api_key: api_key.to_string(),
            credential,
            sender_comp_id: sender_comp_id.to_string(),
            target_comp_id: target_comp_id.to_string(),
            message_handling,
            response_mode,
            table: CorrelationTable::new(connected.clone(), span.clone()),
            connected,
            execution_reports,
            span,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn table(&self) -> &CorrelationTable {
        &self.table
    }

    /// Receive every execution report that decodes cleanly, solicited or not
    pub fn subscribe(&self) -> broadcast::Receiver<Order> {
        self.execution_reports.subscribe()
    }

    /// Attach the signature, API key and session behaviour flags to a logon
    fn decorate_logon(&self, message: &mut FixMessage) {
        let sending_time = sending_time_now();
        let raw_data = self
            .credential
            .sign_logon(&self.sender_comp_id, &self.target_comp_id, &sending_time);

        // The signed timestamp has to be the one on the wire
        message.set_field(tags::SENDING_TIME, &sending_time);
        message.set_field(tags::RAW_DATA_LENGTH, raw_data.len());
        message.set_field(tags::RAW_DATA, raw_data);
        message.set_field(tags::USERNAME, &self.api_key);
        message.set_field(tags::RESET_SEQ_NUM_FLAG, "Y");
        message.set_field(tags::MESSAGE_HANDLING, self.message_handling as i32);
        message.set_field(tags::RESPONSE_MODE, self.response_mode as i32);
    }

    fn publish_execution_report(&self, message: &FixMessage) {
        match decode_execution_report(message) {
            Ok(order) => {
                // No subscribers is fine
                let _ = self.execution_reports.send(order);
            }
            Err(e) => debug!(parent: &self.span, error = %e, "Execution report not published"),
        }
    }
}

#[async_trait]
impl Application for SessionAdapter {
    fn on_create(&self, session_id: &SessionId) {
        debug!(parent: &self.span, session = %session_id, "Session created");
    }

    async fn on_logon(&self, session_id: &SessionId) {
        self.connected.store(true, Ordering::SeqCst);
        info!(parent: &self.span, session = %session_id, "Logon successfully!");
    }

    async fn on_logout(&self, session_id: &SessionId) {
        // Cleared before draining so racing registrations are refused
        self.connected.store(false, Ordering::SeqCst);
        let drained = self.table.drain_all(|| FixError::Closed).await;
        info!(parent: &self.span, session = %session_id, drained, "Logged out!");
    }

    async fn to_admin(&self, message: &mut FixMessage, _session_id: &SessionId) {
        if message.msg_type() == message_types::LOGON {
            self.decorate_logon(message);
        }
    }

    async fn to_app(&self, message: &mut FixMessage, _session_id: &SessionId) -> Result<(), FixError> {
        debug!(parent: &self.span, msg = %message, "Sending message to server");
        Ok(())
    }

    async fn from_admin(&self, message: &FixMessage, _session_id: &SessionId) -> Result<(), FixError> {
        match message.msg_type() {
            message_types::REJECT | message_types::LOGOUT => warn!(
                parent: &self.span,
                msg_type = message.msg_type(),
                text = message.get_field(tags::TEXT).unwrap_or(""),
                "Session message from server"
            ),
            _ => debug!(parent: &self.span, msg = %message, "FromAdmin message"),
        }
        Ok(())
    }

    async fn from_app(&self, message: &FixMessage, _session_id: &SessionId) -> Result<(), FixError> {
        let msg_type = message.msg_type();

        let Some(id_tag) = request_id_tag(msg_type) else {
            debug!(parent: &self.span, msg_type, "Message type carries no request id");
            return Ok(());
        };

        let id = match message.get_field(id_tag) {
            Some(id) => id,
            None => {
                error!(parent: &self.span, msg_type, tag = id_tag, "Failed to get request ID");
                return Err(FixError::MissingField(id_tag));
            }
        };

        if !self.table.resolve(id, message).await {
            debug!(parent: &self.span, msg_type, id, "No pending call for response");
        }

        if msg_type == message_types::EXECUTION_REPORT {
            self.publish_execution_report(message);
        }

        Ok(())
    }
}
