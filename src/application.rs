use std::fmt;

use async_trait::async_trait;

use crate::error::FixError;
use crate::message::FixMessage;

/// Identity of one FIX session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId {
    pub begin_string: String,
    pub sender_comp_id: String,
    pub target_comp_id: String,
}

impl SessionId {
    pub fn new(begin_string: &str, sender_comp_id: &str, target_comp_id: &str) -> Self {
        Self {
            begin_string: begin_string.to_string(),
            sender_comp_id: sender_comp_id.to_string(),
            target_comp_id: target_comp_id.to_string(),
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}->{}", self.begin_string, self.sender_comp_id, self.target_comp_id)
    }
}

/// Callbacks a session engine invokes on its application.
///
/// Engines call these from their own tasks, concurrently with any caller of
/// the application, so implementations must be thread-safe.
#[async_trait]
pub trait Application: Send + Sync {
    /// Called once when the engine creates the session
    fn on_create(&self, session_id: &SessionId);

    /// Called when the counterparty accepted our logon
    async fn on_logon(&self, session_id: &SessionId);

    /// Called when the session ends, whatever the cause
    async fn on_logout(&self, session_id: &SessionId);

    /// Called before an admin message is sent; the application may decorate it
    async fn to_admin(&self, message: &mut FixMessage, session_id: &SessionId);

    /// Called before an application message is sent; an error aborts the send
    async fn to_app(&self, message: &mut FixMessage, session_id: &SessionId) -> Result<(), FixError>;

    /// Called for every admin message received
    async fn from_admin(&self, message: &FixMessage, session_id: &SessionId) -> Result<(), FixError>;

    /// Called for every application message received
    async fn from_app(&self, message: &FixMessage, session_id: &SessionId) -> Result<(), FixError>;
}
