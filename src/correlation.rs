use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, Span};

use crate::error::FixError;
use crate::message::{message_types, tags, FixMessage};

/// Tag carrying the correlation id for each correlated response type.
///
/// Types not listed here carry no correlation id and never resolve a call.
pub fn request_id_tag(msg_type: &str) -> Option<u32> {
    match msg_type {
        message_types::LIMIT_RESPONSE => Some(tags::REQ_ID),
        message_types::EXECUTION_REPORT => Some(tags::CL_ORD_ID),
        _ => None,
    }
}

type Outcome = Result<FixMessage, FixError>;

/// Table side of an in-flight call
struct Slot {
    /// Kept for diagnostics only
    request: FixMessage,
    done: oneshot::Sender<Outcome>,
}

/// Caller side of an in-flight call
#[derive(Debug)]
pub struct PendingCall {
    id: String,
    done: oneshot::Receiver<Outcome>,
}

impl PendingCall {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the response, a terminal error, or cancellation.
    ///
    /// Cancelling leaves the table entry in place: a late response or a
    /// drain removes it, and the send into the dropped receiver is ignored.
    pub async fn wait(self, cancel: &CancellationToken) -> Result<FixMessage, FixError> {
        tokio::select! {
            biased;
            outcome = self.done => match outcome {
                Ok(outcome) => outcome,
                // Table dropped without resolving us
                Err(_) => Err(FixError::Closed),
            },
            _ = cancel.cancelled() => Err(FixError::Cancelled),
        }
    }
}

/// Maps request ids to their pending calls.
///
/// Registration is gated on the shared connected flag, read under the same
/// lock `drain_all` takes, so a call registered concurrently with a
/// termination is either drained or rejected.
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, Slot>>,
    connected: Arc<AtomicBool>,
    span: Span,
}

impl CorrelationTable {
    pub fn new(connected: Arc<AtomicBool>, span: Span) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            connected,
            span,
        }
    }

    /// Insert a pending call for `id`; fails with `Closed` while disconnected
    pub async fn register(&self, id: &str, request: FixMessage) -> Result<PendingCall, FixError> {
        let mut pending = self.pending.lock().await;

        if !self.connected.load(Ordering::SeqCst) {
            return Err(FixError::Closed);
        }
        if pending.contains_key(id) {
            return Err(FixError::DuplicateRequestId(id.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(id.to_string(), Slot { request, done: tx });

        Ok(PendingCall {
            id: id.to_string(),
            done: rx,
        })
    }

    /// Drop a registration whose request never left the process.
    ///
    /// Returns the retained request if the entry was still present.
    pub async fn remove(&self, id: &str) -> Option<FixMessage> {
        self.pending.lock().await.remove(id).map(|slot| slot.request)
    }

    /// Deliver a copy of `response` to the call registered under `id`.
    ///
    /// Returns false when nothing is waiting for that id (late, duplicate or
    /// unsolicited message).
    pub async fn resolve(&self, id: &str, response: &FixMessage) -> bool {
        let slot = self.pending.lock().await.remove(id);

        match slot {
            Some(slot) => {
                debug!(parent: &self.span, id = %id, request = %slot.request, response = %response, "Matching response message");
                // The caller may have given up already
                let _ = slot.done.send(Ok(response.clone()));
                true
            }
            None => false,
        }
    }

    /// Resolve every pending call with an error from `make_error`
    pub async fn drain_all<F>(&self, make_error: F) -> usize
    where
        F: Fn() -> FixError,
    {
        let drained: Vec<(String, Slot)> = self.pending.lock().await.drain().collect();
        let count = drained.len();

        for (id, slot) in drained {
            debug!(parent: &self.span, id = %id, request = %slot.request, "Failing pending call");
            let _ = slot.done.send(Err(make_error()));
        }

        count
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.pending.lock().await.contains_key(id)
    }
}
