use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Verifier};
use tokio::sync::Barrier;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::Span;

use fix_correlation_client::adapter::SessionAdapter;
use fix_correlation_client::application::{Application, SessionId};
use fix_correlation_client::config::{MessageHandling, ResponseMode};
use fix_correlation_client::correlation::{request_id_tag, CorrelationTable};
use fix_correlation_client::credentials::Credential;
use fix_correlation_client::error::FixError;
use fix_correlation_client::message::{message_types, tags, FieldAccess, FixMessage};
use fix_correlation_client::orders::OrderStatus;

fn connected_table() -> CorrelationTable {
    CorrelationTable::new(Arc::new(AtomicBool::new(true)), Span::none())
}

fn credential() -> Credential {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/ed25519.pem");
    Credential::from_file(path).unwrap()
}

fn adapter() -> SessionAdapter {
    SessionAdapter::new(
        "api-key",
        credential(),
        "EXAMPLE",
        "SPOT",
        MessageHandling::Sequential,
        ResponseMode::Everything,
        Span::none(),
    )
}

fn session_id() -> SessionId {
    SessionId::new("FIX.4.4", "EXAMPLE", "SPOT")
}

fn limit_response(id: &str) -> FixMessage {
    let mut msg = FixMessage::new(message_types::LIMIT_RESPONSE);
    msg.set_field(tags::REQ_ID, id);
    msg
}

fn execution_report(cl_ord_id: &str) -> FixMessage {
    let mut msg = FixMessage::new(message_types::EXECUTION_REPORT);
    msg.set_field(tags::CL_ORD_ID, cl_ord_id)
        .set_field(tags::ORDER_ID, 42)
        .set_field(tags::SYMBOL, "BTCUSDT")
        .set_field(tags::ORD_STATUS, "0")
        .set_field(tags::ORD_TYPE, "2")
        .set_field(tags::SIDE, "1");
    msg
}

#[test]
fn test_request_id_tag_map() {
    assert_eq!(request_id_tag(message_types::LIMIT_RESPONSE), Some(tags::REQ_ID));
    assert_eq!(request_id_tag(message_types::EXECUTION_REPORT), Some(tags::CL_ORD_ID));
    assert_eq!(request_id_tag(message_types::NEW_ORDER_SINGLE), None);
    assert_eq!(request_id_tag("XYZ"), None);
}

#[tokio::test]
async fn test_register_while_disconnected_is_rejected() {
    let table = CorrelationTable::new(Arc::new(AtomicBool::new(false)), Span::none());

    let result = table.register("a", FixMessage::new(message_types::LIMIT_QUERY)).await;
    assert!(matches!(result, Err(FixError::Closed)));
    assert_eq!(table.len().await, 0);
}

#[tokio::test]
async fn test_resolve_delivers_once() {
    let table = connected_table();
    let pending = table.register("a", FixMessage::new(message_types::LIMIT_QUERY)).await.unwrap();
    assert_eq!(pending.id(), "a");
    assert!(table.contains("a").await);

    assert!(table.resolve("a", &limit_response("a")).await);
    // Late duplicate is discarded
    assert!(!table.resolve("a", &limit_response("a")).await);
    assert!(table.is_empty().await);

    let response = pending.wait(&CancellationToken::new()).await.unwrap();
    assert_eq!(response.get_field(tags::REQ_ID), Some("a"));
}

#[tokio::test]
async fn test_duplicate_request_id() {
    let table = connected_table();
    let _pending = table.register("a", FixMessage::new(message_types::LIMIT_QUERY)).await.unwrap();

    let result = table.register("a", FixMessage::new(message_types::LIMIT_QUERY)).await;
    assert!(matches!(result, Err(FixError::DuplicateRequestId(id)) if id == "a"));
    assert_eq!(table.len().await, 1);
}

#[tokio::test]
async fn test_remove_returns_request() {
    let table = connected_table();
    let mut request = FixMessage::new(message_types::LIMIT_QUERY);
    request.set_field(tags::REQ_ID, "a");
    let _pending = table.register("a", request.clone()).await.unwrap();

    assert_eq!(table.remove("a").await, Some(request));
    assert_eq!(table.remove("a").await, None);
}

#[tokio::test]
async fn test_drain_all_fails_every_call() {
    let table = connected_table();
    let mut calls = Vec::new();
    for id in ["a", "b", "c"] {
        calls.push(table.register(id, FixMessage::new(message_types::LIMIT_QUERY)).await.unwrap());
    }

    assert_eq!(table.drain_all(|| FixError::Closed).await, 3);
    assert!(table.is_empty().await);

    for call in calls {
        assert!(matches!(call.wait(&CancellationToken::new()).await, Err(FixError::Closed)));
    }
}

#[tokio::test]
async fn test_cancellation_leaves_entry_for_late_response() {
    let table = connected_table();
    let pending = table.register("a", FixMessage::new(message_types::LIMIT_QUERY)).await.unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(pending.wait(&cancel).await, Err(FixError::Cancelled)));

    // The entry is still there; a late response cleans it up without anyone listening
    assert!(table.contains("a").await);
    assert!(table.resolve("a", &limit_response("a")).await);
    assert!(table.is_empty().await);
}

#[tokio::test]
async fn test_response_wins_over_cancellation_when_ready() {
    let table = connected_table();
    let pending = table.register("a", FixMessage::new(message_types::LIMIT_QUERY)).await.unwrap();
    table.resolve("a", &limit_response("a")).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(pending.wait(&cancel).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolves_deliver_at_most_once() {
    let table = Arc::new(connected_table());
    let pending = table.register("a", FixMessage::new(message_types::LIMIT_QUERY)).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let table = table.clone();
            tokio::spawn(async move { table.resolve("a", &limit_response("a")).await })
        })
        .collect();

    let delivered = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|r| *r.as_ref().unwrap())
        .count();

    assert_eq!(delivered, 1);
    assert!(pending.wait(&CancellationToken::new()).await.is_ok());
}

#[tokio::test]
async fn test_adapter_connection_lifecycle() {
    let adapter = adapter();
    assert!(!adapter.is_connected());

    adapter.on_logon(&session_id()).await;
    assert!(adapter.is_connected());

    let pending = adapter
        .table()
        .register("a", FixMessage::new(message_types::LIMIT_QUERY))
        .await
        .unwrap();

    adapter.on_logout(&session_id()).await;
    assert!(!adapter.is_connected());
    assert!(adapter.table().is_empty().await);
    assert!(matches!(pending.wait(&CancellationToken::new()).await, Err(FixError::Closed)));

    let result = adapter.table().register("b", FixMessage::new(message_types::LIMIT_QUERY)).await;
    assert!(matches!(result, Err(FixError::Closed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_register_racing_logout_never_strands_a_call() {
    let adapter = Arc::new(adapter());
    adapter.on_logon(&session_id()).await;

    let barrier = Arc::new(Barrier::new(65));
    let registrations: Vec<_> = (0..64)
        .map(|i| {
            let adapter = adapter.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                adapter
                    .table()
                    .register(&format!("req-{}", i), FixMessage::new(message_types::LIMIT_QUERY))
                    .await
            })
        })
        .collect();

    let logout = {
        let adapter = adapter.clone();
        let barrier = barrier.clone();
        tokio::spawn(async move {
            barrier.wait().await;
            adapter.on_logout(&session_id()).await;
        })
    };

    let results = futures::future::join_all(registrations).await;
    logout.await.unwrap();

    for result in results {
        match result.unwrap() {
            Ok(pending) => {
                let outcome = timeout(Duration::from_secs(1), pending.wait(&CancellationToken::new()))
                    .await
                    .expect("registered call was never failed");
                assert!(matches!(outcome, Err(FixError::Closed)));
            }
            Err(e) => assert!(matches!(e, FixError::Closed)),
        }
    }

    assert!(!adapter.is_connected());
    assert!(adapter.table().is_empty().await);
}

#[tokio::test]
async fn test_adapter_routes_responses() {
    let adapter = adapter();
    adapter.on_logon(&session_id()).await;

    let pending = adapter
        .table()
        .register("req-1", FixMessage::new(message_types::LIMIT_QUERY))
        .await
        .unwrap();

    adapter.from_app(&limit_response("req-1"), &session_id()).await.unwrap();
    let response = pending.wait(&CancellationToken::new()).await.unwrap();
    assert_eq!(response.msg_type(), message_types::LIMIT_RESPONSE);
}

#[tokio::test]
async fn test_adapter_ignores_unknown_message_type() {
    let adapter = adapter();
    adapter.on_logon(&session_id()).await;
    let _pending = adapter
        .table()
        .register("a", FixMessage::new(message_types::LIMIT_QUERY))
        .await
        .unwrap();

    let mut news = FixMessage::new("B");
    news.set_field(tags::REQ_ID, "a");
    assert!(adapter.from_app(&news, &session_id()).await.is_ok());
    assert_eq!(adapter.table().len().await, 1);
}

#[tokio::test]
async fn test_adapter_reports_missing_request_id() {
    let adapter = adapter();
    adapter.on_logon(&session_id()).await;
    let _pending = adapter
        .table()
        .register("a", FixMessage::new(message_types::LIMIT_QUERY))
        .await
        .unwrap();

    let result = adapter
        .from_app(&FixMessage::new(message_types::LIMIT_RESPONSE), &session_id())
        .await;
    assert!(matches!(result, Err(FixError::MissingField(6136))));
    // Unrelated call untouched
    assert_eq!(adapter.table().len().await, 1);
}

#[tokio::test]
async fn test_adapter_publishes_execution_reports() {
    let adapter = adapter();
    adapter.on_logon(&session_id()).await;
    let mut reports = adapter.subscribe();

    // Unsolicited: nothing registered under this id
    adapter.from_app(&execution_report("external"), &session_id()).await.unwrap();

    let order = reports.recv().await.unwrap();
    assert_eq!(order.client_order_id, "external");
    assert_eq!(order.order_id, 42);
    assert_eq!(order.status, OrderStatus::New);
}

#[tokio::test]
async fn test_adapter_signs_logon() {
    let adapter = adapter();
    let mut logon = FixMessage::logon(30, true);
    adapter.to_admin(&mut logon, &session_id()).await;

    assert_eq!(logon.get_field(tags::USERNAME), Some("api-key"));
    assert_eq!(logon.get_field(tags::RESET_SEQ_NUM_FLAG), Some("Y"));
    assert_eq!(logon.get_field(tags::MESSAGE_HANDLING), Some("2"));
    assert_eq!(logon.get_field(tags::RESPONSE_MODE), Some("1"));

    let raw_data = logon.require_field(tags::RAW_DATA).unwrap();
    assert_eq!(logon.require_parsed::<usize>(tags::RAW_DATA_LENGTH).unwrap(), raw_data.len());

    // Signed over the SendingTime that is on the message
    let sending_time = logon.require_field(tags::SENDING_TIME).unwrap();
    let payload = format!("A\x01EXAMPLE\x01SPOT\x011\x01{}", sending_time);
    let bytes: [u8; 64] = STANDARD.decode(raw_data).unwrap().try_into().unwrap();
    let signature = Signature::from_bytes(&bytes);
    assert!(credential().verifying_key().verify(payload.as_bytes(), &signature).is_ok());

    // Other admin messages pass through untouched
    let mut heartbeat = FixMessage::heartbeat(None);
    adapter.to_admin(&mut heartbeat, &session_id()).await;
    assert_eq!(heartbeat, FixMessage::heartbeat(None));
}
