use bytes::BytesMut;
use chrono::{TimeZone, Timelike, Utc};
use fix_correlation_client::error::FixError;
use fix_correlation_client::message::{
    format_utc_timestamp, message_types, next_frame, parse_utc_timestamp, skip_to_next_frame, tags, FieldAccess,
    FieldGroup, FixMessage, MAX_BODY_LENGTH,
};

#[test]
fn test_message_creation() {
    let logon = FixMessage::logon(30, true);
    assert_eq!(logon.msg_type(), message_types::LOGON);
    assert_eq!(logon.get_field(tags::HEARTBEAT_INT), Some("30"));
    assert_eq!(logon.get_field(tags::ENCRYPT_METHOD), Some("0"));
    assert_eq!(logon.get_field(tags::RESET_SEQ_NUM_FLAG), Some("Y"));

    let logon_no_reset = FixMessage::logon(30, false);
    assert_eq!(logon_no_reset.get_field(tags::RESET_SEQ_NUM_FLAG), None);

    let logout = FixMessage::logout(Some("Testing logout"));
    assert_eq!(logout.msg_type(), message_types::LOGOUT);
    assert_eq!(logout.get_field(tags::TEXT), Some("Testing logout"));

    let heartbeat = FixMessage::heartbeat(Some("TEST123"));
    assert_eq!(heartbeat.get_field(tags::TEST_REQ_ID), Some("TEST123"));
    assert!(heartbeat.is_admin());

    let order = FixMessage::new(message_types::NEW_ORDER_SINGLE);
    assert!(!order.is_admin());
}

#[test]
fn test_set_field_replaces_and_append_field_duplicates() {
    let mut msg = FixMessage::new(message_types::LIMIT_QUERY);
    msg.set_field(tags::REQ_ID, "a");
    msg.set_field(tags::REQ_ID, "b");
    assert_eq!(msg.get_field(tags::REQ_ID), Some("b"));
    assert_eq!(msg.fields().iter().filter(|(t, _)| *t == tags::REQ_ID).count(), 1);

    msg.append_field(tags::REQ_ID, "c");
    assert_eq!(msg.get_field(tags::REQ_ID), Some("b"));
    assert_eq!(msg.fields().iter().filter(|(t, _)| *t == tags::REQ_ID).count(), 2);
}

#[test]
fn test_encoding_layout() {
    let mut msg = FixMessage::new(message_types::HEARTBEAT);
    msg.set_field(tags::SENDING_TIME, "20240101-00:00:00.000");

    let bytes = msg.to_bytes("FIX.4.4", "S", "T", 1);
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.starts_with(
        "8=FIX.4.4\x019=45\x0135=0\x0149=S\x0156=T\x0134=1\x0152=20240101-00:00:00.000\x01"
    ));
    assert!(text.ends_with('\x01'));
    assert!(text.contains("\x0110="));

    // The encoded frame passes checksum validation on the way back in
    let decoded = FixMessage::from_bytes(&bytes).unwrap();
    assert_eq!(decoded.msg_type(), message_types::HEARTBEAT);
    assert_eq!(decoded.seq_num().unwrap(), 1);
    assert_eq!(decoded.get_field(tags::SENDER_COMP_ID), Some("S"));
}

#[test]
fn test_header_fields_on_message_win() {
    let mut msg = FixMessage::new(message_types::LIMIT_QUERY);
    msg.set_field(tags::BEGIN_STRING, "FIXT.1.1");
    msg.set_field(tags::SENDER_COMP_ID, "OVERRIDE");

    let bytes = msg.to_bytes("FIX.4.4", "S", "T", 7);
    let decoded = FixMessage::from_bytes(&bytes).unwrap();

    assert_eq!(decoded.get_field(tags::BEGIN_STRING), Some("FIXT.1.1"));
    assert_eq!(decoded.get_field(tags::SENDER_COMP_ID), Some("OVERRIDE"));
    assert_eq!(decoded.get_field(tags::TARGET_COMP_ID), Some("T"));
    assert_eq!(decoded.seq_num().unwrap(), 7);
}

#[test]
fn test_message_parsing_without_checksum() {
    let raw_msg = b"8=FIX.4.4\x019=5\x0135=A\x0134=1\x0149=SENDER\x0156=TARGET\x01108=30\x01";

    let message = FixMessage::from_bytes(raw_msg).unwrap();
    assert_eq!(message.msg_type(), message_types::LOGON);
    assert_eq!(message.get_field(tags::SENDER_COMP_ID), Some("SENDER"));
    assert_eq!(message.require_parsed::<u64>(tags::HEARTBEAT_INT).unwrap(), 30);
}

#[test]
fn test_checksum_mismatch_is_rejected() {
    // Correct checksum for this frame is 163
    let raw_msg = b"8=FIX.4.4\x019=5\x0135=0\x0110=001\x01";

    let result = FixMessage::from_bytes(raw_msg);
    assert!(matches!(result, Err(FixError::InvalidFormat(_))));

    let valid = b"8=FIX.4.4\x019=5\x0135=0\x0110=163\x01";
    assert!(FixMessage::from_bytes(valid).is_ok());
}

#[test]
fn test_invalid_message_parsing() {
    let result = FixMessage::from_bytes(b"8=FIX.4.4\x0149=SENDER\x01");
    assert!(matches!(result, Err(FixError::InvalidFormat(_))));

    let result = FixMessage::from_bytes(b"8=FIX.4.4\x01garbage\x0135=0\x01");
    assert!(matches!(result, Err(FixError::InvalidFormat(_))));
}

#[test]
fn test_typed_accessors() {
    let mut msg = FixMessage::new(message_types::EXECUTION_REPORT);
    msg.set_field(tags::ORDER_ID, "12345");
    msg.set_field(tags::PRICE, "abc");

    assert_eq!(msg.require_parsed::<i64>(tags::ORDER_ID).unwrap(), 12345);
    assert_eq!(msg.get_parsed::<i64>(tags::CUM_QTY).unwrap(), None);
    assert!(matches!(msg.get_parsed::<i64>(tags::PRICE), Err(FixError::ParseError(_))));
    assert!(matches!(msg.require_field(tags::SYMBOL), Err(FixError::MissingField(55))));
    assert!(msg.has_field(tags::ORDER_ID));
}

#[test]
fn test_next_frame_splits_stream() {
    let first = FixMessage::heartbeat(None).to_bytes("FIX.4.4", "S", "T", 1);
    let second = FixMessage::test_request("ping").to_bytes("FIX.4.4", "S", "T", 2);

    let mut buffer = BytesMut::new();
    buffer.extend_from_slice(&first);
    buffer.extend_from_slice(&second);
    buffer.extend_from_slice(&second[..10]);

    let frame = next_frame(&mut buffer).unwrap().unwrap();
    assert_eq!(&frame[..], &first[..]);

    let frame = next_frame(&mut buffer).unwrap().unwrap();
    let decoded = FixMessage::from_bytes(&frame).unwrap();
    assert_eq!(decoded.get_field(tags::TEST_REQ_ID), Some("ping"));

    // Only a partial frame is left
    assert!(next_frame(&mut buffer).unwrap().is_none());
    assert_eq!(buffer.len(), 10);
}

#[test]
fn test_next_frame_rejects_garbage() {
    let mut buffer = BytesMut::from(&b"35=0\x0110=000\x01"[..]);
    assert!(matches!(next_frame(&mut buffer), Err(FixError::InvalidFormat(_))));
}

#[test]
fn test_next_frame_rejects_oversized_body_length() {
    let mut buffer = BytesMut::from(&b"8=FIX.4.4\x019=18446744073709551615\x0135=0\x0110=000\x01"[..]);
    assert!(matches!(next_frame(&mut buffer), Err(FixError::InvalidFormat(_))));

    // Rejected before the body arrives
    let mut buffer = BytesMut::from(&b"8=FIX.4.4\x019=1000000\x0135=0\x01"[..]);
    assert!(matches!(next_frame(&mut buffer), Err(FixError::InvalidFormat(_))));

    let limit = format!("8=FIX.4.4\x019={}\x0135=0\x01", MAX_BODY_LENGTH);
    let mut buffer = BytesMut::from(limit.as_bytes());
    assert!(next_frame(&mut buffer).unwrap().is_none());
}

#[test]
fn test_skip_to_next_frame_resyncs() {
    let good = FixMessage::test_request("ping").to_bytes("FIX.4.4", "S", "T", 2);

    let mut buffer = BytesMut::from(&b"8=FIX.4.4\x019=18446744073709551615\x0135=0\x0110=000\x01"[..]);
    buffer.extend_from_slice(&good);
    assert!(next_frame(&mut buffer).is_err());

    skip_to_next_frame(&mut buffer);
    assert_eq!(&buffer[..], &good[..]);
    let frame = next_frame(&mut buffer).unwrap().unwrap();
    let decoded = FixMessage::from_bytes(&frame).unwrap();
    assert_eq!(decoded.get_field(tags::TEST_REQ_ID), Some("ping"));

    // Nothing to resync on
    let mut buffer = BytesMut::from(&b"35=0\x0110=000\x01"[..]);
    skip_to_next_frame(&mut buffer);
    assert!(buffer.is_empty());
}

#[test]
fn test_repeating_group() {
    let mut first = FieldGroup::new();
    first.set_field(tags::LIMIT_TYPE, 1).set_field(tags::LIMIT_COUNT, 2);
    let mut second = FieldGroup::new();
    second.set_field(tags::LIMIT_TYPE, 2).set_field(tags::LIMIT_COUNT, 5);

    let mut msg = FixMessage::new(message_types::LIMIT_RESPONSE);
    msg.set_field(tags::REQ_ID, "req");
    msg.set_group(tags::NO_LIMIT_INDICATORS, &[first, second]);

    let bytes = msg.to_bytes("FIX.4.4", "S", "T", 3);
    let decoded = FixMessage::from_bytes(&bytes).unwrap();

    let entries = decoded
        .group(tags::NO_LIMIT_INDICATORS, &[tags::LIMIT_TYPE, tags::LIMIT_COUNT])
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].get_field(tags::LIMIT_COUNT), Some("2"));
    assert_eq!(entries[1].get_field(tags::LIMIT_TYPE), Some("2"));
    assert_eq!(entries[1].get_field(tags::LIMIT_COUNT), Some("5"));
}

#[test]
fn test_repeating_group_count_mismatch() {
    let mut msg = FixMessage::new(message_types::LIMIT_RESPONSE);
    msg.append_field(tags::NO_LIMIT_INDICATORS, 2);
    msg.append_field(tags::LIMIT_TYPE, 1);

    let result = msg.group(tags::NO_LIMIT_INDICATORS, &[tags::LIMIT_TYPE]);
    assert!(matches!(result, Err(FixError::InvalidFormat(_))));

    // Absent group reads as empty
    let empty = FixMessage::new(message_types::LIMIT_RESPONSE);
    assert!(empty.group(tags::NO_LIMIT_INDICATORS, &[tags::LIMIT_TYPE]).unwrap().is_empty());
}

#[test]
fn test_utc_timestamps() {
    let time = Utc.with_ymd_and_hms(2024, 6, 27, 11, 17, 25).unwrap() + chrono::Duration::milliseconds(223);
    assert_eq!(format_utc_timestamp(&time), "20240627-11:17:25.223");
    assert_eq!(parse_utc_timestamp("20240627-11:17:25.223").unwrap(), time);

    let micros = parse_utc_timestamp("20240627-11:17:25.223456").unwrap();
    assert_eq!(micros.nanosecond(), 223_456_000);

    let seconds = parse_utc_timestamp("20240627-11:17:25").unwrap();
    assert_eq!(seconds.nanosecond(), 0);

    assert!(matches!(parse_utc_timestamp("2024-06-27"), Err(FixError::ParseError(_))));
}

#[test]
fn test_display_uses_pipe_separator() {
    let mut msg = FixMessage::new(message_types::LIMIT_QUERY);
    msg.set_field(tags::REQ_ID, "abc");
    assert_eq!(msg.to_string(), "35=XLQ|6136=abc|");
}
