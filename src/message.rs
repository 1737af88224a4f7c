use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use std::str::FromStr;
use crate::error::FixError;

/// Standard FIX message field separator (SOH character)
pub const FIELD_SEPARATOR: u8 = 0x01;

/// `SendingTime` layout with millisecond precision
pub const UTC_TIMESTAMP_MILLIS_FORMAT: &str = "%Y%m%d-%H:%M:%S%.3f";

/// Accepts any fractional precision (or none) when parsing timestamps
const UTC_TIMESTAMP_PARSE_FORMAT: &str = "%Y%m%d-%H:%M:%S%.f";

/// Length of the trailing `10=NNN<SOH>` field
const CHECKSUM_FIELD_LEN: usize = 7;

/// Largest BodyLength accepted from a peer
pub const MAX_BODY_LENGTH: usize = 64 * 1024;

/// FIX message tags used by the session layer and the trading requests
pub mod tags {
    pub const BEGIN_STRING: u32 = 8;
    pub const BODY_LENGTH: u32 = 9;
    pub const MSG_TYPE: u32 = 35;
    pub const SENDER_COMP_ID: u32 = 49;
    pub const TARGET_COMP_ID: u32 = 56;
    pub const MSG_SEQ_NUM: u32 = 34;
    pub const SENDING_TIME: u32 = 52;
    pub const CHECK_SUM: u32 = 10;
    pub const TEXT: u32 = 58;
    pub const GAP_FILL_FLAG: u32 = 123;
    pub const NEW_SEQ_NO: u32 = 36;
    pub const HEARTBEAT_INT: u32 = 108;
    pub const TEST_REQ_ID: u32 = 112;
    pub const BEGIN_SEQ_NO: u32 = 7;
    pub const END_SEQ_NO: u32 = 16;
    pub const RESET_SEQ_NUM_FLAG: u32 = 141;
    pub const ENCRYPT_METHOD: u32 = 98;
    pub const RAW_DATA_LENGTH: u32 = 95;
    pub const RAW_DATA: u32 = 96;
    pub const USERNAME: u32 = 553;

    pub const CL_ORD_ID: u32 = 11;
    pub const CUM_QTY: u32 = 14;
    pub const ORDER_ID: u32 = 37;
    pub const ORDER_QTY: u32 = 38;
    pub const ORD_STATUS: u32 = 39;
    pub const ORD_TYPE: u32 = 40;
    pub const PRICE: u32 = 44;
    pub const SIDE: u32 = 54;
    pub const SYMBOL: u32 = 55;
    pub const TIME_IN_FORCE: u32 = 59;
    pub const TRANSACT_TIME: u32 = 60;
    pub const MAX_FLOOR: u32 = 111;
    pub const CASH_ORDER_QTY: u32 = 152;
    pub const REQ_ID: u32 = 6136;
    pub const STRATEGY_ID: u32 = 7940;

    // Binance extensions
    pub const SELF_TRADE_PREVENTION_MODE: u32 = 25001;
    pub const NO_LIMIT_INDICATORS: u32 = 25003;
    pub const LIMIT_TYPE: u32 = 25004;
    pub const LIMIT_COUNT: u32 = 25005;
    pub const LIMIT_MAX: u32 = 25006;
    pub const LIMIT_RESET_INTERVAL: u32 = 25007;
    pub const LIMIT_RESET_INTERVAL_RESOLUTION: u32 = 25008;
    pub const CUM_QUOTE_QTY: u32 = 25017;
    pub const ORDER_CREATION_TIME: u32 = 25018;
    pub const WORKING_TIME: u32 = 25023;
    pub const MESSAGE_HANDLING: u32 = 25035;
    pub const RESPONSE_MODE: u32 = 25036;
}

/// FIX message types
pub mod message_types {
    pub const HEARTBEAT: &str = "0";
    pub const TEST_REQUEST: &str = "1";
    pub const RESEND_REQUEST: &str = "2";
    pub const REJECT: &str = "3";
    pub const SEQUENCE_RESET: &str = "4";
    pub const LOGOUT: &str = "5";
    pub const LOGON: &str = "A";
    pub const EXECUTION_REPORT: &str = "8";
    pub const NEW_ORDER_SINGLE: &str = "D";
    pub const LIMIT_QUERY: &str = "XLQ";
    pub const LIMIT_RESPONSE: &str = "XLR";
}

/// Tags written ahead of the body, in this order, by `to_bytes`
const HEADER_TAGS: [u32; 8] = [
    tags::BEGIN_STRING,
    tags::BODY_LENGTH,
    tags::MSG_TYPE,
    tags::SENDER_COMP_ID,
    tags::TARGET_COMP_ID,
    tags::MSG_SEQ_NUM,
    tags::SENDING_TIME,
    tags::CHECK_SUM,
];

/// Read access shared by whole messages and repeating-group entries
pub trait FieldAccess {
    /// Fields in wire order
    fn fields(&self) -> &[(u32, String)];

    /// Get the first value carried by `tag`
    fn get_field(&self, tag: u32) -> Option<&str> {
        self.fields()
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    fn has_field(&self, tag: u32) -> bool {
        self.get_field(tag).is_some()
    }

    /// Get a field that must be present
    fn require_field(&self, tag: u32) -> Result<&str, FixError> {
        self.get_field(tag).ok_or(FixError::MissingField(tag))
    }

    /// Parse an optional field into any `FromStr` type
    fn get_parsed<T: FromStr>(&self, tag: u32) -> Result<Option<T>, FixError> {
        match self.get_field(tag) {
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .map_err(|_| FixError::ParseError(format!("tag {}: invalid value {:?}", tag, value))),
            None => Ok(None),
        }
    }

    /// Parse a field that must be present
    fn require_parsed<T: FromStr>(&self, tag: u32) -> Result<T, FixError> {
        self.get_parsed(tag)?.ok_or(FixError::MissingField(tag))
    }

    /// Parse an optional UTC timestamp field
    fn get_timestamp(&self, tag: u32) -> Result<Option<DateTime<Utc>>, FixError> {
        self.get_field(tag).map(parse_utc_timestamp).transpose()
    }
}

/// One entry of a repeating group
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldGroup {
    fields: Vec<(u32, String)>,
}

impl FieldGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_field<T: ToString>(&mut self, tag: u32, value: T) -> &mut Self {
        self.fields.push((tag, value.to_string()));
        self
    }
}

impl FieldAccess for FieldGroup {
    fn fields(&self) -> &[(u32, String)] {
        &self.fields
    }
}

/// Represents a parsed FIX message
///
/// Fields are kept in wire order so that repeating groups, which reuse the
/// same tags once per entry, survive a decode/encode cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct FixMessage {
    fields: Vec<(u32, String)>,
    msg_type: String,
}

impl FixMessage {
    /// Create a new empty FIX message
    pub fn new(msg_type: &str) -> Self {
        Self {
            fields: vec![(tags::MSG_TYPE, msg_type.to_string())],
            msg_type: msg_type.to_string(),
        }
    }

    /// Set a field value, replacing the first existing occurrence
    pub fn set_field<T: ToString>(&mut self, tag: u32, value: T) -> &mut Self {
        let value = value.to_string();
        if tag == tags::MSG_TYPE {
            self.msg_type = value.clone();
        }
        match self.fields.iter_mut().find(|(t, _)| *t == tag) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((tag, value)),
        }
        self
    }

    /// Append a field even if the tag is already present
    pub fn append_field<T: ToString>(&mut self, tag: u32, value: T) -> &mut Self {
        self.fields.push((tag, value.to_string()));
        self
    }

    /// Append a repeating group: the count field followed by every entry
    pub fn set_group(&mut self, count_tag: u32, entries: &[FieldGroup]) -> &mut Self {
        self.append_field(count_tag, entries.len());
        for entry in entries {
            for (tag, value) in &entry.fields {
                self.fields.push((*tag, value.clone()));
            }
        }
        self
    }

    /// Extract a repeating group introduced by `count_tag`.
    ///
    /// `members` lists the tags that may appear inside an entry; the first
    /// one is the delimiter that opens every entry.
    pub fn group(&self, count_tag: u32, members: &[u32]) -> Result<Vec<FieldGroup>, FixError> {
        let Some(start) = self.fields.iter().position(|(t, _)| *t == count_tag) else {
            return Ok(Vec::new());
        };
        let expected: usize = self.require_parsed(count_tag)?;
        let delimiter = *members
            .first()
            .ok_or_else(|| FixError::InvalidFormat("empty group template".to_string()))?;

        let mut entries: Vec<FieldGroup> = Vec::with_capacity(expected);
        for (tag, value) in &self.fields[start + 1..] {
            if !members.contains(tag) {
                break;
            }
            if *tag == delimiter {
                entries.push(FieldGroup::new());
            }
            match entries.last_mut() {
                Some(entry) => entry.fields.push((*tag, value.clone())),
                None => {
                    return Err(FixError::InvalidFormat(format!(
                        "group {} does not start with delimiter tag {}",
                        count_tag, delimiter
                    )));
                }
            }
        }

        if entries.len() != expected {
            return Err(FixError::InvalidFormat(format!(
                "group {} declares {} entries, found {}",
                count_tag,
                expected,
                entries.len()
            )));
        }

        Ok(entries)
    }

    /// Get the message type
    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    /// Get the message sequence number
    pub fn seq_num(&self) -> Result<u64, FixError> {
        self.get_field(tags::MSG_SEQ_NUM)
            .ok_or_else(|| FixError::InvalidFormat("Missing sequence number".to_string()))
            .and_then(|s| s.parse::<u64>().map_err(|_| FixError::ParseError("Invalid sequence number".to_string())))
    }

    /// Check if this is a session-level (administrative) message
    pub fn is_admin(&self) -> bool {
        matches!(
            self.msg_type(),
            message_types::LOGON
                | message_types::LOGOUT
                | message_types::HEARTBEAT
                | message_types::TEST_REQUEST
                | message_types::RESEND_REQUEST
                | message_types::SEQUENCE_RESET
                | message_types::REJECT
        )
    }

    /// Convert the message to a byte array for transmission.
    ///
    /// Header values already present on the message win over the arguments.
    pub fn to_bytes(&self, begin_string: &str, sender_comp_id: &str, target_comp_id: &str, seq_num: u64) -> BytesMut {
        let mut body = BytesMut::new();

        add_field(&mut body, tags::MSG_TYPE, &self.msg_type);
        add_field(&mut body, tags::SENDER_COMP_ID, self.get_field(tags::SENDER_COMP_ID).unwrap_or(sender_comp_id));
        add_field(&mut body, tags::TARGET_COMP_ID, self.get_field(tags::TARGET_COMP_ID).unwrap_or(target_comp_id));

        match self.get_field(tags::MSG_SEQ_NUM) {
            Some(seq) => add_field(&mut body, tags::MSG_SEQ_NUM, seq),
            None => add_field(&mut body, tags::MSG_SEQ_NUM, seq_num.to_string()),
        }

        match self.get_field(tags::SENDING_TIME) {
            Some(time) => add_field(&mut body, tags::SENDING_TIME, time),
            None => add_field(&mut body, tags::SENDING_TIME, format_utc_timestamp(&Utc::now())),
        }

        for (tag, value) in &self.fields {
            if HEADER_TAGS.contains(tag) {
                continue;
            }
            add_field(&mut body, *tag, value);
        }

        let mut message = BytesMut::new();
        add_field(&mut message, tags::BEGIN_STRING, self.get_field(tags::BEGIN_STRING).unwrap_or(begin_string));
        add_field(&mut message, tags::BODY_LENGTH, body.len().to_string());
        message.put(body);

        let checksum = checksum(&message);
        add_field(&mut message, tags::CHECK_SUM, format!("{:03}", checksum));

        message
    }

    /// Parse a FIX message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, FixError> {
        let data_str = std::str::from_utf8(data)
            .map_err(|_| FixError::InvalidFormat("Invalid UTF-8 data".to_string()))?;

        let mut fields = Vec::new();
        let mut msg_type = String::new();

        for pair in data_str.split(char::from(FIELD_SEPARATOR)) {
            if pair.is_empty() {
                continue;
            }

            let (tag, value) = pair
                .split_once('=')
                .ok_or_else(|| FixError::InvalidFormat(format!("Missing '=' in field: {}", pair)))?;

            let tag = tag.parse::<u32>()
                .map_err(|_| FixError::InvalidFormat(format!("Invalid tag: {}", tag)))?;

            if tag == tags::MSG_TYPE {
                msg_type = value.to_string();
            }

            fields.push((tag, value.to_string()));
        }

        if msg_type.is_empty() {
            return Err(FixError::InvalidFormat("Missing message type".to_string()));
        }

        if let Some(declared) = fields.iter().find(|(t, _)| *t == tags::CHECK_SUM).map(|(_, v)| v) {
            let trailer = format!("\x01{}=", tags::CHECK_SUM);
            let covered = data_str
                .rfind(&trailer)
                .map(|pos| &data[..=pos])
                .ok_or_else(|| FixError::InvalidFormat("Misplaced checksum".to_string()))?;
            let computed = format!("{:03}", checksum(covered));
            if *declared != computed {
                return Err(FixError::InvalidFormat(format!(
                    "Checksum mismatch: declared {}, computed {}",
                    declared, computed
                )));
            }
        }

        Ok(Self { fields, msg_type })
    }

    /// Create a Logon message
    pub fn logon(heartbeat_interval: u64, reset_seq_num: bool) -> Self {
        let mut message = Self::new(message_types::LOGON);
        message.set_field(tags::ENCRYPT_METHOD, 0);
        message.set_field(tags::HEARTBEAT_INT, heartbeat_interval);

        if reset_seq_num {
            message.set_field(tags::RESET_SEQ_NUM_FLAG, "Y");
        }

        message
    }

    /// Create a Heartbeat message, optionally in response to a TestRequest
    pub fn heartbeat(test_req_id: Option<&str>) -> Self {
        let mut message = Self::new(message_types::HEARTBEAT);

        if let Some(id) = test_req_id {
            message.set_field(tags::TEST_REQ_ID, id);
        }

        message
    }

    /// Create a TestRequest message
    pub fn test_request(id: &str) -> Self {
        let mut message = Self::new(message_types::TEST_REQUEST);
        message.set_field(tags::TEST_REQ_ID, id);

        message
    }

    /// Create a SequenceReset message
    pub fn sequence_reset(new_seq_no: u64, gap_fill: bool) -> Self {
        let mut message = Self::new(message_types::SEQUENCE_RESET);
        message.set_field(tags::NEW_SEQ_NO, new_seq_no);

        if gap_fill {
            message.set_field(tags::GAP_FILL_FLAG, "Y");
        }

        message
    }

    /// Create a Logout message
    pub fn logout(reason: Option<&str>) -> Self {
        let mut message = Self::new(message_types::LOGOUT);

        if let Some(text) = reason {
            message.set_field(tags::TEXT, text);
        }

        message
    }
}

impl FieldAccess for FixMessage {
    fn fields(&self) -> &[(u32, String)] {
        &self.fields
    }
}

impl fmt::Display for FixMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (tag, value) in &self.fields {
            write!(f, "{}={}|", tag, value)?;
        }
        Ok(())
    }
}

/// Split one complete frame off the front of `buffer`.
///
/// Returns `Ok(None)` while the frame is still incomplete. The frame length
/// comes from BodyLength, so values containing SOH never confuse the split.
pub fn next_frame(buffer: &mut BytesMut) -> Result<Option<BytesMut>, FixError> {
    if buffer.len() < 2 {
        return Ok(None);
    }
    if !buffer.starts_with(b"8=") {
        return Err(FixError::InvalidFormat("Frame does not start with BeginString".to_string()));
    }

    let Some(begin_end) = buffer.iter().position(|&b| b == FIELD_SEPARATOR) else {
        return Ok(None);
    };
    let length_start = begin_end + 1;
    if buffer.len() < length_start + 2 {
        return Ok(None);
    }
    if &buffer[length_start..length_start + 2] != b"9=" {
        return Err(FixError::InvalidFormat("BodyLength must follow BeginString".to_string()));
    }
    let Some(length_len) = buffer[length_start..].iter().position(|&b| b == FIELD_SEPARATOR) else {
        return Ok(None);
    };
    let length_end = length_start + length_len;

    let body_length = std::str::from_utf8(&buffer[length_start + 2..length_end])
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| FixError::InvalidFormat("Invalid BodyLength".to_string()))?;

    if body_length > MAX_BODY_LENGTH {
        return Err(FixError::InvalidFormat(format!(
            "BodyLength {} exceeds limit of {}",
            body_length, MAX_BODY_LENGTH
        )));
    }

    let body_start = length_end + 1;
    let body_end = body_start
        .checked_add(body_length)
        .ok_or_else(|| FixError::InvalidFormat("BodyLength overflows frame".to_string()))?;
    let total = body_end
        .checked_add(CHECKSUM_FIELD_LEN)
        .ok_or_else(|| FixError::InvalidFormat("BodyLength overflows frame".to_string()))?;
    if buffer.len() < total {
        return Ok(None);
    }

    let trailer = &buffer[body_end..total];
    if !trailer.starts_with(b"10=") || trailer[CHECKSUM_FIELD_LEN - 1] != FIELD_SEPARATOR {
        return Err(FixError::InvalidFormat("BodyLength does not match frame".to_string()));
    }

    Ok(Some(buffer.split_to(total)))
}

/// Drop input up to the next `8=` that follows a field separator.
///
/// Used after `next_frame` fails so one bad frame does not take the frames
/// queued behind it down too. Always consumes at least one byte.
pub fn skip_to_next_frame(buffer: &mut BytesMut) {
    let next = buffer
        .windows(3)
        .position(|w| w == b"\x018=")
        .map(|pos| pos + 1);

    match next {
        Some(start) => {
            let _ = buffer.split_to(start);
        }
        None => buffer.clear(),
    }
}

/// Format a timestamp the way `SendingTime` is written on the wire
pub fn format_utc_timestamp(time: &DateTime<Utc>) -> String {
    time.format(UTC_TIMESTAMP_MILLIS_FORMAT).to_string()
}

/// Parse a `YYYYMMDD-HH:MM:SS[.fff...]` UTC timestamp
pub fn parse_utc_timestamp(value: &str) -> Result<DateTime<Utc>, FixError> {
    NaiveDateTime::parse_from_str(value, UTC_TIMESTAMP_PARSE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| FixError::ParseError(format!("Invalid UTC timestamp {:?}: {}", value, e)))
}

fn checksum(data: &[u8]) -> u32 {
    data.iter().map(|&b| u32::from(b)).sum::<u32>() % 256
}

// Helper function to add a field to a message buffer
fn add_field<T: AsRef<str>>(buffer: &mut BytesMut, tag: u32, value: T) {
    buffer.put_slice(tag.to_string().as_bytes());
    buffer.put_u8(b'=');
    buffer.put_slice(value.as_ref().as_bytes());
    buffer.put_u8(FIELD_SEPARATOR);
}
