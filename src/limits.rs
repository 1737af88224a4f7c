use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use crate::client::Client;
use crate::error::FixError;
use crate::message::{message_types, tags, FieldAccess, FieldGroup, FixMessage};

const LIMIT_GROUP: [u32; 5] = [
    tags::LIMIT_TYPE,
    tags::LIMIT_COUNT,
    tags::LIMIT_MAX,
    tags::LIMIT_RESET_INTERVAL,
    tags::LIMIT_RESET_INTERVAL_RESOLUTION,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitType {
    Order,
    Message,
}

impl LimitType {
    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Self::Order),
            "2" => Some(Self::Message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitResolution {
    Second,
    Minute,
    Hour,
    Day,
}

impl LimitResolution {
    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "s" => Some(Self::Second),
            "m" => Some(Self::Minute),
            "h" => Some(Self::Hour),
            "d" => Some(Self::Day),
            _ => None,
        }
    }
}

/// One rate limit as reported by the server
#[derive(Debug, Clone, PartialEq)]
pub struct Limit {
    pub limit_type: LimitType,
    /// Usage within the current interval
    pub limit_count: u64,
    pub limit_max: u64,
    /// Zero when the limit does not reset
    pub reset_interval: u64,
    pub reset_interval_resolution: Option<LimitResolution>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitResponse {
    pub req_id: String,
    pub limits: Vec<Limit>,
}

/// Build a LimitQuery message
pub fn limit_query(req_id: &str) -> FixMessage {
    let mut msg = FixMessage::new(message_types::LIMIT_QUERY);
    msg.set_field(tags::REQ_ID, req_id);
    msg
}

/// Decode a LimitResponse and its NoLimitIndicators group
pub fn decode_limit_response(msg: &FixMessage) -> Result<LimitResponse, FixError> {
    let req_id = msg.require_field(tags::REQ_ID)?.to_string();

    let limits = msg
        .group(tags::NO_LIMIT_INDICATORS, &LIMIT_GROUP)?
        .iter()
        .map(decode_limit)
        .collect::<Result<Vec<_>, FixError>>()?;

    Ok(LimitResponse { req_id, limits })
}

fn decode_limit(entry: &FieldGroup) -> Result<Limit, FixError> {
    let code = entry.require_field(tags::LIMIT_TYPE)?;
    let limit_type =
        LimitType::from_fix(code).ok_or_else(|| FixError::InvalidFormat(format!("Unknown LimitType {:?}", code)))?;

    let reset_interval_resolution = match entry.get_field(tags::LIMIT_RESET_INTERVAL_RESOLUTION) {
        Some(code) => Some(LimitResolution::from_fix(code).ok_or_else(|| {
            FixError::InvalidFormat(format!("Unknown LimitResetIntervalResolution {:?}", code))
        })?),
        None => None,
    };

    Ok(Limit {
        limit_type,
        limit_count: entry.require_parsed(tags::LIMIT_COUNT)?,
        limit_max: entry.require_parsed(tags::LIMIT_MAX)?,
        reset_interval: entry.get_parsed(tags::LIMIT_RESET_INTERVAL)?.unwrap_or(0),
        reset_interval_resolution,
    })
}

impl Client {
    /// Query the current order and message rate limits of this session
    pub async fn get_limits(&self, cancel: &CancellationToken) -> Result<LimitResponse, FixError> {
        let id = Uuid::new_v4().to_string();

        let resp = self.call(&id, limit_query(&id), cancel).await.inspect_err(|e| {
            error!(parent: self.span(), id = %id, error = %e, "Failed to query limits");
        })?;

        decode_limit_response(&resp)
    }
}
