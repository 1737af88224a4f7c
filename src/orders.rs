use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::client::Client;
use crate::error::FixError;
use crate::message::{message_types, tags, FieldAccess, FixMessage};

/// OrdStatus (tag 39)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    PendingNew,
    Expired,
}

impl OrderStatus {
    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Self::New),
            "1" => Some(Self::PartiallyFilled),
            "2" => Some(Self::Filled),
            "4" => Some(Self::Canceled),
            "6" => Some(Self::PendingCancel),
            "8" => Some(Self::Rejected),
            "A" => Some(Self::PendingNew),
            "C" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::PendingCancel => "PENDING_CANCEL",
            Self::Rejected => "REJECTED",
            Self::PendingNew => "PENDING_NEW",
            Self::Expired => "EXPIRED",
        }
    }
}

/// TimeInForce (tag 59)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    GoodTillCancel,
    ImmediateOrCancel,
    FillOrKill,
}

impl TimeInForce {
    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Self::GoodTillCancel),
            "3" => Some(Self::ImmediateOrCancel),
            "4" => Some(Self::FillOrKill),
            _ => None,
        }
    }

    pub fn as_fix(&self) -> &'static str {
        match self {
            Self::GoodTillCancel => "1",
            Self::ImmediateOrCancel => "3",
            Self::FillOrKill => "4",
        }
    }
}

/// OrdType (tag 40)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Self::Market),
            "2" => Some(Self::Limit),
            "3" => Some(Self::Stop),
            "4" => Some(Self::StopLimit),
            _ => None,
        }
    }

    pub fn as_fix(&self) -> &'static str {
        match self {
            Self::Market => "1",
            Self::Limit => "2",
            Self::Stop => "3",
            Self::StopLimit => "4",
        }
    }
}

/// Side (tag 54)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_fix(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Self::Buy),
            "2" => Some(Self::Sell),
            _ => None,
        }
    }

    pub fn as_fix(&self) -> &'static str {
        match self {
            Self::Buy => "1",
            Self::Sell => "2",
        }
    }
}

/// SelfTradePreventionMode (tag 25001)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTradePreventionMode {
    None,
    ExpireTaker,
    ExpireMaker,
    ExpireBoth,
}

impl SelfTradePreventionMode {
    pub fn as_fix(&self) -> &'static str {
        match self {
            Self::None => "1",
            Self::ExpireTaker => "2",
            Self::ExpireMaker => "3",
            Self::ExpireBoth => "4",
        }
    }
}

/// Order state carried by an execution report.
///
/// Quantities absent from the report are zero; absent timestamps are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    pub price: Decimal,
    pub order_qty: Decimal,
    pub cum_qty: Decimal,
    pub cum_quote_qty: Decimal,
    pub status: OrderStatus,
    pub time_in_force: Option<TimeInForce>,
    pub order_type: OrderType,
    pub side: Side,
    /// Visible quantity of an iceberg order
    pub iceberg_quantity: Decimal,
    /// When this event occurred
    pub transact_time: Option<DateTime<Utc>>,
    pub order_creation_time: Option<DateTime<Utc>>,
    /// When the order appeared on the book
    pub working_time: Option<DateTime<Utc>>,
}

/// Parameters of a NewOrderSingle; unset options are left off the wire
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub time_in_force: Option<TimeInForce>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub iceberg_quantity: Option<Decimal>,
    /// Quantity in quote asset units, for reverse market orders
    pub quote_order_qty: Option<Decimal>,
    pub self_trade_prevention: Option<SelfTradePreventionMode>,
    /// Must be at least 1000000
    pub strategy_id: Option<u64>,
}

impl NewOrderRequest {
    pub fn new(symbol: &str, side: Side, order_type: OrderType) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            time_in_force: None,
            quantity: None,
            price: None,
            iceberg_quantity: None,
            quote_order_qty: None,
            self_trade_prevention: None,
            strategy_id: None,
        }
    }

    /// Build the NewOrderSingle message using `cl_ord_id` as correlation id
    pub fn to_message(&self, cl_ord_id: &str) -> FixMessage {
        let mut msg = FixMessage::new(message_types::NEW_ORDER_SINGLE);
        msg.set_field(tags::CL_ORD_ID, cl_ord_id);
        msg.set_field(tags::SYMBOL, &self.symbol);
        msg.set_field(tags::SIDE, self.side.as_fix());
        msg.set_field(tags::ORD_TYPE, self.order_type.as_fix());

        if let Some(quantity) = self.quantity {
            msg.set_field(tags::ORDER_QTY, quantity.normalize());
        }
        if let Some(price) = self.price {
            msg.set_field(tags::PRICE, price.normalize());
        }
        if let Some(time_in_force) = self.time_in_force {
            msg.set_field(tags::TIME_IN_FORCE, time_in_force.as_fix());
        }
        if let Some(max_floor) = self.iceberg_quantity {
            msg.set_field(tags::MAX_FLOOR, max_floor.normalize());
        }
        if let Some(cash_order_qty) = self.quote_order_qty {
            msg.set_field(tags::CASH_ORDER_QTY, cash_order_qty.normalize());
        }
        if let Some(mode) = self.self_trade_prevention {
            msg.set_field(tags::SELF_TRADE_PREVENTION_MODE, mode.as_fix());
        }
        if let Some(strategy_id) = self.strategy_id {
            msg.set_field(tags::STRATEGY_ID, strategy_id);
        }

        msg
    }
}

/// Decode an ExecutionReport into an [`Order`].
///
/// Any non-empty Text (tag 58) is treated as a rejection and returned as
/// [`FixError::Rejected`].
pub fn decode_execution_report(msg: &FixMessage) -> Result<Order, FixError> {
    if let Some(reason) = msg.get_field(tags::TEXT).filter(|text| !text.is_empty()) {
        return Err(FixError::Rejected(reason.to_string()));
    }

    let status = decode_enum(msg, tags::ORD_STATUS, OrderStatus::from_fix)?;
    let order_type = decode_enum(msg, tags::ORD_TYPE, OrderType::from_fix)?;
    let side = decode_enum(msg, tags::SIDE, Side::from_fix)?;
    let time_in_force = match msg.get_field(tags::TIME_IN_FORCE) {
        Some(code) => Some(
            TimeInForce::from_fix(code)
                .ok_or_else(|| FixError::InvalidFormat(format!("Unknown TimeInForce {:?}", code)))?,
        ),
        None => None,
    };

    Ok(Order {
        symbol: msg.require_field(tags::SYMBOL)?.to_string(),
        order_id: msg.get_parsed(tags::ORDER_ID)?.unwrap_or_default(),
        client_order_id: msg.get_field(tags::CL_ORD_ID).unwrap_or_default().to_string(),
        price: decimal_or_zero(msg, tags::PRICE)?,
        order_qty: decimal_or_zero(msg, tags::ORDER_QTY)?,
        cum_qty: decimal_or_zero(msg, tags::CUM_QTY)?,
        cum_quote_qty: decimal_or_zero(msg, tags::CUM_QUOTE_QTY)?,
        status,
        time_in_force,
        order_type,
        side,
        iceberg_quantity: decimal_or_zero(msg, tags::MAX_FLOOR)?,
        transact_time: msg.get_timestamp(tags::TRANSACT_TIME)?,
        order_creation_time: msg.get_timestamp(tags::ORDER_CREATION_TIME)?,
        working_time: msg.get_timestamp(tags::WORKING_TIME)?,
    })
}

fn decimal_or_zero(msg: &FixMessage, tag: u32) -> Result<Decimal, FixError> {
    Ok(msg.get_parsed::<Decimal>(tag)?.unwrap_or(Decimal::ZERO))
}

fn decode_enum<T>(msg: &FixMessage, tag: u32, from_fix: fn(&str) -> Option<T>) -> Result<T, FixError> {
    let code = msg.require_field(tag)?;
    from_fix(code).ok_or_else(|| FixError::InvalidFormat(format!("Unknown value {:?} for tag {}", code, tag)))
}

impl Client {
    /// Place a new order and wait for its first execution report
    pub async fn new_order_single(&self, request: &NewOrderRequest, cancel: &CancellationToken) -> Result<Order, FixError> {
        let id = Uuid::new_v4().to_string();
        let msg = request.to_message(&id);

        let resp = self.call(&id, msg, cancel).await.inspect_err(|e| {
            error!(parent: self.span(), id = %id, symbol = %request.symbol, error = %e, "Failed to create new order");
        })?;

        let order = decode_execution_report(&resp).inspect_err(|e| {
            error!(parent: self.span(), id = %id, response = %resp, error = %e, "Failed to decode ExecutionReport message");
        })?;

        info!(
            parent: self.span(),
            id = %id,
            order_id = order.order_id,
            status = order.status.as_str(),
            "Order acknowledged"
        );
        Ok(order)
    }
}
