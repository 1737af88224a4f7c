pub mod adapter;
pub mod application;
pub mod client;
pub mod config;
pub mod correlation;
pub mod credentials;
pub mod error;
pub mod limits;
pub mod message;
pub mod orders;
pub mod session;

// Re-export main types for convenience
pub use application::{Application, SessionId};
pub use client::Client;
pub use config::{ClientConfig, ClientOptions, MessageHandling, ResponseMode, SessionConfig, SessionSettings};
pub use correlation::{CorrelationTable, PendingCall};
pub use credentials::Credential;
pub use error::FixError;
pub use limits::{Limit, LimitResponse};
pub use message::{FieldAccess, FixMessage};
pub use orders::{NewOrderRequest, Order, OrderStatus, OrderType, Side, TimeInForce};
pub use session::{Initiator, SessionEngine, SessionState};
