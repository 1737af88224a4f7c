use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::Span;

use crate::application::SessionId;
use crate::error::FixError;

pub const BEGIN_STRING: &str = "BeginString";
pub const SENDER_COMP_ID: &str = "SenderCompID";
pub const TARGET_COMP_ID: &str = "TargetCompID";
pub const HEARTBEAT_INT: &str = "HeartBtInt";
pub const SOCKET_CONNECT_HOST: &str = "SocketConnectHost";
pub const SOCKET_CONNECT_PORT: &str = "SocketConnectPort";

const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Key/value session settings in the QuickFIX file layout.
///
/// ```text
/// [DEFAULT]
/// BeginString=FIX.4.4
///
/// [SESSION]
/// SenderCompID=EXAMPLE
/// TargetCompID=SPOT
/// ```
///
/// Values from the first `[SESSION]` section override `[DEFAULT]`.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    values: HashMap<String, String>,
}

impl SessionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings text
    pub fn parse(text: &str) -> Result<Self, FixError> {
        let mut defaults = HashMap::new();
        let mut session = HashMap::new();
        let mut section: Option<String> = None;
        let mut sessions_seen = 0usize;

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_ascii_uppercase();
                if name == "SESSION" {
                    sessions_seen += 1;
                    if sessions_seen > 1 {
                        return Err(FixError::InvalidFormat(format!(
                            "settings line {}: only one [SESSION] is supported",
                            index + 1
                        )));
                    }
                }
                section = Some(name);
                continue;
            }

            let (key, value) = line.split_once('=').ok_or_else(|| {
                FixError::InvalidFormat(format!("settings line {}: expected Key=Value", index + 1))
            })?;
            let (key, value) = (key.trim().to_string(), value.trim().to_string());

            match section.as_deref() {
                Some("DEFAULT") => {
                    defaults.insert(key, value);
                }
                Some("SESSION") => {
                    session.insert(key, value);
                }
                _ => {
                    return Err(FixError::InvalidFormat(format!(
                        "settings line {}: value outside of a section",
                        index + 1
                    )));
                }
            }
        }

        defaults.extend(session);
        Ok(Self { values: defaults })
    }

    /// Read and parse a settings file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, FixError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    fn require(&self, key: &str) -> Result<&str, FixError> {
        self.get(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| FixError::MissingConfiguration(key.to_string()))
    }
}

/// Configuration for a FIX session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// SenderCompID (tag 49)
    pub sender_comp_id: String,

    /// TargetCompID (tag 56)
    pub target_comp_id: String,

    /// Heartbeat interval
    pub heartbeat_interval: Duration,

    /// FIX version (e.g., "FIX.4.4")
    pub begin_string: String,

    /// Host to connect to
    pub host: Option<String>,

    /// Port to connect to
    pub port: Option<u16>,
}

impl SessionConfig {
    /// Creates a new session configuration with default values
    pub fn new(sender: &str, target: &str) -> Self {
        Self {
            sender_comp_id: sender.to_string(),
            target_comp_id: target.to_string(),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            begin_string: "FIX.4.4".to_string(),
            host: None,
            port: None,
        }
    }

    /// Resolve session identity from settings.
    ///
    /// BeginString, SenderCompID and TargetCompID are required; the first
    /// one missing is named in the error.
    pub fn from_settings(settings: &SessionSettings) -> Result<Self, FixError> {
        let begin_string = settings.require(BEGIN_STRING)?.to_string();
        let sender_comp_id = settings.require(SENDER_COMP_ID)?.to_string();
        let target_comp_id = settings.require(TARGET_COMP_ID)?.to_string();

        let heartbeat_secs = match settings.get(HEARTBEAT_INT) {
            Some(v) => v.parse::<u64>().map_err(|_| {
                FixError::InvalidFormat(format!("{} must be a number of seconds, got {:?}", HEARTBEAT_INT, v))
            })?,
            None => DEFAULT_HEARTBEAT_SECS,
        };

        let port = settings
            .get(SOCKET_CONNECT_PORT)
            .map(|v| {
                v.parse::<u16>().map_err(|_| {
                    FixError::InvalidFormat(format!("{} must be a port number, got {:?}", SOCKET_CONNECT_PORT, v))
                })
            })
            .transpose()?;

        Ok(Self {
            sender_comp_id,
            target_comp_id,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
            begin_string,
            host: settings.get(SOCKET_CONNECT_HOST).map(str::to_string),
            port,
        })
    }

    /// Creates a unique session identifier
    pub fn session_id(&self) -> SessionId {
        SessionId::new(&self.begin_string, &self.sender_comp_id, &self.target_comp_id)
    }
}

/// Everything needed to construct a client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key sent as Username (tag 553) on logon
    pub api_key: String,

    /// PEM file holding the PKCS#8 Ed25519 private key
    pub private_key_path: PathBuf,

    pub settings: SessionSettings,
}

/// How the server processes messages of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageHandling {
    Unordered = 1,
    Sequential = 2,
}

/// Which execution reports the server sends back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Everything = 1,
    OnlyAcks = 2,
}

/// Behavioural options for a client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub message_handling: MessageHandling,
    pub response_mode: ResponseMode,
    /// Parent span for every event the client emits
    pub span: Option<Span>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            message_handling: MessageHandling::Sequential,
            response_mode: ResponseMode::Everything,
            span: None,
        }
    }
}

impl ClientOptions {
    pub fn with_message_handling(mut self, message_handling: MessageHandling) -> Self {
        self.message_handling = message_handling;
        self
    }

    pub fn with_response_mode(mut self, response_mode: ResponseMode) -> Self {
        self.response_mode = response_mode;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}
