//! # Configuration Management
//!
//! Centralized configuration for the UACP transport.
//!
//! This module provides structured configuration for the accepting (server) and
//! initiating (client) side of a connection, the security token timing used by
//! the secure channel, and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Defaults
//! - 65535-byte send and receive buffers, protocol version 0
//! - no message size or chunk count limit (0)
//! - 1 hour requested token lifetime, renewal at 75 %, 5 s grace for the previous token

use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::{MAX_ENDPOINT_URL_LENGTH, MIN_BUFFER_SIZE};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Protocol version spoken by this implementation
pub const PROTOCOL_VERSION: u32 = 0;

/// Default send/receive buffer size
pub const DEFAULT_BUFFER_SIZE: u32 = 65_535;

/// Largest buffer size accepted in configuration (16 MB)
pub const MAX_BUFFER_SIZE: u32 = 16 * 1024 * 1024;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct UacpConfig {
    /// Accepting side configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Initiating side configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Security token timing
    #[serde(default)]
    pub security: SecurityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl UacpConfig {
    /// Read and parse a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Invalid TOML config: {e}")))
    }

    /// Defaults overridden by `OPCUA_UACP_*` variables. Unparseable values are ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env_var::<String>("OPCUA_UACP_ENDPOINT_URL") {
            config.server.endpoint_url.clone_from(&url);
            config.client.endpoint_url = url;
        }
        if let Some(uri) = env_var::<String>("OPCUA_UACP_SERVER_URI") {
            config.server.server_uri = uri;
        }
        if let Some(size) = env_var::<u32>("OPCUA_UACP_BUFFER_SIZE") {
            let (server, client) = (&mut config.server, &mut config.client);
            server.receive_buffer_size = size;
            server.send_buffer_size = size;
            client.receive_buffer_size = size;
            client.send_buffer_size = size;
        }
        if let Some(max) = env_var::<u32>("OPCUA_UACP_MAX_MESSAGE_SIZE") {
            config.server.max_message_size = max;
            config.client.max_message_size = max;
        }
        if let Some(ms) = env_var::<u64>("OPCUA_UACP_HANDSHAKE_TIMEOUT_MS") {
            config.server.handshake_timeout = Duration::from_millis(ms);
            config.client.handshake_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_var::<u64>("OPCUA_UACP_TOKEN_GRACE_MS") {
            config.security.token_grace_period = Duration::from_millis(ms);
        }

        Ok(config)
    }

    pub fn default_with_overrides(mutator: impl FnOnce(&mut Self)) -> Self {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// The default configuration rendered as TOML.
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|e| format!("# example config unavailable: {e}"))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Cannot serialize config: {e}")))?;
        std::fs::write(path.as_ref(), content).map_err(|e| {
            ProtocolError::ConfigError(format!("Cannot write {}: {e}", path.as_ref().display()))
        })
    }

    /// Every problem found across all sections. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        [
            self.server.validate(),
            self.client.validate(),
            self.security.validate(),
            self.logging.validate(),
        ]
        .concat()
    }

    pub fn validate_strict(&self) -> Result<()> {
        match self.validate() {
            errors if errors.is_empty() => Ok(()),
            errors => Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            ))),
        }
    }
}

fn env_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.parse().ok()
}

fn validate_buffer(errors: &mut Vec<String>, side: &str, name: &str, size: u32) {
    if size < MIN_BUFFER_SIZE {
        errors.push(format!(
            "{side} {name} too small: {size} (minimum: {MIN_BUFFER_SIZE})"
        ));
    } else if size > MAX_BUFFER_SIZE {
        errors.push(format!(
            "{side} {name} too large: {size} (maximum: {MAX_BUFFER_SIZE})"
        ));
    }
}

fn validate_handshake_timeout(errors: &mut Vec<String>, side: &str, timeout: Duration) {
    if timeout.as_millis() < 100 {
        errors.push(format!("{side} handshake timeout too short (minimum: 100ms)"));
    } else if timeout.as_secs() > 300 {
        errors.push(format!("{side} handshake timeout too long (maximum: 300s)"));
    }
}

/// Accepting side configuration: the maxima a Hello is validated against
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Application URI announced in ReverseHello
    pub server_uri: String,

    /// Endpoint URL announced in ReverseHello
    pub endpoint_url: String,

    /// Lowest protocol version accepted; also the version answered in Acknowledge
    pub protocol_version: u32,

    /// Largest chunk this server receives
    pub receive_buffer_size: u32,

    /// Largest chunk this server sends
    pub send_buffer_size: u32,

    /// Largest request message accepted (0 = no limit)
    pub max_message_size: u32,

    /// Most chunks per request message (0 = no limit)
    pub max_chunk_count: u32,

    /// Longest endpoint URL accepted in a Hello
    pub max_endpoint_url_length: usize,

    /// Time allowed for the peer to complete the handshake
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_uri: String::from("urn:opcua-uacp:server"),
            endpoint_url: String::from("opc.tcp://localhost:4840"),
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: DEFAULT_BUFFER_SIZE,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
            max_message_size: 0,
            max_chunk_count: 0,
            max_endpoint_url_length: MAX_ENDPOINT_URL_LENGTH,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.server_uri.is_empty() {
            errors.push("Server URI cannot be empty".to_string());
        }

        if !self.endpoint_url.starts_with("opc.tcp://") {
            errors.push(format!(
                "Invalid server endpoint URL: '{}' (expected format: 'opc.tcp://host:4840')",
                self.endpoint_url
            ));
        }

        validate_buffer(&mut errors, "Server", "receive buffer", self.receive_buffer_size);
        validate_buffer(&mut errors, "Server", "send buffer", self.send_buffer_size);

        if self.max_message_size != 0 && self.max_message_size < self.receive_buffer_size {
            errors.push(format!(
                "Server max message size {} is smaller than its receive buffer {}",
                self.max_message_size, self.receive_buffer_size
            ));
        }

        if self.max_endpoint_url_length == 0 {
            errors.push("Max endpoint URL length must be greater than 0".to_string());
        } else if self.max_endpoint_url_length > MAX_ENDPOINT_URL_LENGTH {
            errors.push(format!(
                "Max endpoint URL length too large: {} (maximum: {MAX_ENDPOINT_URL_LENGTH})",
                self.max_endpoint_url_length
            ));
        }

        validate_handshake_timeout(&mut errors, "Server", self.handshake_timeout);

        errors
    }
}

/// Initiating side configuration: the values requested in Hello
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Endpoint URL sent in Hello. Empty means "use the one from ReverseHello".
    pub endpoint_url: String,

    /// Protocol version requested
    pub protocol_version: u32,

    /// Largest chunk this client receives
    pub receive_buffer_size: u32,

    /// Largest chunk this client sends
    pub send_buffer_size: u32,

    /// Largest response message accepted (0 = no limit)
    pub max_message_size: u32,

    /// Most chunks per response message (0 = no limit)
    pub max_chunk_count: u32,

    /// Time allowed for the server to acknowledge
    #[serde(with = "duration_serde")]
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::from("opc.tcp://localhost:4840"),
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: DEFAULT_BUFFER_SIZE,
            send_buffer_size: DEFAULT_BUFFER_SIZE,
            max_message_size: 0,
            max_chunk_count: 0,
            handshake_timeout: timeout::HANDSHAKE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.endpoint_url.is_empty() && !self.endpoint_url.starts_with("opc.tcp://") {
            errors.push(format!(
                "Invalid client endpoint URL: '{}' (expected format: 'opc.tcp://host:4840')",
                self.endpoint_url
            ));
        }
        if self.endpoint_url.len() > MAX_ENDPOINT_URL_LENGTH {
            errors.push(format!(
                "Client endpoint URL too long: {} bytes (maximum: {MAX_ENDPOINT_URL_LENGTH})",
                self.endpoint_url.len()
            ));
        }

        validate_buffer(&mut errors, "Client", "receive buffer", self.receive_buffer_size);
        validate_buffer(&mut errors, "Client", "send buffer", self.send_buffer_size);

        validate_handshake_timeout(&mut errors, "Client", self.handshake_timeout);

        errors
    }
}

/// Secure channel token timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SecurityConfig {
    /// Token lifetime requested in OpenSecureChannel
    #[serde(with = "duration_serde")]
    pub requested_lifetime: Duration,

    /// How long the previous token decrypts after its own expiry
    #[serde(with = "duration_serde")]
    pub token_grace_period: Duration,

    /// Fraction of the revised lifetime after which a renewal is due
    pub renewal_fraction: f64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            requested_lifetime: Duration::from_secs(3600),
            token_grace_period: Duration::from_secs(5),
            renewal_fraction: 0.75,
        }
    }
}

impl SecurityConfig {
    /// Validate token timing configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let lifetime_ms = self.requested_lifetime.as_millis();
        if lifetime_ms < 1000 {
            errors.push("Requested token lifetime too short (minimum: 1s)".to_string());
        } else if lifetime_ms > u128::from(u32::MAX) {
            errors.push("Requested token lifetime does not fit in 32-bit milliseconds".to_string());
        }

        if self.token_grace_period.as_secs() > 60 {
            errors.push("Token grace period too long (maximum: 60s)".to_string());
        }

        if !(self.renewal_fraction > 0.0 && self.renewal_fraction < 1.0) {
            errors.push(format!(
                "Invalid renewal fraction: {} (valid range: exclusive 0.0-1.0)",
                self.renewal_fraction
            ));
        }

        errors
    }

    /// Requested lifetime as carried in OpenSecureChannel requests
    pub fn requested_lifetime_ms(&self) -> u32 {
        u32::try_from(self.requested_lifetime.as_millis()).unwrap_or(u32::MAX)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Recorded on the first log line
    pub app_name: String,

    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub log_to_console: bool,
    pub log_to_file: bool,

    /// Required when `log_to_file` is set
    pub log_file_path: Option<PathBuf>,

    /// One JSON object per event instead of the human-readable format
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("opcua-uacp"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.app_name.len() {
            0 => errors.push("Application name cannot be empty".to_string()),
            n if n > 64 => errors.push(format!(
                "Application name too long: {n} characters (maximum: 64)"
            )),
            _ => {}
        }

        if self.log_to_file {
            match self.log_file_path.as_deref().map(Path::parent) {
                None => errors
                    .push("log_file_path must be specified when log_to_file is true".to_string()),
                Some(Some(dir)) if !dir.as_os_str().is_empty() && !dir.exists() => {
                    errors.push(format!("Log file directory does not exist: {}", dir.display()));
                }
                Some(_) => {}
            }
        } else if !self.log_to_console {
            errors.push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
