//! Client Configuration Settings
//!
//! Typed configuration for the connection client, topic bus, order books and
//! the host binary, loaded from `STREAM_*` environment variables with
//! defaults for everything but the venue URL.

use std::time::Duration;

use crate::domain::orderbook::MergeStrategy;

/// Default handshake deadline.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default keepalive tick.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Default tolerated keepalive intervals without a pong.
pub const DEFAULT_MAX_PING_PONG_MISSES: f64 = 2.0;

// =============================================================================
// Decompression
// =============================================================================

/// Decompression applied to inbound binary frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decompression {
    /// Binary frames are decoded as UTF-8 as-is.
    #[default]
    None,
    /// Raw deflate stream without zlib header.
    Inflate,
    /// Gzip member.
    Gzip,
}

impl Decompression {
    /// Parse mode from string, unknown values mean no decompression.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "inflate" | "deflate" => Self::Inflate,
            "gzip" | "gunzip" => Self::Gzip,
            _ => Self::None,
        }
    }

    /// Mode name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Inflate => "inflate",
            Self::Gzip => "gzip",
        }
    }
}

// =============================================================================
// Connection Client
// =============================================================================

/// Connection client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Handshake deadline; `None` or zero disables it.
    pub connection_timeout: Option<Duration>,
    /// Keepalive tick; `None` or zero disables keepalive.
    pub keep_alive: Option<Duration>,
    /// Keepalive intervals tolerated without a pong before the connection is
    /// declared dead.
    pub max_ping_pong_misses: f64,
    /// Subprotocols offered during the handshake.
    pub protocols: Vec<String>,
    /// Extra handshake headers.
    pub headers: Vec<(String, String)>,
    /// Inbound binary frame decompression.
    pub decompression: Decompression,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Some(DEFAULT_CONNECTION_TIMEOUT),
            keep_alive: Some(DEFAULT_KEEP_ALIVE),
            max_ping_pong_misses: DEFAULT_MAX_PING_PONG_MISSES,
            protocols: Vec::new(),
            headers: Vec::new(),
            decompression: Decompression::None,
        }
    }
}

impl ClientConfig {
    /// Load overrides from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            connection_timeout: parse_env_optional_millis(
                "STREAM_CONNECTION_TIMEOUT_MS",
                defaults.connection_timeout,
            ),
            keep_alive: parse_env_optional_millis("STREAM_KEEP_ALIVE_MS", defaults.keep_alive),
            max_ping_pong_misses: parse_env_f64(
                "STREAM_MAX_PING_PONG_MISSES",
                defaults.max_ping_pong_misses,
            ),
            protocols: parse_env_list("STREAM_PROTOCOLS"),
            headers: Vec::new(),
            decompression: std::env::var("STREAM_DECOMPRESSION")
                .map(|s| Decompression::from_str_case_insensitive(&s))
                .unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_ping_pong_misses.is_finite() || self.max_ping_pong_misses <= 0.0 {
            return Err(ConfigError::invalid(
                "max_ping_pong_misses",
                format!("must be finite and positive, got {}", self.max_ping_pong_misses),
            ));
        }
        if self.protocols.iter().any(String::is_empty) {
            return Err(ConfigError::invalid("protocols", "empty subprotocol name"));
        }
        if self.headers.iter().any(|(name, _)| name.is_empty()) {
            return Err(ConfigError::invalid("headers", "empty header name"));
        }
        Ok(())
    }

    /// Handshake deadline with zero treated as disabled.
    #[must_use]
    pub fn effective_connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout.filter(|timeout| !timeout.is_zero())
    }

    /// Keepalive tick with zero treated as disabled.
    #[must_use]
    pub fn effective_keep_alive(&self) -> Option<Duration> {
        self.keep_alive.filter(|interval| !interval.is_zero())
    }

    /// Silence tolerated before the keepalive declares the connection dead.
    #[must_use]
    pub fn keep_alive_deadline(&self) -> Option<Duration> {
        self.effective_keep_alive()
            .map(|interval| interval.mul_f64(self.max_ping_pong_misses))
    }
}

// =============================================================================
// Topic Bus
// =============================================================================

/// Topic bus settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// History retained per topic; 0 disables retention.
    pub max_messages_per_topic: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_messages_per_topic: 10_000,
        }
    }
}

impl StreamSettings {
    /// Load overrides from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_messages_per_topic: parse_env_usize(
                "STREAM_MAX_MESSAGES_PER_TOPIC",
                Self::default().max_messages_per_topic,
            ),
        }
    }
}

// =============================================================================
// Order Book
// =============================================================================

/// Order book settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderBookConfig {
    /// Levels kept per side.
    pub depth: usize,
    /// How deltas are merged into the book.
    pub merge_strategy: MergeStrategy,
}

impl Default for OrderBookConfig {
    fn default() -> Self {
        Self {
            depth: usize::MAX,
            merge_strategy: MergeStrategy::default(),
        }
    }
}

impl OrderBookConfig {
    /// Load overrides from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let merge_strategy = std::env::var("STREAM_ORDERBOOK_MERGE")
            .ok()
            .and_then(|s| parse_merge_strategy(&s))
            .unwrap_or(defaults.merge_strategy);
        let config = Self {
            depth: parse_env_usize("STREAM_ORDERBOOK_DEPTH", defaults.depth),
            merge_strategy,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when depth is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.depth == 0 {
            return Err(ConfigError::invalid("depth", "must be at least 1"));
        }
        Ok(())
    }
}

// =============================================================================
// Reconnection
// =============================================================================

/// Reconnection backoff settings used by the host supervisor.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

impl ReconnectSettings {
    /// Load overrides from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            delay_initial: parse_env_duration_millis(
                "STREAM_RECONNECT_DELAY_INITIAL_MS",
                defaults.delay_initial,
            ),
            delay_max: parse_env_duration_secs(
                "STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.delay_max,
            ),
            delay_multiplier: parse_env_f64(
                "STREAM_RECONNECT_DELAY_MULTIPLIER",
                defaults.delay_multiplier,
            ),
            max_attempts: parse_env_u32("STREAM_MAX_RECONNECT_ATTEMPTS", defaults.max_attempts),
        }
    }
}

// =============================================================================
// Host Binary
// =============================================================================

/// Complete host configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Venue streaming endpoint.
    pub url: String,
    /// Symbols whose order books the host follows.
    pub symbols: Vec<String>,
    /// Health and metrics HTTP port (0 = disabled).
    pub health_port: u16,
    /// Connection client settings.
    pub client: ClientConfig,
    /// Topic bus settings.
    pub stream: StreamSettings,
    /// Order book settings.
    pub orderbook: OrderBookConfig,
    /// Reconnection settings.
    pub reconnect: ReconnectSettings,
}

impl AppConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `STREAM_URL` is missing or empty, or if any
    /// section fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("STREAM_URL")
            .map_err(|_| ConfigError::MissingEnvVar("STREAM_URL".to_string()))?;
        if url.is_empty() {
            return Err(ConfigError::EmptyValue("STREAM_URL".to_string()));
        }

        let mut symbols = parse_env_list("STREAM_SYMBOLS");
        if symbols.is_empty() {
            symbols.push("BTC/USDT".to_string());
        }

        Ok(Self {
            url,
            symbols,
            health_port: parse_env_u16("STREAM_HEALTH_PORT", 8082),
            client: ClientConfig::from_env()?,
            stream: StreamSettings::from_env(),
            orderbook: OrderBookConfig::from_env()?,
            reconnect: ReconnectSettings::from_env(),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// A field holds a value outside its domain.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

fn parse_merge_strategy(value: &str) -> Option<MergeStrategy> {
    match value.trim().to_lowercase().as_str() {
        "reset" => Some(MergeStrategy::Reset),
        "incremental" => Some(MergeStrategy::Incremental),
        other => {
            tracing::warn!(value = other, "Unknown merge strategy, using default");
            None
        }
    }
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

/// `0` disables, anything unparsable keeps the default.
fn parse_env_optional_millis(key: &str, default: Option<Duration>) -> Option<Duration> {
    match std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok()) {
        Some(0) => None,
        Some(millis) => Some(Duration::from_millis(millis)),
        None => default,
    }
}

fn parse_env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("inflate", Decompression::Inflate)]
    #[test_case("DEFLATE", Decompression::Inflate)]
    #[test_case("gzip", Decompression::Gzip)]
    #[test_case("none", Decompression::None)]
    #[test_case("brotli", Decompression::None)]
    fn decompression_parsing(raw: &str, expected: Decompression) {
        assert_eq!(Decompression::from_str_case_insensitive(raw), expected);
    }

    #[test]
    fn client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connection_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.keep_alive, Some(Duration::from_secs(30)));
        assert!((config.max_ping_pong_misses - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.decompression, Decompression::None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn keep_alive_deadline_scales_with_misses() {
        let config = ClientConfig {
            keep_alive: Some(Duration::from_secs(30)),
            max_ping_pong_misses: 1.5,
            ..ClientConfig::default()
        };
        assert_eq!(config.keep_alive_deadline(), Some(Duration::from_secs(45)));
    }

    #[test]
    fn zero_durations_disable_timers() {
        let config = ClientConfig {
            connection_timeout: Some(Duration::ZERO),
            keep_alive: Some(Duration::ZERO),
            ..ClientConfig::default()
        };
        assert!(config.effective_connection_timeout().is_none());
        assert!(config.effective_keep_alive().is_none());
        assert!(config.keep_alive_deadline().is_none());
    }

    #[test_case(0.0 ; "zero")]
    #[test_case(-1.0 ; "negative")]
    #[test_case(f64::NAN ; "nan")]
    #[test_case(f64::INFINITY ; "infinite")]
    fn invalid_ping_pong_misses_rejected(misses: f64) {
        let config = ClientConfig {
            max_ping_pong_misses: misses,
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "max_ping_pong_misses",
                ..
            })
        ));
    }

    #[test]
    fn empty_protocol_rejected() {
        let config = ClientConfig {
            protocols: vec![String::new()],
            ..ClientConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn stream_settings_defaults() {
        assert_eq!(StreamSettings::default().max_messages_per_topic, 10_000);
    }

    #[test]
    fn orderbook_config_defaults() {
        let config = OrderBookConfig::default();
        assert_eq!(config.depth, usize::MAX);
        assert_eq!(config.merge_strategy, MergeStrategy::Incremental);
        assert!(config.validate().is_ok());
    }

    #[test_case("reset", Some(MergeStrategy::Reset))]
    #[test_case("Incremental", Some(MergeStrategy::Incremental))]
    #[test_case(" RESET ", Some(MergeStrategy::Reset))]
    #[test_case("snapshot", None)]
    fn merge_strategy_parsing(raw: &str, expected: Option<MergeStrategy>) {
        assert_eq!(parse_merge_strategy(raw), expected);
    }

    #[test]
    fn zero_depth_rejected() {
        let config = OrderBookConfig {
            depth: 0,
            ..OrderBookConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn reconnect_settings_defaults() {
        let settings = ReconnectSettings::default();
        assert_eq!(settings.delay_initial, Duration::from_millis(500));
        assert_eq!(settings.delay_max, Duration::from_secs(30));
        assert!((settings.delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.max_attempts, 0);
    }
}
