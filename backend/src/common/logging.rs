//! Structured logging
//!
//! Plain diagnostics go through `tracing` macros under `custodia::*`
//! targets. Business events (deposits, withdrawals, ledger changes, signing)
//! are additionally rendered as one JSON [`LogEvent`] per line so they can be
//! shipped untouched to log aggregation.
//!
//! ```rust,ignore
//! use custodia::common::logging::{init_logging, LogLevel};
//!
//! init_logging(LogLevel::Info, true)?;
//! log_ledger_event("block_ingested", "btc", 812_000, &hash, false);
//! ```

use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// `tracing` targets must be literals
macro_rules! emit_at {
    ($target:literal, $level:expr, $line:expr) => {
        match $level {
            LogLevel::Error => tracing::error!(target: $target, "{}", $line),
            LogLevel::Warn => tracing::warn!(target: $target, "{}", $line),
            LogLevel::Debug | LogLevel::Trace => tracing::debug!(target: $target, "{}", $line),
            LogLevel::Info => tracing::info!(target: $target, "{}", $line),
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&str> for LogLevel {
    /// Unknown names fall back to `Info`
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn outcome(success: bool) -> Self {
        if success {
            LogLevel::Info
        } else {
            LogLevel::Error
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Api,
    Deposit,
    Withdrawal,
    Ledger,
    Signing,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

/// One business event, serialized as a single JSON line
#[derive(Debug, Serialize)]
pub struct LogEvent {
    /// RFC 3339
    pub timestamp: String,
    pub level: String,
    pub category: EventCategory,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    #[serde(skip)]
    severity: LogLevel,
}

impl LogEvent {
    pub fn new(level: LogLevel, category: EventCategory, event: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: level.directive().to_ascii_uppercase(),
            category,
            event: event.into(),
            correlation_id: None,
            data: None,
            duration_ms: None,
            error: None,
            severity: level,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach an error; `None` leaves the event untouched
    pub fn with_error(mut self, code: &str, message: Option<&str>) -> Self {
        if let Some(message) = message {
            self.error = Some(ErrorDetails {
                code: code.to_string(),
                message: message.to_string(),
            });
        }
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| json!({ "event": self.event, "error": "unserializable log event" }).to_string())
    }

    /// Emit through `tracing` at the event's own level
    pub fn emit(&self) {
        let line = self.to_json();
        match self.category {
            EventCategory::Api => emit_at!("custodia::api", self.severity, line),
            EventCategory::Deposit => emit_at!("custodia::deposit", self.severity, line),
            EventCategory::Withdrawal => emit_at!("custodia::withdrawal", self.severity, line),
            EventCategory::Ledger => emit_at!("custodia::ledger", self.severity, line),
            EventCategory::Signing => emit_at!("custodia::signing", self.severity, line),
        }
    }
}

/// HTTP access log; 4xx at warn, 5xx at error
pub fn log_api_response(method: &str, path: &str, status: u16, duration_ms: u64, correlation_id: &str) {
    let level = match status {
        500.. => LogLevel::Error,
        400..=499 => LogLevel::Warn,
        _ => LogLevel::Info,
    };

    LogEvent::new(level, EventCategory::Api, format!("{} {}", method, path))
        .with_correlation_id(correlation_id)
        .with_duration(duration_ms)
        .with_data(json!({ "method": method, "path": path, "status": status }))
        .emit();
}

pub fn log_deposit_event(event: &str, asset: &str, address: &str, success: bool, error: Option<&str>) {
    LogEvent::new(LogLevel::outcome(success), EventCategory::Deposit, event)
        .with_data(json!({ "asset": asset, "address": address, "success": success }))
        .with_error("DEPOSIT_ERROR", error)
        .emit();
}

/// Outcome of one withdrawal attempt
#[derive(Debug, Clone, Copy)]
pub struct WithdrawalLog<'a> {
    pub request_id: &'a str,
    pub asset: &'a str,
    pub amount: &'a str,
    pub destination: &'a str,
    pub txid: Option<&'a str>,
    pub error: Option<&'a str>,
}

pub fn log_withdrawal_event(event: &str, entry: WithdrawalLog<'_>) {
    let success = entry.error.is_none();
    LogEvent::new(LogLevel::outcome(success), EventCategory::Withdrawal, event)
        .with_correlation_id(entry.request_id)
        .with_data(json!({
            "asset": entry.asset,
            "amount": entry.amount,
            "destination": entry.destination,
            "txid": entry.txid,
        }))
        .with_error("WITHDRAWAL_ERROR", entry.error)
        .emit();
}

/// Block ingestion outcome; reorgs at warn
pub fn log_ledger_event(event: &str, chain: &str, height: u64, hash: &str, reorg: bool) {
    let level = if reorg { LogLevel::Warn } else { LogLevel::Info };
    LogEvent::new(level, EventCategory::Ledger, event)
        .with_data(json!({ "chain": chain, "height": height, "hash": hash, "reorg": reorg }))
        .emit();
}

/// Signing boundary call. Never pass key material here.
pub fn log_signing_event(event: &str, asset: &str, address: &str, success: bool, error: Option<&str>) {
    LogEvent::new(LogLevel::outcome(success), EventCategory::Signing, event)
        .with_data(json!({ "asset": asset, "address": address, "success": success }))
        .with_error("SIGNING_ERROR", error)
        .emit();
}

/// Install the global subscriber
///
/// `RUST_LOG` overrides `level` when set. JSON output is meant for mainnet
/// deployments, pretty output for everything else.
pub fn init_logging(level: LogLevel, json_format: bool) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.directive();
        EnvFilter::new(format!("custodia={level},tower_http={level},axum={level}"))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json_format {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true).with_line_number(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().pretty().with_target(true).with_file(true).with_line_number(true))
            .try_init()
    };

    result.map_err(|e| LoggingError::InitFailed(e.to_string()))
}

pub fn init_from_config(config: &super::config::CustodiaConfig) -> Result<(), LoggingError> {
    init_logging(
        LogLevel::from(config.log_level.as_str()),
        config.network == super::config::Network::Mainnet,
    )
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("failed to initialize logging: {0}")]
    InitFailed(String),
}

/// 32 hex chars, no dashes
pub fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_event_json() {
        let event = LogEvent::new(LogLevel::Warn, EventCategory::Ledger, "block_reorged")
            .with_correlation_id("req-7")
            .with_data(json!({ "height": 812_000 }));

        let parsed: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(parsed["category"], "ledger");
        assert_eq!(parsed["level"], "WARN");
        assert_eq!(parsed["event"], "block_reorged");
        assert_eq!(parsed["correlation_id"], "req-7");
        assert_eq!(parsed["data"]["height"], 812_000);
        assert!(parsed.get("duration_ms").is_none());
        assert!(parsed.get("severity").is_none());
    }

    #[test]
    fn test_with_error_ignores_none() {
        let ok = LogEvent::new(LogLevel::Info, EventCategory::Withdrawal, "withdrawal_broadcast")
            .with_error("WITHDRAWAL_ERROR", None);
        assert!(ok.error.is_none());

        let failed = LogEvent::new(LogLevel::Error, EventCategory::Withdrawal, "withdrawal_failed")
            .with_error("WITHDRAWAL_ERROR", Some("insufficient funds"));
        assert!(failed.to_json().contains("insufficient funds"));
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::from("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::from("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("verbose"), LogLevel::Info);
    }

    #[test]
    fn test_correlation_id_generation() {
        let a = generate_correlation_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, generate_correlation_id());
    }
}
