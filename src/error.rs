//! Error types for each layer of the hub
//!
//! Drivers and protocol code return these typed errors; task wiring and
//! `main` work with `anyhow::Result` on top of them.

use thiserror::Error;

/// Errors building or rendering readings
#[derive(Debug, Error)]
pub enum DataError {
    #[error("payload is {len} bytes, capacity is {capacity}")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error("message has no valid fields")]
    Empty,

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors reading a sensor
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor not initialized")]
    NotInitialized,

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected value in {path}: {value:?}")]
    Parse { path: String, value: String },

    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

/// Errors talking to the heart-rate strap
#[derive(Debug, Error)]
pub enum BleError {
    #[error("no bluetooth adapter available")]
    NoAdapter,

    #[error("peripheral {0} not found")]
    UnknownPeripheral(String),

    #[error("not connected")]
    NotConnected,

    #[error("bluetooth backend error: {0}")]
    Backend(String),
}

/// Errors driving the cellular modem
#[derive(Debug, Error)]
pub enum ModemError {
    #[error("modem did not respond to AT")]
    NotResponding,

    #[error("command {command:?} failed: {response:?}")]
    Command { command: String, response: String },

    #[error("timed out waiting for response to {0:?}")]
    Timeout(String),

    #[error("SIM not ready")]
    SimNotReady,

    #[error("network registration denied")]
    RegistrationDenied,

    #[error("network registration failed: {0}")]
    RegistrationFailed(String),

    #[error("data connection could not be verified")]
    DataNotConnected,

    #[error("modem is busy")]
    Busy,

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors delivering data to the backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("authentication failed after {attempts} attempts: {reason}")]
    Auth { attempts: u32, reason: String },

    #[error("token signing failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("auth mode {0} needs a secret")]
    MissingSecret(&'static str),
}

/// Semantic configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
