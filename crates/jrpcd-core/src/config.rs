//! Process-wide configuration.
//!
//! Built once at startup from flags and environment, validated, then never
//! mutated. Invalid configurations are fatal startup errors.

use std::{collections::HashMap, path::PathBuf, str::FromStr};

use crate::{backend::Backend, route::Route};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:9545";
pub const DEFAULT_LOG_LEVEL: &str = "debug";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("backend: {spec}: invalid URL: {source}")]
    InvalidBackendUrl {
        spec: String,
        #[source]
        source: url::ParseError,
    },

    #[error("backend re-defined: {0}")]
    DuplicateBackend(String),

    #[error("no 'default' backend defined")]
    MissingDefaultBackend,

    #[error("backend not set")]
    NoBackends,

    #[error("route: {spec}: invalid route spec")]
    InvalidRoute { spec: String },

    #[error("route: {spec}: missing backends")]
    MissingRouteBackends { spec: String },

    #[error("route: {spec}: no such backend: {name}")]
    UnknownRouteBackend { spec: String, name: String },

    #[error("certificate not set")]
    CertificateNotSet,

    #[error("private key not set")]
    PrivateKeyNotSet,

    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
}

/// Severity threshold for the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    /// Accepts full names plus the short aliases `err`, `wrn`, `inf`,
    /// `dbg`, `trc`. The empty string maps to `info`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "err" | "error" => Ok(LogLevel::Error),
            "wrn" | "warn" | "warning" => Ok(LogLevel::Warn),
            "inf" | "info" | "" => Ok(LogLevel::Info),
            "dbg" | "debug" => Ok(LogLevel::Debug),
            "trc" | "trace" => Ok(LogLevel::Trace),
            other => Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub certfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    pub logfile: Option<PathBuf>,
    pub log_level: LogLevel,
    pub cache_dir: Option<PathBuf>,
    pub backends: HashMap<String, Backend>,
    pub routes: Vec<Route>,
}

impl Config {
    /// Checks the invariants that cut across fields: cert and key are
    /// either both set or both unset, and at least one backend exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.certfile, &self.keyfile) {
            (Some(_), None) => return Err(ConfigError::PrivateKeyNotSet),
            (None, Some(_)) => return Err(ConfigError::CertificateNotSet),
            _ => {}
        }

        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        Ok(())
    }

    pub fn tls_enabled(&self) -> bool {
        self.certfile.is_some() && self.keyfile.is_some()
    }
}
