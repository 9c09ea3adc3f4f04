use std::time::Duration;

use thiserror::Error;

/// Failure of a single reachability probe. Never fatal to a schedule;
/// callers downgrade these to an offline / lost reading.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("icmp client unavailable: {0}")]
    ClientUnavailable(String),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("probe transport error: {0}")]
    Transport(String),

    #[error("invalid probe target: {0}")]
    InvalidTarget(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to serialize data document: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write data file: {0}")]
    Io(#[from] std::io::Error),

    #[error("store writer is no longer running")]
    WriterGone,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
