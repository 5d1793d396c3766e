use std::path::PathBuf;

/// Problems found while turning user input into a query. Raised before any
/// data is fetched; nothing is partially applied.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid filter format: {0} (expected key=value)")]
    Malformed(String),
    #[error("unknown filter key: {0}")]
    UnknownKey(String),
    #[error("invalid {key} value: {value}")]
    InvalidValue { key: String, value: String },
    #[error("unknown sort field: {0}")]
    UnknownSortField(String),
    #[error("unknown sort direction: {0}")]
    UnknownSortDirection(String),
    #[error("unknown output field: {0}")]
    UnknownField(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("socket table unavailable: {0}")]
    SocketTable(String),
    #[error("cannot read fixture {path}: {source}")]
    FixtureIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid fixture {path}: {source}")]
    FixtureFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("terminal error: {0}")]
    Terminal(#[source] std::io::Error),
    #[error("cannot start runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),
}

/// Why a name lookup produced nothing usable. Never cached.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("lookup timed out")]
    Timeout,
    #[error("lookup failed: {0}")]
    Failed(String),
}
