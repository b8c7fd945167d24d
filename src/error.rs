use std::{io, path::PathBuf};

/// Failures talking to the remote catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog rate limit reached")]
    RateLimited,

    #[error("catalog returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("catalog request failed: {0}")]
    Transport(String),

    #[error("could not decode catalog response: {0}")]
    Decode(String),
}

/// Failures reading or writing the tracked-item library.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a tracked mod with {key} {value} already exists")]
    DuplicateKey { key: &'static str, value: String },

    #[error("library I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("library file {path} is not valid: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("library lock poisoned")]
    Poisoned,
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("configuration: {0}")]
    Configuration(String),

    #[error("tracked mod {0} not found")]
    NotFound(u64),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("{0}")]
    Precondition(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("I/O on {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TrackerError {
    pub fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
