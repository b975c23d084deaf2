//! Error types for Carousel Core

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Recovery class of an error.
///
/// Only [`ErrorClass::ChainExhausted`] ever reaches the user; every other
/// class drives automatic recovery inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Format structurally unsupported; excluded from chains, never surfaced
    CapabilityGap,
    /// Transient transport failure; one retry per candidate
    Network,
    /// Decode or codec mismatch; the candidate is abandoned immediately
    Format,
    /// Adaptive manifest missing; skip straight to progressive fallbacks
    ManifestNotFound,
    /// Cache or persistence failure; recovered locally
    Cache,
    /// Every candidate for a track failed
    ChainExhausted,
    /// Configuration, state or programming errors
    Other,
}

/// Engine error types
#[derive(Error, Debug)]
pub enum Error {
    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request failed: {url}: {message}")]
    Request { url: String, message: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Connection timeout: {url}")]
    Timeout { url: String },

    // Source errors
    #[error("Adaptive manifest not found: {url}")]
    ManifestNotFound { url: String },

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(String),

    #[error("Media format error for {url}: {message}")]
    Format { url: String, message: String },

    #[error("Codec not supported: {codec}")]
    CodecNotSupported { codec: String },

    #[error("All {attempted} candidates failed for item {item_id}")]
    ChainExhausted { item_id: String, attempted: usize },

    // Cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Entry of {size} bytes exceeds the per-entry limit of {limit} bytes")]
    EntryTooLarge { size: u64, limit: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Platform errors
    #[error("Platform query failed: {0}")]
    Platform(String),

    // Playback errors
    #[error("Invalid playback state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Operation '{operation}' not allowed in phase {phase}")]
    InvalidPhase { operation: &'static str, phase: String },

    #[error("Playlist is empty")]
    EmptyPlaylist,

    #[error("Playlist index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Unknown playlist item: {0}")]
    UnknownItem(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        Error::Cache(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Classify this error for recovery decisions
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Network(_)
            | Error::Request { .. }
            | Error::Timeout { .. } => ErrorClass::Network,
            Error::HttpStatus { status, .. } if *status >= 500 || *status == 429 => {
                ErrorClass::Network
            }
            Error::HttpStatus { .. } => ErrorClass::Format,
            Error::ManifestNotFound { .. } => ErrorClass::ManifestNotFound,
            Error::ManifestParse(_) | Error::Format { .. } => ErrorClass::Format,
            Error::CodecNotSupported { .. } => ErrorClass::CapabilityGap,
            Error::ChainExhausted { .. } => ErrorClass::ChainExhausted,
            Error::Cache(_)
            | Error::EntryTooLarge { .. }
            | Error::Storage(_)
            | Error::Serialization(_)
            | Error::Io(_) => ErrorClass::Cache,
            _ => ErrorClass::Other,
        }
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.class(), ErrorClass::ChainExhausted | ErrorClass::Other)
    }

    /// Returns true if this error should be shown to the user
    pub fn is_user_visible(&self) -> bool {
        self.class() == ErrorClass::ChainExhausted
    }

    /// Returns the error code for telemetry
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Network(_) => "NETWORK",
            Error::Request { .. } => "REQUEST",
            Error::HttpStatus { .. } => "HTTP_STATUS",
            Error::Timeout { .. } => "TIMEOUT",
            Error::ManifestNotFound { .. } => "MANIFEST_NOT_FOUND",
            Error::ManifestParse(_) => "MANIFEST_PARSE",
            Error::Format { .. } => "FORMAT",
            Error::CodecNotSupported { .. } => "CODEC_UNSUPPORTED",
            Error::ChainExhausted { .. } => "CHAIN_EXHAUSTED",
            Error::Cache(_) => "CACHE",
            Error::EntryTooLarge { .. } => "CACHE_ENTRY_TOO_LARGE",
            Error::Storage(_) => "STORAGE",
            Error::Serialization(_) => "SERIALIZATION",
            Error::Platform(_) => "PLATFORM",
            Error::InvalidStateTransition { .. } => "INVALID_STATE",
            Error::InvalidPhase { .. } => "INVALID_PHASE",
            Error::EmptyPlaylist => "EMPTY_PLAYLIST",
            Error::IndexOutOfRange { .. } => "INDEX_OUT_OF_RANGE",
            Error::UnknownItem(_) => "UNKNOWN_ITEM",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Url(_) => "INVALID_URL",
            Error::Internal(_) => "INTERNAL",
            Error::Io(_) => "IO",
        }
    }
}
