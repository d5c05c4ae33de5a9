use std::path::PathBuf;

use thiserror::Error;

/// Top-level error surfaced by a validation run.
///
/// Everything recoverable is reported as a diagnostic; only a failure that
/// aborts the whole run for a top-level document ends up here.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No document to validate: {details}")]
    MissingDocument { details: String },

    #[error("Document parsing error: {0}")]
    Document(#[from] DocumentError),

    #[error("Validation aborted for {uri}: {details}")]
    Internal { uri: String, details: String },

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system traversal error: {path} - {reason}")]
    FileSystemTraversal { path: PathBuf, reason: String },

    #[error("Concurrent operation error: {details}")]
    Concurrency { details: String },
}

/// Failure to load an XML configuration document
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("XML syntax error at byte {position}: {message}")]
    Syntax { message: String, position: u64 },

    #[error("Document has no root element")]
    Empty,

    #[error("Document has more than one root element")]
    MultipleRoots,

    #[error("Mismatched end tag: expected </{expected}>, found </{found}>")]
    MismatchedEndTag { expected: String, found: String },

    #[error("Unexpected end of document: unclosed <{element}>")]
    Unclosed { element: String },
}

impl From<quick_xml::Error> for DocumentError {
    fn from(err: quick_xml::Error) -> Self {
        DocumentError::Syntax {
            message: err.to_string(),
            position: 0,
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for DocumentError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        DocumentError::Syntax {
            message: err.to_string(),
            position: 0,
        }
    }
}

/// Failure to create a validation context for an include or dropin target
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextCreationError {
    #[error("Configuration file not found: {location}")]
    NotFound { location: String },

    #[error("Configuration file could not be read: {path} - {details}")]
    Unreadable { path: PathBuf, details: String },

    #[error("Configuration file is not well formed: {path} - {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: DocumentError,
    },
}

/// Schema and feature catalog loading errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("Unsupported catalog file format: {0}")]
    UnsupportedFormat(String),
}

/// Ignore-filter store errors
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Filter store IO error: {path} - {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Filter store is corrupt: {path} - {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid filter pattern '{pattern}': {details}")]
    InvalidPattern { pattern: String, details: String },
}

impl From<FilterError> for ValidationError {
    fn from(err: FilterError) -> Self {
        ValidationError::Config(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Document result type alias
pub type DocumentResult<T> = std::result::Result<T, DocumentError>;

/// Catalog result type alias
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Filter result type alias
pub type FilterResult<T> = std::result::Result<T, FilterError>;
