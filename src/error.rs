//! Rich diagnostic error types for the cordon engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]`
//! derives, providing error codes and help text. Policy denials (budget,
//! k-anonymity) are *not* errors: they are structured pipeline outcomes.
//! Only validation, repository, and configuration failures surface as `Err`.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the cordon engine.
#[derive(Debug, Error, Diagnostic)]
pub enum CordonError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Repo(#[from] RepoError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
}

/// Result type used throughout the crate.
pub type CordonResult<T> = std::result::Result<T, CordonError>;

// ---------------------------------------------------------------------------
// Validation errors (graph mutation primitives)
// ---------------------------------------------------------------------------

/// Errors from node/edge mutation. All-or-nothing per call: a validation
/// failure leaves the graph untouched.
#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("node '{id}' already exists")]
    #[diagnostic(
        code(cordon::validate::duplicate_node),
        help(
            "Node ids are derived from (logical_id, classification level), so \
             a duplicate means this entity is already recorded at this level. \
             Update the existing node or record it at a different level."
        )
    )]
    DuplicateNode { id: String },

    #[error("edge '{id}' already exists")]
    #[diagnostic(
        code(cordon::validate::duplicate_edge),
        help("This relation is already recorded at this classification level.")
    )]
    DuplicateEdge { id: String },

    #[error("node '{id}' not found")]
    #[diagnostic(
        code(cordon::validate::missing_node),
        help("Check the node id; deletes and edge endpoints require an existing node.")
    )]
    MissingNode { id: String },

    #[error("edge '{id}' not found")]
    #[diagnostic(
        code(cordon::validate::missing_edge),
        help("Check the edge id; only existing edges can be deleted.")
    )]
    MissingEdge { id: String },

    #[error("edge endpoints span classification levels: {source_level} vs {target_level}")]
    #[diagnostic(
        code(cordon::validate::cross_level_edge),
        help(
            "An edge must carry the same classification level as both its \
             endpoint nodes. Record the endpoints at the edge's level first, \
             or author the edge at the endpoints' level."
        )
    )]
    CrossLevelEdge {
        source_level: String,
        target_level: String,
    },

    #[error("edge level {edge_level} does not match endpoint level {endpoint_level}")]
    #[diagnostic(
        code(cordon::validate::edge_level_mismatch),
        help("Cross-level edges are never authored; create the edge at the endpoints' level.")
    )]
    EdgeLevelMismatch {
        edge_level: String,
        endpoint_level: String,
    },
}

// ---------------------------------------------------------------------------
// Repository errors (collaborator failures)
// ---------------------------------------------------------------------------

/// Errors raised by repository collaborators. The pipeline propagates these
/// unmodified; it performs no retries of its own.
#[derive(Debug, Error, Diagnostic)]
pub enum RepoError {
    #[error("user '{id}' not found")]
    #[diagnostic(
        code(cordon::repo::user_not_found),
        help("The query was made on behalf of an unknown user id. Seed or create the user first.")
    )]
    UserNotFound { id: String },

    #[error("repository unavailable: {message}")]
    #[diagnostic(
        code(cordon::repo::unavailable),
        help(
            "The backing store could not serve the request. This is an \
             infrastructure failure, not a policy denial; retry policy \
             belongs to the repository, not the query engine."
        )
    )]
    Unavailable { message: String },

    #[error("audit append failed: {message}")]
    #[diagnostic(
        code(cordon::repo::audit_append),
        help(
            "The audit store rejected an append. Query responses are not \
             blocked by this, but operators should investigate: audit \
             coverage has a gap."
        )
    )]
    AuditAppend { message: String },
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors loading or validating engine configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    #[diagnostic(
        code(cordon::config::io),
        help("Check that the path exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    #[diagnostic(
        code(cordon::config::parse),
        help("The file must be valid TOML matching the EngineConfig schema.")
    )]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(cordon::config::invalid),
        help("Fix the named field; see EngineConfig docs for valid ranges.")
    )]
    Invalid { message: String },
}
