use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of the transport itself, as opposed to a response carrying an
/// error status.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("authentication returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("authentication response is not valid JSON: {0}")]
    Unparseable(String),

    #[error("authentication response has no token at `{0}`")]
    MissingToken(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read query catalog {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse query catalog {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("query `{0}` is defined more than once")]
    Duplicate(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("unknown scenario `{0}`")]
    Unknown(String),

    #[error("scenario `{0}` has no stages")]
    NoStages(String),

    #[error("scenario `{name}` stage {index} has a zero duration")]
    ZeroStageDuration { name: String, index: usize },

    #[error("scenario `{0}` has a zero duration")]
    ZeroDuration(String),
}

/// Body of a response that could not be read as structured data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("response body is not a GraphQL response: {0}")]
pub struct ParseError(pub String);

/// Errors that abort a whole run. Steady-state request failures never end
/// up here; they are absorbed into metrics.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("failed to serialize summary: {0}")]
    Serialize(String),
}
