//! Error types for the replica state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a client request is refused.
///
/// These travel back to the client inside a `Rejected` message, so they are
/// serializable.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ProtocolError {
    #[error("Client request carries an empty dependency vector")]
    EmptyDependencyVector,

    #[error("Dependency vector has {found} components, cluster has {expected} replicas")]
    DependencyLengthMismatch { expected: usize, found: usize },

    #[error("Request expired after waiting {ticks} gossip ticks for its dependencies")]
    RequestExpired { ticks: u64 },
}

/// A session semantic name or code that does not parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown session semantic: {0}")]
pub struct UnknownSemantic(pub String);

pub type Result<T> = std::result::Result<T, ProtocolError>;
