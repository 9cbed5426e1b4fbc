//! Error types for cartography engine operations. One enum per component
//! boundary, composed into a top-level error that callers can pattern-match
//! on to decide how a failure should propagate.

use thiserror::Error;

/// The dispatch error-kind taxonomy, surfaced as distinct variants so
/// callers can pattern-match on propagation policy rather than
/// string-sniffing.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Fatal: terminates the turn and must be surfaced to the user.
    #[error("invalid API credential")]
    InvalidCredential,

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("server or client error ({status}): {body}")]
    ServerOrClient { status: u16, body: String },

    #[error("dispatch cancelled")]
    Cancelled,

    #[error("all models exhausted, last error: {0}")]
    ModelsExhausted(String),

    #[error("connector configuration error: {0}")]
    Configuration(String),

    #[error("internal dispatcher error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Only transient/server-or-client errors are retried inside the
    /// dispatcher.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Transient(_) | DispatchError::ServerOrClient { .. })
    }

    pub fn is_invalid_credential(&self) -> bool {
        matches!(self, DispatchError::InvalidCredential)
    }
}

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("no JSON object found in model reply")]
    NoJsonFound,

    #[error("failed to parse JSON: {0}")]
    ParseFailure(String),

    #[error("payload failed schema validation: {0}")]
    ValidationFailure(String),
}

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("edge not found: {0}")]
    EdgeNotFound(String),

    #[error("ambiguous identifier: {0}")]
    AmbiguousIdentifier(String),

    #[error("duplicate node id: {0}")]
    DuplicateId(String),

    #[error("invariant violated: {0}")]
    InvariantViolated(String),
}

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("connector-chain refinement exhausted its round budget")]
    RoundsExhausted,

    #[error("chain correction call failed: {0}")]
    CorrectionFailed(#[from] DispatchError),
}

#[derive(Error, Debug)]
pub enum ApplierError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("chain refinement error: {0}")]
    Chain(#[from] ChainError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Top-level error for the map update orchestrator. Only
/// `InvalidCredential` terminates the turn; every other variant is
/// recorded in the debug packet and treated as a null payload / no-op by
/// the caller.
#[derive(Error, Debug)]
pub enum CartographyError {
    #[error("invalid API credential")]
    InvalidCredential,

    #[error("envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("applier error: {0}")]
    Applier(#[from] ApplierError),

    #[error("dispatch error: {0}")]
    Dispatch(DispatchError),
}

impl From<DispatchError> for CartographyError {
    fn from(value: DispatchError) -> Self {
        if value.is_invalid_credential() {
            CartographyError::InvalidCredential
        } else {
            CartographyError::Dispatch(value)
        }
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
pub type GraphResult<T> = Result<T, GraphError>;
pub type ApplierResult<T> = Result<T, ApplierError>;
pub type CartographyResult<T> = Result<T, CartographyError>;
