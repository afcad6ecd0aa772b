use thiserror::Error;

/// Errors produced by the persistence gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// A query expected a row but found none.
    #[error("record not found")]
    NotFound,

    /// The write conflicts with current state (e.g. reviewing an
    /// appeal that is no longer pending).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network or store-side failure reported by the backend.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors produced by the auth collaborator.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("an account with this email already exists")]
    EmailTaken,

    #[error("no user is signed in")]
    NotSignedIn,

    #[error("unknown sign-in provider: {0}")]
    UnknownProvider(String),

    #[error("auth backend error: {0}")]
    Backend(String),
}

/// Failure of the generation collaborator. Always treated as
/// non-fatal by callers, which fall back to the raw context.
#[derive(Error, Debug)]
#[error("generation failed: {0}")]
pub struct GeneratorError(pub String);
