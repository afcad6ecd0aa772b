use thiserror::Error;

use molkhas_gateway::{AuthError, GatewayError};

/// Errors surfaced to callers of the client components.
///
/// Read-path failures (list refreshes, page loads, notification windows)
/// are deliberately NOT represented here: those are logged and swallowed so
/// a flaky backend degrades the view instead of tearing it down. Everything
/// that mutates backend state reports its failure through this type.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The operation requires a signed-in user and there is none.
    #[error("No user is signed in")]
    NotAuthenticated,

    /// The signed-in user is not a participant of the target conversation.
    #[error("Not a participant of this conversation")]
    NotParticipant,

    /// The operation is reserved for elevated-privilege users.
    #[error("Operation requires elevated privileges")]
    NotPrivileged,

    /// A backend write or lookup failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// An auth operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
