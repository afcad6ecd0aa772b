//! # molkhas-gateway
//!
//! Typed request/response façade over the hosted backend: repository
//! traits for every logical table, the change-feed subscription
//! primitive, the auth-provider contract, and the generation
//! collaborator contract.
//!
//! The hosted backend itself is an external collaborator. This crate
//! ships complete in-memory implementations ([`MemoryGateway`],
//! [`auth::MemoryAuth`]) that honor the same contracts, including
//! commit-order change-feed delivery per conversation, for local
//! development and tests.

pub mod auth;
pub mod error;
pub mod feed;
pub mod generate;
pub mod memory;
pub mod traits;

pub use auth::{AuthEvent, AuthProvider, MemoryAuth};
pub use error::{AuthError, GatewayError, GeneratorError, Result};
pub use feed::{ChangeEvent, ChangeFilter, EventKind, PresenceUpdate, Row, Table};
pub use generate::{FixedGenerator, Generator, Snippet};
pub use memory::MemoryGateway;
pub use traits::{
    AnalyticsRepo, AppealRepo, ChangeFeed, ContentRepo, ConversationRepo, DigestRepo, Gateway,
    MessageRepo, NotificationRepo, PresenceChannel, PrivilegeRepo,
};
