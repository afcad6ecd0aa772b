//! # molkhas-shared
//!
//! Domain types shared by every Molkhas crate: typed ids, the
//! persisted models (conversations, messages, notifications, appeals,
//! moderated content), the authenticated account with display-name
//! derivation, and the keyed ordered log used for idempotent merges of
//! pushed rows.
//!
//! Every model derives `Serialize` and `Deserialize` so it can be
//! handed directly to a UI layer.

pub mod constants;
pub mod identity;
pub mod ids;
pub mod log;
pub mod models;

pub use identity::Account;
pub use ids::*;
pub use log::OrderedLog;
pub use models::*;
