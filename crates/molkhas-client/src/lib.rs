//! Realtime client core for the molkhas student community app.
//!
//! Holds the live, push-updated view of one signed-in user: their
//! conversations, the open conversation's messages and digests, their
//! notification window, and the shared online-users set. Backend access goes through the repository traits
//! in `molkhas-gateway`; realtime updates arrive as change-feed events and
//! are merged into held state idempotently.
//!
//! Degradation rules, applied uniformly: read failures keep the previous
//! snapshot, write failures are surfaced to the caller, and a slow or
//! broken privilege backend leaves the user unprivileged.

pub mod appeals;
pub mod assist;
pub mod client;
pub mod config;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod moderation;
pub mod notifications;
pub mod presence;
pub mod session;
pub mod subscriptions;

pub use appeals::{AppealDecision, Appeals};
pub use assist::{Assistant, AssistantReply};
pub use client::Client;
pub use config::ClientConfig;
pub use conversations::Conversations;
pub use error::{ClientError, Result};
pub use messages::Messages;
pub use moderation::Moderation;
pub use notifications::Notifications;
pub use presence::Presence;
pub use session::{PrivilegeCache, Session};
pub use subscriptions::{Scope, SubscriptionSet};

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. Call once from the embedding
/// application; repeated calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("molkhas_client=debug,molkhas_gateway=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
