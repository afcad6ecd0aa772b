//! Typed id newtypes over [`uuid::Uuid`].
//!
//! Every logical table gets its own id type so a message id can never
//! be handed to an operation expecting a conversation id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// An authenticated user.
    UserId
);
id_type!(
    /// A conversation (individual or group chat).
    ConversationId
);
id_type!(
    /// A single chat message.
    MessageId
);
id_type!(
    /// An AI-generated conversation digest.
    DigestId
);
id_type!(
    /// A notification row.
    NotificationId
);
id_type!(
    /// An appeal against a moderation decision.
    AppealId
);
id_type!(
    /// A piece of moderated content (summary or news item).
    ContentId
);
