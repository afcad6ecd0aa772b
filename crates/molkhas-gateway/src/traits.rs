//! Repository contracts over the backend's logical tables.
//!
//! Each table gets its own trait; [`Gateway`] composes them so
//! components can hold a single `Arc<dyn Gateway>` while tests stay
//! free to implement only the traits they exercise.

use async_trait::async_trait;
use tokio::sync::mpsc;

use molkhas_shared::{
    AiDigest, AnalyticsEvent, Appeal, AppealId, AppealStatus, ContentId, ContentStatus,
    Conversation, ConversationDetails, ConversationId, ConversationKind, Message, NewAppeal,
    NewMessage, NewNews, NewNotification, NewSummary, News, Notification, NotificationId,
    Participant, Summary, UserId,
};

use crate::error::Result;
use crate::feed::{ChangeEvent, ChangeFilter, PresenceUpdate};

#[async_trait]
pub trait ConversationRepo: Send + Sync {
    /// Insert a conversation row. Participant rows are inserted
    /// separately so a partial participant failure never rolls back
    /// the conversation itself.
    async fn create_conversation(
        &self,
        name: Option<String>,
        kind: ConversationKind,
        created_by: UserId,
    ) -> Result<Conversation>;

    /// Find the individual conversation between exactly this unordered
    /// pair, if one exists.
    async fn find_individual_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>>;

    /// Every conversation the user participates in, annotated with its
    /// latest message and digests, ordered by last update descending.
    async fn conversations_for_user(&self, user: UserId) -> Result<Vec<ConversationDetails>>;

    async fn add_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<Participant>;

    async fn remove_participant(&self, conversation: ConversationId, user: UserId) -> Result<()>;

    async fn is_participant(&self, conversation: ConversationId, user: UserId) -> Result<bool>;

    /// Delete the participant rows of a conversation. Part of the
    /// client-driven delete cascade.
    async fn delete_participants_in(&self, conversation: ConversationId) -> Result<()>;

    /// Delete the conversation row itself. Last step of the cascade.
    async fn delete_conversation_row(&self, conversation: ConversationId) -> Result<()>;
}

#[async_trait]
pub trait MessageRepo: Send + Sync {
    async fn insert_message(&self, new: NewMessage) -> Result<Message>;

    /// One page of messages, newest first.
    async fn messages_page(
        &self,
        conversation: ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>>;

    /// Flag every message in the conversation not sent by `reader` as
    /// read.
    async fn mark_messages_read(&self, conversation: ConversationId, reader: UserId) -> Result<()>;

    /// Delete every message of a conversation. First step of the
    /// delete cascade.
    async fn delete_messages_in(&self, conversation: ConversationId) -> Result<()>;
}

#[async_trait]
pub trait DigestRepo: Send + Sync {
    /// Digests of a conversation, newest first.
    async fn digests_for(&self, conversation: ConversationId) -> Result<Vec<AiDigest>>;

    /// Fire the external summarize function for a conversation. The
    /// resulting digest row arrives through the change feed.
    async fn trigger_digest(&self, conversation: ConversationId) -> Result<()>;
}

#[async_trait]
pub trait NotificationRepo: Send + Sync {
    async fn insert_notification(&self, new: NewNotification) -> Result<Notification>;

    /// Batched fan-out insert.
    async fn insert_notifications(&self, batch: Vec<NewNotification>) -> Result<()>;

    /// Up to `limit` most recent notifications for a user, newest
    /// first.
    async fn notifications_for(&self, user: UserId, limit: u32) -> Result<Vec<Notification>>;

    async fn mark_notification_read(&self, id: NotificationId) -> Result<()>;

    async fn mark_all_notifications_read(&self, user: UserId) -> Result<()>;

    async fn delete_notification(&self, id: NotificationId) -> Result<()>;
}

#[async_trait]
pub trait PrivilegeRepo: Send + Sync {
    /// Whether the user appears in the privileged-users table.
    async fn is_privileged(&self, user: UserId) -> Result<bool>;

    /// The full privileged audience, for admin fan-out.
    async fn privileged_users(&self) -> Result<Vec<UserId>>;
}

#[async_trait]
pub trait AppealRepo: Send + Sync {
    async fn insert_appeal(&self, new: NewAppeal) -> Result<Appeal>;

    /// All appeals, newest first.
    async fn list_appeals(&self) -> Result<Vec<Appeal>>;

    /// Move a pending appeal to its reviewed status, recording the
    /// reviewer. Conflicts if the appeal is no longer pending.
    async fn review_appeal(
        &self,
        id: AppealId,
        status: AppealStatus,
        reviewer: UserId,
    ) -> Result<Appeal>;
}

#[async_trait]
pub trait ContentRepo: Send + Sync {
    async fn insert_summary(&self, new: NewSummary) -> Result<Summary>;
    async fn insert_news(&self, new: NewNews) -> Result<News>;
    async fn set_summary_status(&self, id: ContentId, status: ContentStatus) -> Result<Summary>;
    async fn set_news_status(&self, id: ContentId, status: ContentStatus) -> Result<News>;
    async fn list_summaries(&self, status: Option<ContentStatus>) -> Result<Vec<Summary>>;
    async fn list_news(&self, status: Option<ContentStatus>) -> Result<Vec<News>>;
}

#[async_trait]
pub trait AnalyticsRepo: Send + Sync {
    /// Record a usage event. Callers treat failures as non-fatal.
    async fn record_event(&self, event: AnalyticsEvent) -> Result<()>;
}

/// The change-feed subscription primitive.
pub trait ChangeFeed: Send + Sync {
    /// Open a standing feed of rows matching `filter`. The feed ends
    /// when the receiver is dropped.
    fn subscribe(&self, filter: ChangeFilter) -> mpsc::UnboundedReceiver<ChangeEvent>;
}

/// The shared presence channel: who is online right now. Presence is
/// ephemeral (no table behind it) and tracked by user id, so a user
/// open in two tabs still counts once.
#[async_trait]
pub trait PresenceChannel: Send + Sync {
    /// Announce `user` as online. Idempotent.
    async fn track_presence(&self, user: UserId) -> Result<()>;

    /// Withdraw `user` from the online set. Idempotent.
    async fn untrack_presence(&self, user: UserId) -> Result<()>;

    /// Open a standing feed of presence snapshots. The current set is
    /// delivered immediately; the feed ends when the receiver is
    /// dropped.
    fn subscribe_presence(&self) -> mpsc::UnboundedReceiver<PresenceUpdate>;
}

/// The full persistence gateway: every repository plus the change
/// feed.
pub trait Gateway:
    ConversationRepo
    + MessageRepo
    + DigestRepo
    + NotificationRepo
    + PrivilegeRepo
    + AppealRepo
    + ContentRepo
    + AnalyticsRepo
    + ChangeFeed
    + PresenceChannel
{
}

impl<T> Gateway for T where
    T: ConversationRepo
        + MessageRepo
        + DigestRepo
        + NotificationRepo
        + PrivilegeRepo
        + AppealRepo
        + ContentRepo
        + AnalyticsRepo
        + ChangeFeed
        + PresenceChannel
{
}
