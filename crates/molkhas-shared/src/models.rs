//! Domain model structs mirrored from the hosted backend's logical
//! tables.
//!
//! `New*` structs carry the caller-supplied fields of an insert; the
//! gateway fills in ids and timestamps on write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{
    AppealId, ContentId, ConversationId, DigestId, MessageId, NotificationId, UserId,
};

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

/// Whether a conversation is a two-party chat or a named group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Individual,
    Group,
}

/// A chat thread between two or more users.
///
/// An individual conversation has exactly two participants and is
/// unique per unordered pair; group conversations carry a name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    /// Present only for group conversations.
    pub name: Option<String>,
    pub kind: ConversationKind,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    /// Bumped whenever a message lands in the conversation.
    pub updated_at: DateTime<Utc>,
}

/// Membership row tying a user to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
}

/// A conversation annotated with everything the conversation list
/// renders: participants, the latest message, and its AI digests
/// (newest first).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationDetails {
    pub conversation: Conversation,
    pub participants: Vec<UserId>,
    pub last_message: Option<Message>,
    pub digests: Vec<AiDigest>,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A single chat message. Immutable after insert except for the read
/// flag; deleted only when its conversation is deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied fields of a message insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: String,
}

// ---------------------------------------------------------------------------
// AI digests
// ---------------------------------------------------------------------------

/// An AI-generated summary of a conversation, produced asynchronously
/// by the external generation step and appended newest-first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiDigest {
    pub id: DigestId,
    pub conversation_id: ConversationId,
    pub summary: String,
    /// Optional structured payload highlighting important messages.
    pub important_messages: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Why a notification was created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// New content awaiting admin review.
    AdminSubmission,
    /// Content the user cares about was published.
    ContentPublished,
    /// Platform-level notice.
    System,
    /// An appeal the user submitted was reviewed.
    AppealStatusUpdate,
}

/// What entity a notification points at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelatedKind {
    Summary,
    News,
    Appeal,
}

/// A system-generated notice addressed to one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub related_id: Option<Uuid>,
    pub related_kind: Option<RelatedKind>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied fields of a notification insert (read starts false).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewNotification {
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub related_id: Option<Uuid>,
    pub related_kind: Option<RelatedKind>,
}

// ---------------------------------------------------------------------------
// Appeals
// ---------------------------------------------------------------------------

/// Kind of content an appeal targets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Summary,
    News,
}

impl From<ContentKind> for RelatedKind {
    fn from(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Summary => RelatedKind::Summary,
            ContentKind::News => RelatedKind::News,
        }
    }
}

/// Review outcome of an appeal. Transitions out of `Pending` are
/// performed only by privileged users.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppealStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A user's appeal against a moderation decision on published content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Appeal {
    pub id: AppealId,
    pub content_id: ContentId,
    pub content_kind: ContentKind,
    pub content_title: Option<String>,
    pub reason: String,
    pub description: Option<String>,
    pub status: AppealStatus,
    pub created_by: UserId,
    pub reviewed_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied fields of an appeal insert (status starts pending).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewAppeal {
    pub content_id: ContentId,
    pub content_kind: ContentKind,
    pub content_title: Option<String>,
    pub reason: String,
    pub description: Option<String>,
    pub created_by: UserId,
}

// ---------------------------------------------------------------------------
// Moderated content
// ---------------------------------------------------------------------------

/// Moderation state of a summary or news item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentStatus {
    Pending,
    Approved,
    Rejected,
}

/// A study summary submitted by a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Summary {
    pub id: ContentId,
    pub title: String,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub file_url: Option<String>,
    pub status: ContentStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied fields of a summary submission (status starts pending).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewSummary {
    pub title: String,
    pub subject: Option<String>,
    pub description: Option<String>,
    pub file_url: Option<String>,
    pub created_by: UserId,
}

/// A news item submitted for publication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct News {
    pub id: ContentId,
    pub title: String,
    pub body: String,
    pub status: ContentStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied fields of a news submission (status starts pending).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewNews {
    pub title: String,
    pub body: String,
    pub created_by: UserId,
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

/// User action recorded for analytics. Writes are always best-effort.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SignIn,
    SummaryView,
    SummaryClick,
    AiInteraction,
    ContentView,
    LinkClick,
}

/// An analytics row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsEvent {
    pub user_id: UserId,
    pub action: ActionKind,
    pub content_type: String,
    pub content_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

impl AnalyticsEvent {
    /// An event with no target entity and empty metadata.
    pub fn bare(user_id: UserId, action: ActionKind, content_type: &str) -> Self {
        Self {
            user_id,
            action,
            content_type: content_type.to_string(),
            content_id: None,
            metadata: serde_json::json!({}),
        }
    }
}
