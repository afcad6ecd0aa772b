//! Change-feed types: which table changed, how, and the changed row.
//!
//! A subscription is parameterized by a [`ChangeFilter`] — table name,
//! optional event kind, and an optional column-equality filter on the
//! row's conversation id — and yields [`ChangeEvent`]s over an
//! unbounded channel. Delivery within one conversation's message feed
//! follows commit order; nothing is guaranteed across scopes.

use serde::{Deserialize, Serialize};

use molkhas_shared::{
    AiDigest, Appeal, Conversation, ConversationId, Message, Notification, Participant, UserId,
};

/// Logical tables exposed through the change feed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Conversations,
    Participants,
    Messages,
    Digests,
    Notifications,
    Appeals,
}

/// What happened to the row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// The changed row, typed per table.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Conversation(Conversation),
    Participant(Participant),
    Message(Message),
    Digest(AiDigest),
    Notification(Notification),
    Appeal(Appeal),
}

impl Row {
    /// The conversation the row belongs to, for column-equality
    /// filtering. Rows with no conversation column return `None`.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Row::Conversation(c) => Some(c.id),
            Row::Participant(p) => Some(p.conversation_id),
            Row::Message(m) => Some(m.conversation_id),
            Row::Digest(d) => Some(d.conversation_id),
            Row::Notification(_) | Row::Appeal(_) => None,
        }
    }
}

/// One change-feed delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: EventKind,
    pub row: Row,
}

/// One presence delivery: the full set of online users after a join
/// or leave. Full-state snapshots keep joins and leaves idempotent;
/// consumers never have to reconcile deltas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub online: Vec<UserId>,
}

/// Subscription parameters for the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: Table,
    /// `None` listens to inserts, updates, and deletes alike.
    pub kind: Option<EventKind>,
    /// Column-equality filter on the row's conversation id.
    pub conversation: Option<ConversationId>,
}

impl ChangeFilter {
    /// Listen to every event on a table.
    pub fn table(table: Table) -> Self {
        Self {
            table,
            kind: None,
            conversation: None,
        }
    }

    /// Listen to inserts only.
    pub fn inserts(table: Table) -> Self {
        Self {
            table,
            kind: Some(EventKind::Insert),
            conversation: None,
        }
    }

    /// Narrow the filter to rows of one conversation.
    pub fn for_conversation(mut self, conversation: ConversationId) -> Self {
        self.conversation = Some(conversation);
        self
    }

    /// Whether an event passes this filter.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        if let Some(kind) = self.kind {
            if event.kind != kind {
                return false;
            }
        }
        if let Some(conversation) = self.conversation {
            if event.row.conversation_id() != Some(conversation) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use molkhas_shared::{MessageId, UserId};

    fn message_event(conversation: ConversationId, kind: EventKind) -> ChangeEvent {
        ChangeEvent {
            table: Table::Messages,
            kind,
            row: Row::Message(Message {
                id: MessageId::new(),
                conversation_id: conversation,
                sender_id: UserId::new(),
                content: "hi".to_string(),
                read: false,
                created_at: Utc::now(),
            }),
        }
    }

    #[test]
    fn table_filter_matches_any_kind() {
        let conv = ConversationId::new();
        let filter = ChangeFilter::table(Table::Messages);
        assert!(filter.matches(&message_event(conv, EventKind::Insert)));
        assert!(filter.matches(&message_event(conv, EventKind::Delete)));
    }

    #[test]
    fn insert_filter_rejects_updates() {
        let conv = ConversationId::new();
        let filter = ChangeFilter::inserts(Table::Messages);
        assert!(filter.matches(&message_event(conv, EventKind::Insert)));
        assert!(!filter.matches(&message_event(conv, EventKind::Update)));
    }

    #[test]
    fn conversation_filter_rejects_other_conversations() {
        let conv = ConversationId::new();
        let other = ConversationId::new();
        let filter = ChangeFilter::inserts(Table::Messages).for_conversation(conv);
        assert!(filter.matches(&message_event(conv, EventKind::Insert)));
        assert!(!filter.matches(&message_event(other, EventKind::Insert)));
    }

    #[test]
    fn wrong_table_never_matches() {
        let conv = ConversationId::new();
        let filter = ChangeFilter::table(Table::Notifications);
        assert!(!filter.matches(&message_event(conv, EventKind::Insert)));
    }
}
