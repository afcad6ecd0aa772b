//! In-memory gateway implementation.
//!
//! A faithful stand-in for the hosted backend used by tests and local
//! development. All writes serialize through one lock, so change-feed
//! delivery follows commit order — the same per-conversation ordering
//! assumption the hosted change feed documents.
//!
//! Fault-injection knobs (`set_privilege_latency`, `set_fail_reads`)
//! simulate a slow or failing backend for lifecycle tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use molkhas_shared::{
    AiDigest, AnalyticsEvent, Appeal, AppealId, AppealStatus, ContentId, ContentStatus,
    Conversation, ConversationDetails, ConversationId, ConversationKind, DigestId, Message,
    MessageId, NewAppeal, NewMessage, NewNews, NewNotification, NewSummary, News, Notification,
    NotificationId, Participant, Summary, UserId,
};

use crate::error::{GatewayError, Result};
use crate::feed::{ChangeEvent, ChangeFilter, EventKind, PresenceUpdate, Row, Table};
use crate::traits::{
    AnalyticsRepo, AppealRepo, ChangeFeed, ContentRepo, ConversationRepo, DigestRepo, MessageRepo,
    NotificationRepo, PresenceChannel, PrivilegeRepo,
};

/// How many trailing messages the stand-in summarize function reads.
const DIGEST_TAIL: usize = 20;

struct FeedSender {
    filter: ChangeFilter,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct State {
    conversations: Vec<Conversation>,
    participants: Vec<Participant>,
    messages: Vec<Message>,
    digests: Vec<AiDigest>,
    notifications: Vec<Notification>,
    privileged: Vec<UserId>,
    appeals: Vec<Appeal>,
    summaries: Vec<Summary>,
    news: Vec<News>,
    analytics: Vec<AnalyticsEvent>,
}

/// In-memory persistence gateway.
pub struct MemoryGateway {
    state: RwLock<State>,
    feeds: StdMutex<Vec<FeedSender>>,
    online: StdMutex<Vec<UserId>>,
    presence_feeds: StdMutex<Vec<mpsc::UnboundedSender<PresenceUpdate>>>,
    privilege_latency: StdMutex<Option<Duration>>,
    fail_reads: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            feeds: StdMutex::new(Vec::new()),
            online: StdMutex::new(Vec::new()),
            presence_feeds: StdMutex::new(Vec::new()),
            privilege_latency: StdMutex::new(None),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Add a user to the privileged-users table.
    pub async fn grant_privilege(&self, user: UserId) {
        let mut state = self.state.write().await;
        if !state.privileged.contains(&user) {
            state.privileged.push(user);
        }
    }

    /// Remove a user from the privileged-users table.
    pub async fn revoke_privilege(&self, user: UserId) {
        let mut state = self.state.write().await;
        state.privileged.retain(|u| *u != user);
    }

    /// Delay every privilege lookup, simulating a slow backend.
    pub fn set_privilege_latency(&self, latency: Option<Duration>) {
        *self.privilege_latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Make list reads fail, simulating a backend outage.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(GatewayError::Backend("simulated read failure".to_string()));
        }
        Ok(())
    }

    /// Fan an event out to every matching feed, pruning feeds whose
    /// receiver has been dropped.
    fn emit(&self, table: Table, kind: EventKind, row: Row) {
        let event = ChangeEvent { table, kind, row };
        let mut feeds = self.feeds.lock().unwrap_or_else(|e| e.into_inner());
        feeds.retain(|feed| {
            if !feed.filter.matches(&event) {
                return !feed.tx.is_closed();
            }
            feed.tx.send(event.clone()).is_ok()
        });
    }

    /// Push the current online set to every presence feed, pruning
    /// feeds whose receiver has been dropped. Callers hold the
    /// `online` lock across the mutation and this fan-out so every
    /// subscriber sees the same sequence of snapshots.
    fn emit_presence(&self, online: &[UserId]) {
        let update = PresenceUpdate { online: online.to_vec() };
        let mut feeds = self.presence_feeds.lock().unwrap_or_else(|e| e.into_inner());
        feeds.retain(|tx| tx.send(update.clone()).is_ok());
    }

    #[cfg(test)]
    fn open_feeds(&self) -> usize {
        self.feeds.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed for MemoryGateway {
    fn subscribe(&self, filter: ChangeFilter) -> mpsc::UnboundedReceiver<ChangeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(FeedSender { filter, tx });
        debug!(?filter, "change feed opened");
        rx
    }
}

#[async_trait]
impl PresenceChannel for MemoryGateway {
    async fn track_presence(&self, user: UserId) -> Result<()> {
        let mut online = self.online.lock().unwrap_or_else(|e| e.into_inner());
        if !online.contains(&user) {
            online.push(user);
            self.emit_presence(&online);
        }
        Ok(())
    }

    async fn untrack_presence(&self, user: UserId) -> Result<()> {
        let mut online = self.online.lock().unwrap_or_else(|e| e.into_inner());
        let before = online.len();
        online.retain(|u| *u != user);
        if online.len() != before {
            self.emit_presence(&online);
        }
        Ok(())
    }

    fn subscribe_presence(&self) -> mpsc::UnboundedReceiver<PresenceUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        let online = self.online.lock().unwrap_or_else(|e| e.into_inner());
        // Deliver the current set up front so new subscribers never
        // wait for the next join or leave to learn who is online.
        let _ = tx.send(PresenceUpdate { online: online.clone() });
        self.presence_feeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }
}

#[async_trait]
impl ConversationRepo for MemoryGateway {
    async fn create_conversation(
        &self,
        name: Option<String>,
        kind: ConversationKind,
        created_by: UserId,
    ) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: ConversationId::new(),
            name,
            kind,
            created_by,
            created_at: now,
            updated_at: now,
        };
        let mut state = self.state.write().await;
        state.conversations.push(conversation.clone());
        self.emit(
            Table::Conversations,
            EventKind::Insert,
            Row::Conversation(conversation.clone()),
        );
        drop(state);
        Ok(conversation)
    }

    async fn find_individual_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> Result<Option<Conversation>> {
        let state = self.state.read().await;
        let found = state
            .conversations
            .iter()
            .filter(|c| c.kind == ConversationKind::Individual)
            .find(|c| {
                let members: Vec<UserId> = state
                    .participants
                    .iter()
                    .filter(|p| p.conversation_id == c.id)
                    .map(|p| p.user_id)
                    .collect();
                members.len() == 2 && members.contains(&a) && members.contains(&b)
            })
            .cloned();
        Ok(found)
    }

    async fn conversations_for_user(&self, user: UserId) -> Result<Vec<ConversationDetails>> {
        self.check_reads()?;
        let state = self.state.read().await;
        let mut details: Vec<ConversationDetails> = state
            .conversations
            .iter()
            .filter(|c| {
                state
                    .participants
                    .iter()
                    .any(|p| p.conversation_id == c.id && p.user_id == user)
            })
            .map(|c| {
                let participants = state
                    .participants
                    .iter()
                    .filter(|p| p.conversation_id == c.id)
                    .map(|p| p.user_id)
                    .collect();
                let last_message = state
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.conversation_id == c.id)
                    .cloned();
                let digests = state
                    .digests
                    .iter()
                    .rev()
                    .filter(|d| d.conversation_id == c.id)
                    .cloned()
                    .collect();
                ConversationDetails {
                    conversation: c.clone(),
                    participants,
                    last_message,
                    digests,
                }
            })
            .collect();
        details.sort_by(|a, b| {
            b.conversation
                .updated_at
                .cmp(&a.conversation.updated_at)
                .then(b.conversation.created_at.cmp(&a.conversation.created_at))
        });
        Ok(details)
    }

    async fn add_participant(
        &self,
        conversation: ConversationId,
        user: UserId,
    ) -> Result<Participant> {
        let mut state = self.state.write().await;
        if !state.conversations.iter().any(|c| c.id == conversation) {
            return Err(GatewayError::NotFound);
        }
        if state
            .participants
            .iter()
            .any(|p| p.conversation_id == conversation && p.user_id == user)
        {
            return Err(GatewayError::Conflict(
                "user is already a participant".to_string(),
            ));
        }
        let participant = Participant {
            conversation_id: conversation,
            user_id: user,
            joined_at: Utc::now(),
        };
        state.participants.push(participant.clone());
        self.emit(
            Table::Participants,
            EventKind::Insert,
            Row::Participant(participant.clone()),
        );
        Ok(participant)
    }

    async fn remove_participant(&self, conversation: ConversationId, user: UserId) -> Result<()> {
        let mut state = self.state.write().await;
        let before = state.participants.len();
        let mut removed = None;
        state.participants.retain(|p| {
            if p.conversation_id == conversation && p.user_id == user {
                removed = Some(p.clone());
                false
            } else {
                true
            }
        });
        if state.participants.len() == before {
            return Err(GatewayError::NotFound);
        }

        // An emptied conversation is destroyed outright.
        let emptied = !state
            .participants
            .iter()
            .any(|p| p.conversation_id == conversation);
        let mut destroyed = None;
        if emptied {
            state.messages.retain(|m| m.conversation_id != conversation);
            state.digests.retain(|d| d.conversation_id != conversation);
            state.conversations.retain(|c| {
                if c.id == conversation {
                    destroyed = Some(c.clone());
                    false
                } else {
                    true
                }
            });
        }

        if let Some(participant) = removed {
            self.emit(
                Table::Participants,
                EventKind::Delete,
                Row::Participant(participant),
            );
        }
        if let Some(conversation) = destroyed {
            self.emit(
                Table::Conversations,
                EventKind::Delete,
                Row::Conversation(conversation),
            );
        }
        Ok(())
    }

    async fn is_participant(&self, conversation: ConversationId, user: UserId) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state
            .participants
            .iter()
            .any(|p| p.conversation_id == conversation && p.user_id == user))
    }

    async fn delete_participants_in(&self, conversation: ConversationId) -> Result<()> {
        let mut state = self.state.write().await;
        let mut removed = Vec::new();
        state.participants.retain(|p| {
            if p.conversation_id == conversation {
                removed.push(p.clone());
                false
            } else {
                true
            }
        });

        for participant in removed {
            self.emit(
                Table::Participants,
                EventKind::Delete,
                Row::Participant(participant),
            );
        }
        Ok(())
    }

    async fn delete_conversation_row(&self, conversation: ConversationId) -> Result<()> {
        let mut state = self.state.write().await;
        let mut removed = None;
        state.conversations.retain(|c| {
            if c.id == conversation {
                removed = Some(c.clone());
                false
            } else {
                true
            }
        });
        // Digests hang off the conversation row on the backend.
        state.digests.retain(|d| d.conversation_id != conversation);

        let conversation = removed.ok_or(GatewayError::NotFound)?;
        self.emit(
            Table::Conversations,
            EventKind::Delete,
            Row::Conversation(conversation),
        );
        Ok(())
    }
}

#[async_trait]
impl MessageRepo for MemoryGateway {
    async fn insert_message(&self, new: NewMessage) -> Result<Message> {
        let now = Utc::now();
        let message = Message {
            id: MessageId::new(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            content: new.content,
            read: false,
            created_at: now,
        };

        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == new.conversation_id)
            .ok_or(GatewayError::NotFound)?;
        conversation.updated_at = now;
        let touched = conversation.clone();
        state.messages.push(message.clone());

        // Emitted while the write guard is held so a concurrent insert
        // cannot interleave its events between ours; feed delivery
        // order stays commit order.
        self.emit(Table::Messages, EventKind::Insert, Row::Message(message.clone()));
        self.emit(
            Table::Conversations,
            EventKind::Update,
            Row::Conversation(touched),
        );
        Ok(message)
    }

    async fn messages_page(
        &self,
        conversation: ConversationId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        self.check_reads()?;
        let state = self.state.read().await;
        Ok(state
            .messages
            .iter()
            .rev()
            .filter(|m| m.conversation_id == conversation)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_messages_read(&self, conversation: ConversationId, reader: UserId) -> Result<()> {
        let mut state = self.state.write().await;
        let mut changed = Vec::new();
        for message in state
            .messages
            .iter_mut()
            .filter(|m| m.conversation_id == conversation && m.sender_id != reader && !m.read)
        {
            message.read = true;
            changed.push(message.clone());
        }

        for message in changed {
            self.emit(Table::Messages, EventKind::Update, Row::Message(message));
        }
        Ok(())
    }

    async fn delete_messages_in(&self, conversation: ConversationId) -> Result<()> {
        let mut state = self.state.write().await;
        let mut removed = Vec::new();
        state.messages.retain(|m| {
            if m.conversation_id == conversation {
                removed.push(m.clone());
                false
            } else {
                true
            }
        });

        for message in removed {
            self.emit(Table::Messages, EventKind::Delete, Row::Message(message));
        }
        Ok(())
    }
}

#[async_trait]
impl DigestRepo for MemoryGateway {
    async fn digests_for(&self, conversation: ConversationId) -> Result<Vec<AiDigest>> {
        self.check_reads()?;
        let state = self.state.read().await;
        Ok(state
            .digests
            .iter()
            .rev()
            .filter(|d| d.conversation_id == conversation)
            .cloned()
            .collect())
    }

    async fn trigger_digest(&self, conversation: ConversationId) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.conversations.iter().any(|c| c.id == conversation) {
            return Err(GatewayError::NotFound);
        }
        let tail: Vec<&Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation)
            .rev()
            .take(DIGEST_TAIL)
            .collect();
        let summary = if tail.is_empty() {
            "No messages to summarize yet.".to_string()
        } else {
            format!("Digest of the last {} messages.", tail.len())
        };
        let important: Vec<String> = tail.iter().take(3).map(|m| m.id.to_string()).collect();
        let digest = AiDigest {
            id: DigestId::new(),
            conversation_id: conversation,
            summary,
            important_messages: Some(serde_json::json!(important)),
            created_at: Utc::now(),
        };
        state.digests.push(digest.clone());
        self.emit(Table::Digests, EventKind::Insert, Row::Digest(digest));
        Ok(())
    }
}

#[async_trait]
impl NotificationRepo for MemoryGateway {
    async fn insert_notification(&self, new: NewNotification) -> Result<Notification> {
        let notification = Notification {
            id: NotificationId::new(),
            user_id: new.user_id,
            title: new.title,
            message: new.message,
            kind: new.kind,
            related_id: new.related_id,
            related_kind: new.related_kind,
            read: false,
            created_at: Utc::now(),
        };
        let mut state = self.state.write().await;
        state.notifications.push(notification.clone());
        self.emit(
            Table::Notifications,
            EventKind::Insert,
            Row::Notification(notification.clone()),
        );
        drop(state);
        Ok(notification)
    }

    async fn insert_notifications(&self, batch: Vec<NewNotification>) -> Result<()> {
        for new in batch {
            self.insert_notification(new).await?;
        }
        Ok(())
    }

    async fn notifications_for(&self, user: UserId, limit: u32) -> Result<Vec<Notification>> {
        self.check_reads()?;
        let state = self.state.read().await;
        Ok(state
            .notifications
            .iter()
            .rev()
            .filter(|n| n.user_id == user)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_notification_read(&self, id: NotificationId) -> Result<()> {
        let mut state = self.state.write().await;
        let notification = state
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(GatewayError::NotFound)?;
        notification.read = true;
        let updated = notification.clone();
        self.emit(
            Table::Notifications,
            EventKind::Update,
            Row::Notification(updated),
        );
        Ok(())
    }

    async fn mark_all_notifications_read(&self, user: UserId) -> Result<()> {
        let mut state = self.state.write().await;
        let mut changed = Vec::new();
        for notification in state
            .notifications
            .iter_mut()
            .filter(|n| n.user_id == user && !n.read)
        {
            notification.read = true;
            changed.push(notification.clone());
        }

        for notification in changed {
            self.emit(
                Table::Notifications,
                EventKind::Update,
                Row::Notification(notification),
            );
        }
        Ok(())
    }

    async fn delete_notification(&self, id: NotificationId) -> Result<()> {
        let mut state = self.state.write().await;
        let mut removed = None;
        state.notifications.retain(|n| {
            if n.id == id {
                removed = Some(n.clone());
                false
            } else {
                true
            }
        });

        let notification = removed.ok_or(GatewayError::NotFound)?;
        self.emit(
            Table::Notifications,
            EventKind::Delete,
            Row::Notification(notification),
        );
        Ok(())
    }
}

#[async_trait]
impl PrivilegeRepo for MemoryGateway {
    async fn is_privileged(&self, user: UserId) -> Result<bool> {
        self.check_reads()?;
        let latency = *self.privilege_latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let state = self.state.read().await;
        Ok(state.privileged.contains(&user))
    }

    async fn privileged_users(&self) -> Result<Vec<UserId>> {
        let state = self.state.read().await;
        Ok(state.privileged.clone())
    }
}

#[async_trait]
impl AppealRepo for MemoryGateway {
    async fn insert_appeal(&self, new: NewAppeal) -> Result<Appeal> {
        let now = Utc::now();
        let appeal = Appeal {
            id: AppealId::new(),
            content_id: new.content_id,
            content_kind: new.content_kind,
            content_title: new.content_title,
            reason: new.reason,
            description: new.description,
            status: AppealStatus::Pending,
            created_by: new.created_by,
            reviewed_by: None,
            created_at: now,
            updated_at: now,
        };
        let mut state = self.state.write().await;
        state.appeals.push(appeal.clone());
        self.emit(Table::Appeals, EventKind::Insert, Row::Appeal(appeal.clone()));
        drop(state);
        Ok(appeal)
    }

    async fn list_appeals(&self) -> Result<Vec<Appeal>> {
        self.check_reads()?;
        let state = self.state.read().await;
        Ok(state.appeals.iter().rev().cloned().collect())
    }

    async fn review_appeal(
        &self,
        id: AppealId,
        status: AppealStatus,
        reviewer: UserId,
    ) -> Result<Appeal> {
        let mut state = self.state.write().await;
        let appeal = state
            .appeals
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(GatewayError::NotFound)?;
        if appeal.status != AppealStatus::Pending {
            return Err(GatewayError::Conflict(
                "appeal has already been reviewed".to_string(),
            ));
        }
        appeal.status = status;
        appeal.reviewed_by = Some(reviewer);
        appeal.updated_at = Utc::now();
        let updated = appeal.clone();
        self.emit(Table::Appeals, EventKind::Update, Row::Appeal(updated.clone()));
        Ok(updated)
    }
}

#[async_trait]
impl ContentRepo for MemoryGateway {
    async fn insert_summary(&self, new: NewSummary) -> Result<Summary> {
        let summary = Summary {
            id: ContentId::new(),
            title: new.title,
            subject: new.subject,
            description: new.description,
            file_url: new.file_url,
            status: ContentStatus::Pending,
            created_by: new.created_by,
            created_at: Utc::now(),
        };
        self.state.write().await.summaries.push(summary.clone());
        Ok(summary)
    }

    async fn insert_news(&self, new: NewNews) -> Result<News> {
        let news = News {
            id: ContentId::new(),
            title: new.title,
            body: new.body,
            status: ContentStatus::Pending,
            created_by: new.created_by,
            created_at: Utc::now(),
        };
        self.state.write().await.news.push(news.clone());
        Ok(news)
    }

    async fn set_summary_status(&self, id: ContentId, status: ContentStatus) -> Result<Summary> {
        let mut state = self.state.write().await;
        let summary = state
            .summaries
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(GatewayError::NotFound)?;
        summary.status = status;
        Ok(summary.clone())
    }

    async fn set_news_status(&self, id: ContentId, status: ContentStatus) -> Result<News> {
        let mut state = self.state.write().await;
        let news = state
            .news
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or(GatewayError::NotFound)?;
        news.status = status;
        Ok(news.clone())
    }

    async fn list_summaries(&self, status: Option<ContentStatus>) -> Result<Vec<Summary>> {
        self.check_reads()?;
        let state = self.state.read().await;
        Ok(state
            .summaries
            .iter()
            .rev()
            .filter(|s| status.map_or(true, |st| s.status == st))
            .cloned()
            .collect())
    }

    async fn list_news(&self, status: Option<ContentStatus>) -> Result<Vec<News>> {
        self.check_reads()?;
        let state = self.state.read().await;
        Ok(state
            .news
            .iter()
            .rev()
            .filter(|n| status.map_or(true, |st| n.status == st))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AnalyticsRepo for MemoryGateway {
    async fn record_event(&self, event: AnalyticsEvent) -> Result<()> {
        self.state.write().await.analytics.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molkhas_shared::NotificationKind;

    async fn pair_conversation(gw: &MemoryGateway, a: UserId, b: UserId) -> Conversation {
        let conversation = gw
            .create_conversation(None, ConversationKind::Individual, a)
            .await
            .unwrap();
        gw.add_participant(conversation.id, a).await.unwrap();
        gw.add_participant(conversation.id, b).await.unwrap();
        conversation
    }

    #[tokio::test]
    async fn find_individual_matches_exact_pair_only() {
        let gw = MemoryGateway::new();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());
        let conversation = pair_conversation(&gw, a, b).await;

        let found = gw.find_individual_conversation(a, b).await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(conversation.id));
        // Order of the pair does not matter.
        let found = gw.find_individual_conversation(b, a).await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(conversation.id));
        assert!(gw.find_individual_conversation(a, c).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn message_insert_bumps_conversation_and_feeds_in_commit_order() {
        let gw = MemoryGateway::new();
        let (a, b) = (UserId::new(), UserId::new());
        let conversation = pair_conversation(&gw, a, b).await;

        let mut feed = gw.subscribe(ChangeFilter::inserts(Table::Messages).for_conversation(conversation.id));

        for i in 0..3 {
            gw.insert_message(NewMessage {
                conversation_id: conversation.id,
                sender_id: a,
                content: format!("msg {i}"),
            })
            .await
            .unwrap();
        }

        for i in 0..3 {
            let event = feed.recv().await.unwrap();
            match event.row {
                Row::Message(m) => assert_eq!(m.content, format!("msg {i}")),
                other => panic!("unexpected row: {other:?}"),
            }
        }

        let details = gw.conversations_for_user(a).await.unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(
            details[0].last_message.as_ref().map(|m| m.content.as_str()),
            Some("msg 2")
        );
        assert!(details[0].conversation.updated_at > details[0].conversation.created_at);
    }

    #[tokio::test]
    async fn concurrent_inserts_feed_in_commit_order() {
        let gw = std::sync::Arc::new(MemoryGateway::new());
        let (a, b) = (UserId::new(), UserId::new());
        let conversation = pair_conversation(&gw, a, b).await;

        let mut feed = gw.subscribe(ChangeFilter::inserts(Table::Messages).for_conversation(conversation.id));

        let mut handles = Vec::new();
        for i in 0..16 {
            let gw = gw.clone();
            handles.push(tokio::spawn(async move {
                gw.insert_message(NewMessage {
                    conversation_id: conversation.id,
                    sender_id: a,
                    content: format!("msg {i}"),
                })
                .await
                .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Feed delivery order must match the order the store committed
        // the rows, whatever order the writers raced in.
        let stored: Vec<MessageId> = gw
            .state
            .read()
            .await
            .messages
            .iter()
            .map(|m| m.id)
            .collect();
        for id in stored {
            let event = feed.recv().await.unwrap();
            match event.row {
                Row::Message(m) => assert_eq!(m.id, id),
                other => panic!("unexpected row: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn presence_snapshots_track_joins_and_leaves() {
        let gw = MemoryGateway::new();
        let (a, b) = (UserId::new(), UserId::new());

        let mut feed = gw.subscribe_presence();
        // The current set arrives immediately, before any join.
        assert_eq!(feed.recv().await.unwrap().online, vec![]);

        gw.track_presence(a).await.unwrap();
        gw.track_presence(b).await.unwrap();
        // Tracking twice is idempotent and emits nothing.
        gw.track_presence(a).await.unwrap();
        gw.untrack_presence(a).await.unwrap();

        assert_eq!(feed.recv().await.unwrap().online, vec![a]);
        assert_eq!(feed.recv().await.unwrap().online, vec![a, b]);
        assert_eq!(feed.recv().await.unwrap().online, vec![b]);

        // A late subscriber sees the surviving set up front.
        let mut late = gw.subscribe_presence();
        assert_eq!(late.recv().await.unwrap().online, vec![b]);
    }

    #[tokio::test]
    async fn messages_page_is_newest_first_with_offset() {
        let gw = MemoryGateway::new();
        let (a, b) = (UserId::new(), UserId::new());
        let conversation = pair_conversation(&gw, a, b).await;
        for i in 0..5 {
            gw.insert_message(NewMessage {
                conversation_id: conversation.id,
                sender_id: a,
                content: format!("m{i}"),
            })
            .await
            .unwrap();
        }

        let page = gw.messages_page(conversation.id, 2, 0).await.unwrap();
        assert_eq!(
            page.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["m4", "m3"]
        );
        let page = gw.messages_page(conversation.id, 2, 2).await.unwrap();
        assert_eq!(
            page.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["m2", "m1"]
        );
    }

    #[tokio::test]
    async fn last_leaver_destroys_the_conversation() {
        let gw = MemoryGateway::new();
        let (a, b) = (UserId::new(), UserId::new());
        let conversation = pair_conversation(&gw, a, b).await;

        gw.remove_participant(conversation.id, a).await.unwrap();
        assert!(gw
            .find_individual_conversation(a, b)
            .await
            .unwrap()
            .is_none());
        assert!(!gw.conversations_for_user(b).await.unwrap().is_empty());

        gw.remove_participant(conversation.id, b).await.unwrap();
        assert!(gw.conversations_for_user(b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn review_appeal_is_single_shot() {
        let gw = MemoryGateway::new();
        let (submitter, reviewer) = (UserId::new(), UserId::new());
        let appeal = gw
            .insert_appeal(NewAppeal {
                content_id: ContentId::new(),
                content_kind: molkhas_shared::ContentKind::Summary,
                content_title: Some("Algebra II notes".to_string()),
                reason: "wrongly_rejected".to_string(),
                description: None,
                created_by: submitter,
            })
            .await
            .unwrap();

        let reviewed = gw
            .review_appeal(appeal.id, AppealStatus::Accepted, reviewer)
            .await
            .unwrap();
        assert_eq!(reviewed.status, AppealStatus::Accepted);
        assert_eq!(reviewed.reviewed_by, Some(reviewer));

        assert!(matches!(
            gw.review_appeal(appeal.id, AppealStatus::Rejected, reviewer).await,
            Err(GatewayError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned_on_next_emit() {
        let gw = MemoryGateway::new();
        let feed = gw.subscribe(ChangeFilter::table(Table::Notifications));
        assert_eq!(gw.open_feeds(), 1);
        drop(feed);

        gw.insert_notification(NewNotification {
            user_id: UserId::new(),
            title: "t".to_string(),
            message: "m".to_string(),
            kind: NotificationKind::System,
            related_id: None,
            related_kind: None,
        })
        .await
        .unwrap();
        assert_eq!(gw.open_feeds(), 0);
    }

    #[tokio::test]
    async fn failed_reads_surface_as_backend_errors() {
        let gw = MemoryGateway::new();
        gw.set_fail_reads(true);
        assert!(matches!(
            gw.conversations_for_user(UserId::new()).await,
            Err(GatewayError::Backend(_))
        ));
        gw.set_fail_reads(false);
        assert!(gw.conversations_for_user(UserId::new()).await.is_ok());
    }
}
