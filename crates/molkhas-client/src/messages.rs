//! Message stream for the selected conversation.
//!
//! Exactly one conversation is "selected" at a time. Selecting tears down
//! the previous conversation's subscriptions before binding the new one,
//! loads the newest page, and then lets pushed inserts append at the tail.
//! Backfill and push meet in an [`OrderedLog`]: a message that arrives
//! through both paths is merged by id and kept once, at its first
//! position, so the chronological order never wobbles.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use molkhas_gateway::{ChangeFilter, Gateway, Row, Table};
use molkhas_shared::{
    AiDigest, ConversationId, Message, MessageId, NewMessage, OrderedLog,
};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::session::Session;
use crate::subscriptions::{Scope, SubscriptionSet};

#[derive(Default)]
struct MessagesState {
    active: Option<ConversationId>,
    log: OrderedLog<MessageId, Message>,
    /// Digests for the active conversation, newest first.
    digests: Vec<AiDigest>,
    sending: bool,
}

/// The open conversation's messages and digests.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct Messages {
    gateway: Arc<dyn Gateway>,
    session: Session,
    subs: SubscriptionSet,
    config: ClientConfig,
    state: Arc<RwLock<MessagesState>>,
}

impl Messages {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        session: Session,
        subs: SubscriptionSet,
        config: ClientConfig,
    ) -> Self {
        Self {
            gateway,
            session,
            subs,
            config,
            state: Arc::new(RwLock::new(MessagesState::default())),
        }
    }

    /// Select a conversation (or none).
    ///
    /// Teardown always runs first: the previous conversation's message and
    /// digest subscriptions are closed and its state dropped, so events
    /// from the old scope can never bleed into the new one. With `Some`,
    /// the newest page and the digests are loaded and fresh subscriptions
    /// bound to the new id.
    pub async fn select(&self, conversation: Option<ConversationId>) {
        let previous = {
            let mut state = self.state.write().await;
            let previous = state.active.take();
            state.log.clear();
            state.digests.clear();
            state.active = conversation;
            previous
        };

        if let Some(prev) = previous {
            self.subs.close(Scope::Messages(prev)).await;
            self.subs.close(Scope::Digests(prev)).await;
        }

        let conversation = match conversation {
            Some(id) => id,
            None => {
                debug!("Conversation deselected");
                return;
            }
        };
        debug!(conversation = %conversation, "Conversation selected");

        self.load_page(conversation, 0).await;
        self.load_digests(conversation).await;

        let rx = self
            .gateway
            .subscribe(ChangeFilter::inserts(Table::Messages).for_conversation(conversation));
        let stream = self.clone();
        self.subs
            .open(Scope::Messages(conversation), rx, move |event| {
                let stream = stream.clone();
                Box::pin(async move {
                    if let Row::Message(message) = event.row {
                        stream.apply_push(conversation, message).await;
                    }
                })
            })
            .await;

        let rx = self
            .gateway
            .subscribe(ChangeFilter::inserts(Table::Digests).for_conversation(conversation));
        let stream = self.clone();
        self.subs
            .open(Scope::Digests(conversation), rx, move |event| {
                let stream = stream.clone();
                Box::pin(async move {
                    if let Row::Digest(digest) = event.row {
                        stream.apply_digest(conversation, digest).await;
                    }
                })
            })
            .await;
    }

    /// Append a pushed message, unless the selection moved on while the
    /// event was in flight or backfill already delivered it.
    async fn apply_push(&self, conversation: ConversationId, message: Message) {
        let mut state = self.state.write().await;
        if state.active != Some(conversation) {
            debug!(conversation = %conversation, "Dropping push for stale selection");
            return;
        }
        if !state.log.push_back(message.id, message) {
            debug!("Duplicate pushed message ignored");
        }
    }

    async fn apply_digest(&self, conversation: ConversationId, digest: AiDigest) {
        let mut state = self.state.write().await;
        if state.active != Some(conversation) {
            return;
        }
        if !state.digests.iter().any(|d| d.id == digest.id) {
            state.digests.insert(0, digest);
        }
    }

    /// Fetch one page and merge it. Offset zero replaces the held list;
    /// deeper offsets prepend older history in front of it. Read failures
    /// keep whatever is already held.
    async fn load_page(&self, conversation: ConversationId, offset: u32) {
        let page = match self
            .gateway
            .messages_page(conversation, self.config.message_page_size, offset)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(conversation = %conversation, offset, error = %e, "Message page load failed");
                return;
            }
        };

        // Pages arrive newest first; the log reads oldest first.
        let oldest_first = page.into_iter().rev().map(|m| (m.id, m));

        let mut state = self.state.write().await;
        if state.active != Some(conversation) {
            return;
        }
        if offset == 0 {
            state.log.replace_all(oldest_first);
        } else {
            state.log.prepend_page(oldest_first);
        }
    }

    async fn load_digests(&self, conversation: ConversationId) {
        match self.gateway.digests_for(conversation).await {
            Ok(digests) => {
                let mut state = self.state.write().await;
                if state.active == Some(conversation) {
                    state.digests = digests;
                }
            }
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "Digest load failed");
            }
        }
    }

    /// Load one more page of older history for the selected conversation.
    /// `offset` counts messages from the newest end.
    pub async fn load_more(&self, offset: u32) {
        let conversation = match self.state.read().await.active {
            Some(id) => id,
            None => return,
        };
        self.load_page(conversation, offset).await;
    }

    /// Send a message. The held list is NOT updated here; the insert comes
    /// back through the push channel like everyone else's messages, so
    /// sender and receivers converge on the same ordering.
    pub async fn send(&self, conversation: ConversationId, content: &str) -> Result<Message> {
        let user = self.session.require_user().await?;

        self.state.write().await.sending = true;
        let result = self
            .gateway
            .insert_message(NewMessage {
                conversation_id: conversation,
                sender_id: user,
                content: content.to_string(),
            })
            .await;
        self.state.write().await.sending = false;

        match result {
            Ok(message) => {
                debug!(conversation = %conversation, message = %message.id, "Message sent");
                Ok(message)
            }
            Err(e) => {
                error!(conversation = %conversation, error = %e, "Message send failed");
                Err(e.into())
            }
        }
    }

    /// Mark every message in `conversation` not sent by the signed-in
    /// user as read.
    pub async fn mark_read(&self, conversation: ConversationId) -> Result<()> {
        let user = self.session.require_user().await?;
        self.gateway.mark_messages_read(conversation, user).await?;
        let mut state = self.state.write().await;
        if state.active == Some(conversation) {
            state.log.for_each_mut(|m| {
                if m.sender_id != user {
                    m.read = true;
                }
            });
        }
        Ok(())
    }

    /// Request a digest of the selected conversation. The produced digest
    /// arrives asynchronously through the digest push channel.
    pub async fn request_digest(&self, conversation: ConversationId) -> Result<()> {
        self.session.require_user().await?;
        match self.gateway.trigger_digest(conversation).await {
            Ok(()) => {
                info!(conversation = %conversation, "Digest requested");
                Ok(())
            }
            Err(e) => {
                error!(conversation = %conversation, error = %e, "Digest request failed");
                Err(e.into())
            }
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub async fn active(&self) -> Option<ConversationId> {
        self.state.read().await.active
    }

    /// The held messages, oldest first.
    pub async fn list(&self) -> Vec<Message> {
        self.state.read().await.log.to_vec()
    }

    /// Digests of the selected conversation, newest first.
    pub async fn digests(&self) -> Vec<AiDigest> {
        self.state.read().await.digests.clone()
    }

    pub async fn is_sending(&self) -> bool {
        self.state.read().await.sending
    }

    /// Drop all held state. Called on sign-out, after subscriptions are
    /// closed.
    pub(crate) async fn clear(&self) {
        *self.state.write().await = MessagesState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use molkhas_gateway::{ConversationRepo, MemoryAuth, MemoryGateway, MessageRepo};
    use molkhas_shared::UserId;

    async fn rig() -> (Messages, Arc<MemoryGateway>, UserId) {
        let auth = Arc::new(MemoryAuth::new());
        let gateway = Arc::new(MemoryGateway::new());
        auth.register("amal@example.edu", "pw").await;
        let session = Session::new(auth.clone(), gateway.clone(), Default::default());
        let account = session.sign_in("amal@example.edu", "pw").await.unwrap();
        let stream = Messages::new(
            gateway.clone(),
            session,
            SubscriptionSet::new(),
            Default::default(),
        );
        (stream, gateway, account.id)
    }

    async fn conversation_with(
        gateway: &MemoryGateway,
        members: &[UserId],
    ) -> ConversationId {
        let conversation = gateway
            .create_conversation(None, molkhas_shared::ConversationKind::Group, members[0])
            .await
            .unwrap();
        for member in members {
            gateway.add_participant(conversation.id, *member).await.unwrap();
        }
        conversation.id
    }

    async fn seed_messages(gateway: &MemoryGateway, conversation: ConversationId, from: UserId, n: usize) {
        for i in 0..n {
            gateway
                .insert_message(NewMessage {
                    conversation_id: conversation,
                    sender_id: from,
                    content: format!("m{i}"),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_select_loads_newest_page_oldest_first() {
        let (stream, gateway, user) = rig().await;
        let conversation = conversation_with(&gateway, &[user]).await;
        seed_messages(&gateway, conversation, user, 60).await;

        stream.select(Some(conversation)).await;
        let messages = stream.list().await;
        assert_eq!(messages.len(), 50);
        assert_eq!(messages.first().map(|m| m.content.as_str()), Some("m10"));
        assert_eq!(messages.last().map(|m| m.content.as_str()), Some("m59"));
    }

    #[tokio::test]
    async fn test_load_more_prepends_older_history() {
        let (stream, gateway, user) = rig().await;
        let conversation = conversation_with(&gateway, &[user]).await;
        seed_messages(&gateway, conversation, user, 60).await;

        stream.select(Some(conversation)).await;
        stream.load_more(50).await;
        let messages = stream.list().await;
        assert_eq!(messages.len(), 60);
        assert_eq!(messages.first().map(|m| m.content.as_str()), Some("m0"));
        assert_eq!(messages.last().map(|m| m.content.as_str()), Some("m59"));
    }

    #[tokio::test]
    async fn test_push_and_backfill_merge_by_id() {
        let (stream, gateway, user) = rig().await;
        let conversation = conversation_with(&gateway, &[user]).await;
        stream.select(Some(conversation)).await;

        // Pushed insert lands first...
        let sent = stream.send(conversation, "hello").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stream.list().await.len(), 1);

        // ...then a backfill of the same page must not duplicate it.
        stream.load_more(0).await;
        let messages = stream.list().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, sent.id);
    }

    #[tokio::test]
    async fn test_reselect_binds_only_new_conversation() {
        let (stream, gateway, user) = rig().await;
        let a = conversation_with(&gateway, &[user]).await;
        let b = conversation_with(&gateway, &[user]).await;

        stream.select(Some(a)).await;
        stream.select(Some(b)).await;

        // A message in the old conversation must not appear.
        seed_messages(&gateway, a, user, 1).await;
        seed_messages(&gateway, b, user, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let messages = stream.list().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].conversation_id, b);
        assert_eq!(stream.active().await, Some(b));

        // Exactly one message subscription survives, and it is b's.
        assert!(stream.subs.is_open(Scope::Messages(b)).await);
        assert!(!stream.subs.is_open(Scope::Messages(a)).await);
        let message_scopes = stream
            .subs
            .active_scopes()
            .await
            .into_iter()
            .filter(|s| matches!(s, Scope::Messages(_)))
            .count();
        assert_eq!(message_scopes, 1);
    }

    #[tokio::test]
    async fn test_deselect_clears_state() {
        let (stream, gateway, user) = rig().await;
        let conversation = conversation_with(&gateway, &[user]).await;
        seed_messages(&gateway, conversation, user, 3).await;

        stream.select(Some(conversation)).await;
        assert_eq!(stream.list().await.len(), 3);

        stream.select(None).await;
        assert!(stream.list().await.is_empty());
        assert!(stream.active().await.is_none());
    }

    #[tokio::test]
    async fn test_digest_request_arrives_by_push() {
        let (stream, gateway, user) = rig().await;
        let conversation = conversation_with(&gateway, &[user]).await;
        seed_messages(&gateway, conversation, user, 5).await;

        stream.select(Some(conversation)).await;
        assert!(stream.digests().await.is_empty());

        stream.request_digest(conversation).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stream.digests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_read_skips_own_messages() {
        let (stream, gateway, user) = rig().await;
        let other = UserId::new();
        let conversation = conversation_with(&gateway, &[user, other]).await;
        seed_messages(&gateway, conversation, user, 1).await;
        seed_messages(&gateway, conversation, other, 1).await;

        stream.select(Some(conversation)).await;
        stream.mark_read(conversation).await.unwrap();

        let messages = stream.list().await;
        let own = messages.iter().find(|m| m.sender_id == user).unwrap();
        let theirs = messages.iter().find(|m| m.sender_id == other).unwrap();
        assert!(!own.read);
        assert!(theirs.read);
    }

    #[tokio::test]
    async fn test_failed_backfill_keeps_held_messages() {
        let (stream, gateway, user) = rig().await;
        let conversation = conversation_with(&gateway, &[user]).await;
        seed_messages(&gateway, conversation, user, 3).await;
        stream.select(Some(conversation)).await;
        assert_eq!(stream.list().await.len(), 3);

        gateway.set_fail_reads(true);
        stream.load_more(0).await;
        assert_eq!(stream.list().await.len(), 3);
    }
}
