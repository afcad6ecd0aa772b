//! Appeals against moderation decisions, and their review flow.
//!
//! Submitting notifies the privileged set; a review moves the appeal out
//! of pending exactly once and notifies the submitter of the outcome.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use molkhas_gateway::Gateway;
use molkhas_shared::{
    Appeal, AppealId, AppealStatus, ContentId, ContentKind, NewAppeal, NotificationKind,
    RelatedKind,
};

use crate::error::Result;
use crate::notifications::Notifications;
use crate::session::Session;

/// Outcome of an appeal review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppealDecision {
    Accept,
    Reject,
}

impl AppealDecision {
    fn status(self) -> AppealStatus {
        match self {
            AppealDecision::Accept => AppealStatus::Accepted,
            AppealDecision::Reject => AppealStatus::Rejected,
        }
    }
}

#[derive(Default)]
struct AppealsState {
    list: Vec<Appeal>,
    loading: bool,
}

/// Appeal submission and review.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct Appeals {
    gateway: Arc<dyn Gateway>,
    session: Session,
    notifications: Notifications,
    state: Arc<RwLock<AppealsState>>,
}

impl Appeals {
    pub fn new(gateway: Arc<dyn Gateway>, session: Session, notifications: Notifications) -> Self {
        Self {
            gateway,
            session,
            notifications,
            state: Arc::new(RwLock::new(AppealsState::default())),
        }
    }

    /// Re-fetch the appeal list. Read failures keep the previous list.
    pub async fn refresh(&self) {
        self.state.write().await.loading = true;
        match self.gateway.list_appeals().await {
            Ok(list) => {
                let mut state = self.state.write().await;
                state.list = list;
                state.loading = false;
            }
            Err(e) => {
                warn!(error = %e, "Appeal list refresh failed, keeping previous list");
                self.state.write().await.loading = false;
            }
        }
    }

    /// File an appeal against a moderation decision and alert reviewers.
    pub async fn submit(
        &self,
        content_id: ContentId,
        content_kind: ContentKind,
        content_title: Option<String>,
        reason: String,
        description: Option<String>,
    ) -> Result<Appeal> {
        let user = self.session.require_user().await?;

        let appeal = self
            .gateway
            .insert_appeal(NewAppeal {
                content_id,
                content_kind,
                content_title,
                reason,
                description,
                created_by: user,
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Appeal insert failed");
                e
            })?;

        self.notifications
            .notify_admins(
                "New appeal submitted",
                &format!("An appeal was filed: {}", appeal.reason),
                NotificationKind::AdminSubmission,
                Some(appeal.id.0),
                Some(RelatedKind::Appeal),
            )
            .await?;

        info!(appeal = %appeal.id, "Appeal submitted");
        self.refresh().await;
        Ok(appeal)
    }

    /// Review a pending appeal. Reviewer must hold elevated privileges;
    /// the backend rejects a second review of the same appeal. The
    /// submitter gets exactly one status notification.
    pub async fn review(&self, id: AppealId, decision: AppealDecision) -> Result<Appeal> {
        let reviewer = self.session.require_privileged().await?;

        let appeal = self
            .gateway
            .review_appeal(id, decision.status(), reviewer)
            .await
            .map_err(|e| {
                error!(appeal = %id, error = %e, "Appeal review failed");
                e
            })?;

        let (title, message) = match decision {
            AppealDecision::Accept => (
                "Appeal accepted",
                format!(
                    "Your appeal regarding \"{}\" was accepted",
                    appeal.content_title.as_deref().unwrap_or("your content")
                ),
            ),
            AppealDecision::Reject => (
                "Appeal rejected",
                format!(
                    "Your appeal regarding \"{}\" was rejected",
                    appeal.content_title.as_deref().unwrap_or("your content")
                ),
            ),
        };
        self.notifications
            .notify_user(
                appeal.created_by,
                title,
                &message,
                NotificationKind::AppealStatusUpdate,
                Some(appeal.id.0),
                Some(RelatedKind::Appeal),
            )
            .await?;

        info!(appeal = %appeal.id, status = ?appeal.status, reviewer = %reviewer, "Appeal reviewed");
        self.refresh().await;
        Ok(appeal)
    }

    // -- Accessors ----------------------------------------------------------

    pub async fn list(&self) -> Vec<Appeal> {
        self.state.read().await.list.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }
}
