//! Content moderation flows: summary and news submission, review, and the
//! notifications each step produces.
//!
//! Everything lands as pending. Submission alerts the privileged set;
//! approval notifies the owner and announces the publication; rejection
//! notifies the owner only.

use std::sync::Arc;

use tracing::{error, info};

use molkhas_gateway::Gateway;
use molkhas_shared::{
    ContentId, ContentStatus, NewNews, NewSummary, News, NotificationKind, RelatedKind, Summary,
};

use crate::error::Result;
use crate::notifications::Notifications;
use crate::session::Session;

/// Submission and review of moderated content.
///
/// Cloning is cheap; the struct is a thin facade over the gateway and the
/// notification center.
#[derive(Clone)]
pub struct Moderation {
    gateway: Arc<dyn Gateway>,
    session: Session,
    notifications: Notifications,
}

impl Moderation {
    pub fn new(gateway: Arc<dyn Gateway>, session: Session, notifications: Notifications) -> Self {
        Self {
            gateway,
            session,
            notifications,
        }
    }

    // -- Submission ---------------------------------------------------------

    /// Submit a summary for review.
    pub async fn submit_summary(
        &self,
        title: String,
        subject: Option<String>,
        description: Option<String>,
        file_url: Option<String>,
    ) -> Result<Summary> {
        let user = self.session.require_user().await?;
        let summary = self
            .gateway
            .insert_summary(NewSummary {
                title,
                subject,
                description,
                file_url,
                created_by: user,
            })
            .await
            .map_err(|e| {
                error!(error = %e, "Summary insert failed");
                e
            })?;

        self.notifications
            .notify_admins(
                "New summary awaiting review",
                &format!("\"{}\" was submitted for review", summary.title),
                NotificationKind::AdminSubmission,
                Some(summary.id.0),
                Some(RelatedKind::Summary),
            )
            .await?;

        info!(summary = %summary.id, "Summary submitted");
        Ok(summary)
    }

    /// Submit a news item for review.
    pub async fn submit_news(&self, title: String, body: String) -> Result<News> {
        let user = self.session.require_user().await?;
        let news = self
            .gateway
            .insert_news(NewNews {
                title,
                body,
                created_by: user,
            })
            .await
            .map_err(|e| {
                error!(error = %e, "News insert failed");
                e
            })?;

        self.notifications
            .notify_admins(
                "New news item awaiting review",
                &format!("\"{}\" was submitted for review", news.title),
                NotificationKind::AdminSubmission,
                Some(news.id.0),
                Some(RelatedKind::News),
            )
            .await?;

        info!(news = %news.id, "News item submitted");
        Ok(news)
    }

    // -- Review -------------------------------------------------------------

    /// Approve a summary: publish it, tell the owner, announce it.
    pub async fn approve_summary(&self, id: ContentId) -> Result<Summary> {
        self.session.require_privileged().await?;
        let summary = self
            .gateway
            .set_summary_status(id, ContentStatus::Approved)
            .await?;

        self.notifications
            .notify_user(
                summary.created_by,
                "Your summary was published",
                &format!("\"{}\" is now available", summary.title),
                NotificationKind::ContentPublished,
                Some(summary.id.0),
                Some(RelatedKind::Summary),
            )
            .await?;
        self.notifications
            .notify_all_users(
                "New summary published",
                &summary.title,
                NotificationKind::ContentPublished,
                Some(summary.id.0),
                Some(RelatedKind::Summary),
            )
            .await?;

        info!(summary = %summary.id, "Summary approved");
        Ok(summary)
    }

    /// Reject a summary; only the owner hears about it.
    pub async fn reject_summary(&self, id: ContentId) -> Result<Summary> {
        self.session.require_privileged().await?;
        let summary = self
            .gateway
            .set_summary_status(id, ContentStatus::Rejected)
            .await?;

        self.notifications
            .notify_user(
                summary.created_by,
                "Your summary was rejected",
                &format!("\"{}\" did not pass review", summary.title),
                NotificationKind::System,
                Some(summary.id.0),
                Some(RelatedKind::Summary),
            )
            .await?;

        info!(summary = %summary.id, "Summary rejected");
        Ok(summary)
    }

    /// Approve a news item: publish it, tell the owner, announce it.
    pub async fn approve_news(&self, id: ContentId) -> Result<News> {
        self.session.require_privileged().await?;
        let news = self.gateway.set_news_status(id, ContentStatus::Approved).await?;

        self.notifications
            .notify_user(
                news.created_by,
                "Your news item was published",
                &format!("\"{}\" is now available", news.title),
                NotificationKind::ContentPublished,
                Some(news.id.0),
                Some(RelatedKind::News),
            )
            .await?;
        self.notifications
            .notify_all_users(
                "News published",
                &news.title,
                NotificationKind::ContentPublished,
                Some(news.id.0),
                Some(RelatedKind::News),
            )
            .await?;

        info!(news = %news.id, "News item approved");
        Ok(news)
    }

    /// Reject a news item; only the owner hears about it.
    pub async fn reject_news(&self, id: ContentId) -> Result<News> {
        self.session.require_privileged().await?;
        let news = self.gateway.set_news_status(id, ContentStatus::Rejected).await?;

        self.notifications
            .notify_user(
                news.created_by,
                "Your news item was rejected",
                &format!("\"{}\" did not pass review", news.title),
                NotificationKind::System,
                Some(news.id.0),
                Some(RelatedKind::News),
            )
            .await?;

        info!(news = %news.id, "News item rejected");
        Ok(news)
    }

    // -- Queries ------------------------------------------------------------

    /// Summaries awaiting review.
    pub async fn pending_summaries(&self) -> Result<Vec<Summary>> {
        self.session.require_privileged().await?;
        Ok(self
            .gateway
            .list_summaries(Some(ContentStatus::Pending))
            .await?)
    }

    /// News items awaiting review.
    pub async fn pending_news(&self) -> Result<Vec<News>> {
        self.session.require_privileged().await?;
        Ok(self.gateway.list_news(Some(ContentStatus::Pending)).await?)
    }

    /// Published summaries, visible to everyone signed in.
    pub async fn published_summaries(&self) -> Result<Vec<Summary>> {
        self.session.require_user().await?;
        Ok(self
            .gateway
            .list_summaries(Some(ContentStatus::Approved))
            .await?)
    }

    /// Published news, visible to everyone signed in.
    pub async fn published_news(&self) -> Result<Vec<News>> {
        self.session.require_user().await?;
        Ok(self.gateway.list_news(Some(ContentStatus::Approved)).await?)
    }
}
