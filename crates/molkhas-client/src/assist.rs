//! Assistant retrieval: rank uploaded material against a question and
//! hand the best snippets to the generation collaborator.
//!
//! Retrieval is a deliberately simple lexical scorer, not an embedding
//! index: an exact phrase hit dominates, whole-word hits beat substring
//! hits, and newer material wins ties. Generation failures degrade to
//! showing the ranked snippets themselves.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use molkhas_gateway::{Gateway, Generator, Snippet};
use molkhas_shared::constants::ASSIST_CONTEXT_SNIPPETS;
use molkhas_shared::{ActionKind, AnalyticsEvent};

use crate::session::Session;

const PHRASE_WEIGHT: f32 = 10.0;
const WORD_WEIGHT: f32 = 4.0;
const SUBSTRING_WEIGHT: f32 = 2.0;
/// Maximum bonus a chunk gets for being at the end of the corpus.
const RECENCY_WEIGHT: f32 = 0.5;

/// Reply returned by [`Assistant::answer`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantReply {
    pub text: String,
    /// Whether `text` came from the generator (as opposed to a fallback).
    pub generated: bool,
    /// The snippets the answer was grounded in, best first.
    pub context: Vec<Snippet>,
}

/// Question answering over user-uploaded study material.
///
/// Cloning is cheap and every clone shares the same corpus.
#[derive(Clone)]
pub struct Assistant {
    generator: Arc<dyn Generator>,
    gateway: Arc<dyn Gateway>,
    session: Session,
    chunks: Arc<RwLock<Vec<String>>>,
}

impl Assistant {
    pub fn new(generator: Arc<dyn Generator>, gateway: Arc<dyn Gateway>, session: Session) -> Self {
        Self {
            generator,
            gateway,
            session,
            chunks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Replace the corpus with the chunks of an uploaded export. Lines
    /// too short to carry meaning are dropped.
    pub async fn load_corpus(&self, text: &str) {
        let chunks: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| line.len() > 3)
            .map(str::to_string)
            .collect();
        debug!(chunks = chunks.len(), "Assistant corpus loaded");
        *self.chunks.write().await = chunks;
    }

    pub async fn corpus_len(&self) -> usize {
        self.chunks.read().await.len()
    }

    /// Rank the corpus against `query` and return the best snippets,
    /// highest score first. Chunks that match nothing are excluded.
    pub async fn rank(&self, query: &str) -> Vec<Snippet> {
        let chunks = self.chunks.read().await;
        let total = chunks.len();
        let mut scored: Vec<Snippet> = chunks
            .iter()
            .enumerate()
            .filter_map(|(index, chunk)| {
                let score = score_chunk(query, chunk, index, total);
                (score > 0.0).then(|| Snippet {
                    content: chunk.clone(),
                    score,
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(ASSIST_CONTEXT_SNIPPETS);
        scored
    }

    /// Answer `query` from the loaded corpus.
    ///
    /// Never fails: no matching material yields a fixed reply, and a
    /// generator error falls back to the raw snippets. Usage analytics
    /// are recorded best-effort when a user is signed in.
    pub async fn answer(&self, query: &str) -> AssistantReply {
        self.record_interaction().await;

        let context = self.rank(query).await;
        if context.is_empty() {
            debug!("No matching material for query");
            return AssistantReply {
                text: "I could not find anything in the uploaded material about that.".to_string(),
                generated: false,
                context: Vec::new(),
            };
        }

        match self.generator.generate(query, &context).await {
            Ok(text) => AssistantReply {
                text,
                generated: true,
                context,
            },
            Err(e) => {
                warn!(error = %e, "Generation failed, falling back to raw snippets");
                let text = context
                    .iter()
                    .map(|s| s.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                AssistantReply {
                    text,
                    generated: false,
                    context,
                }
            }
        }
    }

    async fn record_interaction(&self) {
        if let Some(user) = self.session.user_id().await {
            let event = AnalyticsEvent::bare(user, ActionKind::AiInteraction, "assistant");
            if let Err(e) = self.gateway.record_event(event).await {
                warn!(error = %e, "Could not record assistant interaction");
            }
        }
    }
}

/// Lexical relevance of one chunk. `index`/`total` feed the recency
/// bonus: later chunks score marginally higher so ties resolve toward
/// newer material.
fn score_chunk(query: &str, chunk: &str, index: usize, total: usize) -> f32 {
    let query_lower = query.to_lowercase();
    let chunk_lower = chunk.to_lowercase();

    let mut score = 0.0;
    if chunk_lower.contains(&query_lower) {
        score += PHRASE_WEIGHT;
    }

    let chunk_words: Vec<&str> = chunk_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    for word in query_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
    {
        if chunk_words.contains(&word) {
            score += WORD_WEIGHT;
        } else if chunk_lower.contains(word) {
            score += SUBSTRING_WEIGHT;
        }
    }

    if score > 0.0 && total > 1 {
        score += RECENCY_WEIGHT * (index as f32 / (total - 1) as f32);
    }
    score
}
