//! Generation collaborator contract.
//!
//! One request/response call: a user query plus a small ranked set of
//! context snippets in, free text out. Key rotation, rate limiting,
//! and safety filtering live on the hosted side. Callers must treat
//! failure as non-fatal and fall back to showing the raw snippets.

use async_trait::async_trait;

use crate::error::GeneratorError;

/// A ranked context snippet handed to the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub content: String,
    pub score: f32,
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce free text answering `query`, grounded in `context`.
    async fn generate(&self, query: &str, context: &[Snippet]) -> Result<String, GeneratorError>;
}

/// A generator that always returns the same reply. Stand-in for local
/// development and tests.
pub struct FixedGenerator {
    reply: String,
}

impl FixedGenerator {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

#[async_trait]
impl Generator for FixedGenerator {
    async fn generate(&self, _query: &str, _context: &[Snippet]) -> Result<String, GeneratorError> {
        Ok(self.reply.clone())
    }
}
