//! Grounded answer generation.
//!
//! Retrieved chunks are packed into the system prompt's `{context}` slot in
//! retrieval order, separated by blank lines. The whole prompt (system text,
//! context, and question) must fit in the configured token budget; chunks that
//! do not fit are dropped from the tail, never cut mid-text.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::GenerationConfig;
use crate::error::{KbError, Result};
use crate::generation::{create_generator, GenerationProvider, Prompt};
use crate::models::{Answer, ScoredChunk};
use crate::provider::{with_retry, RetryPolicy};
use crate::tokenizer::Tokenizer;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions about the user's documents.\n\
Answer ONLY using the information in the context below.\n\
If the answer is not in the context, say clearly that the documents do not contain that information.\n\
Do not make up information or draw on outside knowledge.\n\
\n\
Context:\n\
{context}";

const CONTEXT_PLACEHOLDER: &str = "{context}";
const CHUNK_SEPARATOR: &str = "\n\n";

/// The prompt for one question, after budgeting.
#[derive(Debug, Clone)]
pub struct QaContext {
    /// System instructions with the context block substituted in.
    pub system: String,
    pub query: String,
    /// Ids of the chunks included, in prompt order.
    pub source_ids: Vec<usize>,
    pub prompt_tokens: usize,
}

impl QaContext {
    pub fn prompt(&self) -> Prompt {
        Prompt {
            system: self.system.clone(),
            user: self.query.clone(),
        }
    }
}

pub struct AnswerGenerator {
    provider: Arc<dyn GenerationProvider>,
    tokenizer: Arc<dyn Tokenizer>,
    template: String,
    budget: usize,
    retry: RetryPolicy,
}

impl AnswerGenerator {
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        tokenizer: Arc<dyn Tokenizer>,
        template: Option<String>,
        budget: usize,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let template = template.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        if !template.contains(CONTEXT_PLACEHOLDER) {
            return Err(KbError::InvalidConfiguration(
                "system prompt must contain a {context} placeholder".into(),
            ));
        }
        Ok(Self {
            provider,
            tokenizer,
            template,
            budget,
            retry,
        })
    }

    pub fn from_config(config: &GenerationConfig, tokenizer: Arc<dyn Tokenizer>) -> Result<Self> {
        Self::new(
            create_generator(config)?,
            tokenizer,
            config.system_prompt.clone(),
            config.prompt_budget(),
            config.retry_policy(),
        )
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    fn render(&self, chunks: &[ScoredChunk]) -> String {
        let block = chunks
            .iter()
            .map(|c| c.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join(CHUNK_SEPARATOR);
        self.template.replace(CONTEXT_PLACEHOLDER, &block)
    }

    /// Build the budgeted prompt from retrieved chunks.
    ///
    /// Uses the longest prefix of `retrieved` whose prompt fits the budget.
    pub fn assemble_context(&self, query: &str, retrieved: &[ScoredChunk]) -> Result<QaContext> {
        let query_tokens = self.tokenizer.count_tokens(query);
        let cost = |system: &str| self.tokenizer.count_tokens(system) + query_tokens;

        let bare = cost(&self.render(&[]));
        if bare > self.budget {
            return Err(KbError::ContextBudgetExceeded {
                needed: bare,
                budget: self.budget,
            });
        }

        let mut take = retrieved.len();
        loop {
            let system = self.render(&retrieved[..take]);
            let tokens = cost(&system);
            if tokens <= self.budget || take == 0 {
                if take < retrieved.len() {
                    debug!(
                        kept = take,
                        dropped = retrieved.len() - take,
                        budget = self.budget,
                        "context trimmed to fit prompt budget"
                    );
                }
                return Ok(QaContext {
                    system,
                    query: query.to_string(),
                    source_ids: retrieved[..take].iter().map(|c| c.chunk.id).collect(),
                    prompt_tokens: tokens,
                });
            }
            take -= 1;
        }
    }

    /// Generate an answer grounded in `retrieved`.
    pub async fn answer(&self, query: &str, retrieved: &[ScoredChunk]) -> Result<Answer> {
        let ctx = self.assemble_context(query, retrieved)?;
        let prompt = ctx.prompt();
        let provider = &self.provider;
        let prompt_ref = &prompt;

        let text = with_retry(&self.retry, "generate", move || provider.generate(prompt_ref))
            .await
            .map_err(|e| KbError::GenerationService {
                attempts: e.attempts,
                source: e.last,
            })?;

        info!(
            sources = ctx.source_ids.len(),
            prompt_tokens = ctx.prompt_tokens,
            "answer generated"
        );
        Ok(Answer {
            text,
            sources_count: ctx.source_ids.len(),
            source_ids: ctx.source_ids,
        })
    }
}
