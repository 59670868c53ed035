//! Query pipeline: retrieve → rerank → assemble context → generate.

use std::sync::Arc;
use std::time::Duration;

use coderag_llm::{LlmProvider, Message};

use crate::context::{Context, ContextConfig, assemble_context, format_context};
use crate::error::{Dependency, IndexError, Result};
use crate::rerank::Reranker;
use crate::retriever::{CodeRetriever, Query};

pub const SYSTEM_PROMPT: &str = "You are an expert Elixir developer answering questions about an indexed codebase.\n\
Use the code context supplied with each question as reference and follow the patterns and \
conventions it shows. Cite file paths when you rely on a snippet. Provide working code examples \
where they help. If the question arrives without code context, say that your answer is not \
grounded in the codebase.";

/// A generated answer and the grounding it was built from.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub context: Context,
    /// The context held at least one chunk.
    pub grounded: bool,
}

/// Build the generation request: system instruction, prior turns verbatim, then the
/// question with its context.
#[must_use]
pub fn build_messages(question: &str, context: &Context, history: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(SYSTEM_PROMPT));
    messages.extend_from_slice(history);
    messages.push(Message::user(format!(
        "{}\n\nQuestion: {question}",
        format_context(context)
    )));
    messages
}

pub struct CodeAssistant<P: LlmProvider> {
    retriever: CodeRetriever<P>,
    reranker: Reranker,
    context: ContextConfig,
    generator: Arc<P>,
    generation_timeout: Duration,
}

impl<P: LlmProvider> CodeAssistant<P> {
    #[must_use]
    pub fn new(
        retriever: CodeRetriever<P>,
        reranker: Reranker,
        context: ContextConfig,
        generator: Arc<P>,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            retriever,
            reranker,
            context,
            generator,
            generation_timeout,
        }
    }

    /// Retrieve, rerank and pack grounding context for `query`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DependencyUnavailable`] if the embedder fails.
    pub async fn context_for(&self, query: &Query) -> Result<Context> {
        let candidates = self.retriever.retrieve(query).await?;
        let k = self.retriever.effective_k(query.k);
        let ranked = self.reranker.rerank(&query.text, candidates, k);
        Ok(assemble_context(ranked, &self.context))
    }

    /// Answer `query`, passing `history` to the generator unchanged.
    ///
    /// An empty or unavailable index still produces an answer, marked ungrounded.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DependencyUnavailable`] if the embedder or the generator fails
    /// or misses its deadline.
    pub async fn ask(&self, query: &Query, history: &[Message]) -> Result<Answer> {
        let context = self.context_for(query).await?;
        let grounded = !context.is_empty();
        if !grounded {
            tracing::info!("no relevant code found, answering without grounding");
        }

        let messages = build_messages(&query.text, &context, history);
        let text = match tokio::time::timeout(self.generation_timeout, self.generator.chat(&messages)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(IndexError::unavailable(Dependency::Generator, e)),
            Err(_) => {
                return Err(IndexError::unavailable(
                    Dependency::Generator,
                    format!("no response within {:?}", self.generation_timeout),
                ));
            }
        };

        tracing::debug!(
            chunks = context.chunks.len(),
            truncated = context.truncated,
            grounded,
            answer_len = text.len(),
            "answer generated"
        );
        Ok(Answer {
            text,
            context,
            grounded,
        })
    }
}
