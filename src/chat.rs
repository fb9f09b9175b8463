//! Conversation orchestrator.
//!
//! One call to [`ChatEngine::process_message`] runs a full turn:
//! identify the user and session, persist the inbound message, retrieve
//! context, select a persona, extract profile attributes, compose the
//! prompt, generate a reply (or the fallback apology), persist the
//! outbound message, and reclassify the conversation.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agents;
use crate::config::{ChatConfig, GenerationConfig};
use crate::generation::CompletionProvider;
use crate::models::{Message, RetrievedChunk, User};
use crate::profile;
use crate::retriever::Retriever;
use crate::store;

/// The reply used whenever generation fails. The turn still persists both
/// messages, so the thread stays coherent when the provider recovers.
pub const FALLBACK_RESPONSE: &str = "I apologize, but I'm having trouble processing your \
                                     request right now. Please try again later.";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Everything a caller learns from one turn.
#[derive(Debug, Serialize)]
pub struct ChatOutcome {
    pub response: String,
    pub user_id: String,
    pub session_id: String,
    pub conversation_id: String,
    /// Source filenames of the retrieved context, deduplicated in rank order.
    pub sources: Vec<String>,
    pub agent: String,
    /// True when this turn added anything to the user's profile.
    pub profile_extracted: bool,
    pub processing_ms: u64,
}

pub struct ChatEngine {
    pool: SqlitePool,
    retriever: Retriever,
    completions: Arc<dyn CompletionProvider>,
    config: ChatConfig,
    temperature: f32,
    max_tokens: u32,
}

impl ChatEngine {
    pub fn new(
        pool: SqlitePool,
        retriever: Retriever,
        completions: Arc<dyn CompletionProvider>,
        config: ChatConfig,
        generation: &GenerationConfig,
    ) -> Self {
        Self {
            pool,
            retriever,
            completions,
            config,
            temperature: generation.temperature,
            max_tokens: generation.max_tokens,
        }
    }

    pub async fn process_message(&self, request: &ChatRequest) -> Result<ChatOutcome> {
        let started = Instant::now();

        // Identify. Anonymous callers get a synthetic identity scoped to
        // this session so the thread still accumulates state.
        let user_id = match &request.user_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => format!("session-{}", Uuid::new_v4()),
        };
        let user = store::ensure_user(&self.pool, &user_id).await?;
        store::ensure_session(&self.pool, &user_id, self.config.session_hours).await?;

        let session_id = match &request.session_id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => Uuid::new_v4().to_string(),
        };

        let conversation =
            store::find_or_create_conversation(&self.pool, &user_id, &session_id).await?;

        // History is loaded before the inbound message is appended so the
        // prompt does not contain the current message twice.
        let history =
            store::recent_messages(&self.pool, &conversation.id, self.config.max_history).await?;

        store::append_message(&self.pool, &conversation.id, "user", &request.message, &json!({}))
            .await?;

        // Retrieval failure degrades to an uncontextualized turn.
        let context = match self.retriever.retrieve(&request.message, None).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(error = %e, "retrieval failed, continuing without context");
                Vec::new()
            }
        };

        let agent = agents::select_agent(&request.message, &history);

        let extracted = profile::extract(&self.completions, &request.message, &history).await;
        let profile_extracted = !extracted.is_empty();
        let user = if profile_extracted {
            store::apply_profile(&self.pool, &user_id, &extracted).await?
        } else {
            user
        };

        let prompt = self.compose_prompt(&request.message, &context, &history, &user);

        let (response, sources) = match self
            .completions
            .complete(&agent.system_prompt(), &prompt, self.temperature, self.max_tokens)
            .await
        {
            Ok(text) => (text, dedup_sources(&context)),
            Err(e) => {
                warn!(error = %e, "generation failed, returning fallback response");
                (FALLBACK_RESPONSE.to_string(), Vec::new())
            }
        };

        let mut outbound_metadata = json!({
            "agent": agent.name,
            "sources": sources.clone(),
            "profile_extracted": profile_extracted,
        });
        if profile_extracted {
            outbound_metadata["profile"] = serde_json::to_value(&extracted)?;
        }
        store::append_message(&self.pool, &conversation.id, "assistant", &response, &outbound_metadata)
            .await?;

        let category =
            agents::classify_category(&format!("{} {}", request.message, response));
        store::set_category(&self.pool, &conversation.id, category).await?;

        let processing_ms = started.elapsed().as_millis() as u64;
        info!(
            user_id = %user_id,
            conversation_id = %conversation.id,
            agent = agent.name,
            sources = sources.len(),
            category,
            processing_ms,
            "turn complete"
        );

        Ok(ChatOutcome {
            response,
            user_id,
            session_id,
            conversation_id: conversation.id,
            sources,
            agent: agent.name.to_string(),
            profile_extracted,
            processing_ms,
        })
    }

    fn compose_prompt(
        &self,
        message: &str,
        context: &[RetrievedChunk],
        history: &[Message],
        user: &User,
    ) -> String {
        let mut prompt = String::new();

        if !context.is_empty() {
            prompt.push_str("Relevant information from the knowledge base:\n");
            for (i, chunk) in context.iter().enumerate() {
                prompt.push_str(&format!(
                    "[{}] (from {})\n{}\n\n",
                    i + 1,
                    chunk.filename(),
                    chunk.content
                ));
            }
        }

        let mut known = Vec::new();
        if let Some(name) = &user.name {
            known.push(format!("name: {}", name));
        }
        if let Some(email) = &user.email {
            known.push(format!("email: {}", email));
        }
        if let Some(company) = &user.company {
            known.push(format!("company: {}", company));
        }
        if !known.is_empty() {
            prompt.push_str(&format!("Known about this client: {}\n\n", known.join(", ")));
        }

        let recent = history
            .iter()
            .rev()
            .take(self.config.history_in_prompt)
            .rev();
        let mut wrote_header = false;
        for msg in recent {
            if !wrote_header {
                prompt.push_str("Recent conversation:\n");
                wrote_header = true;
            }
            prompt.push_str(&format!("{}: {}\n", msg.role, msg.content));
        }
        if wrote_header {
            prompt.push('\n');
        }

        prompt.push_str(&format!("Client message: {}\n\nRespond to the client.", message));
        prompt
    }
}

fn dedup_sources(context: &[RetrievedChunk]) -> Vec<String> {
    let mut sources = Vec::new();
    for chunk in context {
        let name = chunk.filename().to_string();
        if !sources.contains(&name) {
            sources.push(name);
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn hit(filename: &str) -> RetrievedChunk {
        RetrievedChunk {
            content: "text".to_string(),
            metadata: json!({ "filename": filename }),
            similarity_score: 0.9,
        }
    }

    #[test]
    fn test_dedup_sources_keeps_rank_order() {
        let context = vec![hit("a.csv"), hit("b.txt"), hit("a.csv")];
        assert_eq!(dedup_sources(&context), vec!["a.csv", "b.txt"]);
    }

    #[test]
    fn test_dedup_sources_unknown_metadata() {
        let context = vec![RetrievedChunk {
            content: "x".to_string(),
            metadata: Value::Null,
            similarity_score: 0.5,
        }];
        assert_eq!(dedup_sources(&context), vec!["unknown"]);
    }
}
