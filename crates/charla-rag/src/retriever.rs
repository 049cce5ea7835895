use tracing::debug;

use charla_core::config::{EXAMPLES_TOP_K, KNOWLEDGE_TOP_K};
use charla_core::ids::TenantId;
use charla_core::provider::EmbeddingProvider;
use charla_store::examples::ExampleQuery;
use charla_store::types::{ConversationExample, KnowledgeEntry};
use charla_store::Stores;

use crate::error::Result;

/// Retrieved context for one turn.
#[derive(Debug, Default)]
pub struct RagContext {
    pub knowledge: Vec<(KnowledgeEntry, f32)>,
    pub examples: Vec<(ConversationExample, f32)>,
}

impl RagContext {
    pub fn is_empty(&self) -> bool {
        self.knowledge.is_empty() && self.examples.is_empty()
    }

    /// Render retrieved knowledge as a prompt block. Empty string when there
    /// is nothing to show, so the caller can skip the section entirely.
    pub fn knowledge_block(&self) -> String {
        if self.knowledge.is_empty() {
            return String::new();
        }
        let mut out = String::from("## Relevant knowledge\n");
        for (entry, _) in &self.knowledge {
            out.push_str(&format!("### {}\n{}\n", entry.title, entry.answer));
        }
        out
    }

    /// Render few-shot examples as transcript snippets.
    pub fn examples_block(&self) -> String {
        if self.examples.is_empty() {
            return String::new();
        }
        let mut out = String::from("## Example conversations\n");
        for (example, _) in &self.examples {
            out.push_str(&format!(
                "### {} (outcome: {})\n",
                example.scenario, example.outcome
            ));
            for turn in &example.messages {
                out.push_str(&format!("{}: {}\n", turn.role, turn.content));
            }
        }
        out
    }
}

/// Embed `query_text` once and retrieve both knowledge and examples.
///
/// `categories` comes from the current state's RAG categories (empty = no
/// filter); `state` anchors example retrieval to the current state.
pub async fn retrieve(
    embedder: &dyn EmbeddingProvider,
    stores: &Stores,
    tenant: &TenantId,
    query_text: &str,
    categories: &[String],
    state: Option<&str>,
) -> Result<RagContext> {
    if query_text.trim().is_empty() {
        return Ok(RagContext::default());
    }

    let query = embedder.embed(query_text).await?;

    let knowledge = stores
        .knowledge
        .find_similar(tenant, &query, KNOWLEDGE_TOP_K, categories)?;
    let examples = stores.examples.find_similar(
        &query,
        &ExampleQuery {
            state: state.map(str::to_string),
            category: None,
            limit: EXAMPLES_TOP_K,
        },
    )?;

    // When the state filter starves example retrieval, fall back to an
    // unfiltered search rather than prompting with nothing.
    let examples = if examples.is_empty() && state.is_some() {
        stores.examples.find_similar(
            &query,
            &ExampleQuery {
                state: None,
                category: None,
                limit: EXAMPLES_TOP_K,
            },
        )?
    } else {
        examples
    };

    debug!(
        tenant = %tenant,
        knowledge = knowledge.len(),
        examples = examples.len(),
        "rag context retrieved"
    );

    Ok(RagContext { knowledge, examples })
}
