//! Curated conversation examples for few-shot prompting.

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::similarity::top_k;
use crate::types::{ConversationExample, ExampleCategory};

pub struct ExampleStore {
    db: Arc<Mutex<Connection>>,
}

/// Filters for example retrieval.
#[derive(Debug, Clone, Default)]
pub struct ExampleQuery {
    /// Restrict to examples whose primary state matches.
    pub state: Option<String>,
    /// Restrict to one scenario category.
    pub category: Option<ExampleCategory>,
    pub limit: usize,
}

impl ExampleStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn insert(&self, example: &ConversationExample) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversation_examples
             (id, scenario, category, outcome, primary_state, state_flow, messages, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                 scenario = excluded.scenario, category = excluded.category,
                 outcome = excluded.outcome, primary_state = excluded.primary_state,
                 state_flow = excluded.state_flow, messages = excluded.messages,
                 embedding = excluded.embedding",
            rusqlite::params![
                example.id,
                example.scenario,
                example.category.as_str(),
                example.outcome,
                example.primary_state,
                serde_json::to_string(&example.state_flow)?,
                serde_json::to_string(&example.messages)?,
                serde_json::to_string(&example.embedding)?
            ],
        )?;
        Ok(())
    }

    /// Nearest examples to `query`, honouring the filters.
    pub fn find_similar(&self, query: &[f32], opts: &ExampleQuery) -> Result<Vec<(ConversationExample, f32)>> {
        let candidates = self.filtered(opts)?;
        Ok(top_k(candidates, query, opts.limit.max(1), |e| &e.embedding, |_| 0))
    }

    /// Examples anchored in one state, without a similarity query.
    pub fn find_by_state(&self, state: &str, limit: usize) -> Result<Vec<ConversationExample>> {
        let opts = ExampleQuery {
            state: Some(state.to_string()),
            category: None,
            limit,
        };
        let mut out = self.filtered(&opts)?;
        out.truncate(limit.max(1));
        Ok(out)
    }

    fn filtered(&self, opts: &ExampleQuery) -> Result<Vec<ConversationExample>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, scenario, category, outcome, primary_state, state_flow, messages, embedding
             FROM conversation_examples",
        )?;
        let raws: Vec<RawExample> = stmt
            .query_map([], row_to_raw)?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(db);

        let mut out = Vec::new();
        for raw in raws {
            let example = raw_to_example(raw)?;
            if let Some(state) = &opts.state {
                if &example.primary_state != state {
                    continue;
                }
            }
            if let Some(category) = opts.category {
                if example.category != category {
                    continue;
                }
            }
            out.push(example);
        }
        Ok(out)
    }
}

type RawExample = (String, String, String, String, String, String, String, String);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawExample> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn raw_to_example(raw: RawExample) -> Result<ConversationExample> {
    let (id, scenario, category, outcome, primary_state, state_flow, messages, embedding) = raw;
    Ok(ConversationExample {
        id,
        scenario,
        category: ExampleCategory::from_str(&category).map_err(|reason| StoreError::CorruptRow {
            table: "conversation_examples",
            reason,
        })?,
        outcome,
        primary_state,
        state_flow: serde_json::from_str(&state_flow)?,
        messages: serde_json::from_str(&messages)?,
        embedding: serde_json::from_str(&embedding)?,
    })
}
