//! Knowledge-base entries with nearest-neighbour lookup.
//!
//! Entries are cross-tenant; a tenant with rows in `tenant_knowledge_sets`
//! sees only its selection, a tenant with none sees the whole active base.
//! Candidate sets are small enough (hundreds of entries) that in-process
//! cosine ranking beats shipping vectors to an external index.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use charla_core::ids::TenantId;

use crate::error::{Result, StoreError};
use crate::similarity::top_k;
use crate::types::KnowledgeEntry;

pub struct KnowledgeStore {
    db: Arc<Mutex<Connection>>,
}

impl KnowledgeStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn insert(&self, entry: &KnowledgeEntry) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO knowledge_entries
             (id, title, answer, category, tags, summary, related, embedding, priority, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 title = excluded.title, answer = excluded.answer,
                 category = excluded.category, tags = excluded.tags,
                 summary = excluded.summary, related = excluded.related,
                 embedding = excluded.embedding, priority = excluded.priority,
                 active = excluded.active",
            rusqlite::params![
                entry.id,
                entry.title,
                entry.answer,
                entry.category,
                serde_json::to_string(&entry.tags)?,
                entry.summary,
                serde_json::to_string(&entry.related)?,
                serde_json::to_string(&entry.embedding)?,
                entry.priority,
                entry.active as i64
            ],
        )?;
        Ok(())
    }

    /// Pin a tenant to a subset of the knowledge base.
    pub fn assign_to_tenant(&self, tenant: &TenantId, entry_ids: &[String]) -> Result<()> {
        let db = self.db.lock().unwrap();
        for id in entry_ids {
            db.execute(
                "INSERT OR IGNORE INTO tenant_knowledge_sets (tenant_id, entry_id) VALUES (?1, ?2)",
                rusqlite::params![tenant.as_str(), id],
            )?;
        }
        Ok(())
    }

    /// Top-`k` entries by cosine similarity to `query`, visible to the
    /// tenant, optionally restricted to `categories`.
    pub fn find_similar(
        &self,
        tenant: &TenantId,
        query: &[f32],
        k: usize,
        categories: &[String],
    ) -> Result<Vec<(KnowledgeEntry, f32)>> {
        let candidates = self.visible_entries(tenant)?;
        let filtered: Vec<KnowledgeEntry> = if categories.is_empty() {
            candidates
        } else {
            candidates
                .into_iter()
                .filter(|e| categories.iter().any(|c| c == &e.category))
                .collect()
        };
        Ok(top_k(filtered, query, k, |e| &e.embedding, |e| e.priority))
    }

    /// Entries in one category, ordered by priority.
    pub fn find_by_category(&self, tenant: &TenantId, category: &str, k: usize) -> Result<Vec<KnowledgeEntry>> {
        let mut entries: Vec<KnowledgeEntry> = self
            .visible_entries(tenant)?
            .into_iter()
            .filter(|e| e.category == category)
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.priority));
        entries.truncate(k);
        Ok(entries)
    }

    /// Entries matching any of `tags`, ordered by match count then priority.
    pub fn find_by_tags(&self, tenant: &TenantId, tags: &[String], k: usize) -> Result<Vec<KnowledgeEntry>> {
        let mut matched: Vec<(usize, KnowledgeEntry)> = self
            .visible_entries(tenant)?
            .into_iter()
            .filter_map(|e| {
                let hits = e.tags.iter().filter(|t| tags.contains(*t)).count();
                (hits > 0).then_some((hits, e))
            })
            .collect();
        matched.sort_by(|(ha, a), (hb, b)| hb.cmp(ha).then_with(|| b.priority.cmp(&a.priority)));
        Ok(matched.into_iter().take(k).map(|(_, e)| e).collect())
    }

    fn visible_entries(&self, tenant: &TenantId) -> Result<Vec<KnowledgeEntry>> {
        let db = self.db.lock().unwrap();
        let has_set: i64 = db.query_row(
            "SELECT COUNT(*) FROM tenant_knowledge_sets WHERE tenant_id = ?1",
            [tenant.as_str()],
            |row| row.get(0),
        )?;

        let raws: Vec<RawEntry> = if has_set > 0 {
            let mut stmt = db.prepare(
                "SELECT e.id, e.title, e.answer, e.category, e.tags, e.summary, e.related,
                        e.embedding, e.priority, e.active
                 FROM knowledge_entries e
                 JOIN tenant_knowledge_sets s ON s.entry_id = e.id AND s.tenant_id = ?1
                 WHERE e.active = 1",
            )?;
            let rows = stmt
                .query_map([tenant.as_str()], row_to_raw)?
                .filter_map(|r| r.ok())
                .collect();
            rows
        } else {
            let mut stmt = db.prepare(
                "SELECT id, title, answer, category, tags, summary, related,
                        embedding, priority, active
                 FROM knowledge_entries
                 WHERE active = 1",
            )?;
            let rows = stmt.query_map([], row_to_raw)?.filter_map(|r| r.ok()).collect();
            rows
        };
        drop(db);
        raws.into_iter().map(raw_to_entry).collect()
    }
}

type RawEntry = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
);

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn raw_to_entry(raw: RawEntry) -> Result<KnowledgeEntry> {
    let (id, title, answer, category, tags, summary, related, embedding, priority, active) = raw;
    Ok(KnowledgeEntry {
        id,
        title,
        answer,
        category,
        tags: serde_json::from_str(&tags)?,
        summary,
        related: serde_json::from_str(&related)?,
        embedding: serde_json::from_str(&embedding)?,
        priority,
        active: active != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stores;

    fn entry(id: &str, category: &str, embedding: Vec<f32>, priority: i64) -> KnowledgeEntry {
        KnowledgeEntry {
            id: id.to_string(),
            title: format!("title {id}"),
            answer: format!("answer {id}"),
            category: category.to_string(),
            tags: vec![category.to_string()],
            summary: String::new(),
            related: Vec::new(),
            embedding,
            priority,
            active: true,
        }
    }

    #[test]
    fn find_similar_ranks_by_cosine() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        stores.knowledge.insert(&entry("k1", "pricing", vec![1.0, 0.0], 0)).unwrap();
        stores.knowledge.insert(&entry("k2", "pricing", vec![0.0, 1.0], 0)).unwrap();
        stores.knowledge.insert(&entry("k3", "onboarding", vec![0.9, 0.1], 0)).unwrap();

        let hits = stores
            .knowledge
            .find_similar(&tenant, &[1.0, 0.0], 2, &[])
            .unwrap();
        assert_eq!(hits[0].0.id, "k1");
        assert_eq!(hits[1].0.id, "k3");
    }

    #[test]
    fn category_filter_applies() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        stores.knowledge.insert(&entry("k1", "pricing", vec![1.0, 0.0], 0)).unwrap();
        stores.knowledge.insert(&entry("k2", "onboarding", vec![1.0, 0.0], 0)).unwrap();

        let hits = stores
            .knowledge
            .find_similar(&tenant, &[1.0, 0.0], 5, &["onboarding".to_string()])
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "k2");
    }

    #[test]
    fn kb_set_restricts_tenant_visibility() {
        let stores = Stores::open_in_memory().unwrap();
        let restricted = TenantId::from("t1");
        let open = TenantId::from("t2");
        stores.knowledge.insert(&entry("k1", "pricing", vec![1.0, 0.0], 0)).unwrap();
        stores.knowledge.insert(&entry("k2", "pricing", vec![1.0, 0.0], 0)).unwrap();
        stores.knowledge.assign_to_tenant(&restricted, &["k1".to_string()]).unwrap();

        assert_eq!(stores.knowledge.find_similar(&restricted, &[1.0, 0.0], 5, &[]).unwrap().len(), 1);
        assert_eq!(stores.knowledge.find_similar(&open, &[1.0, 0.0], 5, &[]).unwrap().len(), 2);
    }

    #[test]
    fn tags_rank_by_match_count() {
        let stores = Stores::open_in_memory().unwrap();
        let tenant = TenantId::from("t1");
        let mut a = entry("k1", "pricing", vec![1.0], 0);
        a.tags = vec!["planes".into()];
        let mut b = entry("k2", "pricing", vec![1.0], 0);
        b.tags = vec!["planes".into(), "12x".into()];
        stores.knowledge.insert(&a).unwrap();
        stores.knowledge.insert(&b).unwrap();

        let hits = stores
            .knowledge
            .find_by_tags(&tenant, &["planes".to_string(), "12x".to_string()], 5)
            .unwrap();
        assert_eq!(hits[0].id, "k2");
    }
}
