//! Metadata search index.
//!
//! A derived projection of document metadata (title, tags, uploader) keyed
//! by document id. The document store stays authoritative; the index is
//! rebuilt from it at startup.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::db::Document;
use crate::error::IndexError;

/// Searchable projection of one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub document_id: String,
    pub title: String,
    pub tags: Vec<String>,
    pub uploader: String,
    pub uploaded_at: DateTime<Utc>,
    pub folder_id: Option<String>,
}

impl From<&Document> for SearchEntry {
    fn from(doc: &Document) -> Self {
        Self {
            document_id: doc.id.clone(),
            title: doc.title.clone(),
            tags: doc.tags.clone(),
            uploader: doc.uploaded_by.clone(),
            uploaded_at: doc.created_at,
            folder_id: doc.folder_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TitleMatch {
    Exact(String),
    Contains(String),
}

/// Query filters; every filter that is set must match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub title: Option<TitleMatch>,
    pub tag: Option<String>,
    pub uploader: Option<String>,
    /// Substring matched against title, any tag, uploader, or document id
    pub keyword: Option<String>,
    /// Folder id, matched exactly
    pub folder: Option<String>,
}

pub trait SearchIndex: Send + Sync {
    /// Insert or replace the entry for a document
    fn upsert(&self, entry: SearchEntry) -> Result<(), IndexError>;

    /// Drop a document's entry; absent ids are not an error
    fn remove(&self, document_id: &str) -> Result<(), IndexError>;

    /// Matching document ids, newest upload first, ties by id
    fn query(&self, filters: &SearchFilters) -> Result<Vec<String>, IndexError>;

    fn contains(&self, document_id: &str) -> bool;

    fn len(&self) -> usize;
}

/// Entry plus lowercased fields for case-insensitive matching
struct IndexedEntry {
    entry: SearchEntry,
    title: String,
    tags: Vec<String>,
    uploader: String,
    document_id: String,
}

impl IndexedEntry {
    fn new(entry: SearchEntry) -> Self {
        Self {
            title: entry.title.to_lowercase(),
            tags: entry.tags.iter().map(|t| t.to_lowercase()).collect(),
            uploader: entry.uploader.to_lowercase(),
            document_id: entry.document_id.to_lowercase(),
            entry,
        }
    }

    fn matches(&self, filters: &NormalizedFilters) -> bool {
        if let Some(title) = &filters.title {
            let ok = match title {
                TitleMatch::Exact(t) => self.title == *t,
                TitleMatch::Contains(t) => self.title.contains(t.as_str()),
            };
            if !ok {
                return false;
            }
        }

        if let Some(tag) = &filters.tag {
            if !self.tags.iter().any(|t| t == tag) {
                return false;
            }
        }

        if let Some(uploader) = &filters.uploader {
            if self.uploader != *uploader {
                return false;
            }
        }

        if let Some(folder) = &filters.folder {
            if self.entry.folder_id.as_deref() != Some(folder.as_str()) {
                return false;
            }
        }

        if let Some(keyword) = &filters.keyword {
            let hit = self.title.contains(keyword.as_str())
                || self.tags.iter().any(|t| t.contains(keyword.as_str()))
                || self.uploader.contains(keyword.as_str())
                || self.document_id.contains(keyword.as_str());
            if !hit {
                return false;
            }
        }

        true
    }
}

/// Filters lowercased once per query
struct NormalizedFilters {
    title: Option<TitleMatch>,
    tag: Option<String>,
    uploader: Option<String>,
    keyword: Option<String>,
    folder: Option<String>,
}

impl From<&SearchFilters> for NormalizedFilters {
    fn from(filters: &SearchFilters) -> Self {
        let norm = |s: &String| s.trim().to_lowercase();
        Self {
            title: filters.title.as_ref().map(|t| match t {
                TitleMatch::Exact(s) => TitleMatch::Exact(norm(s)),
                TitleMatch::Contains(s) => TitleMatch::Contains(norm(s)),
            }),
            tag: filters.tag.as_ref().map(norm),
            uploader: filters.uploader.as_ref().map(norm),
            keyword: filters.keyword.as_ref().map(norm),
            folder: filters.folder.as_ref().map(|s| s.trim().to_string()),
        }
    }
}

/// In-memory index. `DashMap` shards lock per key, so writes to one
/// document id are serialized while unrelated ids proceed in parallel.
#[derive(Default)]
pub struct MemorySearchIndex {
    entries: DashMap<String, IndexedEntry>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entry for a document, if indexed
    #[cfg(test)]
    pub fn get(&self, document_id: &str) -> Option<SearchEntry> {
        self.entries.get(document_id).map(|e| e.entry.clone())
    }
}

impl SearchIndex for MemorySearchIndex {
    fn upsert(&self, entry: SearchEntry) -> Result<(), IndexError> {
        self.entries
            .insert(entry.document_id.clone(), IndexedEntry::new(entry));
        Ok(())
    }

    fn remove(&self, document_id: &str) -> Result<(), IndexError> {
        self.entries.remove(document_id);
        Ok(())
    }

    fn query(&self, filters: &SearchFilters) -> Result<Vec<String>, IndexError> {
        let normalized = NormalizedFilters::from(filters);

        let mut hits: Vec<(DateTime<Utc>, String)> = self
            .entries
            .iter()
            .filter(|e| e.matches(&normalized))
            .map(|e| (e.entry.uploaded_at, e.entry.document_id.clone()))
            .collect();

        hits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        Ok(hits.into_iter().map(|(_, id)| id).collect())
    }

    fn contains(&self, document_id: &str) -> bool {
        self.entries.contains_key(document_id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
