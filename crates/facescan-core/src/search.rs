//! Similarity search against enrolled identities.
//!
//! [`SimilaritySearch`] is the request/response contract the pipeline
//! needs; transport is up to the implementor. [`GalleryStore`] is an
//! in-memory implementation over one or more [`Gallery`]s.

use crate::geometry::cosine_similarity;
use crate::types::{Embedding, MatchResult, MatchStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub const DEFAULT_SEARCH_K: usize = 5;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("unknown gallery: {0}")]
    UnknownGallery(String),
    #[error("embedding dimension mismatch: gallery has {expected}, query has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("search transport failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub gallery_id: String,
    pub embedding: Vec<f32>,
    pub k: usize,
    /// Minimum cosine similarity for a `success`, taken from the caller's configuration.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub status: MatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

impl From<SearchResponse> for MatchResult {
    fn from(response: SearchResponse) -> Self {
        let person = match response.status {
            MatchStatus::Success => response.person,
            MatchStatus::NoMatch => None,
        };
        MatchResult {
            person,
            similarity: response.similarity,
            status: response.status,
        }
    }
}

/// "Search by embedding" collaborator.
#[allow(async_fn_in_trait)]
pub trait SimilaritySearch {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError>;
}

/// An enrolled face embedding with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: String,
    pub person: String,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
}

fn default_threshold() -> f32 {
    DEFAULT_SIMILARITY_THRESHOLD
}

/// A named set of enrolled faces searched by cosine similarity.
///
/// The gallery holds records only; the match threshold belongs to each search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Gallery {
    #[serde(default)]
    pub records: Vec<FaceRecord>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enroll(&mut self, record: FaceRecord) {
        self.records.push(record);
    }

    /// Distinct enrolled persons, sorted.
    pub fn persons(&self) -> Vec<&str> {
        let mut persons: Vec<&str> = self.records.iter().map(|r| r.person.as_str()).collect();
        persons.sort_unstable();
        persons.dedup();
        persons
    }

    /// Find the person best matching `query` among its `k` nearest records.
    ///
    /// Every record is scored (no early exit). The winner is the person
    /// appearing most often among the `k` nearest, ties going to the higher
    /// best similarity. The match succeeds only if that similarity exceeds
    /// `threshold`; otherwise the closest similarity is still reported with
    /// `no_match`.
    pub fn search_embedding(&self, query: &[f32], k: usize, threshold: f32) -> Result<SearchResponse, SearchError> {
        if let Some(first) = self.records.first() {
            if first.embedding.dimension() != query.len() {
                return Err(SearchError::DimensionMismatch {
                    expected: first.embedding.dimension(),
                    actual: query.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f32)> = self
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.embedding.dimension() == query.len())
            .map(|(i, r)| (i, cosine_similarity(query, &r.embedding.values)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k.max(1));

        // person -> (votes, best similarity)
        let mut votes: HashMap<&str, (usize, f32)> = HashMap::new();
        for &(idx, sim) in &scored {
            let entry = votes
                .entry(self.records[idx].person.as_str())
                .or_insert((0, f32::NEG_INFINITY));
            entry.0 += 1;
            entry.1 = entry.1.max(sim);
        }

        let winner = votes.into_iter().max_by(|a, b| {
            a.1 .0
                .cmp(&b.1 .0)
                .then_with(|| a.1 .1.total_cmp(&b.1 .1))
        });

        Ok(match winner {
            Some((person, (_, sim))) if sim > threshold => SearchResponse {
                status: MatchStatus::Success,
                person: Some(person.to_string()),
                similarity: Some(sim),
            },
            Some((_, (_, sim))) => SearchResponse {
                status: MatchStatus::NoMatch,
                person: None,
                similarity: Some(sim),
            },
            None => SearchResponse {
                status: MatchStatus::NoMatch,
                person: None,
                similarity: None,
            },
        })
    }
}

/// In-memory galleries keyed by gallery id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GalleryStore {
    pub galleries: HashMap<String, Gallery>,
}

impl GalleryStore {
    pub fn gallery(&self, id: &str) -> Option<&Gallery> {
        self.galleries.get(id)
    }

    /// Get a gallery for enrollment, creating it if absent.
    pub fn gallery_mut(&mut self, id: &str) -> &mut Gallery {
        self.galleries.entry(id.to_string()).or_default()
    }
}

impl SimilaritySearch for GalleryStore {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let gallery = self
            .galleries
            .get(&request.gallery_id)
            .ok_or_else(|| SearchError::UnknownGallery(request.gallery_id.clone()))?;
        gallery.search_embedding(&request.embedding, request.k, request.threshold)
    }
}
