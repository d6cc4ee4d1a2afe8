//! Cosine-similarity match engine.
//!
//! Linear scan over a caller-supplied gallery, O(n·d) for n entries of
//! dimension d. Intended for roster-sized galleries; callers needing more
//! should front this with an indexed nearest-neighbor structure.

use crate::types::{Embedding, MatchResult, StoredEmbedding};
use thiserror::Error;

/// Default cosine similarity a best match must strictly exceed.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("query embedding has zero norm — cosine similarity is undefined")]
    DegenerateVector,
}

/// Strategy for comparing a query embedding against a gallery.
pub trait Matcher: Send {
    fn compare(
        &self,
        query: &Embedding,
        gallery: &[StoredEmbedding],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Cosine similarity matcher.
///
/// A zero-norm query is an error; a zero-norm or dimension-mismatched
/// gallery entry is skipped with a warning, so one bad enrolled row cannot
/// fail the whole request. Ties keep the first-seen entry (strict `>` in
/// the max scan), and the threshold comparison is strict as well: a best
/// similarity exactly equal to the threshold is NOT recognized.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(
        &self,
        query: &Embedding,
        gallery: &[StoredEmbedding],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        if gallery.is_empty() {
            return Ok(MatchResult::no_match());
        }

        let query_unit = query.l2_normalized().ok_or(MatchError::DegenerateVector)?;

        let mut best_similarity = f32::NEG_INFINITY;
        let mut best_identity: Option<&str> = None;

        for stored in gallery {
            if stored.embedding.dim() != query_unit.dim() {
                tracing::warn!(
                    identity = %stored.identity,
                    stored_dim = stored.embedding.dim(),
                    query_dim = query_unit.dim(),
                    "skipping gallery entry with mismatched embedding dimension"
                );
                continue;
            }
            let Some(stored_unit) = stored.embedding.l2_normalized() else {
                tracing::warn!(
                    identity = %stored.identity,
                    "skipping gallery entry with zero-norm embedding"
                );
                continue;
            };

            let similarity = query_unit.dot(&stored_unit);
            if similarity > best_similarity {
                best_similarity = similarity;
                best_identity = Some(&stored.identity);
            }
        }

        // Every entry skipped: behave like an empty gallery
        let Some(identity) = best_identity else {
            return Ok(MatchResult::no_match());
        };

        if best_similarity > threshold {
            Ok(MatchResult {
                recognized: true,
                identity: Some(identity.to_string()),
                similarity: best_similarity,
            })
        } else {
            Ok(MatchResult {
                recognized: false,
                identity: None,
                similarity: best_similarity.max(0.0),
            })
        }
    }
}

/// Demo matcher: always recognizes the first gallery entry.
///
/// Mirrors the behavior of the simplified demo deployment; selected by
/// configuration alongside the mock detector/extractor backend.
pub struct FirstEntryMatcher;

/// Fixed similarity the demo matcher reports for its "match".
const FIRST_ENTRY_SIMILARITY: f32 = 0.85;

impl Matcher for FirstEntryMatcher {
    fn compare(
        &self,
        _query: &Embedding,
        gallery: &[StoredEmbedding],
        _threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        match gallery.first() {
            Some(first) => Ok(MatchResult {
                recognized: true,
                identity: Some(first.identity.clone()),
                similarity: FIRST_ENTRY_SIMILARITY,
            }),
            None => Ok(MatchResult::no_match()),
        }
    }
}
