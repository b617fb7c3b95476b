//! Duplicate intake detection
//!
//! Detection only ranks candidates and proposes links. A link is recorded
//! on the workspace only when a reviewer confirms it.

use crate::store::{StoreError, WorkspaceStore};
use crate::types::{WorkspaceId, WorkspaceReasoning, WorkspaceState};
use casework_audit::{ChainHash, TenantId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Fingerprints message bodies so trivially reformatted copies collide
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    /// Trim, collapse whitespace runs to one space, lowercase
    #[must_use]
    pub fn normalize(text: &str) -> String {
        text.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// SHA-256 of the normalised text
    #[must_use]
    pub fn fingerprint(text: &str) -> ChainHash {
        ChainHash::compute(Self::normalize(text).as_bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    /// Same normalised content
    ExactHashMatch,
    /// Same sender within the time window
    MetadataMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCandidate {
    pub workspace_id: WorkspaceId,
    pub reason: MatchReason,
    /// 1.0 for exact matches; decays with time distance for metadata matches
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_diff_seconds: Option<i64>,
    pub current_state: WorkspaceState,
    pub received_at: DateTime<Utc>,
}

/// What to look for
#[derive(Debug, Clone)]
pub struct DuplicateQuery {
    pub content_hash: ChainHash,
    pub sender_email: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    /// Usually the workspace being checked
    pub exclude: Option<WorkspaceId>,
}

/// Rank already-fetched matches
///
/// Exact hash matches come first, then metadata matches closest in time.
/// A workspace appears at most once, under its strongest reason. Archived
/// workspaces are skipped.
#[must_use]
pub fn rank(
    query: &DuplicateQuery,
    hash_matches: &[WorkspaceReasoning],
    sender_matches: &[WorkspaceReasoning],
    window_secs: u64,
) -> Vec<DuplicateCandidate> {
    let eligible = |w: &&WorkspaceReasoning| Some(w.id) != query.exclude && !w.is_archived();
    let mut seen = HashSet::new();
    let mut ranked = Vec::new();

    for w in hash_matches.iter().filter(eligible) {
        if seen.insert(w.id) {
            ranked.push(DuplicateCandidate {
                workspace_id: w.id,
                reason: MatchReason::ExactHashMatch,
                score: 1.0,
                time_diff_seconds: query
                    .received_at
                    .map(|at| (at - w.received_at).num_seconds().abs()),
                current_state: w.current_state,
                received_at: w.received_at,
            });
        }
    }

    if let Some(received_at) = query.received_at {
        let window = i64::try_from(window_secs).unwrap_or(i64::MAX);
        for w in sender_matches.iter().filter(eligible) {
            let diff = (received_at - w.received_at).num_seconds().abs();
            if diff <= window && seen.insert(w.id) {
                ranked.push(DuplicateCandidate {
                    workspace_id: w.id,
                    reason: MatchReason::MetadataMatch,
                    score: metadata_score(diff, window),
                    time_diff_seconds: Some(diff),
                    current_state: w.current_state,
                    received_at: w.received_at,
                });
            }
        }
    }

    ranked.sort_by(|a, b| {
        a.reason
            .cmp(&b.reason)
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| a.time_diff_seconds.cmp(&b.time_diff_seconds))
    });
    ranked
}

#[allow(clippy::cast_precision_loss)]
fn metadata_score(diff: i64, window: i64) -> f64 {
    if window == 0 {
        return 0.5;
    }
    0.5 * (1.0 - diff as f64 / window as f64) + 0.25
}

/// Store-backed candidate search
#[derive(Clone)]
pub struct DuplicateDetector {
    store: Arc<dyn WorkspaceStore>,
    window_secs: u64,
}

impl std::fmt::Debug for DuplicateDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateDetector")
            .field("window_secs", &self.window_secs)
            .finish_non_exhaustive()
    }
}

impl DuplicateDetector {
    #[must_use]
    pub fn new(store: Arc<dyn WorkspaceStore>, window_secs: u64) -> Self {
        Self { store, window_secs }
    }

    /// Ranked candidates within one tenant
    ///
    /// # Errors
    /// Store failures.
    pub async fn find_candidates(
        &self,
        tenant_id: &TenantId,
        query: &DuplicateQuery,
    ) -> Result<Vec<DuplicateCandidate>, StoreError> {
        let hash_matches = self.store.find_by_content_hash(tenant_id, &query.content_hash).await?;
        let sender_matches = match query.sender_email.as_deref() {
            Some(sender) if query.received_at.is_some() => self.store.find_by_sender(tenant_id, sender).await?,
            _ => Vec::new(),
        };
        let ranked = rank(query, &hash_matches, &sender_matches, self.window_secs);
        if !ranked.is_empty() {
            tracing::debug!(tenant = %tenant_id, candidates = ranked.len(), "duplicate candidates found");
        }
        Ok(ranked)
    }
}
