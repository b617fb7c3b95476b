//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for [`crate::ReasoningEngine`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on one gateway call
    pub extraction_timeout_ms: u64,
    /// Move RECEIVED workspaces forward after a successful extraction
    pub auto_transition: bool,
    /// READY_FOR_HUMAN additionally needs context, obligation and risk
    pub require_full_analysis: bool,
    /// Sender + time window for metadata duplicate matches
    pub duplicate_window_secs: u64,
    /// Write DUPLICATE_DETECTED proposals for exact matches at intake
    pub propose_duplicates_on_intake: bool,
    pub max_append_retries: u32,
    pub default_page_limit: usize,
    pub max_page_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extraction_timeout_ms: 30_000,
            auto_transition: true,
            require_full_analysis: false,
            duplicate_window_secs: 300,
            propose_duplicates_on_intake: true,
            max_append_retries: casework_audit::DEFAULT_MAX_APPEND_RETRIES,
            default_page_limit: casework_audit::DEFAULT_PAGE_LIMIT,
            max_page_limit: casework_audit::MAX_PAGE_LIMIT,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_extraction_timeout(mut self, timeout: Duration) -> Self {
        self.extraction_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn with_auto_transition(mut self, enabled: bool) -> Self {
        self.auto_transition = enabled;
        self
    }

    #[must_use]
    pub fn with_full_analysis(mut self, required: bool) -> Self {
        self.require_full_analysis = required;
        self
    }

    #[must_use]
    pub fn with_duplicate_window(mut self, secs: u64) -> Self {
        self.duplicate_window_secs = secs;
        self
    }

    #[must_use]
    pub fn with_intake_proposals(mut self, enabled: bool) -> Self {
        self.propose_duplicates_on_intake = enabled;
        self
    }

    #[must_use]
    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_millis(self.extraction_timeout_ms)
    }

    /// Resolve a caller-supplied page size against the configured bounds
    #[must_use]
    pub fn page_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_limit)
            .clamp(1, self.max_page_limit.max(1))
    }
}
