//! The project aggregate: intake data, per-stage records, activity events.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::stage::Stage;
use crate::status::{ProjectStatus, StageStatus};
use crate::types::{ProjectId, Timestamp};

/// Maximum length of a project topic.
pub const MAX_TOPIC_LEN: usize = 200;

/// Maximum length of free-text preference fields (industry, audience, tone).
const MAX_FIELD_LEN: usize = 120;

/// Maximum number of monetization channels per project.
const MAX_MONETIZATION_CHANNELS: usize = 8;

/// Upper bound on articles per content-generation batch.
const MAX_ARTICLES_PER_BATCH: u32 = 50;

// ---------------------------------------------------------------------------
// Preferences
// ---------------------------------------------------------------------------

/// Client preferences captured at intake and handed to every stage executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Industry or niche, e.g. "Health & Fitness".
    pub industry: Option<String>,
    /// Target audience description.
    pub audience: Option<String>,
    /// Articles to produce per content-generation batch.
    pub articles_per_batch: Option<u32>,
    /// Editorial tone, e.g. "casual" or "authoritative".
    pub tone: Option<String>,
    /// Monetization channels to configure, e.g. "affiliate", "display_ads".
    #[serde(default)]
    pub monetization: Vec<String>,
}

impl Preferences {
    /// Validate intake preferences.
    ///
    /// Rules:
    /// - Free-text fields must not exceed `MAX_FIELD_LEN` characters.
    /// - `articles_per_batch`, when given, must be in `1..=MAX_ARTICLES_PER_BATCH`.
    /// - At most `MAX_MONETIZATION_CHANNELS` channels, none empty, no duplicates.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in [
            ("industry", &self.industry),
            ("audience", &self.audience),
            ("tone", &self.tone),
        ] {
            if let Some(text) = value {
                if text.len() > MAX_FIELD_LEN {
                    return Err(CoreError::Validation(format!(
                        "{name} must not exceed {MAX_FIELD_LEN} characters"
                    )));
                }
            }
        }

        if let Some(count) = self.articles_per_batch {
            if count == 0 || count > MAX_ARTICLES_PER_BATCH {
                return Err(CoreError::Validation(format!(
                    "articles_per_batch must be between 1 and {MAX_ARTICLES_PER_BATCH}"
                )));
            }
        }

        if self.monetization.len() > MAX_MONETIZATION_CHANNELS {
            return Err(CoreError::Validation(format!(
                "at most {MAX_MONETIZATION_CHANNELS} monetization channels are supported"
            )));
        }
        let mut seen = std::collections::HashSet::with_capacity(self.monetization.len());
        for channel in &self.monetization {
            if channel.is_empty() {
                return Err(CoreError::Validation(
                    "monetization channels must not be empty".to_string(),
                ));
            }
            if !seen.insert(channel.as_str()) {
                return Err(CoreError::Validation(format!(
                    "duplicate monetization channel: \"{channel}\""
                )));
            }
        }

        Ok(())
    }
}

/// Validate a project topic.
///
/// Rules: not empty after trimming, at most `MAX_TOPIC_LEN` characters.
pub fn validate_topic(topic: &str) -> Result<(), CoreError> {
    if topic.trim().is_empty() {
        return Err(CoreError::Validation(
            "topic must not be empty".to_string(),
        ));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(CoreError::Validation(format!(
            "topic must not exceed {MAX_TOPIC_LEN} characters"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// The unit of work: one client's blog-creation request and its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub topic: String,
    pub preferences: Preferences,
    pub status: ProjectStatus,
    /// Non-null while in progress or paused; on failure it stays pointed at
    /// the failed stage.
    pub current_stage: Option<Stage>,
    /// 0-100, floor of completed stages over total.
    pub progress: u8,
    /// Populated only when the project failed.
    pub error: Option<String>,
    /// Populated only when the project completed.
    pub deployment_url: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Project {
    /// Build a freshly-intaken project in `created` status.
    pub fn new(topic: String, preferences: Preferences, now: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            topic,
            preferences,
            status: ProjectStatus::Created,
            current_stage: None,
            progress: 0,
            error: None,
            deployment_url: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Stage records
// ---------------------------------------------------------------------------

/// One pipeline stage's execution state within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    /// Executor attempts so far (0 until the stage first starts).
    pub attempts: u32,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    /// Opaque payload produced for downstream stages.
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl StageRecord {
    /// A not-yet-started record for the given stage.
    pub fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            attempts: 0,
            started_at: None,
            finished_at: None,
            output: None,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Activity events
// ---------------------------------------------------------------------------

/// An append-only, immutable timeline entry for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Per-project monotonically increasing sequence, assigned by the store.
    pub seq: i64,
    pub timestamp: Timestamp,
    /// Dot-separated event kind, e.g. `"stage.completed"`.
    pub kind: String,
    pub stage: Option<Stage>,
    pub description: String,
}

/// An event about to be appended; the store assigns `seq` and `timestamp`.
#[derive(Debug, Clone)]
pub struct NewActivityEvent {
    pub kind: String,
    pub stage: Option<Stage>,
    pub description: String,
}

impl NewActivityEvent {
    pub fn new(kind: &str, stage: Option<Stage>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            stage,
            description: description.into(),
        }
    }
}

/// A coherent read of a project with its stage records and timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSnapshot {
    pub project: Project,
    pub stages: Vec<StageRecord>,
    pub events: Vec<ActivityEvent>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
