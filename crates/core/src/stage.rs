//! The fixed blog-creation pipeline.

use serde::{Deserialize, Serialize};

/// One step of the content-creation pipeline, in execution order.
///
/// The order is a hard data dependency: every stage consumes the outputs of
/// its predecessors, so stages never run concurrently within one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Extract structured requirements from the client intake.
    Requirements,
    /// Market, competitor, and keyword research for the niche.
    NicheResearch,
    /// Keyword targets and on-page SEO strategy.
    SeoStrategy,
    /// Article topics, structure, and publication calendar.
    ContentPlanning,
    /// Generate the articles themselves.
    ContentGeneration,
    /// Provision the WordPress site and publish the content.
    WordpressSetup,
    /// Theme and layout configuration.
    Design,
    /// Configure monetization channels.
    Monetization,
    /// Final quality assurance pass over the live site.
    Qa,
}

impl Stage {
    /// Every stage in pipeline order.
    pub const ALL: [Stage; 9] = [
        Stage::Requirements,
        Stage::NicheResearch,
        Stage::SeoStrategy,
        Stage::ContentPlanning,
        Stage::ContentGeneration,
        Stage::WordpressSetup,
        Stage::Design,
        Stage::Monetization,
        Stage::Qa,
    ];

    /// Total number of pipeline stages.
    pub const COUNT: usize = Self::ALL.len();

    /// The snake_case name used in persistence and on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Requirements => "requirements",
            Stage::NicheResearch => "niche_research",
            Stage::SeoStrategy => "seo_strategy",
            Stage::ContentPlanning => "content_planning",
            Stage::ContentGeneration => "content_generation",
            Stage::WordpressSetup => "wordpress_setup",
            Stage::Design => "design",
            Stage::Monetization => "monetization",
            Stage::Qa => "qa",
        }
    }

    /// Resolve a persisted stage name back into the enum.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.as_str() == name)
    }

    /// Zero-based position in the pipeline.
    pub fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|s| *s == self)
            .expect("stage is in ALL")
    }

    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
