//! Deterministic stand-in executors for development mode.
//!
//! Production stage executors (LLM clients, SEO tooling, the WordPress
//! publisher) live outside this service and are registered by the
//! deployment. The simulated set produces canned but shape-correct
//! outputs so the pipeline can be driven end to end without any external
//! dependency.

use async_trait::async_trait;
use serde_json::json;

use nichepress_core::stage::Stage;

use crate::executor::{StageContext, StageError, StageExecutor};

/// Produces a canned output for one stage.
pub struct SimulatedExecutor {
    stage: Stage,
}

impl SimulatedExecutor {
    pub fn new(stage: Stage) -> Self {
        Self { stage }
    }

    fn output(&self, ctx: &StageContext) -> serde_json::Value {
        match self.stage {
            Stage::Requirements => json!({
                "industry": ctx.preferences.industry.clone(),
                "audience": ctx.preferences.audience.clone(),
                "goals": ["organic traffic", "affiliate revenue"],
            }),
            Stage::NicheResearch => json!({
                "keywords": [format!("best {}", ctx.topic), format!("{} guide", ctx.topic)],
                "competition": "medium",
            }),
            Stage::SeoStrategy => json!({
                "primary_keyword": ctx.topic,
                "content_clusters": 3,
            }),
            Stage::ContentPlanning => json!({
                "articles": ctx.preferences.articles_per_batch.unwrap_or(10),
                "calendar_weeks": 4,
            }),
            Stage::ContentGeneration => json!({
                "articles_written": ctx.preferences.articles_per_batch.unwrap_or(10),
                "total_words": 18_000,
            }),
            Stage::WordpressSetup => json!({
                "deployment_url": format!("https://{}.sites.nichepress.dev", slug(&ctx.topic)),
                "posts_published": ctx.preferences.articles_per_batch.unwrap_or(10),
            }),
            Stage::Design => json!({
                "theme": "astra",
                "palette": "light",
            }),
            Stage::Monetization => json!({
                "channels": ctx.preferences.monetization.clone(),
            }),
            Stage::Qa => json!({
                "checks_passed": 12,
                "checks_failed": 0,
            }),
        }
    }
}

#[async_trait]
impl StageExecutor for SimulatedExecutor {
    async fn execute(&self, ctx: StageContext) -> Result<serde_json::Value, StageError> {
        // Yield once so cancellation between units of work stays observable
        // even for instant stages.
        tokio::task::yield_now().await;
        Ok(self.output(&ctx))
    }
}

/// Lowercase, alphanumeric, hyphen-separated slug of a topic.
fn slug(topic: &str) -> String {
    let mut out = String::with_capacity(topic.len());
    let mut last_was_hyphen = true;
    for c in topic.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            out.push('-');
            last_was_hyphen = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("site");
    }
    out
}
