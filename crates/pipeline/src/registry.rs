//! Stage → executor registry, resolved once at startup.
//!
//! A plain map instead of any runtime-reflective agent dispatch: the
//! controller looks executors up by stage and never cares what is behind
//! the trait object.

use std::collections::HashMap;
use std::sync::Arc;

use nichepress_core::stage::Stage;

use crate::error::PipelineError;
use crate::executor::StageExecutor;
use crate::simulated::SimulatedExecutor;

/// Maps every pipeline stage to its executor implementation.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Stage, Arc<dyn StageExecutor>>,
}

impl ExecutorRegistry {
    /// An empty registry. Must be filled and pass
    /// [`ensure_complete`](Self::ensure_complete) before the pipeline starts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the executor for a stage.
    pub fn register(&mut self, stage: Stage, executor: Arc<dyn StageExecutor>) {
        if self.executors.insert(stage, executor).is_some() {
            tracing::warn!(%stage, "Replaced previously registered stage executor");
        }
    }

    /// Look up the executor for a stage.
    pub fn get(&self, stage: Stage) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(&stage).cloned()
    }

    /// Fail fast if any pipeline stage has no executor.
    pub fn ensure_complete(&self) -> Result<(), PipelineError> {
        for stage in Stage::ALL {
            if !self.executors.contains_key(&stage) {
                return Err(PipelineError::MissingExecutor(stage));
            }
        }
        Ok(())
    }

    /// A registry with every stage backed by a [`SimulatedExecutor`].
    /// Development mode only; deployments register real executors instead.
    pub fn simulated() -> Self {
        let mut registry = Self::new();
        for stage in Stage::ALL {
            registry.register(stage, Arc::new(SimulatedExecutor::new(stage)));
        }
        registry
    }
}
