//! Named toolset factories.
//!
//! Worker frontmatter selects toolsets by name; the registry maps each name
//! to a factory that builds the tools against the runner's shared state.
//! Host applications register their own toolsets (`shell`, `git`, ...) the
//! same way; a name nobody registered is a configuration error.

use super::types::Tool;
use crate::runtime::RunnerShared;
use crate::worker::{ToolsetConfig, WorkerDefinition};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolsetError {
    #[error("Unknown toolset '{0}'")]
    Unknown(String),

    #[error("Toolset '{toolset}' failed to build: {message}")]
    Build { toolset: String, message: String },
}

/// Everything a factory may need to assemble its tools.
#[derive(Clone)]
pub struct ToolsetBuildContext {
    pub worker: Arc<WorkerDefinition>,
    pub config: ToolsetConfig,
    pub shared: RunnerShared,
    pub worker_id: String,
    pub depth: u32,
    /// The parent runner's resolved `provider:model`, inherited by children
    /// that declare no model of their own.
    pub model_id: String,
    /// Programmatically supplied tools, surfaced by the `custom` toolset.
    pub custom_tools: Vec<Arc<dyn Tool>>,
}

impl ToolsetBuildContext {
    /// Apply the config's optional tool-name filter.
    #[must_use]
    pub fn filter_tools(&self, tools: Vec<Arc<dyn Tool>>) -> Vec<Arc<dyn Tool>> {
        match &self.config.tools {
            None => tools,
            Some(allowed) => tools
                .into_iter()
                .filter(|t| allowed.iter().any(|name| name == t.name()))
                .collect(),
        }
    }
}

pub type ToolsetFactory =
    Arc<dyn Fn(&ToolsetBuildContext) -> Result<Vec<Arc<dyn Tool>>, ToolsetError> + Send + Sync>;

#[derive(Default)]
pub struct ToolsetRegistry {
    factories: RwLock<HashMap<String, ToolsetFactory>>,
}

impl ToolsetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in toolsets installed.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register("filesystem", Arc::new(super::toolsets::filesystem::build));
        registry.register("workers", Arc::new(super::toolsets::workers::build));
        registry.register("custom", Arc::new(build_custom));
        registry
    }

    /// Shared default instance, for callers that don't inject their own.
    pub fn global() -> Arc<ToolsetRegistry> {
        static GLOBAL: Lazy<Arc<ToolsetRegistry>> =
            Lazy::new(|| Arc::new(ToolsetRegistry::with_defaults()));
        GLOBAL.clone()
    }

    pub fn register(&self, name: &str, factory: ToolsetFactory) {
        self.factories
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(name.to_string(), factory);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ToolsetFactory> {
        self.factories
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
    }

    #[must_use]
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Build the full tool map for a worker's declared toolsets.
    pub fn build_tools(
        &self,
        ctx_for: impl Fn(&str, &ToolsetConfig) -> ToolsetBuildContext,
        toolsets: &std::collections::BTreeMap<String, ToolsetConfig>,
    ) -> Result<HashMap<String, Arc<dyn Tool>>, ToolsetError> {
        let mut tools: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        for (name, config) in toolsets {
            let factory = self
                .get(name)
                .ok_or_else(|| ToolsetError::Unknown(name.clone()))?;
            let ctx = ctx_for(name, config);
            for tool in factory(&ctx)? {
                tools.insert(tool.name().to_string(), tool);
            }
        }
        Ok(tools)
    }
}

fn build_custom(ctx: &ToolsetBuildContext) -> Result<Vec<Arc<dyn Tool>>, ToolsetError> {
    Ok(ctx.filter_tools(ctx.custom_tools.clone()))
}
