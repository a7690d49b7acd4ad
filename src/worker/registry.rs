//! Name -> worker lookup over ordered search paths.

use super::parser::{ParseError, load_worker_file};
use super::WorkerDefinition;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Worker '{0}' not found in any search path")]
    NotFound(String),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Resolves worker names to definitions.
///
/// Inline registrations (tests, embedded workers) win over the filesystem;
/// otherwise the first `<dir>/<name>.worker` across the search paths, in
/// order, is used.
#[derive(Default)]
pub struct WorkerRegistry {
    search_paths: Vec<PathBuf>,
    inline: RwLock<HashMap<String, WorkerDefinition>>,
}

impl WorkerRegistry {
    #[must_use]
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self {
            search_paths,
            inline: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.push(path);
    }

    #[must_use]
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Register a definition directly, bypassing the filesystem.
    pub fn register(&self, definition: WorkerDefinition) {
        self.inline
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(definition.name.clone(), definition);
    }

    /// Locate the `.worker` file for `name` without parsing it.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, RegistryError> {
        for dir in &self.search_paths {
            let candidate = dir.join(format!("{name}.worker"));
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        Err(RegistryError::NotFound(name.to_string()))
    }

    /// Load a worker by name.
    pub async fn load(&self, name: &str) -> Result<WorkerDefinition, RegistryError> {
        if let Some(def) = self
            .inline
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
        {
            return Ok(def.clone());
        }
        let path = self.resolve(name)?;
        Ok(load_worker_file(&path).await?)
    }
}
