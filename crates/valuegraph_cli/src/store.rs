//! JSON file persistence for computed and accumulator sources.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use valuegraph_core::{PersistedSources, SourceStore};

/// Stores [`PersistedSources`] as one pretty-printed JSON document.
///
/// A missing file loads as empty. Saves go through a sibling temp file and a
/// rename so a crash never leaves a half-written document behind.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceStore for JsonFileStore {
    type Error = anyhow::Error;

    fn load(&mut self) -> Result<PersistedSources> {
        if !self.path.exists() {
            debug!("no source file at {}", self.path.display());
            return Ok(PersistedSources::default());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parse {}", self.path.display()))
    }

    fn save(&mut self, sources: &PersistedSources) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(sources)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        debug!("saved {} sources to {}", sources.len(), self.path.display());
        Ok(())
    }
}
