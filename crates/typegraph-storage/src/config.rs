//! Manager configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use typegraph_store::MemoryGraph;
use typegraph_types::TYPE_SYSTEM;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// `id` of the TypeSystem node this manager works under.
    pub type_system_id: String,
    /// Skip index creation and TypeSystem bootstrap.
    pub skip_setup: bool,
    /// Share loaded registries with other managers in this process.
    pub share_type_cache: bool,
    /// Where an in-memory graph is loaded from and saved to.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            type_system_id: TYPE_SYSTEM.to_string(),
            skip_setup: false,
            share_type_cache: true,
            snapshot_path: None,
        }
    }
}

impl ManagerConfig {
    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        let config: ManagerConfig =
            serde_json::from_str(text).context("failed to parse manager config")?;
        if config.type_system_id.is_empty() {
            anyhow::bail!("type_system_id must not be empty");
        }
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json_str(&text)
    }

    /// Open the configured snapshot, or a fresh graph if there is none yet.
    pub fn open_memory_graph(&self) -> anyhow::Result<Arc<MemoryGraph>> {
        match &self.snapshot_path {
            Some(path) if path.exists() => {
                let graph = MemoryGraph::open(path)
                    .with_context(|| format!("failed to open snapshot {}", path.display()))?;
                Ok(Arc::new(graph))
            }
            _ => Ok(Arc::new(MemoryGraph::new())),
        }
    }

    /// Write `graph` to the configured snapshot path, if any.
    pub fn save_memory_graph(&self, graph: &MemoryGraph) -> anyhow::Result<()> {
        if let Some(path) = &self.snapshot_path {
            graph
                .save(path)
                .with_context(|| format!("failed to save snapshot {}", path.display()))?;
        }
        Ok(())
    }
}
