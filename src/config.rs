use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::feature::FeatureService;
use crate::hive_config::HiveToml;
use crate::lifecycle::TaskLifecycle;
use crate::paths::HivePaths;
use crate::storage::JsonStore;
use crate::task::{SubtaskService, TaskService};
use crate::worktree::{GitCli, WorktreeManager};

/// Runtime configuration for hive.
///
/// Resolves the project directory, loads `.hive/hive.toml` (with its
/// environment overrides) and builds the services every command works with.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub paths: HivePaths,
    pub verbose: bool,
    hive_toml: HiveToml,
    store: JsonStore,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let paths = HivePaths::new(&project_dir);
        let hive_toml = HiveToml::load_or_default(&paths.hive_dir())?;
        let store = JsonStore::with_options(hive_toml.lock_options());

        Ok(Self {
            project_dir,
            paths,
            verbose,
            hive_toml,
            store,
        })
    }

    pub fn hive_toml(&self) -> &HiveToml {
        &self.hive_toml
    }

    pub fn store(&self) -> &JsonStore {
        &self.store
    }

    pub fn features(&self) -> FeatureService {
        FeatureService::new(self.paths.clone(), self.store.clone())
    }

    pub fn tasks(&self) -> TaskService {
        TaskService::new(self.paths.clone(), self.store.clone())
    }

    pub fn subtasks(&self) -> SubtaskService {
        SubtaskService::new(self.paths.clone(), self.store.clone())
    }

    pub fn worktrees(&self) -> WorktreeManager {
        WorktreeManager::new(
            self.paths.clone(),
            Arc::new(GitCli::new(self.hive_toml.git_cmd())),
            self.hive_toml.branch_prefix(),
        )
    }

    pub fn lifecycle(&self) -> TaskLifecycle {
        TaskLifecycle::new(self.tasks(), self.worktrees(), self.hive_toml.merge_strategy())
    }
}
