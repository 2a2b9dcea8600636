//! Feature metadata (`feature.json`) and feature discovery.

use std::fs;
use std::io::ErrorKind;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::errors::TaskError;
use crate::paths::HivePaths;
use crate::storage::{JsonStore, read_json_as};
use crate::util::validate_name;

/// Lifecycle of a feature as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureStatus {
    #[default]
    Planning,
    Executing,
    Completed,
}

impl std::fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureStatus::Planning => write!(f, "planning"),
            FeatureStatus::Executing => write!(f, "executing"),
            FeatureStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for FeatureStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "planning" => Ok(FeatureStatus::Planning),
            "executing" => Ok(FeatureStatus::Executing),
            "completed" => Ok(FeatureStatus::Completed),
            _ => anyhow::bail!(
                "Invalid feature status '{}'. Valid values: planning, executing, completed",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub name: String,
    #[serde(default)]
    pub status: FeatureStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

const PLAN_TEMPLATE: &str = "# {name}\n\n### 1. First task\nDescribe the first step.\n";

#[derive(Debug, Clone)]
pub struct FeatureService {
    paths: HivePaths,
    store: JsonStore,
}

impl FeatureService {
    pub fn new(paths: HivePaths, store: JsonStore) -> Self {
        Self { paths, store }
    }

    /// Create a feature directory with `feature.json` and a starter
    /// `plan.md`. An existing plan is never overwritten.
    pub fn create(&self, name: &str) -> Result<Feature, TaskError> {
        validate_name(name).map_err(|reason| TaskError::InvalidName {
            name: name.to_string(),
            reason,
        })?;
        if let Some(existing) = self.find(name)? {
            return Ok(existing);
        }

        let feature = Feature {
            name: name.to_string(),
            status: FeatureStatus::Planning,
            created_at: Utc::now(),
            updated_at: None,
        };
        let path = self.paths.feature_file(name);
        let value = serde_json::to_value(&feature).map_err(|source| TaskError::Json {
            path: path.clone(),
            source,
        })?;
        self.store.write_locked(&path, &value)?;

        let plan = self.paths.plan_file(name);
        if !plan.exists() {
            fs::write(&plan, PLAN_TEMPLATE.replace("{name}", name)).map_err(|e| TaskError::io(&plan, e))?;
        }
        info!(feature = name, "created feature");
        Ok(feature)
    }

    /// The feature's metadata, `None` if it has no `feature.json`.
    pub fn find(&self, name: &str) -> Result<Option<Feature>, TaskError> {
        Ok(read_json_as(&self.paths.feature_file(name))?)
    }

    pub fn get(&self, name: &str) -> Result<Feature, TaskError> {
        self.find(name)?.ok_or_else(|| TaskError::FeatureNotFound {
            feature: name.to_string(),
        })
    }

    /// Every directory under `features/`, sorted by name. Directories that
    /// only hold a `plan.md` are listed too.
    pub fn list(&self) -> Result<Vec<String>, TaskError> {
        let dir = self.paths.features_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TaskError::io(&dir, e)),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn set_status(&self, name: &str, status: FeatureStatus) -> Result<Feature, TaskError> {
        let path = self.paths.feature_file(name);
        if !path.exists() {
            return Err(TaskError::FeatureNotFound {
                feature: name.to_string(),
            });
        }
        let value = self
            .store
            .patch_locked(&path, json!({"status": status, "updatedAt": Utc::now()}))?;
        serde_json::from_value(value).map_err(|source| TaskError::Json { path, source })
    }
}
