//! JSON build file loader
//!
//! A build file is a JSON array of target records:
//!
//! ```json
//! [
//!   { "target_file_path": "main.c", "is_source_file": true },
//!   {
//!     "target_file_path": "main.o",
//!     "dependencies": ["main.c"],
//!     "docker_image": "gcc:13",
//!     "build_command": "gcc -c main.c -o main.o"
//!   }
//! ]
//! ```

use crate::error::{KilnError, KilnResult};
use crate::graph::{BuildSpec, DependencyGraph};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use tokio::fs;
use tracing::debug;

/// One record of a build file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetRecord {
    pub target_file_path: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_source_file: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub docker_image: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_command: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub output_file_path: String,
}

impl TargetRecord {
    fn into_spec(self, path: &Path) -> KilnResult<BuildSpec> {
        let invalid = |reason: String| KilnError::BuildFileInvalid {
            path: path.to_path_buf(),
            reason,
        };

        if self.target_file_path.is_empty() {
            return Err(invalid("record with empty target_file_path".to_string()));
        }
        if !is_project_relative(&self.target_file_path) {
            return Err(invalid(format!(
                "{} must be a relative path inside the project",
                self.target_file_path
            )));
        }

        let spec = if self.is_source_file {
            BuildSpec::source(self.target_file_path)
        } else {
            if self.docker_image.is_empty() || self.build_command.is_empty() {
                return Err(invalid(format!(
                    "{} needs docker_image and build_command (or is_source_file)",
                    self.target_file_path
                )));
            }
            let spec =
                BuildSpec::derived(self.target_file_path, self.docker_image, self.build_command);
            if self.output_file_path.is_empty() {
                spec
            } else {
                spec.with_output(self.output_file_path)
            }
        };

        Ok(spec.depends_on(self.dependencies))
    }
}

/// Whether `path` stays under the directory it is joined to
fn is_project_relative(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Parse build file content into target specs, in file order
pub fn parse_build_file(content: &str, path: &Path) -> KilnResult<Vec<BuildSpec>> {
    let records: Vec<TargetRecord> =
        serde_json::from_str(content).map_err(|e| KilnError::BuildFileInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    records.into_iter().map(|r| r.into_spec(path)).collect()
}

/// Read a build file from disk
pub async fn load_build_file(path: &Path) -> KilnResult<Vec<BuildSpec>> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| KilnError::io(format!("reading build file {}", path.display()), e))?;

    let specs = parse_build_file(&content, path)?;
    debug!("Loaded {} targets from {}", specs.len(), path.display());
    Ok(specs)
}

/// Read a build file and construct its dependency graph
pub async fn load_graph(path: &Path) -> KilnResult<DependencyGraph> {
    DependencyGraph::from_specs(load_build_file(path).await?)
}
