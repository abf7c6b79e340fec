// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster and Task manifest loading.
//!
//! A manifest file holds one or more YAML documents, each with
//! `apiVersion: colony.dev/v1`, a `kind` of `Cluster` or `Task`, `metadata` and `spec`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use colony_core::domain::cluster::Cluster;
use colony_core::domain::config::API_VERSION;
use colony_core::domain::task::Task;

#[derive(Debug, Clone)]
pub enum Manifest {
    Cluster(Cluster),
    Task(Task),
}

impl Manifest {
    pub fn describe(&self) -> String {
        match self {
            Manifest::Cluster(c) => format!("Cluster {}", c.metadata.key()),
            Manifest::Task(t) => format!("Task {}", t.metadata.key()),
        }
    }
}

/// Parse every document in `content`. Empty documents are skipped.
pub fn parse_documents(content: &str) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("document {} is not valid YAML", index + 1))?;
        if value.is_null() {
            continue;
        }
        manifests.push(
            parse_document(value).with_context(|| format!("document {}", index + 1))?,
        );
    }
    Ok(manifests)
}

fn parse_document(value: serde_yaml::Value) -> Result<Manifest> {
    if let Some(api_version) = value.get("apiVersion").and_then(|v| v.as_str()) {
        if api_version != API_VERSION {
            bail!("Invalid apiVersion: '{}'. Must be '{}'", api_version, API_VERSION);
        }
    }
    let kind = value
        .get("kind")
        .and_then(|v| v.as_str())
        .context("manifest has no kind")?
        .to_string();
    match kind.as_str() {
        "Cluster" => Ok(Manifest::Cluster(
            serde_yaml::from_value(value).context("invalid Cluster manifest")?,
        )),
        "Task" => Ok(Manifest::Task(
            serde_yaml::from_value(value).context("invalid Task manifest")?,
        )),
        other => bail!("unsupported kind '{}'. Expected 'Cluster' or 'Task'", other),
    }
}

pub fn load_file(path: &Path) -> Result<Vec<Manifest>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {:?}", path))?;
    parse_documents(&content).with_context(|| format!("Failed to parse {:?}", path))
}

/// Load every `.yaml`/`.yml` file in `dir`, in file-name order.
pub fn load_dir(dir: &Path) -> Result<Vec<Manifest>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read manifest directory {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
        })
        .collect();
    files.sort();

    let mut manifests = Vec::new();
    for file in files {
        manifests.extend(load_file(&file)?);
    }
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFESTS: &str = r#"
apiVersion: colony.dev/v1
kind: Cluster
metadata:
  name: swarm
spec:
  topology: star
  minAgents: 1
  maxAgents: 4
---
apiVersion: colony.dev/v1
kind: Task
metadata:
  name: build
spec:
  subtasks:
    - name: a
    - name: b
  dependencies:
    - from: a
      to: b
"#;

    #[test]
    fn test_parses_multi_document_file() {
        let manifests = parse_documents(MANIFESTS).unwrap();
        assert_eq!(manifests.len(), 2);
        match &manifests[0] {
            Manifest::Cluster(c) => assert_eq!(c.spec.max_agents, 4),
            other => panic!("expected cluster, got {}", other.describe()),
        }
        match &manifests[1] {
            Manifest::Task(t) => assert_eq!(t.spec.subtasks.len(), 2),
            other => panic!("expected task, got {}", other.describe()),
        }
    }

    #[test]
    fn test_rejects_unknown_kind_and_version() {
        assert!(parse_documents("kind: Deployment\nmetadata:\n  name: x\nspec: {}\n").is_err());
        assert!(parse_documents(
            "apiVersion: v2\nkind: Task\nmetadata:\n  name: x\nspec: {}\n"
        )
        .is_err());
    }

    #[test]
    fn test_loads_directory_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("b-task.yaml"),
            "kind: Task\nmetadata:\n  name: t\nspec:\n  subtasks: [{name: a}]\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a-cluster.yml"),
            "kind: Cluster\nmetadata:\n  name: c\nspec:\n  topology: mesh\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let manifests = load_dir(dir.path()).unwrap();
        assert_eq!(manifests.len(), 2);
        assert!(matches!(manifests[0], Manifest::Cluster(_)));
        assert!(matches!(manifests[1], Manifest::Task(_)));
    }
}
