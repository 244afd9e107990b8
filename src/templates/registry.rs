//! Read-only template catalogue
//!
//! Built once at startup and injected into the orchestrator; nothing mutates
//! it afterwards, so lookups need no locking.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::templates::{FileTree, InstantiationError, Template, TemplateSource, embedded, parse_manifest_yaml};

/// Templates keyed by name
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Template>,
}

impl TemplateRegistry {
    /// Registry holding only the templates compiled into the binary
    pub fn builtin() -> Result<Self, InstantiationError> {
        Ok(Self {
            templates: embedded::load_builtin()?,
        })
    }

    /// Built-ins plus every template found under `dir`
    ///
    /// Each subdirectory of `dir` holding a `manifest.yml` is one template;
    /// a template with the same name as a built-in replaces it.
    pub async fn load(dir: Option<&Path>) -> Result<Self, InstantiationError> {
        let mut registry = Self::builtin()?;

        if let Some(dir) = dir {
            let mut entries = fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if !entry.file_type().await?.is_dir() || !path.join("manifest.yml").exists() {
                    continue;
                }
                let template = load_from_dir(&path).await?;
                if registry.templates.contains_key(&template.name) {
                    info!(template = %template.name, dir = %path.display(), "Template directory shadows built-in");
                }
                registry.insert(template);
            }
        }

        Ok(registry)
    }

    /// Registry over an explicit set of templates
    pub fn from_templates<I: IntoIterator<Item = Template>>(templates: I) -> Self {
        let mut registry = Self::default();
        for template in templates {
            registry.insert(template);
        }
        registry
    }

    pub fn insert(&mut self, template: Template) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Result<&Template, InstantiationError> {
        self.templates
            .get(name)
            .ok_or_else(|| InstantiationError::TemplateNotFound(name.to_string()))
    }

    /// Templates in name order
    pub fn list(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Load one template directory: `manifest.yml` plus `files/**`
pub async fn load_from_dir(dir: &Path) -> Result<Template, InstantiationError> {
    let content = fs::read_to_string(dir.join("manifest.yml")).await?;
    let files = read_tree(&dir.join("files")).await?;
    debug!(dir = %dir.display(), files = files.len(), "Loaded template from filesystem");
    parse_manifest_yaml(&content, files, TemplateSource::FileSystem(dir.to_path_buf()))
}

async fn read_tree(root: &Path) -> Result<FileTree, InstantiationError> {
    let mut tree = FileTree::new();
    if !root.exists() {
        return Ok(tree);
    }

    let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .map_err(|e| InstantiationError::InvalidManifest(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            tree.insert(relative, fs::read(&path).await?);
        }
    }

    Ok(tree)
}
