//! Built-in templates compiled into the binary
//!
//! Layout: `templates/<name>/manifest.yml` plus `templates/<name>/files/**`.

use rust_embed::RustEmbed;
use std::collections::BTreeMap;
use tracing::debug;

use crate::templates::{FileTree, InstantiationError, Template, TemplateSource, parse_manifest_yaml};

/// Container for all templates embedded at compile time
#[derive(RustEmbed)]
#[folder = "templates/"]
struct EmbeddedTemplates;

/// Load every embedded template, keyed by template name
pub fn load_builtin() -> Result<BTreeMap<String, Template>, InstantiationError> {
    let mut templates = BTreeMap::new();

    for manifest_path in EmbeddedTemplates::iter().filter(|p| p.ends_with("/manifest.yml")) {
        let Some(dir) = manifest_path.strip_suffix("/manifest.yml") else {
            continue;
        };
        let Some(file) = EmbeddedTemplates::get(manifest_path.as_ref()) else {
            continue;
        };

        let content = std::str::from_utf8(file.data.as_ref()).map_err(|e| {
            InstantiationError::InvalidManifest(format!("{manifest_path}: {e}"))
        })?;

        let template = parse_manifest_yaml(content, template_files(dir), TemplateSource::Embedded)?;
        debug!(template = %template.name, files = template.files.len(), "Loaded embedded template");
        templates.insert(template.name.clone(), template);
    }

    Ok(templates)
}

fn template_files(dir: &str) -> FileTree {
    let prefix = format!("{dir}/files/");

    EmbeddedTemplates::iter()
        .filter_map(|path| {
            let relative = path.strip_prefix(&prefix)?.to_string();
            let file = EmbeddedTemplates::get(path.as_ref())?;
            Some((relative, file.data.to_vec()))
        })
        .collect()
}
