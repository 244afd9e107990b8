//! Template instantiation
//!
//! Files ending in `.tera` are rendered with the muppet context and lose the
//! suffix; every other file is copied byte for byte. Paths containing Tera
//! syntax are rendered too, which is how package directories follow the
//! muppet name. Rendering is strict: an undefined variable is an error.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error as _;
use tera::{Context, Tera};

use crate::core::utils::{to_pascal_case, to_snake_case};
use crate::templates::manifest::RESERVED_PARAMETERS;
use crate::templates::{FileTree, InstantiationError, ParameterSpec, ParameterType, Template};

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^$])(\{\{\s*[A-Za-z_][A-Za-z0-9_.]*\s*\}\})").expect("valid placeholder regex")
});

/// Inputs for one instantiation
#[derive(Debug, Clone, Default)]
pub struct InstantiationRequest {
    pub muppet_name: String,
    pub environment: String,
    pub params: BTreeMap<String, String>,
    pub feature_overrides: BTreeMap<String, bool>,
}

impl InstantiationRequest {
    pub fn new<N: Into<String>, E: Into<String>>(muppet_name: N, environment: E) -> Self {
        Self {
            muppet_name: muppet_name.into(),
            environment: environment.into(),
            ..Default::default()
        }
    }

    pub fn param<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn feature<K: Into<String>>(mut self, name: K, enabled: bool) -> Self {
        self.feature_overrides.insert(name.into(), enabled);
        self
    }
}

/// Materialize `template` for the requested muppet
///
/// Identical inputs always produce a byte-identical tree.
pub fn instantiate(
    template: &Template,
    request: &InstantiationRequest,
) -> Result<FileTree, InstantiationError> {
    let params = resolve_parameters(template, &request.params)?;
    let features = resolve_features(template, &request.feature_overrides)?;
    let context = build_context(template, request, &params, &features)?;

    let dropped: BTreeSet<&str> = template
        .feature_files
        .iter()
        .filter(|(feature, _)| !features.get(*feature).copied().unwrap_or(false))
        .flat_map(|(_, files)| files.iter().map(String::as_str))
        .collect();

    let mut tree = FileTree::new();
    for (raw_path, entry) in template.files.iter() {
        let is_template = raw_path.ends_with(".tera");
        let source_path = raw_path.strip_suffix(".tera").unwrap_or(raw_path);
        if dropped.contains(source_path) {
            tracing::debug!(path = %source_path, "Skipping file of disabled feature");
            continue;
        }

        let path = render_path(source_path, &context)?;
        if tree.contains(&path) {
            return Err(InstantiationError::Render {
                path,
                message: "rendered path collides with another file".to_string(),
            });
        }

        if is_template {
            let source = entry.as_text().ok_or_else(|| InstantiationError::Render {
                path: raw_path.to_string(),
                message: "template file is not valid UTF-8".to_string(),
            })?;
            let rendered = render(raw_path, source, &context)?;
            tree.insert(path, rendered);
        } else {
            tree.insert(path, entry.content.clone());
        }
    }

    tracing::debug!(
        template = %template.name,
        muppet = %request.muppet_name,
        files = tree.len(),
        "Instantiated template"
    );
    Ok(tree)
}

/// Placeholders left in paths or text contents, as `path: placeholder`
///
/// GitHub expression syntax (`${{ ... }}`) is not a placeholder.
pub fn unresolved_placeholders(tree: &FileTree) -> Vec<String> {
    let mut found = Vec::new();
    for (path, entry) in tree.iter() {
        for caps in PLACEHOLDER.captures_iter(path) {
            found.push(format!("{path}: {}", &caps[1]));
        }
        if let Some(text) = entry.as_text() {
            for caps in PLACEHOLDER.captures_iter(text) {
                found.push(format!("{path}: {}", &caps[1]));
            }
        }
    }
    found
}

fn resolve_parameters(
    template: &Template,
    supplied: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, (ParameterType, String)>, InstantiationError> {
    for key in supplied.keys() {
        if RESERVED_PARAMETERS.contains(&key.as_str()) {
            return Err(InstantiationError::invalid_value(
                key,
                "reserved name set by the engine",
            ));
        }
        if template.parameter(key).is_none() {
            return Err(InstantiationError::invalid_value(
                key,
                format!("not declared by template '{}'", template.name),
            ));
        }
    }

    let kind_defaults = template.kind.default_parameters();
    let mut resolved = BTreeMap::new();

    for spec in &template.parameters {
        let value = supplied
            .get(&spec.name)
            .cloned()
            .or_else(|| spec.default.clone())
            .or_else(|| kind_defaults.get(spec.name.as_str()).map(|v| v.to_string()));

        let value = match value {
            Some(value) => {
                validate_value(spec, &value)?;
                value
            }
            None if spec.required => {
                return Err(InstantiationError::MissingParameter {
                    template: template.name.clone(),
                    parameter: spec.name.clone(),
                });
            }
            None => String::new(),
        };
        resolved.insert(spec.name.clone(), (spec.param_type, value));
    }

    Ok(resolved)
}

fn validate_value(spec: &ParameterSpec, value: &str) -> Result<(), InstantiationError> {
    match spec.param_type {
        ParameterType::Integer if value.parse::<i64>().is_err() => {
            return Err(InstantiationError::invalid_value(
                &spec.name,
                format!("'{value}' is not an integer"),
            ));
        }
        ParameterType::Boolean if value.parse::<bool>().is_err() => {
            return Err(InstantiationError::invalid_value(
                &spec.name,
                format!("'{value}' is not true or false"),
            ));
        }
        _ => {}
    }

    if let Some(pattern) = &spec.pattern {
        let anchored = Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| InstantiationError::InvalidManifest(e.to_string()))?;
        if !anchored.is_match(value) {
            return Err(InstantiationError::invalid_value(
                &spec.name,
                format!("'{value}' does not match pattern {pattern}"),
            ));
        }
    }
    Ok(())
}

fn resolve_features(
    template: &Template,
    overrides: &BTreeMap<String, bool>,
) -> Result<BTreeMap<String, bool>, InstantiationError> {
    let mut features = template.features.clone();
    for (name, enabled) in overrides {
        match features.get_mut(name) {
            Some(slot) => *slot = *enabled,
            None => {
                return Err(InstantiationError::invalid_value(
                    format!("features.{name}"),
                    format!("template '{}' has no such feature", template.name),
                ));
            }
        }
    }
    Ok(features)
}

fn build_context(
    template: &Template,
    request: &InstantiationRequest,
    params: &BTreeMap<String, (ParameterType, String)>,
    features: &BTreeMap<String, bool>,
) -> Result<Context, InstantiationError> {
    let mut context = Context::new();
    let mut plain = BTreeMap::new();

    for (name, (param_type, value)) in params {
        match param_type {
            ParameterType::Integer if !value.is_empty() => {
                let number: i64 = value
                    .parse()
                    .map_err(|_| InstantiationError::invalid_value(name, "not an integer"))?;
                context.insert(name, &number);
            }
            ParameterType::Boolean if !value.is_empty() => {
                context.insert(name, &(value == "true"));
            }
            _ => context.insert(name, value),
        }
        plain.insert(name.clone(), value.clone());
    }

    let kind = template.kind;
    context.insert("muppet_name", &request.muppet_name);
    context.insert("muppet_name_snake", &to_snake_case(&request.muppet_name));
    context.insert("muppet_name_pascal", &to_pascal_case(&request.muppet_name));
    context.insert("package_path", &kind.package_path(&request.muppet_name, &plain));
    context.insert("package_name", &kind.package_name(&request.muppet_name, &plain));
    context.insert("environment", &request.environment);
    context.insert("template_name", &template.name);
    context.insert("template_version", &template.version);
    context.insert("health_path", kind.health_check_path());
    context.insert("container_port", &kind.container_port());
    context.insert("features", features);

    Ok(context)
}

fn render(name: &str, source: &str, context: &Context) -> Result<String, InstantiationError> {
    Tera::one_off(source, context, false).map_err(|e| InstantiationError::Render {
        path: name.to_string(),
        message: describe(&e),
    })
}

fn render_path(path: &str, context: &Context) -> Result<String, InstantiationError> {
    let rendered = if path.contains("{{") || path.contains("{%") {
        render(path, path, context)?
    } else {
        path.to_string()
    };

    let invalid = rendered.is_empty()
        || rendered.starts_with('/')
        || rendered
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(InstantiationError::Render {
            path: path.to_string(),
            message: format!("rendered to invalid path '{rendered}'"),
        });
    }
    Ok(rendered)
}

/// Tera nests the useful message in the source chain
fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
