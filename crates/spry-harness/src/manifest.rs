//! Application manifest discovery.
//!
//! A manifest is built in two steps:
//!
//! 1. [`create_manifest`] scans the application root for model and action
//!    sources (`models/`, `actions/`) and locates `spry.yaml`.
//! 2. [`hydrate_manifest`] parses `spry.yaml`, a K8s-style resource:
//!
//! ```yaml
//! apiVersion: spry.dev/v1
//! kind: App
//! metadata:
//!   name: blog
//! spec:
//!   options:
//!     database: ${DATABASE_URL}
//! ```
//!
//! [`manifest_to_options`] flattens the result into [`AppOptions`].

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::error::ManifestError;
use crate::options::AppOptions;

/// API version expected in `spry.yaml`.
pub const API_VERSION: &str = "spry.dev/v1";

/// Resource kind expected in `spry.yaml`.
pub const APP_KIND: &str = "App";

/// Config file names looked up at the application root, in order.
pub const CONFIG_FILES: &[&str] = &["spry.yaml", "spry.yml"];

const MODELS_DIR: &str = "models";
const ACTIONS_DIR: &str = "actions";

type Result<T> = std::result::Result<T, ManifestError>;

/// Description of an application derived from its root directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Application root.
    pub root: PathBuf,
    /// Application name; the root directory name until hydrated.
    pub name: String,
    /// Config file, relative to the root.
    pub config_path: Option<PathBuf>,
    /// Model names discovered under `models/`, sorted.
    pub models: Vec<String>,
    /// Action names discovered under `actions/`, sorted.
    pub actions: Vec<String>,
    /// Options from the config file, after env interpolation.
    pub options: BTreeMap<String, Value>,
    /// Whether [`hydrate_manifest`] has run.
    pub hydrated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceHeader {
    api_version: String,
    kind: String,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AppSpec {
    #[serde(default)]
    options: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct AppResource {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: AppSpec,
}

/// Scans `root` and returns an unhydrated manifest.
pub fn create_manifest(root: &Path) -> Result<Manifest> {
    if !root.is_dir() {
        return Err(ManifestError::RootNotFound(root.to_path_buf()));
    }

    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("app")
        .to_string();

    let config_path = CONFIG_FILES
        .iter()
        .map(PathBuf::from)
        .find(|candidate| root.join(candidate).is_file());

    let models = discover_names(&root.join(MODELS_DIR));
    let actions = discover_names(&root.join(ACTIONS_DIR));

    log::debug!(
        "Discovered {} model(s) and {} action(s) in {}",
        models.len(),
        actions.len(),
        root.display()
    );

    Ok(Manifest {
        root: root.to_path_buf(),
        name,
        config_path,
        models,
        actions,
        options: BTreeMap::new(),
        hydrated: false,
    })
}

/// File stems under `dir`, skipping hidden files and directories.
fn discover_names(dir: &Path) -> Vec<String> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut names = BTreeSet::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Skipping entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        if let Ok(relative) = path.strip_prefix(dir) {
            let hidden = relative.components().any(|c| {
                c.as_os_str()
                    .to_str()
                    .map(|s| s.starts_with('.'))
                    .unwrap_or(false)
            });
            if hidden {
                continue;
            }
        }

        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            names.insert(stem.to_string());
        }
    }
    names.into_iter().collect()
}

/// Reads the config file of `manifest` (if any) and fills in name and options.
pub fn hydrate_manifest(root: &Path, manifest: Manifest) -> Result<Manifest> {
    let mut manifest = manifest;
    let Some(relative) = manifest.config_path.clone() else {
        manifest.hydrated = true;
        return Ok(manifest);
    };

    let path = root.join(&relative);
    let content = fs::read_to_string(&path).map_err(|e| ManifestError::ReadFile {
        path: path.clone(),
        source: e,
    })?;

    let resource = parse_app_resource(&content, &path)?;
    if let Some(name) = resource.metadata.name.filter(|n| !n.is_empty()) {
        manifest.name = name;
    }

    let pattern = env_pattern(&path)?;
    let mut options = BTreeMap::new();
    for (key, value) in resource.spec.options {
        options.insert(key, interpolate(value, &pattern, &path)?);
    }
    manifest.options = options;
    manifest.hydrated = true;

    log::info!(
        "Loaded manifest '{}' from {}",
        manifest.name,
        path.display()
    );
    Ok(manifest)
}

fn parse_app_resource(content: &str, path: &Path) -> Result<AppResource> {
    let header: ResourceHeader =
        serde_yaml::from_str(content).map_err(|e| ManifestError::ParseYaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    if header.api_version != API_VERSION {
        return Err(ManifestError::InvalidApiVersion {
            version: header.api_version,
            expected: API_VERSION.to_string(),
        });
    }
    if header.kind != APP_KIND {
        return Err(ManifestError::UnknownKind(header.kind));
    }

    serde_yaml::from_str(content).map_err(|e| ManifestError::ParseYaml {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn env_pattern(path: &Path) -> Result<Regex> {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").map_err(|e| ManifestError::InvalidOptions {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Replaces `${VAR}` references in every string of `value`.
fn interpolate(value: Value, pattern: &Regex, path: &Path) -> Result<Value> {
    match value {
        Value::String(s) => {
            let mut out = String::with_capacity(s.len());
            let mut last = 0;
            for caps in pattern.captures_iter(&s) {
                let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                let resolved =
                    std::env::var(name.as_str()).map_err(|_| ManifestError::MissingEnvVar {
                        name: name.as_str().to_string(),
                        path: path.to_path_buf(),
                    })?;
                out.push_str(&s[last..whole.start()]);
                out.push_str(&resolved);
                last = whole.end();
            }
            out.push_str(&s[last..]);
            Ok(Value::String(out))
        }
        Value::Array(items) => items
            .into_iter()
            .map(|item| interpolate(item, pattern, path))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, interpolate(v, pattern, path)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other),
    }
}

/// Flattens a manifest into application options.
///
/// Config options come first; `name`, `root`, `models` and `actions` are
/// always taken from the manifest itself.
pub fn manifest_to_options(manifest: &Manifest) -> AppOptions {
    let mut options: AppOptions = manifest
        .options
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    options.insert("name", manifest.name.clone());
    options.insert("root", manifest.root.to_string_lossy().into_owned());
    options.insert(
        "models",
        Value::Array(manifest.models.iter().cloned().map(Value::String).collect()),
    );
    options.insert(
        "actions",
        Value::Array(manifest.actions.iter().cloned().map(Value::String).collect()),
    );
    options
}
