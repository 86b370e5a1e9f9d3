//! Harness override flags and the option map handed to the application.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flags the harness forces onto the application for fast, isolated tests.
///
/// Every flag left as `None` falls through to the layer below it: caller
/// overrides beat the defaults, which in turn beat manifest options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_seeds: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_migrate_latest: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_drop_database: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_create_database: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webserver_disabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silent: Option<bool>,
}

impl OverrideOptions {
    /// The harness defaults: every flag set to `true`.
    pub fn defaults() -> Self {
        Self {
            run_seeds: Some(true),
            run_migrate_latest: Some(true),
            run_drop_database: Some(true),
            run_create_database: Some(true),
            webserver_disabled: Some(true),
            silent: Some(true),
        }
    }

    /// Returns `self` with every flag set in `other` replaced.
    pub fn overlay(mut self, other: &OverrideOptions) -> Self {
        fn pick(base: &mut Option<bool>, top: Option<bool>) {
            if top.is_some() {
                *base = top;
            }
        }
        pick(&mut self.run_seeds, other.run_seeds);
        pick(&mut self.run_migrate_latest, other.run_migrate_latest);
        pick(&mut self.run_drop_database, other.run_drop_database);
        pick(&mut self.run_create_database, other.run_create_database);
        pick(&mut self.webserver_disabled, other.webserver_disabled);
        pick(&mut self.silent, other.silent);
        self
    }

    pub fn with_run_seeds(mut self, value: bool) -> Self {
        self.run_seeds = Some(value);
        self
    }

    pub fn with_run_migrate_latest(mut self, value: bool) -> Self {
        self.run_migrate_latest = Some(value);
        self
    }

    pub fn with_run_drop_database(mut self, value: bool) -> Self {
        self.run_drop_database = Some(value);
        self
    }

    pub fn with_run_create_database(mut self, value: bool) -> Self {
        self.run_create_database = Some(value);
        self
    }

    pub fn with_webserver_disabled(mut self, value: bool) -> Self {
        self.webserver_disabled = Some(value);
        self
    }

    pub fn with_silent(mut self, value: bool) -> Self {
        self.silent = Some(value);
        self
    }

    /// Whether logging should stay quiet. Unset counts as silent.
    pub fn is_silent(&self) -> bool {
        self.silent.unwrap_or(true)
    }

    /// Converts the flags that are set into option entries.
    pub fn to_options(&self) -> AppOptions {
        let mut options = AppOptions::new();
        let flags = [
            ("runSeeds", self.run_seeds),
            ("runMigrateLatest", self.run_migrate_latest),
            ("runDropDatabase", self.run_drop_database),
            ("runCreateDatabase", self.run_create_database),
            ("webserverDisabled", self.webserver_disabled),
            ("silent", self.silent),
        ];
        for (key, value) in flags {
            if let Some(value) = value {
                options.insert(key, Value::Bool(value));
            }
        }
        options
    }
}

/// Ordered option map passed to [`Application::construct`](crate::Application::construct).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppOptions {
    entries: BTreeMap<String, Value>,
}

impl AppOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.entries.get(key).and_then(Value::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merges `other` into `self`; keys present in `other` win.
    pub fn merge(mut self, other: AppOptions) -> Self {
        self.entries.extend(other.entries);
        self
    }
}

impl FromIterator<(String, Value)> for AppOptions {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Final application options: manifest options, then the resolved overrides.
pub fn resolve_options(manifest_options: AppOptions, overrides: &OverrideOptions) -> AppOptions {
    manifest_options.merge(overrides.to_options())
}
