//! Configuration for observers and undo adapters.
//!
//! Both configuration types deserialize with serde so they can live alongside
//! other project settings:
//!
//! ```
//! use horizon_observer::{HistoryConfig, ObserverConfig};
//!
//! let config: ObserverConfig = serde_json::from_str(
//!     r#"{ "paths_with_duplicates": ["tags"], "schema": { "position": "vec3" } }"#,
//! ).unwrap();
//! assert!(config.allows_duplicates("tags"));
//!
//! let history: HistoryConfig = serde_json::from_str(r#"{ "prefix": "entity." }"#).unwrap();
//! assert!(history.enabled);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::observer::{LatestFn, Observer};

/// Per-observer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Array paths that accept duplicate values on insert.
    pub paths_with_duplicates: Vec<String>,
    /// Type name reported by `for_each` for a path, overriding the inferred kind.
    pub schema: HashMap<String, String>,
}

impl ObserverConfig {
    /// Whether inserts into the array at `path` may add duplicate values.
    pub fn allows_duplicates(&self, path: &str) -> bool {
        self.paths_with_duplicates.iter().any(|p| p == path)
    }

    /// The schema type name registered for `path`, if any.
    pub fn schema_type(&self, path: &str) -> Option<&str> {
        self.schema.get(path).map(String::as_str)
    }
}

/// Configuration for an [`ObserverHistory`](crate::ObserverHistory) adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Prepended to every recorded action name.
    pub prefix: String,
    /// Whether recorded actions coalesce with a same-named predecessor.
    pub combine: bool,
    /// Whether the adapter starts out recording.
    pub enabled: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            combine: false,
            enabled: true,
        }
    }
}

impl HistoryConfig {
    /// Create a configuration with the given action-name prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }
}

/// Builder for observers with custom configuration.
#[derive(Default)]
pub struct ObserverBuilder {
    data: Option<serde_json::Map<String, JsonValue>>,
    config: ObserverConfig,
    latest: Option<LatestFn>,
}

impl ObserverBuilder {
    /// Create a builder for an empty observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial data. Non-object values are ignored.
    pub fn data(mut self, data: JsonValue) -> Self {
        match data {
            JsonValue::Object(map) => self.data = Some(map),
            other => {
                tracing::warn!(
                    target: crate::logging::targets::OBSERVER,
                    kind = crate::tree::json_kind(&other),
                    "ignoring non-object observer data"
                );
            }
        }
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ObserverConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolver for the live instance of the observer being built.
    pub fn latest<F>(mut self, resolver: F) -> Self
    where
        F: Fn() -> Option<Observer> + Send + Sync + 'static,
    {
        self.latest = Some(Arc::new(resolver));
        self
    }

    /// Allow duplicate values in the array at `path`.
    pub fn path_with_duplicates(mut self, path: impl Into<String>) -> Self {
        self.config.paths_with_duplicates.push(path.into());
        self
    }

    /// Report `type_name` from `for_each` for `path`.
    pub fn schema_type(mut self, path: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.config.schema.insert(path.into(), type_name.into());
        self
    }

    /// Build the observer.
    pub fn build(self) -> Observer {
        let observer = Observer::with_config(self.config);
        if let Some(latest) = self.latest {
            observer.set_latest_fn(latest);
        }
        if let Some(data) = self.data {
            observer.populate(data);
        }
        observer
    }
}

impl std::fmt::Debug for ObserverBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverBuilder")
            .field("data", &self.data)
            .field("config", &self.config)
            .field("latest", &self.latest.is_some())
            .finish()
    }
}
