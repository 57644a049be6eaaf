//! Secrets loaded from `secrets.yaml`
//!
//! Values are held as [`SecretString`] and only exposed when substituted
//! into the configuration tree.

use crate::error::{ConfigError, ConfigResult};
use secrecy::SecretString;
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name looked up next to the configuration file
pub const SECRETS_FILE: &str = "secrets.yaml";

/// Secrets store keyed by name
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: HashMap<String, SecretString>,
    path: Option<PathBuf>,
}

impl Secrets {
    /// Load `secrets.yaml` from `config_dir`
    ///
    /// A missing file yields an empty store.
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let path = config_dir.join(SECRETS_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "No secrets file, continuing without secrets");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;
        let raw: HashMap<String, Value> =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::ParseYaml {
                path: path.clone(),
                source,
            })?;

        let values: HashMap<String, SecretString> = raw
            .into_iter()
            .map(|(key, value)| (key, SecretString::from(scalar_to_string(value))))
            .collect();

        debug!(count = values.len(), path = %path.display(), "Loaded secrets");
        Ok(Self {
            values,
            path: Some(path),
        })
    }

    /// Build a store from key/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), SecretString::from(v.into())))
                .collect(),
            path: None,
        }
    }

    /// Look up a secret by key
    pub fn get(&self, key: &str) -> ConfigResult<&SecretString> {
        self.values.get(key).ok_or_else(|| ConfigError::SecretNotFound {
            key: key.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The file the secrets came from, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn scalar_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(&other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}
