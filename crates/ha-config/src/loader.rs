//! YAML loader resolving `!secret` and `!env_var` tags

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use secrecy::ExposeSecret;
use serde_yaml::value::TaggedValue;
use serde_yaml::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, trace};

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Loads YAML and substitutes tagged scalars
pub struct YamlLoader {
    secrets: Secrets,
    env: EnvLookup,
}

impl YamlLoader {
    /// Loader using `secrets.yaml` from `config_dir` and the process environment
    pub fn new(config_dir: &Path) -> ConfigResult<Self> {
        Ok(Self::with_secrets(Secrets::load(config_dir)?))
    }

    /// Loader using the given secrets and the process environment
    pub fn with_secrets(secrets: Secrets) -> Self {
        Self {
            secrets,
            env: Box::new(|var| std::env::var(var).ok()),
        }
    }

    /// Replace the environment lookup
    pub fn with_env<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Box::new(env);
        self
    }

    /// Read an environment variable through the configured lookup
    pub fn env_var(&self, var: &str) -> Option<String> {
        (self.env)(var)
    }

    /// Load and resolve a YAML file
    pub fn load_file(&self, path: &Path) -> ConfigResult<Value> {
        debug!(path = %path.display(), "Loading YAML file");
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_str(&content, path)
    }

    /// Load and resolve YAML text; `origin` is used in error messages
    pub fn load_str(&self, content: &str, origin: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
            path: origin.to_path_buf(),
            source,
        })?;
        self.resolve(value)
    }

    fn resolve(&self, value: Value) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tagged(*tagged),
            Value::Mapping(map) => map
                .into_iter()
                .map(|(k, v)| Ok((k, self.resolve(v)?)))
                .collect::<ConfigResult<serde_yaml::Mapping>>()
                .map(Value::Mapping),
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.resolve(v))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    fn resolve_tagged(&self, tagged: TaggedValue) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        trace!(tag = %tag, "Resolving tag");

        match tag.as_str() {
            "!secret" => {
                let key = scalar(&tag, &tagged.value)?;
                let secret = self.secrets.get(key.trim())?;
                Ok(Value::String(secret.expose_secret().to_string()))
            }
            "!env_var" => {
                let argument = scalar(&tag, &tagged.value)?;
                let mut parts = argument.trim().splitn(2, char::is_whitespace);
                let var = parts.next().unwrap_or_default();
                let default = parts.next().map(str::trim);

                match (self.env_var(var), default) {
                    (Some(value), _) => Ok(Value::String(value)),
                    (None, Some(default)) => Ok(Value::String(default.to_string())),
                    (None, None) => Err(ConfigError::EnvVarNotFound {
                        var: var.to_string(),
                    }),
                }
            }
            _ => Ok(Value::Tagged(Box::new(TaggedValue {
                tag: tagged.tag,
                value: self.resolve(tagged.value)?,
            }))),
        }
    }
}

fn scalar<'a>(tag: &str, value: &'a Value) -> ConfigResult<&'a str> {
    value.as_str().ok_or_else(|| ConfigError::InvalidTag {
        tag: tag.to_string(),
        reason: "expected a string argument".to_string(),
    })
}
