//! Use-case registry and process configuration.
//!
//! The registry is loaded once from a YAML document (`tasks.yaml` by
//! default) at start-up and is read-only thereafter; lookups are a single
//! `HashMap::get`. Process configuration comes from environment variables,
//! also read once at start-up — see spec.md §6.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Which queue a use-case's jobs are routed through. The original system
/// had two Celery queues (`usecases`, `ads`) with identical routing logic;
/// this spec treats that distinction as a label on the use-case, not a
/// structural difference (spec.md §9(c)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[serde(alias = "usecases")]
    UseCases,
    Ads,
}

impl Default for Channel {
    fn default() -> Self {
        Channel::UseCases
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::UseCases => write!(f, "usecases"),
            Channel::Ads => write!(f, "ads"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseShape {
    Stream,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Base64,
    Utf8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSpec {
    /// Template rendered with `{uid}` to produce the live-area filename.
    pub filename_template: String,
    pub key: String,
    #[serde(default = "default_encoding")]
    pub encoding: Encoding,
}

fn default_encoding() -> Encoding {
    Encoding::Base64
}

fn default_input_template() -> String {
    "{uid}.{name}.input.fheencrypted".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct UseCaseSpec {
    /// Filled in from the enclosing map key after parsing — the config
    /// format names a use-case by its `tasks.<name>:` key, not a field.
    #[serde(skip)]
    pub name: String,
    pub executable: PathBuf,
    #[serde(default)]
    pub queue_channel: Channel,
    #[serde(default = "default_input_template")]
    pub input_filename_template: String,
    pub response_shape: ResponseShape,
    pub outputs: Vec<OutputSpec>,
}

impl UseCaseSpec {
    fn validate(&self) -> anyhow::Result<()> {
        if self.outputs.is_empty() {
            anyhow::bail!("use-case `{}` declares no outputs", self.name);
        }
        if self.response_shape == ResponseShape::Stream && self.outputs.len() != 1 {
            anyhow::bail!(
                "use-case `{}` is STREAM but declares {} outputs (must be exactly 1)",
                self.name,
                self.outputs.len()
            );
        }
        Ok(())
    }

    pub fn input_filename(&self, uid: &str) -> String {
        self.input_filename_template
            .replace("{uid}", uid)
            .replace("{name}", &self.name)
    }

    pub fn output_filename(&self, output: &OutputSpec, uid: &str) -> String {
        output.filename_template.replace("{uid}", uid)
    }
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    tasks: HashMap<String, UseCaseSpec>,
}

/// Immutable, process-wide use-case registry.
#[derive(Debug, Clone)]
pub struct Registry {
    use_cases: HashMap<String, UseCaseSpec>,
}

impl Registry {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading use-case config `{}`: {e}", path.display()))?;
        let mut raw: RawRegistry = serde_yaml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("parsing use-case config `{}`: {e}", path.display()))?;

        for (name, spec) in raw.tasks.iter_mut() {
            spec.name = name.clone();
        }
        for spec in raw.tasks.values() {
            spec.validate()?;
        }

        Ok(Self {
            use_cases: raw.tasks,
        })
    }

    pub fn get(&self, name: &str) -> Option<&UseCaseSpec> {
        self.use_cases.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.use_cases.keys().cloned().collect()
    }
}

/// Process-wide configuration, read once from the environment at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub object_store_root: PathBuf,
    pub backup_store_root: PathBuf,
    pub bind_addr: String,
    pub tasks_config: PathBuf,
    pub log_file: PathBuf,
    pub worker_count: usize,
    pub worker_concurrency: usize,
    pub lease_visibility_timeout: Duration,
    pub result_store_ttl: Duration,
    pub cancel_grace: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            object_store_root: env_path("OBJECT_STORE_ROOT", "./files")?,
            backup_store_root: env_path("BACKUP_STORE_ROOT", "./backup")?,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_owned()),
            tasks_config: env_path("TASKS_CONFIG", "./tasks.yaml")?,
            log_file: env_path("LOG_FILE", "./evalbroker.log")?,
            worker_count: env_usize("WORKER_COUNT", 4)?,
            worker_concurrency: env_usize("WORKER_CONCURRENCY", 1)?,
            lease_visibility_timeout: Duration::from_secs(env_u64(
                "LEASE_VISIBILITY_TIMEOUT_SECS",
                60,
            )?),
            result_store_ttl: Duration::from_secs(env_u64(
                "RESULT_STORE_TTL_SECS",
                60 * 60 * 24 * 30,
            )?),
            cancel_grace: Duration::from_millis(env_u64("CANCEL_GRACE_MS", 2000)?),
        })
    }
}

fn env_path(key: &str, default: &str) -> anyhow::Result<PathBuf> {
    Ok(PathBuf::from(
        std::env::var(key).unwrap_or_else(|_| default.to_owned()),
    ))
}

fn env_usize(key: &str, default: usize) -> anyhow::Result<usize> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_outputs() {
        let spec = UseCaseSpec {
            name: "x".into(),
            executable: "x".into(),
            queue_channel: Channel::UseCases,
            input_filename_template: default_input_template(),
            response_shape: ResponseShape::Json,
            outputs: vec![],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_stream_with_multiple_outputs() {
        let spec = UseCaseSpec {
            name: "x".into(),
            executable: "x".into(),
            queue_channel: Channel::UseCases,
            input_filename_template: default_input_template(),
            response_shape: ResponseShape::Stream,
            outputs: vec![
                OutputSpec {
                    filename_template: "a".into(),
                    key: "a".into(),
                    encoding: Encoding::Base64,
                },
                OutputSpec {
                    filename_template: "b".into(),
                    key: "b".into(),
                    encoding: Encoding::Base64,
                },
            ],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn loads_from_yaml() {
        let yaml = r#"
tasks:
  example:
    executable: example_bin
    response_shape: stream
    outputs:
      - filename_template: "{uid}.example.output.fheencrypted"
        key: output
  ads_fetch:
    executable: fetch_ad
    queue_channel: ads
    response_shape: json
    outputs:
      - filename_template: "{uid}.ads_fetch.ad.output.fheencrypted"
        key: ad
        encoding: base64
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.yaml");
        std::fs::write(&path, yaml).unwrap();

        let registry = Registry::load(&path).unwrap();
        assert_eq!(registry.names().len(), 2);
        let example = registry.get("example").unwrap();
        assert_eq!(example.response_shape, ResponseShape::Stream);
        assert_eq!(registry.get("ads_fetch").unwrap().queue_channel, Channel::Ads);
    }
}
