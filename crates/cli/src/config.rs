//! Runtime configuration, read from an optional TOML file.
//!
//! Every section falls back to its `Default`, so an empty file (or no file)
//! gives a working in-memory setup.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use db::PoolSettings;
use engine::QueueRouting;
use queue::QueueSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Listen address of the HTTP API.
    pub bind: String,

    pub database: PoolSettings,

    /// Finished flows are evicted from the queue after this many seconds.
    pub retention_secs: u64,

    /// Per-queue limits; queues not listed use `QueueSettings::default()`.
    pub queues: BTreeMap<String, QueueSettings>,

    pub routing: QueueRouting,

    /// Handler keys served by the built-in passthrough handler.
    pub handlers: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_owned(),
            database: PoolSettings::default(),
            retention_secs: 3600,
            queues: QueueSettings::defaults(),
            routing: QueueRouting::default(),
            handlers: [
                "save:article",
                "llm:summary",
                "llm:censor",
                "llm:embedding",
                "update:article_embedding",
                "update:article_summary",
                "update:censor",
            ]
            .into_iter()
            .map(str::to_owned)
            .collect(),
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}
