// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uriteller_core::StoreConfig;

/// URI:teller Server Configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    /// HTTP listen address (e.g., "127.0.0.1:8080")
    #[serde(default = "default_http_addr")]
    pub listen_addr: String,

    /// Public base URL used to build trap, view and update links
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Topic trap hits are published to
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Subscription the enrichment worker reads from
    #[serde(default = "default_subscription")]
    pub subscription: String,

    /// Delay before an unacknowledged delivery is handed out again
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Run the enrichment worker inside the server process
    #[serde(default = "default_worker_enabled")]
    pub enabled: bool,

    /// Maximum deliveries processed at once
    #[serde(default = "default_max_in_progress")]
    pub max_in_progress: usize,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_http_addr(),
            base_url: default_base_url(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            subscription: default_subscription(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_worker_enabled(),
            max_in_progress: default_max_in_progress(),
        }
    }
}

impl QueueConfig {
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

// Default values
fn default_http_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_topic() -> String {
    "trap-topic".to_string()
}

fn default_subscription() -> String {
    "trap-subscription".to_string()
}

fn default_redelivery_delay_ms() -> u64 {
    10_000
}

fn default_worker_enabled() -> bool {
    true
}

fn default_max_in_progress() -> usize {
    512
}

impl ServerConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: env > file > defaults
    ///
    /// Supported environment variables:
    /// - URITELLER_HTTP_ADDR: HTTP listen address (default: 127.0.0.1:8080)
    /// - URITELLER_BASE_URL: Public base URL (default: http://localhost:8080)
    /// - URITELLER_BATCH_CAP: Visits per committed batch (default: 10)
    /// - URITELLER_MAX_CONFLICT_RETRIES: Sequence conflicts tolerated per batch (default: unbounded)
    /// - URITELLER_WORKER_ENABLED: Run the enrichment worker (default: true)
    /// - URITELLER_MAX_IN_PROGRESS: Concurrent worker deliveries (default: 512)
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            }
            Some(path) => {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };

        Ok(config.merge_with_env(|name| std::env::var(name).ok()))
    }

    /// Override fields whose environment variable is set.
    ///
    /// Unparsable numeric or boolean values are ignored with a warning.
    pub fn merge_with_env(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(addr) = var("URITELLER_HTTP_ADDR") {
            self.server.listen_addr = addr;
        }

        if let Some(base_url) = var("URITELLER_BASE_URL") {
            self.server.base_url = base_url;
        }

        if let Some(cap) = parsed(&var, "URITELLER_BATCH_CAP") {
            self.store.batch_cap = cap;
        }

        if let Some(retries) = parsed(&var, "URITELLER_MAX_CONFLICT_RETRIES") {
            self.store.conflict.max_retries = Some(retries);
        }

        if let Some(enabled) = parsed(&var, "URITELLER_WORKER_ENABLED") {
            self.worker.enabled = enabled;
        }

        if let Some(max) = parsed(&var, "URITELLER_MAX_IN_PROGRESS") {
            self.worker.max_in_progress = max;
        }

        self
    }

    /// Parse listen address as SocketAddr
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(self.server.listen_addr.parse()?)
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.server.base_url.trim_end_matches('/')
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.socket_addr()?;

        let base = url::Url::parse(&self.server.base_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("Base URL must be http or https, got {}", base.scheme());
        }

        if self.store.batch_cap == 0 {
            anyhow::bail!("store.batch_cap must be greater than zero");
        }

        if let Some(backoff) = &self.store.conflict.backoff {
            backoff
                .validate()
                .map_err(|e| anyhow::anyhow!("store.conflict.backoff: {}", e))?;
        }

        if self.worker.enabled && self.worker.max_in_progress == 0 {
            anyhow::bail!("worker.max_in_progress must be greater than zero");
        }

        Ok(())
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = var(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparsable {}={:?}", name, raw);
            None
        }
    }
}
