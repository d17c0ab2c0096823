//! Configuration loading for sync jobs
//!
//! Supports loading API credentials from (in order of priority):
//! 1. Compile-time embedded token (for production builds)
//! 2. JSON file in the sportsync config directory
//! 3. Runtime environment variables (fallback)
//!
//! Job and engine settings come from `sync.json` in the same directory,
//! with every field defaulted.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::models::EntityType;
use crate::rate::RateLimitSettings;
use crate::sync::RetryPolicy;

/// Credentials filename in the sportsync config directory
const CREDENTIALS_FILE: &str = "api-credentials.json";
/// Settings filename in the sportsync config directory
const SETTINGS_FILE: &str = "sync.json";
/// Default upstream API root
pub const DEFAULT_BASE_URL: &str = "https://api.sportmonks.com/v3/football";

/// Token and endpoint for the upstream API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCredentials {
    pub api_token: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl ApiCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded token
    /// 2. JSON file (~/.config/sportsync/api-credentials.json)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE) {
            return config::load_json(CREDENTIALS_FILE);
        }

        Self::from_env()
    }

    /// Token embedded at compile time.
    /// Build with: SPORTSYNC_API_TOKEN=xxx cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let api_token = option_env!("SPORTSYNC_API_TOKEN")?;
        if api_token.is_empty() {
            return None;
        }

        Some(Self {
            api_token: api_token.to_string(),
            base_url: option_env!("SPORTSYNC_BASE_URL")
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .unwrap_or_else(default_base_url),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Parse credentials from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: Self = serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        if creds.api_token.trim().is_empty() {
            bail!("Credentials JSON has an empty api_token");
        }
        Ok(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let api_token = std::env::var("SPORTSYNC_API_TOKEN")
            .context("SPORTSYNC_API_TOKEN environment variable not set")?;
        let base_url = std::env::var("SPORTSYNC_BASE_URL").unwrap_or_else(|_| default_base_url());

        Ok(Self {
            api_token,
            base_url,
        })
    }

    /// Default credentials file path (~/.config/sportsync/api-credentials.json)
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

/// One named paginated sync process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncJobConfig {
    /// Identity of the checkpoint; one checkpoint per sync_id
    pub sync_id: String,
    /// Budget bucket this job draws from
    pub entity_type: EntityType,
    /// Collection path relative to the API base URL, e.g. "players"
    pub endpoint: String,
    /// Extra query parameters sent with every page request
    #[serde(default)]
    pub extra_params: Vec<(String, String)>,
    /// Stop the invocation after this many pages (None = run until done)
    #[serde(default)]
    pub max_pages_per_run: Option<u32>,
    /// Pause between consecutive page requests
    #[serde(default)]
    pub page_delay_ms: u64,
}

impl SyncJobConfig {
    pub fn new(
        sync_id: impl Into<String>,
        entity_type: impl Into<EntityType>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            sync_id: sync_id.into(),
            entity_type: entity_type.into(),
            endpoint: endpoint.into(),
            extra_params: Vec::new(),
            max_pages_per_run: None,
            page_delay_ms: 0,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((key.into(), value.into()));
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages_per_run = Some(max_pages);
        self
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// SQLite database for checkpoints and records (None = config dir)
    pub database_path: Option<PathBuf>,
    pub rate_limit: RateLimitSettings,
    pub retry: RetryPolicy,
    /// Wait used when a rate-limit response carries no reset time
    pub fallback_retry_after_seconds: i64,
    pub request_timeout_secs: u64,
    /// Worker count for targeted syncs
    pub targeted_concurrency: usize,
    pub jobs: Vec<SyncJobConfig>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            database_path: None,
            rate_limit: RateLimitSettings::default(),
            retry: RetryPolicy::default(),
            fallback_retry_after_seconds: 3600,
            request_timeout_secs: 30,
            targeted_concurrency: 4,
            jobs: Vec::new(),
        }
    }
}

impl SyncSettings {
    /// Load `sync.json` from the config directory, or defaults if absent
    pub fn load() -> Result<Self> {
        config::load_json_or_default(SETTINGS_FILE)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Write `sync.json` to the config directory
    pub fn save(&self) -> Result<()> {
        config::save_json(SETTINGS_FILE, self)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        config::save_json_file(path, self)
    }

    /// Default location of `sync.json`
    pub fn default_settings_path() -> Option<PathBuf> {
        config::config_path(SETTINGS_FILE)
    }

    /// Look up a configured job by its sync_id
    pub fn job(&self, sync_id: &str) -> Option<&SyncJobConfig> {
        self.jobs.iter().find(|j| j.sync_id == sync_id)
    }

    /// Resolve where the database lives
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => config::config_path("sportsync.sqlite")
                .context("Could not determine config directory"),
        }
    }
}
