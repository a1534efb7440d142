use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::backend::{HttpBackend, DEFAULT_TIMEOUT};
use crate::error::ConfigError;
use crate::model::RecordKind;
use crate::persistence::{FilePersistence, StorageKey};
use crate::store::{SeedPolicy, StoreConfig};

pub const ENV_API_URL: &str = "TRAVEL_LOG_API_URL";
pub const ENV_DATA_DIR: &str = "TRAVEL_LOG_DATA_DIR";
pub const ENV_VISITED_KEY: &str = "TRAVEL_LOG_VISITED_KEY";
pub const ENV_PLANNED_KEY: &str = "TRAVEL_LOG_PLANNED_KEY";
pub const ENV_TIMEOUT_MS: &str = "TRAVEL_LOG_TIMEOUT_MS";
pub const ENV_SEED_DEMO: &str = "TRAVEL_LOG_SEED_DEMO";

#[derive(Clone, Debug, PartialEq)]
pub struct TravelLogConfig {
    /// Remote sessions are impossible without it.
    pub api_base_url: Option<Url>,
    pub data_dir: PathBuf,
    pub visited_key: String,
    pub planned_key: String,
    pub visited_collection: String,
    pub planned_collection: String,
    pub request_timeout_ms: u64,
    pub seed_demo_records: bool,
}

impl Default for TravelLogConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            data_dir: PathBuf::from(".travel-log"),
            visited_key: RecordKind::Visited.default_storage_key().to_string(),
            planned_key: RecordKind::Planned.default_storage_key().to_string(),
            visited_collection: RecordKind::Visited.default_collection().to_string(),
            planned_collection: RecordKind::Planned.default_collection().to_string(),
            request_timeout_ms: u64::try_from(DEFAULT_TIMEOUT.as_millis()).unwrap_or(30_000),
            seed_demo_records: true,
        }
    }
}

impl TravelLogConfig {
    /// Defaults overridden by `TRAVEL_LOG_*` variables, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(raw) = get(ENV_API_URL) {
            let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                var: ENV_API_URL,
                reason: e.to_string(),
            })?;
            config.api_base_url = Some(url);
        }
        if let Some(dir) = get(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(key) = get(ENV_VISITED_KEY) {
            config.visited_key = key;
        }
        if let Some(key) = get(ENV_PLANNED_KEY) {
            config.planned_key = key;
        }
        if let Some(raw) = get(ENV_TIMEOUT_MS) {
            config.request_timeout_ms = raw.parse().map_err(|_| ConfigError::InvalidValue {
                var: ENV_TIMEOUT_MS,
                reason: format!("'{raw}' is not a whole number of milliseconds"),
            })?;
        }
        if let Some(raw) = get(ENV_SEED_DEMO) {
            config.seed_demo_records = parse_flag(&raw).ok_or_else(|| ConfigError::InvalidValue {
                var: ENV_SEED_DEMO,
                reason: format!("'{raw}' is not a boolean"),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Validation("request_timeout_ms must be > 0".into()));
        }
        if self.visited_key == self.planned_key {
            return Err(ConfigError::Validation(
                "visited and planned storage keys must differ".into(),
            ));
        }
        for key in [&self.visited_key, &self.planned_key] {
            StorageKey::new(key.as_str()).map_err(|e| ConfigError::Validation(e.to_string()))?;
        }
        if self.visited_collection.trim().is_empty() || self.planned_collection.trim().is_empty() {
            return Err(ConfigError::Validation("collection names cannot be empty".into()));
        }
        if let Some(url) = &self.api_base_url {
            if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
                return Err(ConfigError::Validation(format!(
                    "api base url must be an http(s) url, got '{url}'"
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn storage_key(&self, kind: RecordKind) -> Result<StorageKey, ConfigError> {
        let raw = match kind {
            RecordKind::Visited => &self.visited_key,
            RecordKind::Planned => &self.planned_key,
        };
        StorageKey::new(raw.as_str()).map_err(|e| ConfigError::Validation(e.to_string()))
    }

    pub fn collection(&self, kind: RecordKind) -> &str {
        match kind {
            RecordKind::Visited => &self.visited_collection,
            RecordKind::Planned => &self.planned_collection,
        }
    }

    pub fn store_config(&self, kind: RecordKind) -> Result<StoreConfig, ConfigError> {
        let seed = if self.seed_demo_records {
            SeedPolicy::demo(kind)
        } else {
            SeedPolicy::Empty
        };
        Ok(StoreConfig::for_kind(kind)
            .with_key(self.storage_key(kind)?)
            .with_seed(seed))
    }

    /// `None` when no API is configured.
    pub fn http_backend(&self, kind: RecordKind) -> Result<Option<HttpBackend>, ConfigError> {
        let Some(base) = &self.api_base_url else {
            return Ok(None);
        };
        HttpBackend::new(base.clone(), self.collection(kind), self.request_timeout())
            .map(Some)
            .map_err(|e| ConfigError::Validation(e.to_string()))
    }

    pub fn file_persistence(&self) -> FilePersistence {
        FilePersistence::new(&self.data_dir)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
