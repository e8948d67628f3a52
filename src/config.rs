#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

use anyhow::{Context, Result};

/// Default directory for the local storage adapter when none is configured.
pub const DEFAULT_DATA_DIR: &str = "grader_data";

/// Default per-probe time limit, in seconds.
pub const DEFAULT_TIME_LIMIT_SECS: u64 = 30;

/// Supabase credentials loaded from the environment, if available.
#[derive(Clone)]
struct SupabaseEnv {
    /// Fully qualified PostgREST endpoint.
    rest_endpoint: String,
    /// API key used for PostgREST requests.
    api_key:       String,
}

impl SupabaseEnv {
    /// Builds a Supabase credential bundle from environment-provided values.
    fn new(url: String, key: String) -> Self {
        let rest_endpoint = format!("{}/rest/v1", url.trim_end_matches('/'));
        Self {
            rest_endpoint,
            api_key: key,
        }
    }
}

/// Runtime configuration shared across the crate.
pub struct ConfigState {
    /// Storage backend kind requested through the environment.
    storage_kind:       String,
    /// Root directory for the local storage adapter.
    data_dir:           PathBuf,
    /// Supabase credentials, if configured.
    supabase:           Option<SupabaseEnv>,
    /// Default per-probe time limit applied when an assignment does not
    /// override it.
    default_time_limit: Duration,
}

impl ConfigState {
    /// Construct a new configuration instance from the environment.
    fn new() -> Result<Self> {
        let supabase =
            match (std::env::var("SUPABASE_URL").ok(), std::env::var("SUPABASE_ANON_KEY").ok()) {
                (Some(url), Some(key)) if !url.trim().is_empty() && !key.trim().is_empty() => {
                    Some(SupabaseEnv::new(url, key))
                }
                _ => None,
            };

        let storage_kind = std::env::var("RUBRIC_STORAGE")
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_else(|_| "local".to_string());

        let data_dir = std::env::var("RUBRIC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));

        let default_time_limit =
            read_timeout_secs("RUBRIC_TIME_LIMIT_SECS", DEFAULT_TIME_LIMIT_SECS);

        Ok(Self {
            storage_kind,
            data_dir,
            supabase,
            default_time_limit,
        })
    }

    /// Returns the configured storage backend kind (`local` or `remote`).
    pub fn storage_kind(&self) -> &str {
        &self.storage_kind
    }

    /// Returns the root directory used by the local storage adapter.
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Returns the configured PostgREST endpoint, if Supabase credentials are
    /// available.
    pub fn supabase_endpoint(&self) -> Option<(String, String)> {
        self.supabase
            .as_ref()
            .map(|creds| (creds.rest_endpoint.clone(), creds.api_key.clone()))
    }

    /// Returns the default per-probe time limit.
    pub fn default_time_limit(&self) -> Duration {
        self.default_time_limit
    }
}

/// Shared configuration handle used throughout the crate.
#[derive(Clone)]
pub struct ConfigHandle(Arc<ConfigState>);

impl std::ops::Deref for ConfigHandle {
    type Target = ConfigState;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Global storage for the lazily constructed configuration state.
static CONFIG_SLOT: OnceLock<Mutex<Option<Arc<ConfigState>>>> = OnceLock::new();

/// Returns the mutex guarding the global configuration slot.
fn slot() -> &'static Mutex<Option<Arc<ConfigState>>> {
    CONFIG_SLOT.get_or_init(|| Mutex::new(None))
}

/// Ensure the global configuration has been initialized and return a handle.
pub fn ensure_initialized() -> Result<ConfigHandle> {
    let slot = slot();
    let mut guard = slot.lock().expect("config slot poisoned");
    if let Some(cfg) = guard.as_ref() {
        return Ok(ConfigHandle(Arc::clone(cfg)));
    }

    let cfg = ConfigState::new()
        .map(Arc::new)
        .context("Failed to build configuration from environment")?;
    *guard = Some(Arc::clone(&cfg));
    Ok(ConfigHandle(cfg))
}

/// Returns the active configuration, initializing it on demand.
pub fn get() -> ConfigHandle {
    ensure_initialized().expect("configuration initialization failed")
}

/// Returns the default per-probe time limit.
pub fn default_time_limit() -> Duration {
    get().default_time_limit()
}

/// Parses an environment variable into a `Duration`, falling back to
/// `default_secs` when parsing fails or the variable is missing.
fn read_timeout_secs(env: &str, default_secs: u64) -> Duration {
    std::env::var(env)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}
