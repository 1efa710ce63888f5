use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Scoped demand cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a demand does not specify one. `None` means entries never expire.
    #[serde(default)]
    pub default_ttl_seconds: Option<u64>,
    /// Storage key prefix for persisted entries (default: "cache").
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,
    /// Capacity of the change notification channel (default: 256).
    #[serde(default = "default_change_buffer")]
    pub change_buffer: usize,
}

/// Navigation stack settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Mirror stack mutations onto host history (default: true).
    #[serde(default = "default_true")]
    pub sync_history: bool,
    /// Persist frames across reloads (default: true).
    #[serde(default = "default_true")]
    pub persist: bool,
    /// How long an awaited navigation waits for its frame to render (default: 3000).
    #[serde(default = "default_transition_timeout_ms")]
    pub transition_timeout_ms: u64,
    /// Storage key prefix for persisted stacks (default: "nav").
    #[serde(default = "default_nav_namespace")]
    pub namespace: String,
    /// Tab stack ids of the group, in display order.
    #[serde(default = "default_stacks")]
    pub stacks: Vec<String>,
    /// Stack shown when nothing was persisted. Defaults to the first stack.
    #[serde(default)]
    pub initial: Option<String>,
}

/// Realtime subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Buffer size of each backend change channel (default: 64).
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

/// Durable storage location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the file store. Defaults to `<data_dir>/flowstate`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_cache_namespace() -> String {
    "cache".to_string()
}

fn default_nav_namespace() -> String {
    "nav".to_string()
}

fn default_change_buffer() -> usize {
    256
}

fn default_transition_timeout_ms() -> u64 {
    3000
}

fn default_channel_buffer() -> usize {
    64
}

fn default_stacks() -> Vec<String> {
    ["home-stack", "quiz-stack", "payment-stack", "rewards-stack", "profile-stack"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: None,
            namespace: default_cache_namespace(),
            change_buffer: default_change_buffer(),
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            sync_history: true,
            persist: true,
            transition_timeout_ms: default_transition_timeout_ms(),
            namespace: default_nav_namespace(),
            stacks: default_stacks(),
            initial: None,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_seconds.map(Duration::from_secs)
    }
}

impl NavigationConfig {
    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }

    /// The stack shown when no selection was persisted.
    pub fn initial_stack(&self) -> Option<&str> {
        self.initial
            .as_deref()
            .or_else(|| self.stacks.first().map(String::as_str))
    }
}

impl StorageConfig {
    /// Resolved storage directory.
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("flowstate")
        })
    }
}
