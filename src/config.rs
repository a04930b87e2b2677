use serde::Deserialize;

use crate::models::Target;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub badges: BadgeConfig,
    #[serde(default)]
    pub publishing: PublishingConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    pub targets: Vec<Target>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Cadence while the dashboard is foregrounded.
    pub fast_interval_ms: u64,
    /// Shared cadence while no viewer has the dashboard in the foreground.
    pub slow_interval_ms: u64,
    pub fetch_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failures before the error overlay is shown.
    pub failure_overlay_threshold: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            fast_interval_ms: 2_000,
            slow_interval_ms: 15_000,
            fetch_timeout_ms: 10_000,
            initial_backoff_ms: 5_000,
            max_backoff_ms: 60_000,
            failure_overlay_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Samples kept per (target, metric).
    pub capacity: usize,
    /// Persist a target's series every N successful samples.
    pub persist_every: u32,
    /// When false, history lives in memory only.
    pub persistence: bool,
    pub database_path: String,
    pub max_pool_size: u32,
    /// Writer flushes once this many keys are pending.
    pub flush_rate: usize,
    pub flush_interval_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: 30,
            persist_every: 3,
            persistence: true,
            database_path: "data/dashboard.db".into(),
            max_pool_size: 4,
            flush_rate: 8,
            flush_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Chart repaints are coalesced to one per surface per frame.
    pub frame_interval_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BadgeConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for BadgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 20_000,
            timeout_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    /// Max number of view patches kept in the broadcast channel (slow clients may lag).
    pub broadcast_capacity: usize,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// How often to log engine stats (targets up/down, polls issued/superseded) at INFO level.
    pub stats_log_interval_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            stats_log_interval_secs: 60,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        let p = &self.polling;
        anyhow::ensure!(
            p.fast_interval_ms > 0,
            "polling.fast_interval_ms must be > 0, got {}",
            p.fast_interval_ms
        );
        anyhow::ensure!(
            p.slow_interval_ms > 0,
            "polling.slow_interval_ms must be > 0, got {}",
            p.slow_interval_ms
        );
        anyhow::ensure!(
            p.fetch_timeout_ms > 0,
            "polling.fetch_timeout_ms must be > 0, got {}",
            p.fetch_timeout_ms
        );
        anyhow::ensure!(
            p.initial_backoff_ms > 0,
            "polling.initial_backoff_ms must be > 0, got {}",
            p.initial_backoff_ms
        );
        anyhow::ensure!(
            p.max_backoff_ms >= p.initial_backoff_ms,
            "polling.max_backoff_ms must be >= initial_backoff_ms ({}), got {}",
            p.initial_backoff_ms,
            p.max_backoff_ms
        );
        anyhow::ensure!(
            p.failure_overlay_threshold > 0,
            "polling.failure_overlay_threshold must be > 0, got {}",
            p.failure_overlay_threshold
        );
        let h = &self.history;
        anyhow::ensure!(
            h.capacity > 0,
            "history.capacity must be > 0, got {}",
            h.capacity
        );
        anyhow::ensure!(
            h.persist_every > 0,
            "history.persist_every must be > 0, got {}",
            h.persist_every
        );
        if h.persistence {
            anyhow::ensure!(
                !h.database_path.is_empty(),
                "history.database_path must be non-empty"
            );
            anyhow::ensure!(
                h.max_pool_size > 0,
                "history.max_pool_size must be > 0, got {}",
                h.max_pool_size
            );
            anyhow::ensure!(
                h.flush_rate > 0,
                "history.flush_rate must be > 0, got {}",
                h.flush_rate
            );
            anyhow::ensure!(
                h.flush_interval_secs > 0,
                "history.flush_interval_secs must be > 0, got {}",
                h.flush_interval_secs
            );
        }
        anyhow::ensure!(
            self.render.frame_interval_ms > 0,
            "render.frame_interval_ms must be > 0, got {}",
            self.render.frame_interval_ms
        );
        if self.badges.enabled {
            anyhow::ensure!(
                self.badges.interval_ms > 0,
                "badges.interval_ms must be > 0, got {}",
                self.badges.interval_ms
            );
            anyhow::ensure!(
                self.badges.timeout_ms > 0,
                "badges.timeout_ms must be > 0, got {}",
                self.badges.timeout_ms
            );
        }
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        crate::registry::validate_targets(&self.targets)?;
        Ok(())
    }
}
