use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::memory::DEFAULT_FILE_NAME;

/// Upper bound for any configured delay or tick period: one day.
const MAX_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GideonConfig {
    /// Where the assistant's memory is persisted. `~/` is expanded.
    pub memory_path: PathBuf,
    /// Minimum "thinking" delay before a reply, in milliseconds.
    pub thinking_delay_ms: u64,
    /// Random extra delay added on top, in milliseconds (0 = none).
    pub thinking_jitter_ms: u64,
    /// Pause between the purge confirmation and the actual purge.
    pub purge_delay_ms: u64,
    /// Seconds between telemetry simulator ticks (0 = frozen readings).
    pub telemetry_interval_secs: u64,
    /// Maximum number of turns kept in the conversation log (unset = no cap).
    pub history_limit: Option<usize>,
    /// Seed for the fallback choice and jitter, for reproducible sessions.
    pub seed: Option<u64>,
}

impl Default for GideonConfig {
    fn default() -> Self {
        Self {
            memory_path: PathBuf::from("~/.gideon").join(DEFAULT_FILE_NAME),
            thinking_delay_ms: 800,
            thinking_jitter_ms: 2000,
            purge_delay_ms: 2000,
            telemetry_interval_secs: 5,
            history_limit: None,
            seed: None,
        }
    }
}

impl GideonConfig {
    /// Load config from `gideon.toml` in the given directory, falling back to defaults.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join("gideon.toml");
        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            let config: GideonConfig =
                toml::from_str(&contents).with_context(|| "parsing gideon.toml")?;
            Ok(config.clamped())
        } else {
            Ok(Self::default())
        }
    }

    /// Apply CLI overrides on top of the loaded config.
    pub fn with_overrides(
        mut self,
        memory_path: Option<PathBuf>,
        no_delay: bool,
        seed: Option<u64>,
    ) -> Self {
        if let Some(path) = memory_path {
            self.memory_path = path;
        }
        if no_delay {
            self.thinking_delay_ms = 0;
            self.thinking_jitter_ms = 0;
            self.purge_delay_ms = 0;
        }
        if seed.is_some() {
            self.seed = seed;
        }
        self
    }

    /// Cap delays and the tick period so deadlines stay representable.
    fn clamped(mut self) -> Self {
        self.thinking_delay_ms = self.thinking_delay_ms.min(MAX_DELAY_MS);
        self.thinking_jitter_ms = self.thinking_jitter_ms.min(MAX_DELAY_MS);
        self.purge_delay_ms = self.purge_delay_ms.min(MAX_DELAY_MS);
        self.telemetry_interval_secs = self.telemetry_interval_secs.min(MAX_DELAY_MS / 1000);
        self
    }

    /// Memory path with `~` expanded to the user's home directory.
    pub fn resolved_memory_path(&self) -> PathBuf {
        let s = self.memory_path.to_string_lossy();
        if let Some(rest) = s.strip_prefix("~/")
            && let Some(home) = dirs_path()
        {
            return home.join(rest);
        }
        self.memory_path.clone()
    }

    pub fn purge_delay(&self) -> Duration {
        Duration::from_millis(self.purge_delay_ms)
    }

    /// Tick period for the telemetry simulator, `None` when disabled.
    pub fn telemetry_interval(&self) -> Option<Duration> {
        (self.telemetry_interval_secs > 0).then(|| Duration::from_secs(self.telemetry_interval_secs))
    }
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = GideonConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.thinking_delay_ms, 800);
        assert_eq!(cfg.thinking_jitter_ms, 2000);
        assert!(cfg.history_limit.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("gideon.toml"),
            "memory_path = \"/tmp/g.json\"\nhistory_limit = 200\n",
        )
        .unwrap();
        let cfg = GideonConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.memory_path, PathBuf::from("/tmp/g.json"));
        assert_eq!(cfg.history_limit, Some(200));
        assert_eq!(cfg.purge_delay_ms, 2000);
        assert_eq!(cfg.resolved_memory_path(), PathBuf::from("/tmp/g.json"));
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gideon.toml"), "thinking_delay_ms = \"soon\"").unwrap();
        assert!(GideonConfig::load(dir.path()).is_err());
    }

    #[test]
    fn huge_delays_are_capped_at_one_day() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("gideon.toml"),
            format!(
                "thinking_delay_ms = {max}\nthinking_jitter_ms = {max}\npurge_delay_ms = {max}\ntelemetry_interval_secs = {max}\n",
                max = i64::MAX
            ),
        )
        .unwrap();
        let cfg = GideonConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.thinking_delay_ms, MAX_DELAY_MS);
        assert_eq!(cfg.thinking_jitter_ms, MAX_DELAY_MS);
        assert_eq!(cfg.purge_delay(), Duration::from_millis(MAX_DELAY_MS));
        assert_eq!(cfg.telemetry_interval(), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn no_delay_override_zeroes_timers() {
        let cfg = GideonConfig::default().with_overrides(None, true, Some(5));
        assert_eq!(cfg.thinking_delay_ms, 0);
        assert_eq!(cfg.thinking_jitter_ms, 0);
        assert_eq!(cfg.purge_delay(), Duration::ZERO);
        assert_eq!(cfg.seed, Some(5));
    }

    #[test]
    fn telemetry_can_be_frozen() {
        let cfg = GideonConfig {
            telemetry_interval_secs: 0,
            ..GideonConfig::default()
        };
        assert!(cfg.telemetry_interval().is_none());
    }
}
