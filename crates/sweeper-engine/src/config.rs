//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::limiter::RateLimitConfig;
use crate::platform::MAX_PAGE_SIZE;

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Directory holding settings.json, tasks.json and the restore journal.
    pub data_dir: PathBuf,

    pub rate_limit: RateLimitConfig,

    pub scan: ScanConfig,

    pub progress: ProgressConfig,
}

impl Config {
    /// Default configuration rooted at the given data directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.data_dir.join("tasks.json")
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("restore-journal.jsonl")
    }
}

/// Scan loop tuning.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Messages per history fetch (capped at the platform maximum).
    pub page_size: usize,

    /// Pause between consecutive page fetches.
    pub page_delay: Duration,

    /// Wait after each unarchive/unlock before the next step.
    pub state_settle_delay: Duration,
}

impl ScanConfig {
    /// Page size clamped to `1..=MAX_PAGE_SIZE`.
    pub fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            page_delay: Duration::from_millis(100),
            state_settle_delay: Duration::from_millis(500),
        }
    }
}

/// Progress throttling.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Minimum time between throttled updates.
    pub min_interval: Duration,

    /// Forced refresh period while a scan is running.
    pub refresh_interval: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(5),
            refresh_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_capped() {
        let scan = ScanConfig {
            page_size: 500,
            ..ScanConfig::default()
        };
        assert_eq!(scan.effective_page_size(), 100);

        let scan = ScanConfig {
            page_size: 0,
            ..ScanConfig::default()
        };
        assert_eq!(scan.effective_page_size(), 1);
    }

    #[test]
    fn test_paths_live_under_data_dir() {
        let config = Config::with_data_dir("/var/lib/sweeper");
        assert_eq!(
            config.tasks_path(),
            PathBuf::from("/var/lib/sweeper/tasks.json")
        );
        assert_eq!(config.rate_limit.max_per_window, 5);
    }
}
