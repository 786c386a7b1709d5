use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FeedlineConfig {
    pub api_port: u16,
    pub origin: String,
    pub paths: FeedlinePaths,
    pub paging: PagingConfig,
    pub live: LiveConfig,
    pub tasks: TaskConfig,
}

impl FeedlineConfig {
    pub fn from_env() -> Result<Self> {
        let paths = match env::var("FEEDLINE_DATA_DIR") {
            Ok(raw) if !raw.trim().is_empty() => FeedlinePaths::from_base_dir(raw.trim())?,
            _ => FeedlinePaths::discover()?,
        };
        let api_port = env::var("FEEDLINE_API_PORT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(8080);
        let origin = env::var("FEEDLINE_ORIGIN")
            .ok()
            .filter(|raw| !raw.trim().is_empty())
            .unwrap_or_else(|| format!("http://localhost:{api_port}"));
        Ok(Self {
            api_port,
            origin,
            paths,
            paging: PagingConfig::from_env(),
            live: LiveConfig::from_env(),
            tasks: TaskConfig::from_env(),
        })
    }

    pub fn new(api_port: u16, paths: FeedlinePaths) -> Self {
        Self {
            api_port,
            origin: format!("http://localhost:{api_port}"),
            paths,
            paging: PagingConfig::default(),
            live: LiveConfig::default(),
            tasks: TaskConfig::default(),
        }
    }
}

/// Page-size bounds shared by every list read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingConfig {
    pub min_page_size: i64,
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            min_page_size: 1,
            default_page_size: 10,
            max_page_size: 99,
        }
    }
}

impl PagingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |key: &str, fallback: i64| {
            env::var(key)
                .ok()
                .and_then(|raw| raw.parse::<i64>().ok())
                .unwrap_or(fallback)
        };
        let config = Self {
            min_page_size: read("FEEDLINE_PAGE_MIN", defaults.min_page_size),
            default_page_size: read("FEEDLINE_PAGE_DEFAULT", defaults.default_page_size),
            max_page_size: read("FEEDLINE_PAGE_MAX", defaults.max_page_size),
        };
        if config.is_consistent() {
            config
        } else {
            tracing::warn!(?config, "inconsistent page size bounds, using defaults");
            defaults
        }
    }

    fn is_consistent(&self) -> bool {
        self.min_page_size >= 1
            && self.min_page_size <= self.default_page_size
            && self.default_page_size <= self.max_page_size
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LiveConfig {
    /// Items buffered per live channel before new items are dropped.
    pub channel_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

impl LiveConfig {
    pub fn from_env() -> Self {
        let channel_capacity = env::var("FEEDLINE_LIVE_CHANNEL_CAPACITY")
            .ok()
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|capacity| *capacity > 0)
            .unwrap_or(Self::default().channel_capacity);
        Self { channel_capacity }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    pub max_concurrent_jobs: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 32,
        }
    }
}

impl TaskConfig {
    pub fn from_env() -> Self {
        let max_concurrent_jobs = env::var("FEEDLINE_MAX_BACKGROUND_JOBS")
            .ok()
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|jobs| *jobs > 0)
            .unwrap_or(Self::default().max_concurrent_jobs);
        Self {
            max_concurrent_jobs,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FeedlinePaths {
    pub base: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub logs_dir: PathBuf,
}

impl FeedlinePaths {
    pub fn discover() -> Result<Self> {
        let exe_path = std::env::current_exe()
            .map_err(|err| anyhow!("failed to resolve current executable: {err}"))?;
        let base = exe_path
            .parent()
            .ok_or_else(|| anyhow!("executable path missing parent"))?
            .to_path_buf();
        Self::from_base_dir(base)
    }

    pub fn from_base_dir<P: AsRef<Path>>(base: P) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let data_dir = base.join("data");
        let db_path = data_dir.join("feedline.db");
        let logs_dir = base.join("logs");

        Ok(Self {
            base,
            data_dir,
            db_path,
            logs_dir,
        })
    }
}
