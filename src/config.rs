use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TimelineConfig {
    /// Message coalescing window while the agent is streaming.
    #[serde(default = "default_coalesce_interval_ms")]
    pub coalesce_interval_ms: u64,
    #[serde(default = "default_tool_throttle_ms")]
    pub tool_throttle_ms: u64,
    /// Extra observations of the tool-call ids before regrouping anyway.
    #[serde(default = "default_settle_retries")]
    pub settle_retries: u32,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_scroll_delay_ms")]
    pub scroll_delay_ms: u64,
}

fn default_coalesce_interval_ms() -> u64 {
    50
}

fn default_tool_throttle_ms() -> u64 {
    100
}

fn default_settle_retries() -> u32 {
    3
}

fn default_settle_delay_ms() -> u64 {
    150
}

fn default_scroll_delay_ms() -> u64 {
    16
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            coalesce_interval_ms: default_coalesce_interval_ms(),
            tool_throttle_ms: default_tool_throttle_ms(),
            settle_retries: default_settle_retries(),
            settle_delay_ms: default_settle_delay_ms(),
            scroll_delay_ms: default_scroll_delay_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub directory: Option<String>,
    pub retention_days: Option<u64>,
}

const MAX_SETTLE_RETRIES: u32 = 20;

impl Config {
    pub fn load_with_path() -> Result<(Self, Option<PathBuf>)> {
        let mut candidates = Vec::new();

        if let Ok(explicit) = std::env::var("LINGGEN_TIMELINE_CONFIG") {
            candidates.push(PathBuf::from(explicit));
        }
        candidates.push(PathBuf::from("linggen-timeline.toml"));
        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("linggen").join("linggen-timeline.toml"));
        }

        for path in candidates {
            if path.exists() {
                let config = Self::load_from(&path)?;
                return Ok((config, Some(path)));
            }
        }

        Ok((Config::default(), None))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Config at {:?} is invalid: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.timeline;
        if t.coalesce_interval_ms == 0 {
            anyhow::bail!("timeline.coalesce_interval_ms must be greater than 0");
        }
        if t.tool_throttle_ms == 0 {
            anyhow::bail!("timeline.tool_throttle_ms must be greater than 0");
        }
        if t.settle_delay_ms == 0 {
            anyhow::bail!("timeline.settle_delay_ms must be greater than 0");
        }
        if t.settle_retries > MAX_SETTLE_RETRIES {
            anyhow::bail!(
                "timeline.settle_retries must not exceed {}, got {}",
                MAX_SETTLE_RETRIES,
                t.settle_retries
            );
        }
        Ok(())
    }
}
