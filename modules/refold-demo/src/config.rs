use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

/// Demo configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// How many ticks the ticker effect emits before stopping.
    pub ticks: u32,
    pub interval: Duration,
    /// Every `milestone_every` ticks the milestone effect reports progress.
    pub milestone_every: u32,
}

impl DemoConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            ticks: parse_var("REFOLD_DEMO_TICKS", 10)?,
            interval: Duration::from_millis(parse_var("REFOLD_DEMO_INTERVAL_MS", 100)?),
            milestone_every: parse_var("REFOLD_DEMO_MILESTONE_EVERY", 5)?.max(1),
        };

        info!(
            ticks = config.ticks,
            interval_ms = config.interval.as_millis() as u64,
            milestone_every = config.milestone_every,
            "Demo config loaded"
        );
        Ok(config)
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}
