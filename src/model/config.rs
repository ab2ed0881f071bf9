use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::plugin::spec::{self, PluginSpec};

const DEFAULTS: &str = include_str!("../../config/default.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub plugins: PluginsConfig,
    pub updates: UpdatesConfig,
    pub concurrency: ConcurrencyConfig,
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    pub plugin_dir: String,
    pub tmux_conf: String,
    pub log_filter: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginsConfig {
    #[serde(default)]
    pub declared: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatesConfig {
    pub check_mode: CheckMode,
    pub check_interval_hours: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    pub operations: usize,
    pub checks: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    pub status_check_secs: u64,
    pub clone_pull_secs: u64,
    pub remove_secs: u64,
}

/// What the staleness check does once it knows which plugins are behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CheckMode {
    Disabled,
    /// Report the number of outdated plugins, take no action.
    Prompt,
    /// Update the outdated plugins.
    Auto,
}

/// Deadlines handed to the git gateway and the removal worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub status_check: Duration,
    pub clone_pull: Duration,
    pub remove: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            status_check: Duration::from_secs(15),
            clone_pull: Duration::from_secs(120),
            remove: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Load configuration with layering: defaults → user config.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut layered: toml::Table = toml::from_str(DEFAULTS)?;

        let user_path = explicit.map(Path::to_path_buf).or_else(|| {
            directories::ProjectDirs::from("", "", "muxpack")
                .map(|dirs| dirs.config_dir().join("config.toml"))
        });

        if let Some(config_path) = user_path
            && config_path.exists()
        {
            let user_str = fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            let user: toml::Table = toml::from_str(&user_str)
                .with_context(|| format!("parsing {}", config_path.display()))?;
            merge(&mut layered, user);
        }

        let mut config: Self = toml::Value::Table(layered)
            .try_into()
            .context("invalid configuration")?;
        config.general.plugin_dir = expand_tilde(&config.general.plugin_dir)?;
        config.general.tmux_conf = expand_tilde(&config.general.tmux_conf)?;

        Ok(config)
    }

    pub fn defaults() -> Result<Self> {
        Ok(toml::from_str(DEFAULTS)?)
    }

    pub fn plugin_dir(&self) -> PathBuf {
        PathBuf::from(&self.general.plugin_dir)
    }

    pub fn tmux_conf(&self) -> PathBuf {
        PathBuf::from(&self.general.tmux_conf)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            status_check: Duration::from_secs(self.timeouts.status_check_secs),
            clone_pull: Duration::from_secs(self.timeouts.clone_pull_secs),
            remove: Duration::from_secs(self.timeouts.remove_secs),
        }
    }

    pub fn operation_concurrency(&self) -> usize {
        self.concurrency.operations.max(1)
    }

    pub fn check_concurrency(&self) -> usize {
        self.concurrency.checks.max(1)
    }

    /// Declared plugins: tmux.conf `@plugin` lines first, then `plugins.declared`.
    /// A tmux.conf that cannot be read contributes nothing.
    pub fn plugin_specs(&self) -> Vec<PluginSpec> {
        let conf_text = match fs::read_to_string(self.tmux_conf()) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!("tmux.conf unreadable ({}): {err}", self.general.tmux_conf);
                String::new()
            }
        };

        let mut raw = spec::scan_tmux_conf(&conf_text);
        raw.extend(self.plugins.declared.iter().cloned());
        spec::parse_all(&raw)
    }
}

/// Overlay `user` onto `base`, recursing into tables so a user file only
/// needs the keys it changes.
fn merge(base: &mut toml::Table, user: toml::Table) {
    for (key, value) in user {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(overlay)) => {
                merge(existing, overlay);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

fn expand_tilde(path: &str) -> Result<String> {
    if !path.starts_with('~') {
        return Ok(path.to_string());
    }

    let home = directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(path.replacen('~', &home.to_string_lossy(), 1))
}
