use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Small bits of state kept between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolState {
    /// Unix seconds of the last completed update check.
    #[serde(default)]
    pub last_update_check: Option<u64>,
}

impl ToolState {
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "muxpack")
            .map(|dirs| dirs.data_dir().join("state.toml"))
    }

    /// Missing or unreadable state is treated as no prior state.
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                tracing::warn!("ignoring unreadable state {}: {err}", path.display());
                return Self::default();
            }
        };

        toml::from_str(&text).unwrap_or_else(|err| {
            tracing::warn!("ignoring malformed state {}: {err}", path.display());
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string(self)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Whether enough time has passed since the last check.
    pub fn check_due(&self, interval: Duration, now: SystemTime) -> bool {
        let Some(last) = self.last_update_check else {
            return true;
        };
        let now = now.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        now.saturating_sub(last) >= interval.as_secs()
    }

    pub fn mark_checked(&mut self, now: SystemTime) {
        self.last_update_check = now.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs());
    }
}
