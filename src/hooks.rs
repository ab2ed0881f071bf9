use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};

use crate::plugin::spec::{self, PluginSpec};

/// Side effects on the surrounding tmux setup.
pub trait Hooks: Send + Sync {
    /// Make the running tmux server pick up freshly installed plugins.
    fn reload_config(&self) -> Result<()>;

    /// Show a short message to the user.
    fn display_message(&self, text: &str) -> Result<()>;

    /// Persist a plugin declaration so the next scan sees it.
    fn declare_plugin(&self, spec: &PluginSpec) -> Result<()>;
}

/// [`Hooks`] that talk to tmux and edit tmux.conf.
#[derive(Debug, Clone)]
pub struct TmuxHooks {
    tmux_conf: PathBuf,
}

impl TmuxHooks {
    pub fn new(tmux_conf: PathBuf) -> Self {
        Self { tmux_conf }
    }

    fn inside_tmux() -> bool {
        std::env::var_os("TMUX").is_some()
    }

    fn tmux(args: &[&str]) -> Result<()> {
        let output = Command::new("tmux")
            .args(args)
            .output()
            .context("spawning tmux")?;
        if !output.status.success() {
            bail!(
                "tmux {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

impl Hooks for TmuxHooks {
    fn reload_config(&self) -> Result<()> {
        if !Self::inside_tmux() {
            tracing::debug!("not inside tmux, skipping config reload");
            return Ok(());
        }
        Self::tmux(&["source-file", &self.tmux_conf.to_string_lossy()])
    }

    fn display_message(&self, text: &str) -> Result<()> {
        if Self::inside_tmux() {
            Self::tmux(&["display-message", text])
        } else {
            println!("{text}");
            Ok(())
        }
    }

    fn declare_plugin(&self, spec: &PluginSpec) -> Result<()> {
        let existing = match fs::read_to_string(&self.tmux_conf) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", self.tmux_conf.display()));
            }
        };

        let already = spec::parse_all(&spec::scan_tmux_conf(&existing))
            .iter()
            .any(|declared| declared.name == spec.name);
        if already {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.tmux_conf)
            .with_context(|| format!("opening {}", self.tmux_conf.display()))?;
        if !existing.is_empty() && !existing.ends_with('\n') {
            writeln!(file)?;
        }
        writeln!(file, "set -g @plugin '{spec}'")?;
        tracing::info!("declared {} in {}", spec.name, self.tmux_conf.display());
        Ok(())
    }
}
