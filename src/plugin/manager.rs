use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use thiserror::Error;

use crate::git::GitGateway;
use crate::plugin::probe;
use crate::plugin::spec::PluginSpec;
use crate::plugin::status::{PluginStatus, StatusEvent};

/// Directory of the bootstrap manager itself; never an orphan.
pub const RESERVED_DIR: &str = "tpm";

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("cannot create plugin directory {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("plugin directory {0} is not a directory")]
    NotADirectory(PathBuf),
}

/// A declared plugin and what is known about its checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plugin {
    pub spec: PluginSpec,
    pub status: PluginStatus,
    pub dir: PathBuf,
}

/// A checkout on disk that no declared plugin owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Inventory of declared plugins and orphaned checkouts under one root.
#[derive(Debug, Clone, Default)]
pub struct PluginManager {
    root: PathBuf,
    pub plugins: Vec<Plugin>,
    pub orphans: Vec<OrphanEntry>,
}

impl PluginManager {
    /// Build the inventory with each plugin's initial status.
    pub fn scan(root: PathBuf, specs: Vec<PluginSpec>, git: &dyn GitGateway) -> Self {
        let plugins: Vec<Plugin> = specs
            .into_iter()
            .map(|spec| {
                let dir = root.join(&spec.name);
                let status = probe::initial_status(&dir, git);
                Plugin { spec, status, dir }
            })
            .collect();

        let orphans = find_orphans(&root, &plugins);
        tracing::info!(
            "scanned {}: {} declared, {} orphaned",
            root.display(),
            plugins.len(),
            orphans.len()
        );

        Self {
            root,
            plugins,
            orphans,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the plugin root if needed. Failure aborts a whole batch.
    pub fn ensure_root(&self) -> Result<(), SetupError> {
        if self.root.exists() && !self.root.is_dir() {
            return Err(SetupError::NotADirectory(self.root.clone()));
        }
        std::fs::create_dir_all(&self.root).map_err(|source| SetupError::Create {
            path: self.root.clone(),
            source,
        })
    }

    pub fn find(&self, name: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.spec.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.plugins.iter().position(|p| p.spec.name == name)
    }

    /// Apply `event` to the named plugin if the transition is legal.
    /// Returns whether the status changed.
    pub fn apply(&mut self, name: &str, event: &StatusEvent) -> bool {
        let Some(plugin) = self.plugins.iter_mut().find(|p| p.spec.name == name) else {
            return false;
        };
        match plugin.status.apply(event) {
            Some(next) => {
                tracing::debug!("{name}: {:?} -> {next:?}", plugin.status);
                plugin.status = next;
                true
            }
            None => {
                tracing::debug!("{name}: ignoring {event:?} while {:?}", plugin.status);
                false
            }
        }
    }

    /// Plugins still waiting for their staleness check.
    pub fn checking(&self) -> Vec<(String, PathBuf)> {
        self.plugins
            .iter()
            .filter(|p| p.status == PluginStatus::Checking)
            .map(|p| (p.spec.name.clone(), p.dir.clone()))
            .collect()
    }

    /// Drop orphans that were removed by a finished clean run.
    pub fn forget_orphans(&mut self, removed: &HashSet<String>) {
        self.orphans.retain(|orphan| !removed.contains(&orphan.name));
    }

    pub fn count(&self, status: PluginStatus) -> usize {
        self.plugins.iter().filter(|p| p.status == status).count()
    }
}

fn find_orphans(root: &Path, plugins: &[Plugin]) -> Vec<OrphanEntry> {
    let declared: HashSet<&str> = plugins.iter().map(|p| p.spec.name.as_str()).collect();

    let mut orphans: Vec<OrphanEntry> = WalkBuilder::new(root)
        .max_depth(Some(1))
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .build()
        .flatten()
        .filter_map(|entry| {
            let path = entry.path().to_path_buf();
            if path == root {
                return None;
            }
            // Follow symlinks so a linked checkout counts as a directory.
            let metadata = std::fs::metadata(&path).ok()?;
            if !metadata.is_dir() {
                return None;
            }
            let name = entry.file_name().to_str()?.to_string();
            if name == RESERVED_DIR || declared.contains(name.as_str()) {
                return None;
            }
            Some(OrphanEntry { name, path })
        })
        .collect();

    orphans.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    orphans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::mock::MockGit;

    fn specs(raw: &[&str]) -> Vec<PluginSpec> {
        raw.iter()
            .map(|r| PluginSpec::parse(r).expect("spec"))
            .collect()
    }

    #[test]
    fn scan_assigns_initial_statuses() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("tmux-yank")).expect("mkdir");
        std::fs::create_dir_all(root.join("tmux-sensible")).expect("mkdir");
        let git = MockGit::new();
        git.mark_repository(&root.join("tmux-yank"));

        let manager = PluginManager::scan(
            root.clone(),
            specs(&["tmux-plugins/tmux-yank", "tmux-plugins/tmux-sensible", "a/missing"]),
            &git,
        );

        let statuses: Vec<PluginStatus> = manager.plugins.iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![
                PluginStatus::Checking,
                PluginStatus::NotInstalled,
                PluginStatus::NotInstalled,
            ]
        );
        assert_eq!(manager.checking().len(), 1);
        assert_eq!(manager.find("missing").map(|p| p.dir.clone()), Some(root.join("missing")));
    }

    #[test]
    fn orphans_exclude_declared_reserved_and_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        for name in ["tpm", "tmux-yank", "stale-plugin", "old-plugin", ".hidden-plugin"] {
            std::fs::create_dir_all(root.join(name)).expect("mkdir");
        }
        std::fs::write(root.join("README"), "not a plugin").expect("write");

        let manager = PluginManager::scan(root.clone(), specs(&["tmux-plugins/tmux-yank"]), &MockGit::new());

        let names: Vec<&str> = manager.orphans.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec![".hidden-plugin", "old-plugin", "stale-plugin"]);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_checkout_is_an_orphan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("plugins");
        let checkout = dir.path().join("src/linked-plugin");
        std::fs::create_dir_all(&root).expect("mkdir");
        std::fs::create_dir_all(&checkout).expect("mkdir");
        std::os::unix::fs::symlink(&checkout, root.join("linked-plugin")).expect("symlink");

        let manager = PluginManager::scan(root.clone(), Vec::new(), &MockGit::new());

        let names: Vec<&str> = manager.orphans.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["linked-plugin"]);
    }

    #[test]
    fn reserved_dir_is_never_orphaned_even_when_undeclared() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join(RESERVED_DIR)).expect("mkdir");
        let manager = PluginManager::scan(dir.path().to_path_buf(), Vec::new(), &MockGit::new());
        assert!(manager.orphans.is_empty());
    }

    #[test]
    fn missing_root_has_no_orphans() {
        let manager = PluginManager::scan(
            PathBuf::from("/nonexistent/muxpack/plugins"),
            specs(&["a/b"]),
            &MockGit::new(),
        );
        assert!(manager.orphans.is_empty());
        assert_eq!(manager.plugins[0].status, PluginStatus::NotInstalled);
    }

    #[test]
    fn ensure_root_creates_and_rejects_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("nested/plugins");
        let manager = PluginManager::scan(root.clone(), Vec::new(), &MockGit::new());
        manager.ensure_root().expect("create root");
        assert!(root.is_dir());

        let file_root = dir.path().join("plugins-file");
        std::fs::write(&file_root, "").expect("write");
        let manager = PluginManager::scan(file_root, Vec::new(), &MockGit::new());
        assert!(matches!(manager.ensure_root(), Err(SetupError::NotADirectory(_))));
    }

    #[test]
    fn apply_ignores_illegal_transitions() {
        let mut manager = PluginManager {
            root: PathBuf::from("/p"),
            plugins: vec![Plugin {
                spec: PluginSpec::parse("a/alpha").expect("spec"),
                status: PluginStatus::Installed,
                dir: PathBuf::from("/p/alpha"),
            }],
            orphans: Vec::new(),
        };
        assert!(!manager.apply("alpha", &StatusEvent::InstallSucceeded));
        assert!(manager.apply("alpha", &StatusEvent::UninstallSucceeded));
        assert_eq!(manager.plugins[0].status, PluginStatus::NotInstalled);
        assert!(!manager.apply("ghost", &StatusEvent::UninstallSucceeded));
    }

    #[test]
    fn forget_orphans_leaves_others() {
        let mut manager = PluginManager {
            root: PathBuf::from("/p"),
            plugins: Vec::new(),
            orphans: ["old-plugin", "stale-plugin", "keep-me"]
                .iter()
                .map(|n| OrphanEntry {
                    name: n.to_string(),
                    path: PathBuf::from("/p").join(n),
                })
                .collect(),
        };
        let removed: HashSet<String> = ["old-plugin".to_string(), "stale-plugin".to_string()].into();
        manager.forget_orphans(&removed);
        assert_eq!(manager.orphans.len(), 1);
        assert_eq!(manager.orphans[0].name, "keep-me");
    }
}
