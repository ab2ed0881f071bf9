//! Runs operation batches without a UI, through the same orchestrator and
//! effect driver the interactive screens use.

use std::sync::Arc;
use std::sync::mpsc;

use anyhow::{Result, bail};

use crate::driver::Driver;
use crate::effect::Effect;
use crate::hooks::Hooks;
use crate::msg::Msg;
use crate::plugin::PluginManager;
use crate::plugin::operation::{BuildInput, Operation, PendingOperation, ResultRecord};
use crate::plugin::orchestrator::Orchestrator;

/// Outcome of one finished batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub operation: Operation,
    pub results: Vec<ResultRecord>,
}

impl BatchReport {
    pub fn any_failed(&self) -> bool {
        self.results.iter().any(|r| !r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ResultRecord> {
        self.results.iter().filter(|r| !r.success)
    }

    pub fn successes(&self) -> impl Iterator<Item = &ResultRecord> {
        self.results.iter().filter(|r| r.success)
    }
}

pub struct BatchRunner {
    driver: Driver,
    rx: mpsc::Receiver<Msg>,
    hooks: Arc<dyn Hooks>,
    max_concurrent: usize,
}

impl BatchRunner {
    pub fn new(
        driver: Driver,
        rx: mpsc::Receiver<Msg>,
        hooks: Arc<dyn Hooks>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            driver,
            rx,
            hooks,
            max_concurrent,
        }
    }

    /// Build `operation` for the named plugins (all eligible ones when
    /// `names` is empty) and run it to completion.
    pub fn run_named(
        &self,
        operation: Operation,
        names: &[String],
        manager: &mut PluginManager,
    ) -> Result<BatchReport> {
        let targets = resolve_names(manager, names)?;
        let pending = operation.build(&BuildInput {
            plugins: &manager.plugins,
            orphans: &manager.orphans,
            targets: &targets,
            multi_select: !names.is_empty(),
        });
        self.run_batch(operation, pending, manager)
    }

    /// Drive one batch to completion, blocking on the event queue.
    pub fn run_batch(
        &self,
        operation: Operation,
        pending: Vec<PendingOperation>,
        manager: &mut PluginManager,
    ) -> Result<BatchReport> {
        if pending.is_empty() {
            tracing::info!("nothing to {operation}");
            return Ok(BatchReport {
                operation,
                results: Vec::new(),
            });
        }
        manager.ensure_root()?;

        let mut orchestrator = Orchestrator::new(self.max_concurrent);
        let Some(effects) = orchestrator.start(operation, pending) else {
            return Ok(BatchReport {
                operation,
                results: Vec::new(),
            });
        };
        self.launch(effects);

        while orchestrator.is_processing() {
            let msg = self.rx.recv()?;
            match msg {
                Msg::OperationFinished { operation, result } => {
                    let effects = orchestrator.complete(operation, result, manager);
                    self.launch(effects);
                }
                Msg::StatusResolved { name, outcome } => {
                    tracing::debug!("ignoring late status for {name}: {outcome:?}");
                }
                other => tracing::debug!("ignoring {other:?} during batch"),
            }
        }

        Ok(BatchReport {
            operation,
            results: orchestrator.results().to_vec(),
        })
    }

    /// Executions go to the worker pool; hook effects run inline so they
    /// finish before the process exits.
    fn launch(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Execute { .. } => self.driver.spawn(effect),
                Effect::ReloadConfig => {
                    if let Err(err) = self.hooks.reload_config() {
                        tracing::warn!("config reload failed: {err:#}");
                        eprintln!("warning: tmux config reload failed: {err:#}");
                    }
                }
                Effect::DeclarePlugin(spec) => {
                    if let Err(err) = self.hooks.declare_plugin(&spec) {
                        tracing::warn!("declaring {} failed: {err:#}", spec.name);
                    }
                }
                Effect::ProbeStatuses(_) | Effect::FetchCatalog => {
                    tracing::debug!("skipping {effect:?} in batch mode");
                }
            }
        }
    }
}

/// Indices of the named plugins in inventory order; every plugin when no
/// names are given.
fn resolve_names(manager: &PluginManager, names: &[String]) -> Result<Vec<usize>> {
    if names.is_empty() {
        return Ok((0..manager.plugins.len()).collect());
    }
    let mut targets = Vec::with_capacity(names.len());
    for name in names {
        match manager.index_of(name) {
            Some(index) => targets.push(index),
            None => bail!("{name} is not a declared plugin"),
        }
    }
    targets.sort_unstable();
    targets.dedup();
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{RecordingHooks, StaticCatalog};
    use crate::git::mock::{Call, MockGit};
    use crate::model::config::Timeouts;
    use crate::plugin::manager::{OrphanEntry, Plugin};
    use crate::plugin::spec::PluginSpec;
    use crate::plugin::status::PluginStatus;
    use std::path::Path;

    fn runner(git: Arc<MockGit>, max_concurrent: usize) -> (BatchRunner, Arc<RecordingHooks>) {
        let (tx, rx) = mpsc::channel();
        let hooks = Arc::new(RecordingHooks::default());
        let driver = Driver::new(
            tx,
            git,
            hooks.clone(),
            Arc::new(StaticCatalog(None)),
            Timeouts::default(),
            2,
        );
        (BatchRunner::new(driver, rx, hooks.clone(), max_concurrent), hooks)
    }

    fn manager(root: &Path, plugins: &[(&str, PluginStatus)]) -> PluginManager {
        let mut manager = PluginManager::scan(root.to_path_buf(), Vec::new(), &MockGit::new());
        manager.plugins = plugins
            .iter()
            .map(|(name, status)| Plugin {
                spec: PluginSpec::parse(&format!("owner/{name}")).expect("spec"),
                status: *status,
                dir: root.join(name),
            })
            .collect();
        manager
    }

    #[test]
    fn install_runs_every_missing_plugin_then_reloads_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = Arc::new(MockGit::new());
        let names = ["a", "b", "c", "d", "e"];
        let mut mgr = manager(dir.path(), &names.map(|n| (n, PluginStatus::NotInstalled)));
        let (runner, hooks) = runner(git.clone(), 2);

        let report = runner.run_named(Operation::Install, &[], &mut mgr).expect("batch");

        assert_eq!(report.results.len(), 5);
        assert!(!report.any_failed());
        assert_eq!(git.count(|c| matches!(c, Call::Clone { .. })), 5);
        assert_eq!(*hooks.reloads.lock(), 1);
        assert!(mgr.plugins.iter().all(|p| p.status == PluginStatus::Installed));
    }

    #[test]
    fn failures_are_reported_and_batch_completes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = Arc::new(MockGit::new());
        git.fail_clone("owner/bad", "not found");
        git.fail_clone("https://git::@github.com/owner/bad", "not found either");
        let mut mgr = manager(
            dir.path(),
            &[("good", PluginStatus::NotInstalled), ("bad", PluginStatus::NotInstalled)],
        );
        let (runner, _) = runner(git, 3);

        let report = runner.run_named(Operation::Install, &[], &mut mgr).expect("batch");

        assert!(report.any_failed());
        let failed: Vec<&str> = report.failures().map(|r| r.name.as_str()).collect();
        assert_eq!(failed, vec!["bad"]);
        assert_eq!(report.successes().count(), 1);
        assert_eq!(mgr.find("bad").map(|p| p.status), Some(PluginStatus::NotInstalled));
    }

    #[test]
    fn named_update_touches_only_named_plugins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = Arc::new(MockGit::new());
        let mut mgr = manager(
            dir.path(),
            &[("a", PluginStatus::Installed), ("b", PluginStatus::Outdated)],
        );
        let (runner, _) = runner(git.clone(), 3);

        let report = runner
            .run_named(Operation::Update, &["b".to_string()], &mut mgr)
            .expect("batch");

        assert_eq!(report.results.len(), 1);
        assert_eq!(git.calls().iter().filter(|c| matches!(c, Call::Pull(_))).count(), 1);
        assert!(git.calls().contains(&Call::Pull(dir.path().join("b"))));
        assert_eq!(mgr.plugins[1].status, PluginStatus::Installed);
    }

    #[test]
    fn unknown_name_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut mgr = manager(dir.path(), &[("a", PluginStatus::Installed)]);
        let (runner, _) = runner(Arc::new(MockGit::new()), 3);
        let err = runner
            .run_named(Operation::Uninstall, &["ghost".to_string()], &mut mgr)
            .expect_err("unknown plugin");
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = Arc::new(MockGit::new());
        let mut mgr = manager(dir.path(), &[("a", PluginStatus::Installed)]);
        let (runner, hooks) = runner(git.clone(), 3);

        let report = runner.run_named(Operation::Install, &[], &mut mgr).expect("batch");

        assert!(report.results.is_empty());
        assert!(git.calls().is_empty());
        assert_eq!(*hooks.reloads.lock(), 0);
    }

    #[test]
    fn clean_removes_orphans_without_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("old-plugin/scripts")).expect("mkdir");
        let mut mgr = manager(dir.path(), &[]);
        mgr.orphans = vec![OrphanEntry {
            name: "old-plugin".into(),
            path: dir.path().join("old-plugin"),
        }];
        let (runner, hooks) = runner(Arc::new(MockGit::new()), 3);

        let report = runner.run_named(Operation::Clean, &[], &mut mgr).expect("batch");

        assert!(!report.any_failed());
        assert!(!dir.path().join("old-plugin").exists());
        assert_eq!(*hooks.reloads.lock(), 0);
    }

    #[test]
    fn unusable_root_aborts_before_any_work() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("plugins");
        std::fs::write(&root, "").expect("write");
        let git = Arc::new(MockGit::new());
        let mut mgr = manager(&root, &[("a", PluginStatus::NotInstalled)]);
        let (runner, _) = runner(git.clone(), 3);

        assert!(runner.run_named(Operation::Install, &[], &mut mgr).is_err());
        assert!(git.calls().is_empty());
    }
}
