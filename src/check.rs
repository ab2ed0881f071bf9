use std::time::{Duration, SystemTime};

use anyhow::Result;
use parking_lot::Mutex;

use crate::git::GitGateway;
use crate::headless::{BatchReport, BatchRunner};
use crate::hooks::Hooks;
use crate::model::config::CheckMode;
use crate::model::state::ToolState;
use crate::plugin::PluginManager;
use crate::plugin::operation::Operation;
use crate::plugin::probe;
use crate::plugin::status::{CheckOutcome, StatusEvent};

/// Which installed plugins are behind their remote.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub checked: usize,
    pub outdated: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug)]
pub enum CheckRun {
    /// Disabled, or the last check is recent enough.
    Skipped,
    Reported(CheckReport),
    Updated(CheckReport, BatchReport),
}

#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {
    pub mode: CheckMode,
    pub force: bool,
    pub interval: Duration,
}

/// Resolve every `Checking` plugin in place, blocking until all are known.
pub fn probe_inventory(
    manager: &mut PluginManager,
    git: &dyn GitGateway,
    timeout: Duration,
    max_concurrent: usize,
) -> Vec<(String, CheckOutcome)> {
    let outcomes = Mutex::new(Vec::new());
    probe::resolve_all(manager.checking(), git, timeout, max_concurrent, |name, outcome| {
        outcomes.lock().push((name, outcome));
    });

    let mut outcomes = outcomes.into_inner();
    outcomes.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, outcome) in &outcomes {
        manager.apply(name, &StatusEvent::CheckResolved(outcome.clone()));
    }
    outcomes
}

pub fn summarize(outcomes: &[(String, CheckOutcome)]) -> CheckReport {
    let mut report = CheckReport {
        checked: outcomes.len(),
        ..CheckReport::default()
    };
    for (name, outcome) in outcomes {
        match outcome {
            CheckOutcome::UpToDate => {}
            CheckOutcome::Outdated => report.outdated.push(name.clone()),
            CheckOutcome::Failed(err) => report.failed.push((name.clone(), err.clone())),
        }
    }
    report
}

pub struct Checker<'a> {
    pub git: &'a dyn GitGateway,
    pub hooks: &'a dyn Hooks,
    pub runner: &'a BatchRunner,
    pub timeout: Duration,
    pub max_concurrent: usize,
}

impl Checker<'_> {
    /// Check for outdated plugins and act on them according to `options.mode`.
    /// `state` is marked whenever a check actually ran.
    pub fn run(
        &self,
        manager: &mut PluginManager,
        options: CheckOptions,
        state: &mut ToolState,
        now: SystemTime,
    ) -> Result<CheckRun> {
        if options.mode == CheckMode::Disabled {
            tracing::info!("update checks are disabled");
            return Ok(CheckRun::Skipped);
        }
        if !options.force && !state.check_due(options.interval, now) {
            tracing::info!("last update check is recent, skipping");
            return Ok(CheckRun::Skipped);
        }

        let outcomes = probe_inventory(manager, self.git, self.timeout, self.max_concurrent);
        let report = summarize(&outcomes);
        state.mark_checked(now);
        tracing::info!(
            "checked {} plugin(s): {} outdated, {} failed",
            report.checked,
            report.outdated.len(),
            report.failed.len()
        );

        if report.outdated.is_empty() {
            return Ok(CheckRun::Reported(report));
        }

        match options.mode {
            CheckMode::Prompt => {
                let text = match report.outdated.len() {
                    1 => format!("muxpack: 1 plugin update available ({})", report.outdated[0]),
                    n => format!(
                        "muxpack: {n} plugin updates available ({})",
                        report.outdated.join(", ")
                    ),
                };
                if let Err(err) = self.hooks.display_message(&text) {
                    tracing::warn!("could not display update notice: {err:#}");
                }
                Ok(CheckRun::Reported(report))
            }
            CheckMode::Auto => {
                let batch = self.runner.run_named(Operation::Update, &report.outdated, manager)?;
                Ok(CheckRun::Updated(report, batch))
            }
            CheckMode::Disabled => Ok(CheckRun::Skipped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;
    use crate::driver::testing::{RecordingHooks, StaticCatalog};
    use crate::git::mock::{Call, MockGit};
    use crate::model::config::Timeouts;
    use crate::plugin::manager::Plugin;
    use crate::plugin::spec::PluginSpec;
    use crate::plugin::status::PluginStatus;
    use std::path::Path;
    use std::sync::{Arc, mpsc};
    use std::time::UNIX_EPOCH;

    const DAY: Duration = Duration::from_secs(86_400);

    struct Fixture {
        git: Arc<MockGit>,
        hooks: Arc<RecordingHooks>,
        runner: BatchRunner,
    }

    impl Fixture {
        fn new() -> Self {
            let git = Arc::new(MockGit::new());
            let hooks = Arc::new(RecordingHooks::default());
            let (tx, rx) = mpsc::channel();
            let driver = Driver::new(
                tx,
                git.clone(),
                hooks.clone(),
                Arc::new(StaticCatalog(None)),
                Timeouts::default(),
                5,
            );
            let runner = BatchRunner::new(driver, rx, hooks.clone(), 3);
            Self { git, hooks, runner }
        }

        fn checker(&self) -> Checker<'_> {
            Checker {
                git: self.git.as_ref(),
                hooks: self.hooks.as_ref(),
                runner: &self.runner,
                timeout: Duration::from_secs(15),
                max_concurrent: 5,
            }
        }
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

    fn options(mode: CheckMode, force: bool) -> CheckOptions {
        CheckOptions {
            mode,
            force,
            interval: DAY,
        }
    }

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn probe_inventory_resolves_only_checking_plugins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let git = MockGit::new();
        git.outdated.lock().insert("b".into(), Ok(true));
        git.outdated.lock().insert("c".into(), Err("could not read from remote".into()));
        let mut mgr = manager(
            dir.path(),
            &[
                ("a", PluginStatus::Checking),
                ("b", PluginStatus::Checking),
                ("c", PluginStatus::Checking),
                ("d", PluginStatus::NotInstalled),
            ],
        );

        let outcomes = probe_inventory(&mut mgr, &git, Duration::from_secs(15), 5);

        assert_eq!(outcomes.len(), 3);
        let statuses: Vec<PluginStatus> = mgr.plugins.iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![
                PluginStatus::Installed,
                PluginStatus::Outdated,
                PluginStatus::CheckFailed,
                PluginStatus::NotInstalled,
            ]
        );
        let report = summarize(&outcomes);
        assert_eq!(report.outdated, vec!["b"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(git.count(|c| matches!(c, Call::IsOutdated(_))), 3);
    }

    #[test]
    fn disabled_mode_never_checks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fx = Fixture::new();
        let mut mgr = manager(dir.path(), &[("a", PluginStatus::Checking)]);
        let mut state = ToolState::default();

        let run = fx
            .checker()
            .run(&mut mgr, options(CheckMode::Disabled, true), &mut state, at(100))
            .expect("run");

        assert!(matches!(run, CheckRun::Skipped));
        assert!(fx.git.calls().is_empty());
        assert_eq!(state.last_update_check, None);
    }

    #[test]
    fn recent_check_is_skipped_unless_forced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fx = Fixture::new();
        let mut mgr = manager(dir.path(), &[("a", PluginStatus::Checking)]);
        let mut state = ToolState::default();
        state.mark_checked(at(1_000));

        let run = fx
            .checker()
            .run(&mut mgr, options(CheckMode::Prompt, false), &mut state, at(2_000))
            .expect("run");
        assert!(matches!(run, CheckRun::Skipped));
        assert!(fx.git.calls().is_empty());

        let run = fx
            .checker()
            .run(&mut mgr, options(CheckMode::Prompt, true), &mut state, at(2_000))
            .expect("run");
        assert!(matches!(run, CheckRun::Reported(ref r) if r.checked == 1));
        assert_eq!(state.last_update_check, Some(2_000));
    }

    #[test]
    fn prompt_mode_displays_count_and_changes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fx = Fixture::new();
        fx.git.outdated.lock().insert("a".into(), Ok(true));
        fx.git.outdated.lock().insert("b".into(), Ok(true));
        let mut mgr = manager(
            dir.path(),
            &[("a", PluginStatus::Checking), ("b", PluginStatus::Checking), ("c", PluginStatus::Checking)],
        );
        let mut state = ToolState::default();

        let run = fx
            .checker()
            .run(&mut mgr, options(CheckMode::Prompt, false), &mut state, at(DAY.as_secs()))
            .expect("run");

        match run {
            CheckRun::Reported(report) => assert_eq!(report.outdated, vec!["a", "b"]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            *fx.hooks.messages.lock(),
            vec!["muxpack: 2 plugin updates available (a, b)".to_string()]
        );
        assert_eq!(fx.git.count(|c| matches!(c, Call::Pull(_))), 0);
        assert_eq!(mgr.count(PluginStatus::Outdated), 2);
    }

    #[test]
    fn auto_mode_updates_only_outdated_plugins() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fx = Fixture::new();
        fx.git.outdated.lock().insert("b".into(), Ok(true));
        let mut mgr = manager(
            dir.path(),
            &[("a", PluginStatus::Checking), ("b", PluginStatus::Checking)],
        );
        let mut state = ToolState::default();

        let run = fx
            .checker()
            .run(&mut mgr, options(CheckMode::Auto, false), &mut state, at(DAY.as_secs()))
            .expect("run");

        match run {
            CheckRun::Updated(report, batch) => {
                assert_eq!(report.outdated, vec!["b"]);
                assert_eq!(batch.results.len(), 1);
                assert!(!batch.any_failed());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fx.git.calls().iter().filter(|c| matches!(c, Call::Pull(_))).count(), 1);
        assert!(fx.git.calls().contains(&Call::Pull(dir.path().join("b"))));
        assert_eq!(mgr.plugins[1].status, PluginStatus::Installed);
        assert_eq!(*fx.hooks.reloads.lock(), 1);
    }

    #[test]
    fn nothing_outdated_is_quiet() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fx = Fixture::new();
        let mut mgr = manager(dir.path(), &[("a", PluginStatus::Checking)]);
        let mut state = ToolState::default();

        let run = fx
            .checker()
            .run(&mut mgr, options(CheckMode::Auto, false), &mut state, at(1))
            .expect("run");

        assert!(matches!(run, CheckRun::Reported(ref r) if r.outdated.is_empty()));
        assert!(fx.hooks.messages.lock().is_empty());
        assert_eq!(fx.git.count(|c| matches!(c, Call::Pull(_))), 0);
    }
}
