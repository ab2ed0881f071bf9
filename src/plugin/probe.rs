use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::fanout;
use crate::git::GitGateway;
use crate::plugin::status::{CheckOutcome, PluginStatus};

/// Synchronous first pass: a directory that is a repository starts out as
/// `Checking`, anything else is `NotInstalled`.
pub fn initial_status(dir: &Path, git: &dyn GitGateway) -> PluginStatus {
    if dir.is_dir() && git.is_repository(dir) {
        PluginStatus::Checking
    } else {
        PluginStatus::NotInstalled
    }
}

/// Resolve one `Checking` plugin against its remote.
pub fn resolve(dir: &Path, git: &dyn GitGateway, timeout: Duration) -> CheckOutcome {
    match git.is_outdated(Instant::now() + timeout, dir) {
        Ok(true) => CheckOutcome::Outdated,
        Ok(false) => CheckOutcome::UpToDate,
        Err(err) => {
            tracing::warn!("status check for {} failed: {err}", dir.display());
            CheckOutcome::Failed(err.to_string())
        }
    }
}

/// Resolve many plugins with bounded parallelism, reporting each outcome as
/// soon as it is known. Blocks until all are resolved.
pub fn resolve_all<F>(
    targets: Vec<(String, PathBuf)>,
    git: &dyn GitGateway,
    timeout: Duration,
    max_concurrent: usize,
    report: F,
) where
    F: Fn(String, CheckOutcome) + Sync,
{
    fanout::run(targets, max_concurrent, |(name, dir)| {
        let outcome = resolve(&dir, git, timeout);
        report(name, outcome);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::mock::MockGit;
    use parking_lot::Mutex;

    #[test]
    fn initial_status_requires_repository_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let repo = dir.path().join("repo");
        let plain = dir.path().join("plain");
        std::fs::create_dir_all(&repo).expect("mkdir");
        std::fs::create_dir_all(&plain).expect("mkdir");
        let git = MockGit::new();
        git.mark_repository(&repo);
        git.mark_repository(&dir.path().join("gone"));

        assert_eq!(initial_status(&repo, &git), PluginStatus::Checking);
        assert_eq!(initial_status(&plain, &git), PluginStatus::NotInstalled);
        assert_eq!(initial_status(&dir.path().join("gone"), &git), PluginStatus::NotInstalled);
    }

    #[test]
    fn resolve_maps_gateway_results() {
        let git = MockGit::new();
        git.outdated.lock().insert("behind".into(), Ok(true));
        git.outdated.lock().insert("broken".into(), Err("could not read from remote".into()));
        let timeout = Duration::from_secs(15);

        assert_eq!(resolve(Path::new("/p/behind"), &git, timeout), CheckOutcome::Outdated);
        assert_eq!(resolve(Path::new("/p/current"), &git, timeout), CheckOutcome::UpToDate);
        assert!(matches!(
            resolve(Path::new("/p/broken"), &git, timeout),
            CheckOutcome::Failed(msg) if msg.contains("could not read")
        ));
    }

    #[test]
    fn one_failure_does_not_stop_the_others() {
        let git = MockGit::new();
        git.outdated.lock().insert("b".into(), Err("boom".into()));
        git.outdated.lock().insert("c".into(), Ok(true));
        let targets = ["a", "b", "c", "d"]
            .iter()
            .map(|n| (n.to_string(), PathBuf::from("/p").join(n)))
            .collect();

        let seen = Mutex::new(Vec::new());
        resolve_all(targets, &git, Duration::from_secs(1), 2, |name, outcome| {
            seen.lock().push((name, outcome));
        });

        let mut seen = seen.into_inner();
        seen.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].1, CheckOutcome::UpToDate);
        assert!(matches!(seen[1].1, CheckOutcome::Failed(_)));
        assert_eq!(seen[2].1, CheckOutcome::Outdated);
    }
}
