//! Git capabilities consumed by the plugin operations.
//!
//! Everything that touches a plugin checkout goes through [`GitGateway`] so the
//! orchestrator and probes can be driven by a scripted double in tests. The
//! production implementation, [`GitCli`], shells out to the `git` binary and
//! enforces the caller's deadline by polling the child and killing it on expiry.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum GitError {
    /// The git process could not be spawned (missing binary, permission error).
    #[error("failed to spawn git: {0}")]
    SpawnFailed(#[source] std::io::Error),
    #[error("git exited with code {}: {stderr}", display_code(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("git {command} timed out after {elapsed:?}")]
    TimedOut { command: String, elapsed: Duration },
    #[error("unexpected git output: {0}")]
    Parse(String),
}

fn display_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

/// One entry of a commit range, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub hash: String,
    pub subject: String,
}

/// The six git capabilities. Every networked or potentially slow call takes
/// an absolute deadline as its first argument.
pub trait GitGateway: Send + Sync {
    fn clone_repo(
        &self,
        deadline: Instant,
        locator: &str,
        dest: &Path,
        branch: Option<&str>,
    ) -> Result<(), GitError>;

    /// Returns the combined output of the pull.
    fn pull(&self, deadline: Instant, dir: &Path, branch: Option<&str>) -> Result<String, GitError>;

    fn is_repository(&self, dir: &Path) -> bool;

    /// Fetches the remote, then compares HEAD with its upstream.
    fn is_outdated(&self, deadline: Instant, dir: &Path) -> Result<bool, GitError>;

    fn rev_parse(&self, deadline: Instant, dir: &Path) -> Result<String, GitError>;

    fn log(
        &self,
        deadline: Instant,
        dir: &Path,
        from: &str,
        to: &str,
    ) -> Result<Vec<Commit>, GitError>;
}

/// [`GitGateway`] backed by the `git` command line.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    fn cmd(&self, cwd: Option<&Path>) -> Command {
        let mut cmd = Command::new(&self.program);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        // Never let git block on a credential prompt.
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd.stdin(Stdio::null());
        cmd
    }

    fn run(
        &self,
        deadline: Instant,
        cwd: Option<&Path>,
        args: &[&str],
    ) -> Result<GitOutput, GitError> {
        let mut cmd = self.cmd(cwd);
        cmd.args(args);
        let label = args.first().copied().unwrap_or("git").to_string();
        tracing::debug!("git {}", args.join(" "));
        run_with_deadline(cmd, deadline, &label)
    }
}

#[derive(Debug, Default)]
struct GitOutput {
    stdout: String,
    stderr: String,
}

impl GitOutput {
    fn combined(&self) -> String {
        let mut text = self.stdout.trim_end().to_string();
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr);
        }
        text
    }
}

fn run_with_deadline(mut cmd: Command, deadline: Instant, label: &str) -> Result<GitOutput, GitError> {
    let started = Instant::now();
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(GitError::SpawnFailed)?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                kill_quietly(&mut child);
                return Err(GitError::TimedOut {
                    command: label.to_string(),
                    elapsed: started.elapsed(),
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                kill_quietly(&mut child);
                return Err(GitError::SpawnFailed(err));
            }
        }
    };

    let output = GitOutput {
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    };

    if status.success() {
        Ok(output)
    } else {
        Err(GitError::NonZeroExit {
            code: status.code(),
            stderr: output.stderr.trim().to_string(),
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).to_string()
    })
}

fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl GitGateway for GitCli {
    fn clone_repo(
        &self,
        deadline: Instant,
        locator: &str,
        dest: &Path,
        branch: Option<&str>,
    ) -> Result<(), GitError> {
        let dest = dest.to_string_lossy();
        let mut args = vec!["clone", "--single-branch", "--recursive"];
        if let Some(branch) = branch {
            args.extend(["-b", branch]);
        }
        args.extend([locator, &*dest]);
        self.run(deadline, None, &args).map(|_| ())
    }

    fn pull(&self, deadline: Instant, dir: &Path, branch: Option<&str>) -> Result<String, GitError> {
        let mut args = vec!["pull", "--ff-only"];
        if let Some(branch) = branch {
            args.extend(["origin", branch]);
        }
        let pulled = self.run(deadline, Some(dir), &args)?;
        let submodules = self.run(
            deadline,
            Some(dir),
            &["submodule", "update", "--init", "--recursive"],
        )?;

        let mut combined = pulled.combined();
        let extra = submodules.combined();
        if !extra.is_empty() {
            combined.push('\n');
            combined.push_str(&extra);
        }
        Ok(combined)
    }

    fn is_repository(&self, dir: &Path) -> bool {
        if !dir.is_dir() {
            return false;
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        // A plain directory nested inside some other work tree is not a checkout.
        let Ok(out) = self.run(deadline, Some(dir), &["rev-parse", "--show-toplevel"]) else {
            return false;
        };
        let toplevel = PathBuf::from(out.stdout.trim());
        match (toplevel.canonicalize(), dir.canonicalize()) {
            (Ok(top), Ok(dir)) => top == dir,
            _ => false,
        }
    }

    fn is_outdated(&self, deadline: Instant, dir: &Path) -> Result<bool, GitError> {
        self.run(deadline, Some(dir), &["fetch", "--quiet"])?;
        let local = self.rev_parse(deadline, dir)?;
        let upstream = self.run(deadline, Some(dir), &["rev-parse", "@{upstream}"])?;
        Ok(local != upstream.stdout.trim())
    }

    fn rev_parse(&self, deadline: Instant, dir: &Path) -> Result<String, GitError> {
        let out = self.run(deadline, Some(dir), &["rev-parse", "HEAD"])?;
        let rev = out.stdout.trim();
        if rev.is_empty() {
            return Err(GitError::Parse("empty rev-parse output".to_string()));
        }
        Ok(rev.to_string())
    }

    fn log(
        &self,
        deadline: Instant,
        dir: &Path,
        from: &str,
        to: &str,
    ) -> Result<Vec<Commit>, GitError> {
        let range = format!("{from}..{to}");
        let out = self.run(
            deadline,
            Some(dir),
            &["log", "--format=%h%x09%s", range.as_str()],
        )?;
        parse_log(&out.stdout)
    }
}

fn parse_log(stdout: &str) -> Result<Vec<Commit>, GitError> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let (hash, subject) = line
                .split_once('\t')
                .ok_or_else(|| GitError::Parse(format!("log line without subject: {line}")))?;
            Ok(Commit {
                hash: hash.to_string(),
                subject: subject.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
pub mod mock {
    //! Scripted [`GitGateway`] double.

    use std::collections::{HashMap, VecDeque};
    use std::path::{Path, PathBuf};
    use std::time::Instant;

    use parking_lot::Mutex;

    use super::{Commit, GitError, GitGateway};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Clone { locator: String, dest: PathBuf },
        Pull(PathBuf),
        IsOutdated(PathBuf),
        RevParse(PathBuf),
        Log { from: String, to: String },
    }

    /// Each capability pops scripted results keyed by the checkout's directory
    /// name (or by locator for clones). Unscripted calls succeed.
    #[derive(Default)]
    pub struct MockGit {
        pub repositories: Mutex<Vec<PathBuf>>,
        pub clone_failures: Mutex<HashMap<String, String>>,
        pub pull_results: Mutex<HashMap<String, Result<String, String>>>,
        pub outdated: Mutex<HashMap<String, Result<bool, String>>>,
        pub revisions: Mutex<HashMap<String, VecDeque<Result<String, String>>>>,
        pub commits: Mutex<Vec<Commit>>,
        pub calls: Mutex<Vec<Call>>,
        pub create_on_clone: bool,
    }

    fn key(dir: &Path) -> String {
        dir.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn failure(stderr: &str) -> GitError {
        GitError::NonZeroExit {
            code: Some(128),
            stderr: stderr.to_string(),
        }
    }

    impl MockGit {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn creating_dirs() -> Self {
            Self {
                create_on_clone: true,
                ..Self::default()
            }
        }

        pub fn fail_clone(&self, locator: &str, stderr: &str) {
            self.clone_failures
                .lock()
                .insert(locator.to_string(), stderr.to_string());
        }

        pub fn mark_repository(&self, dir: &Path) {
            self.repositories.lock().push(dir.to_path_buf());
        }

        pub fn script_revisions(&self, name: &str, revs: &[&str]) {
            self.revisions.lock().insert(
                name.to_string(),
                revs.iter().map(|r| Ok(r.to_string())).collect(),
            );
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
            self.calls.lock().iter().filter(|c| pred(c)).count()
        }
    }

    impl GitGateway for MockGit {
        fn clone_repo(
            &self,
            _deadline: Instant,
            locator: &str,
            dest: &Path,
            _branch: Option<&str>,
        ) -> Result<(), GitError> {
            self.calls.lock().push(Call::Clone {
                locator: locator.to_string(),
                dest: dest.to_path_buf(),
            });
            if let Some(stderr) = self.clone_failures.lock().get(locator) {
                return Err(failure(stderr));
            }
            if self.create_on_clone {
                std::fs::create_dir_all(dest).map_err(GitError::SpawnFailed)?;
            }
            Ok(())
        }

        fn pull(
            &self,
            _deadline: Instant,
            dir: &Path,
            _branch: Option<&str>,
        ) -> Result<String, GitError> {
            self.calls.lock().push(Call::Pull(dir.to_path_buf()));
            match self.pull_results.lock().get(&key(dir)) {
                Some(Ok(out)) => Ok(out.clone()),
                Some(Err(stderr)) => Err(failure(stderr)),
                None => Ok("Already up to date.".to_string()),
            }
        }

        fn is_repository(&self, dir: &Path) -> bool {
            self.repositories.lock().iter().any(|p| p == dir)
        }

        fn is_outdated(&self, _deadline: Instant, dir: &Path) -> Result<bool, GitError> {
            self.calls.lock().push(Call::IsOutdated(dir.to_path_buf()));
            match self.outdated.lock().get(&key(dir)) {
                Some(Ok(outdated)) => Ok(*outdated),
                Some(Err(stderr)) => Err(failure(stderr)),
                None => Ok(false),
            }
        }

        fn rev_parse(&self, _deadline: Instant, dir: &Path) -> Result<String, GitError> {
            self.calls.lock().push(Call::RevParse(dir.to_path_buf()));
            let next = self
                .revisions
                .lock()
                .get_mut(&key(dir))
                .and_then(VecDeque::pop_front);
            match next {
                Some(Ok(rev)) => Ok(rev),
                Some(Err(stderr)) => Err(failure(&stderr)),
                None => Ok("0000000".to_string()),
            }
        }

        fn log(
            &self,
            _deadline: Instant,
            _dir: &Path,
            from: &str,
            to: &str,
        ) -> Result<Vec<Commit>, GitError> {
            self.calls.lock().push(Call::Log {
                from: from.to_string(),
                to: to.to_string(),
            });
            Ok(self.commits.lock().clone())
        }
    }
}
