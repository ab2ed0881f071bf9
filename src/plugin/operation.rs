use std::fmt;
use std::path::PathBuf;

use crate::git::{Commit, GitGateway};
use crate::model::config::Timeouts;
use crate::plugin::installer;
use crate::plugin::manager::{OrphanEntry, Plugin};
use crate::plugin::status::StatusEvent;

/// A lifecycle action applied to a set of plugins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operation {
    #[default]
    None,
    Install,
    Update,
    Clean,
    Uninstall,
}

/// One queued unit of work for a single plugin or orphan directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub name: String,
    pub clone_spec: String,
    pub branch: Option<String>,
    pub path: PathBuf,
}

/// Outcome of one executed [`PendingOperation`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultRecord {
    pub name: String,
    pub success: bool,
    pub message: String,
    pub output: String,
    /// Update only: commits pulled in, newest first.
    pub commits: Vec<Commit>,
    pub source_dir: PathBuf,
    pub before_ref: Option<String>,
    pub after_ref: Option<String>,
}

impl ResultRecord {
    pub fn ok(pending: &PendingOperation, message: impl Into<String>) -> Self {
        Self {
            name: pending.name.clone(),
            success: true,
            message: message.into(),
            source_dir: pending.path.clone(),
            ..Self::default()
        }
    }

    pub fn failed(pending: &PendingOperation, message: impl Into<String>) -> Self {
        Self {
            name: pending.name.clone(),
            success: false,
            message: message.into(),
            source_dir: pending.path.clone(),
            ..Self::default()
        }
    }
}

/// Everything a build rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct BuildInput<'a> {
    pub plugins: &'a [Plugin],
    pub orphans: &'a [OrphanEntry],
    /// Resolved target indices into `plugins`, ascending.
    pub targets: &'a [usize],
    pub multi_select: bool,
}

/// Collaborators available to an executing operation.
#[derive(Clone, Copy)]
pub struct ExecContext<'a> {
    pub git: &'a dyn GitGateway,
    pub timeouts: Timeouts,
}

type BuildFn = fn(&BuildInput<'_>) -> Vec<PendingOperation>;
type ExecuteFn = fn(&PendingOperation, &ExecContext<'_>) -> ResultRecord;

/// The pure build rule and the execute function of one operation kind.
pub struct OperationHandlers {
    pub build: BuildFn,
    pub execute: ExecuteFn,
}

static NONE: OperationHandlers = OperationHandlers {
    build: build_nothing,
    execute: installer::noop,
};
static INSTALL: OperationHandlers = OperationHandlers {
    build: build_install,
    execute: installer::install,
};
static UPDATE: OperationHandlers = OperationHandlers {
    build: build_update,
    execute: installer::update,
};
static CLEAN: OperationHandlers = OperationHandlers {
    build: build_clean,
    execute: installer::remove,
};
static UNINSTALL: OperationHandlers = OperationHandlers {
    build: build_uninstall,
    execute: installer::remove,
};

impl Operation {
    pub fn handlers(self) -> &'static OperationHandlers {
        match self {
            Operation::None => &NONE,
            Operation::Install => &INSTALL,
            Operation::Update => &UPDATE,
            Operation::Clean => &CLEAN,
            Operation::Uninstall => &UNINSTALL,
        }
    }

    pub fn build(self, input: &BuildInput<'_>) -> Vec<PendingOperation> {
        (self.handlers().build)(input)
    }

    pub fn execute(self, pending: &PendingOperation, ctx: &ExecContext<'_>) -> ResultRecord {
        (self.handlers().execute)(pending, ctx)
    }

    /// Status change a successful result of this operation implies.
    pub fn success_event(self) -> Option<StatusEvent> {
        match self {
            Operation::Install => Some(StatusEvent::InstallSucceeded),
            Operation::Update => Some(StatusEvent::UpdateSucceeded),
            Operation::Uninstall => Some(StatusEvent::UninstallSucceeded),
            Operation::Clean | Operation::None => None,
        }
    }

    /// Whether finishing a batch of this kind should make tmux reload its config.
    pub fn reloads_config(self) -> bool {
        matches!(self, Operation::Install | Operation::Update)
    }

    pub fn label(self) -> &'static str {
        match self {
            Operation::None => "idle",
            Operation::Install => "install",
            Operation::Update => "update",
            Operation::Clean => "clean",
            Operation::Uninstall => "uninstall",
        }
    }

    pub fn progress_title(self) -> &'static str {
        match self {
            Operation::None => "Idle",
            Operation::Install => "Installing plugins",
            Operation::Update => "Updating plugins",
            Operation::Clean => "Removing orphaned plugins",
            Operation::Uninstall => "Uninstalling plugins",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Selected indices in ascending order when a selection exists, otherwise the
/// item under the cursor, if any.
pub fn resolve_targets(selected: &[usize], cursor: Option<usize>, len: usize) -> Vec<usize> {
    if !selected.is_empty() {
        let mut targets: Vec<usize> = selected.iter().copied().filter(|&i| i < len).collect();
        targets.sort_unstable();
        targets.dedup();
        return targets;
    }
    cursor.filter(|&i| i < len).into_iter().collect()
}

fn pending_for(plugin: &Plugin) -> PendingOperation {
    PendingOperation {
        name: plugin.spec.name.clone(),
        clone_spec: plugin.spec.clone_spec.clone(),
        branch: plugin.spec.branch.clone(),
        path: plugin.dir.clone(),
    }
}

fn targeted<'a>(input: &'a BuildInput<'_>) -> impl Iterator<Item = &'a Plugin> + 'a {
    input.targets.iter().filter_map(|&i| input.plugins.get(i))
}

fn build_nothing(_input: &BuildInput<'_>) -> Vec<PendingOperation> {
    Vec::new()
}

fn build_install(input: &BuildInput<'_>) -> Vec<PendingOperation> {
    targeted(input)
        .filter(|plugin| !plugin.status.is_installed())
        .map(pending_for)
        .collect()
}

fn build_update(input: &BuildInput<'_>) -> Vec<PendingOperation> {
    let pending: Vec<PendingOperation> = targeted(input)
        .filter(|plugin| plugin.status.is_installed())
        .map(pending_for)
        .collect();

    if pending.is_empty() && !input.multi_select {
        return input
            .plugins
            .iter()
            .filter(|plugin| plugin.status.is_installed())
            .map(pending_for)
            .collect();
    }
    pending
}

fn build_clean(input: &BuildInput<'_>) -> Vec<PendingOperation> {
    input
        .orphans
        .iter()
        .map(|orphan| PendingOperation {
            name: orphan.name.clone(),
            clone_spec: String::new(),
            branch: None,
            path: orphan.path.clone(),
        })
        .collect()
}

fn build_uninstall(input: &BuildInput<'_>) -> Vec<PendingOperation> {
    targeted(input)
        .filter(|plugin| plugin.status.is_installed())
        .map(pending_for)
        .collect()
}
