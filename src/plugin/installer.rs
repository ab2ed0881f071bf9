use std::io::ErrorKind;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use crate::plugin::operation::{ExecContext, PendingOperation, ResultRecord};
use crate::plugin::spec::{is_valid_name, normalize_locator};

/// Clone the plugin, retrying once with the normalized locator.
pub fn install(pending: &PendingOperation, ctx: &ExecContext<'_>) -> ResultRecord {
    let branch = pending.branch.as_deref();

    let first = ctx.git.clone_repo(
        deadline(ctx.timeouts.clone_pull),
        &pending.clone_spec,
        &pending.path,
        branch,
    );
    let Err(first_err) = first else {
        return ResultRecord::ok(pending, "installed");
    };

    let fallback = normalize_locator(&pending.clone_spec);
    tracing::info!(
        "clone of {} from {:?} failed ({first_err}), retrying with {fallback}",
        pending.name,
        pending.clone_spec
    );

    // git removes its own partial checkout, but a killed clone can leave one behind.
    if let Err(err) = remove_dir_if_present(&pending.path) {
        tracing::warn!("could not clear {} before retry: {err}", pending.path.display());
    }

    match ctx.git.clone_repo(
        deadline(ctx.timeouts.clone_pull),
        &fallback,
        &pending.path,
        branch,
    ) {
        Ok(()) => ResultRecord::ok(pending, "installed"),
        Err(err) => {
            tracing::warn!("install of {} failed: {err}", pending.name);
            ResultRecord::failed(pending, err.to_string())
        }
    }
}

/// Pull the plugin and report the commits it brought in.
pub fn update(pending: &PendingOperation, ctx: &ExecContext<'_>) -> ResultRecord {
    let before = match ctx.git.rev_parse(deadline(ctx.timeouts.status_check), &pending.path) {
        Ok(rev) => Some(rev),
        Err(err) => {
            tracing::debug!("no pre-update revision for {}: {err}", pending.name);
            None
        }
    };

    let output = match ctx.git.pull(
        deadline(ctx.timeouts.clone_pull),
        &pending.path,
        pending.branch.as_deref(),
    ) {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!("update of {} failed: {err}", pending.name);
            let mut record = ResultRecord::failed(pending, err.to_string());
            record.before_ref = before;
            return record;
        }
    };

    let mut record = ResultRecord::ok(pending, "updated");
    record.output = output;
    record.before_ref = before.clone();

    let Some(before) = before else {
        return record;
    };

    let after = match ctx.git.rev_parse(deadline(ctx.timeouts.status_check), &pending.path) {
        Ok(rev) => rev,
        Err(err) => {
            tracing::debug!("no post-update revision for {}: {err}", pending.name);
            return record;
        }
    };

    if after != before {
        match ctx
            .git
            .log(deadline(ctx.timeouts.status_check), &pending.path, &before, &after)
        {
            Ok(commits) => {
                record.message = match commits.len() {
                    1 => "updated (1 new commit)".to_string(),
                    n => format!("updated ({n} new commits)"),
                };
                record.commits = commits;
            }
            Err(err) => tracing::debug!("commit log for {} unavailable: {err}", pending.name),
        }
    } else {
        record.message = "already up to date".to_string();
    }
    record.after_ref = Some(after);
    record
}

/// Recursively delete the plugin directory. A missing directory is success.
pub fn remove(pending: &PendingOperation, ctx: &ExecContext<'_>) -> ResultRecord {
    if !names_own_directory(pending) {
        tracing::warn!(
            "refusing to remove {} for plugin {:?}",
            pending.path.display(),
            pending.name
        );
        return ResultRecord::failed(
            pending,
            format!("refusing to remove {}", pending.path.display()),
        );
    }

    let path = pending.path.clone();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(remove_dir_if_present(&path));
    });

    match rx.recv_timeout(ctx.timeouts.remove) {
        Ok(Ok(())) => ResultRecord::ok(pending, "removed"),
        Ok(Err(err)) => {
            tracing::warn!("removing {} failed: {err}", pending.path.display());
            ResultRecord::failed(pending, err.to_string())
        }
        Err(_) => ResultRecord::failed(
            pending,
            format!("removal timed out after {:?}", ctx.timeouts.remove),
        ),
    }
}

pub fn noop(pending: &PendingOperation, _ctx: &ExecContext<'_>) -> ResultRecord {
    ResultRecord::failed(pending, "no operation")
}

/// The path must end in the plugin's own name, so removal never reaches the
/// plugin root or anything above it.
fn names_own_directory(pending: &PendingOperation) -> bool {
    is_valid_name(&pending.name)
        && pending.path.parent().is_some_and(|parent| !parent.as_os_str().is_empty())
        && pending.path.file_name().and_then(|n| n.to_str()) == Some(pending.name.as_str())
}

fn remove_dir_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn deadline(after: Duration) -> Instant {
    Instant::now() + after
}
