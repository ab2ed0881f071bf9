use std::path::PathBuf;

use crate::plugin::operation::{Operation, PendingOperation};
use crate::plugin::spec::PluginSpec;

/// Background work requested by a state transition. The reducer only returns
/// these; the driver runs them off the UI thread and feeds the outcome back
/// as a [`crate::msg::Msg`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Run one pending operation; reported as `Msg::OperationFinished`.
    Execute {
        operation: Operation,
        pending: PendingOperation,
    },
    /// Resolve `Checking` plugins; one `Msg::StatusResolved` per plugin.
    ProbeStatuses(Vec<(String, PathBuf)>),
    /// Ask tmux to re-source its configuration.
    ReloadConfig,
    /// Record a newly installed plugin in tmux.conf.
    DeclarePlugin(PluginSpec),
    /// Load the plugin catalog for the browse screen.
    FetchCatalog,
}
