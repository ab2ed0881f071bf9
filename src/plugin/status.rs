/// Installation and freshness of a declared plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginStatus {
    NotInstalled,
    /// Installed; staleness check still running.
    Checking,
    Installed,
    Outdated,
    CheckFailed,
}

/// Result of resolving a `Checking` plugin against its remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    UpToDate,
    Outdated,
    Failed(String),
}

/// Something that happened to a plugin, proposed as a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    CheckResolved(CheckOutcome),
    InstallSucceeded,
    UpdateSucceeded,
    UninstallSucceeded,
}

impl PluginStatus {
    pub fn is_installed(self) -> bool {
        !matches!(self, PluginStatus::NotInstalled)
    }

    /// The status after `event`, or `None` when the transition is not legal
    /// from the current status.
    pub fn apply(self, event: &StatusEvent) -> Option<PluginStatus> {
        match (self, event) {
            (PluginStatus::Checking, StatusEvent::CheckResolved(outcome)) => Some(match outcome {
                CheckOutcome::UpToDate => PluginStatus::Installed,
                CheckOutcome::Outdated => PluginStatus::Outdated,
                CheckOutcome::Failed(_) => PluginStatus::CheckFailed,
            }),
            (PluginStatus::NotInstalled, StatusEvent::InstallSucceeded) => {
                Some(PluginStatus::Installed)
            }
            (status, StatusEvent::UpdateSucceeded) if status.is_installed() => {
                Some(PluginStatus::Installed)
            }
            (status, StatusEvent::UninstallSucceeded) if status.is_installed() => {
                Some(PluginStatus::NotInstalled)
            }
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PluginStatus::NotInstalled => "not installed",
            PluginStatus::Checking => "checking",
            PluginStatus::Installed => "installed",
            PluginStatus::Outdated => "outdated",
            PluginStatus::CheckFailed => "check failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [PluginStatus; 5] = [
        PluginStatus::NotInstalled,
        PluginStatus::Checking,
        PluginStatus::Installed,
        PluginStatus::Outdated,
        PluginStatus::CheckFailed,
    ];

    #[test]
    fn only_not_installed_is_uninstalled() {
        for status in ALL {
            assert_eq!(status.is_installed(), status != PluginStatus::NotInstalled);
        }
    }

    #[test]
    fn check_results_only_from_checking() {
        let outcomes = [
            (CheckOutcome::UpToDate, PluginStatus::Installed),
            (CheckOutcome::Outdated, PluginStatus::Outdated),
            (CheckOutcome::Failed("timeout".into()), PluginStatus::CheckFailed),
        ];
        for (outcome, expected) in outcomes {
            let event = StatusEvent::CheckResolved(outcome);
            for status in ALL {
                let next = status.apply(&event);
                if status == PluginStatus::Checking {
                    assert_eq!(next, Some(expected));
                } else {
                    assert_eq!(next, None, "{status:?} must not accept {event:?}");
                }
            }
        }
    }

    #[test]
    fn install_only_from_not_installed() {
        for status in ALL {
            let next = status.apply(&StatusEvent::InstallSucceeded);
            if status == PluginStatus::NotInstalled {
                assert_eq!(next, Some(PluginStatus::Installed));
            } else {
                assert_eq!(next, None);
            }
        }
    }

    #[test]
    fn uninstall_only_from_installed_variants() {
        for status in ALL {
            let next = status.apply(&StatusEvent::UninstallSucceeded);
            if status.is_installed() {
                assert_eq!(next, Some(PluginStatus::NotInstalled));
            } else {
                assert_eq!(next, None);
            }
        }
    }

    #[test]
    fn update_refreshes_installed_variants() {
        assert_eq!(
            PluginStatus::Outdated.apply(&StatusEvent::UpdateSucceeded),
            Some(PluginStatus::Installed)
        );
        assert_eq!(PluginStatus::NotInstalled.apply(&StatusEvent::UpdateSucceeded), None);
    }
}
