/// Top-level screens of the interactive UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Screen {
    /// Declared plugins and orphans.
    #[default]
    List,
    /// A running or finished operation batch.
    Progress,
    /// Registry search and install.
    Browse,
    /// Read-only commit list of one update result.
    CommitViewer,
    /// Paths, configuration and internal counters.
    Debug,
}

impl Screen {
    pub fn label(&self) -> &'static str {
        match self {
            Screen::List => "PLUGINS",
            Screen::Progress => "PROGRESS",
            Screen::Browse => "BROWSE",
            Screen::CommitViewer => "COMMITS",
            Screen::Debug => "DEBUG",
        }
    }
}
