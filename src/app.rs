use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;

use crate::effect::Effect;
use crate::git::GitGateway;
use crate::model::config::AppConfig;
use crate::model::mode::Screen;
use crate::msg::{Hook, Msg};
use crate::plugin::PluginManager;
use crate::plugin::manager::Plugin;
use crate::plugin::operation::{BuildInput, Operation, PendingOperation, ResultRecord, resolve_targets};
use crate::plugin::orchestrator::Orchestrator;
use crate::plugin::spec::PluginSpec;
use crate::plugin::status::{PluginStatus, StatusEvent};
use crate::registry::{self, CatalogItem};

const MAX_NOTIFICATIONS: usize = 8;

/// Cursor and expanded rows of the progress screen.
#[derive(Debug, Default)]
pub struct ProgressView {
    pub cursor: usize,
    pub expanded: HashSet<usize>,
}

#[derive(Debug, Default)]
pub struct CommitView {
    /// Index into the orchestrator's results.
    pub result: usize,
    pub scroll: usize,
}

#[derive(Debug, Clone, Default)]
struct FilterSnapshot {
    filter: String,
    cursor: usize,
}

/// Registry browser state.
#[derive(Debug, Default)]
pub struct BrowseState {
    pub loading: bool,
    pub error: Option<String>,
    pub items: Vec<CatalogItem>,
    pub categories: Vec<String>,
    /// 0 is "all"; `n` selects `categories[n - 1]`.
    pub category: usize,
    pub filter: String,
    pub editing_filter: bool,
    pub cursor: usize,
    snapshot: Option<FilterSnapshot>,
}

impl BrowseState {
    pub fn category_label(&self) -> &str {
        match self.category {
            0 => "all",
            n => self.categories.get(n - 1).map(String::as_str).unwrap_or("all"),
        }
    }

    /// Items in the current category matching the filter, best match first.
    pub fn visible(&self) -> Vec<&CatalogItem> {
        let in_category = self
            .items
            .iter()
            .filter(|item| self.category == 0 || item.category == self.category_label());

        let query = self.filter.trim();
        if query.is_empty() {
            return in_category.collect();
        }

        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(i64, &CatalogItem)> = in_category
            .filter_map(|item| {
                let haystack = format!("{} {} {}", item.name, item.repo, item.description);
                matcher.fuzzy_match(&haystack, query).map(|score| (score, item))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        scored.into_iter().map(|(_, item)| item).collect()
    }

    fn cycle_category(&mut self, delta: isize) {
        let count = self.categories.len() as isize + 1;
        self.category = (self.category as isize + delta).rem_euclid(count) as usize;
        self.cursor = 0;
    }

    fn begin_filter(&mut self) {
        self.snapshot = Some(FilterSnapshot {
            filter: self.filter.clone(),
            cursor: self.cursor,
        });
        self.editing_filter = true;
    }

    fn cancel_filter(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            self.filter = snapshot.filter;
            self.cursor = snapshot.cursor;
        }
        self.editing_filter = false;
    }

    fn commit_filter(&mut self) {
        self.snapshot = None;
        self.editing_filter = false;
    }

    fn clamp_cursor(&mut self) {
        let len = self.visible().len();
        self.cursor = self.cursor.min(len.saturating_sub(1));
    }
}

pub struct App {
    pub screen: Screen,
    pub config: AppConfig,
    pub manager: PluginManager,
    pub cursor: usize,
    pub selected: BTreeSet<usize>,
    pub orchestrator: Orchestrator,
    pub progress: ProgressView,
    pub commit_view: CommitView,
    pub browse: BrowseState,
    pub notifications: VecDeque<String>,
    pub should_quit: bool,
    pub viewport_height: u16,
    pub tick: usize,
    git: Arc<dyn GitGateway>,
    /// Browse installs that still need declaring once they succeed.
    browse_installs: HashMap<String, PluginSpec>,
}

impl App {
    pub fn new(config: AppConfig, git: Arc<dyn GitGateway>) -> Self {
        let manager = PluginManager::scan(config.plugin_dir(), config.plugin_specs(), git.as_ref());
        Self::from_parts(config, git, manager)
    }

    pub fn from_parts(config: AppConfig, git: Arc<dyn GitGateway>, manager: PluginManager) -> Self {
        let orchestrator = Orchestrator::new(config.operation_concurrency());
        Self {
            screen: Screen::List,
            config,
            manager,
            cursor: 0,
            selected: BTreeSet::new(),
            orchestrator,
            progress: ProgressView::default(),
            commit_view: CommitView::default(),
            browse: BrowseState::default(),
            notifications: VecDeque::new(),
            should_quit: false,
            viewport_height: 24,
            tick: 0,
            git,
            browse_installs: HashMap::new(),
        }
    }

    /// Effects to run once the event loop is up.
    pub fn startup(&self) -> Vec<Effect> {
        self.probe_effects()
    }

    fn probe_effects(&self) -> Vec<Effect> {
        let checking = self.manager.checking();
        if checking.is_empty() {
            Vec::new()
        } else {
            vec![Effect::ProbeStatuses(checking)]
        }
    }

    // ── MVU: Update ──────────────────────────────────────────────

    pub fn update(&mut self, msg: Msg) -> Vec<Effect> {
        match msg {
            Msg::Key(key) => self.handle_key(key),
            Msg::StatusResolved { name, outcome } => {
                self.manager.apply(&name, &StatusEvent::CheckResolved(outcome));
                Vec::new()
            }
            Msg::OperationFinished { operation, result } => {
                self.handle_operation_finished(operation, result)
            }
            Msg::CatalogLoaded(result) => {
                self.handle_catalog_loaded(result);
                Vec::new()
            }
            Msg::HookFinished { hook, result } => {
                if let Err(err) = result {
                    let what = match hook {
                        Hook::ReloadConfig => "reload tmux config",
                        Hook::DeclarePlugin => "declare plugin",
                    };
                    tracing::warn!("{what} failed: {err}");
                    self.push_notification(format!("{what} failed: {err}"));
                }
                Vec::new()
            }
            Msg::Resize(_w, h) => {
                self.viewport_height = h;
                Vec::new()
            }
            Msg::Tick => {
                self.tick = self.tick.wrapping_add(1);
                Vec::new()
            }
        }
    }

    fn handle_operation_finished(&mut self, operation: Operation, result: ResultRecord) -> Vec<Effect> {
        let mut effects = Vec::new();

        if operation == Operation::Install
            && result.success
            && self.orchestrator.is_in_flight(&result.name)
            && let Some(spec) = self.browse_installs.remove(&result.name)
        {
            if self.manager.find(&spec.name).is_none() {
                self.manager.plugins.push(Plugin {
                    dir: result.source_dir.clone(),
                    spec: spec.clone(),
                    status: PluginStatus::NotInstalled,
                });
            }
            effects.push(Effect::DeclarePlugin(spec));
        }

        effects.extend(self.orchestrator.complete(operation, result, &mut self.manager));
        effects
    }

    fn handle_catalog_loaded(&mut self, result: Result<Vec<CatalogItem>, String>) {
        self.browse.loading = false;
        match result {
            Ok(items) => {
                self.browse.categories = registry::categories(&items);
                self.browse.items = items;
                self.browse.error = None;
                self.browse.category = 0;
                self.browse.clamp_cursor();
            }
            Err(err) => {
                tracing::warn!("catalog fetch failed: {err}");
                self.browse.error = Some(err);
            }
        }
    }

    pub fn push_notification(&mut self, message: String) {
        self.notifications.push_back(message);
        while self.notifications.len() > MAX_NOTIFICATIONS {
            self.notifications.pop_front();
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return Vec::new();
        }

        match self.screen {
            Screen::List => self.handle_key_list(key),
            Screen::Progress => {
                self.handle_key_progress(key);
                Vec::new()
            }
            Screen::Browse => self.handle_key_browse(key),
            Screen::CommitViewer => {
                self.handle_key_commits(key);
                Vec::new()
            }
            Screen::Debug => {
                if matches!(key.code, KeyCode::Esc | KeyCode::Char('q')) {
                    self.screen = Screen::List;
                }
                Vec::new()
            }
        }
    }

    fn handle_key_list(&mut self, key: KeyEvent) -> Vec<Effect> {
        let len = self.manager.plugins.len();
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                if len > 0 {
                    self.cursor = (self.cursor + 1).min(len - 1);
                }
            }
            KeyCode::Char('k') | KeyCode::Up => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Char('g') | KeyCode::Home => self.cursor = 0,
            KeyCode::Char('G') | KeyCode::End => self.cursor = len.saturating_sub(1),
            KeyCode::Char(' ') => {
                if self.cursor < len && !self.selected.remove(&self.cursor) {
                    self.selected.insert(self.cursor);
                }
            }
            KeyCode::Char('a') => {
                if self.selected.len() == len {
                    self.selected.clear();
                } else {
                    self.selected = (0..len).collect();
                }
            }
            KeyCode::Char('i') => return self.start_operation(Operation::Install),
            KeyCode::Char('u') => return self.start_operation(Operation::Update),
            KeyCode::Char('c') => return self.start_operation(Operation::Clean),
            KeyCode::Char('x') => return self.start_operation(Operation::Uninstall),
            KeyCode::Char('b') => return self.enter_browse(),
            KeyCode::Char('d') => self.screen = Screen::Debug,
            KeyCode::Char('r') => return self.rescan(),
            KeyCode::Esc if !self.selected.is_empty() => self.selected.clear(),
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            _ => {}
        }
        Vec::new()
    }

    fn handle_key_progress(&mut self, key: KeyEvent) {
        if self.orchestrator.is_processing() {
            return;
        }

        let len = self.orchestrator.results().len();
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                if len > 0 {
                    self.progress.cursor = (self.progress.cursor + 1).min(len - 1);
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.progress.cursor = self.progress.cursor.saturating_sub(1);
            }
            KeyCode::Char(' ') | KeyCode::Tab => {
                let index = self.progress.cursor;
                if self.result_has_commits(index) && !self.progress.expanded.remove(&index) {
                    self.progress.expanded.insert(index);
                }
            }
            KeyCode::Char('v') => {
                if self.result_has_commits(self.progress.cursor) {
                    self.commit_view = CommitView {
                        result: self.progress.cursor,
                        scroll: 0,
                    };
                    self.screen = Screen::CommitViewer;
                }
            }
            KeyCode::Enter | KeyCode::Esc | KeyCode::Char('q') => self.return_to_list(),
            _ => {}
        }
    }

    fn handle_key_commits(&mut self, key: KeyEvent) {
        let len = self
            .orchestrator
            .results()
            .get(self.commit_view.result)
            .map(|r| r.commits.len())
            .unwrap_or(0);
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                self.commit_view.scroll = (self.commit_view.scroll + 1).min(len.saturating_sub(1));
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.commit_view.scroll = self.commit_view.scroll.saturating_sub(1);
            }
            KeyCode::Esc | KeyCode::Char('q') => self.screen = Screen::Progress,
            _ => {}
        }
    }

    fn handle_key_browse(&mut self, key: KeyEvent) -> Vec<Effect> {
        if self.browse.editing_filter {
            match key.code {
                KeyCode::Esc => self.browse.cancel_filter(),
                KeyCode::Enter => self.browse.commit_filter(),
                KeyCode::Backspace => {
                    self.browse.filter.pop();
                    self.browse.cursor = 0;
                }
                KeyCode::Char(ch)
                    if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT =>
                {
                    self.browse.filter.push(ch);
                    self.browse.cursor = 0;
                }
                _ => {}
            }
            return Vec::new();
        }

        if matches!(key.code, KeyCode::Esc | KeyCode::Char('q')) {
            self.screen = Screen::List;
            return Vec::new();
        }
        if self.browse.loading {
            return Vec::new();
        }

        let len = self.browse.visible().len();
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                if len > 0 {
                    self.browse.cursor = (self.browse.cursor + 1).min(len - 1);
                }
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.browse.cursor = self.browse.cursor.saturating_sub(1);
            }
            KeyCode::Tab => self.browse.cycle_category(1),
            KeyCode::BackTab => self.browse.cycle_category(-1),
            KeyCode::Char('/') => self.browse.begin_filter(),
            KeyCode::Enter => {
                let chosen = self.browse.visible().get(self.browse.cursor).map(|item| (*item).clone());
                if let Some(item) = chosen {
                    return self.install_from_browse(&item);
                }
            }
            _ => {}
        }
        Vec::new()
    }

    fn enter_browse(&mut self) -> Vec<Effect> {
        self.screen = Screen::Browse;
        self.browse = BrowseState {
            loading: true,
            ..BrowseState::default()
        };
        vec![Effect::FetchCatalog]
    }

    fn rescan(&mut self) -> Vec<Effect> {
        self.manager = PluginManager::scan(
            self.config.plugin_dir(),
            self.config.plugin_specs(),
            self.git.as_ref(),
        );
        self.selected.clear();
        self.clamp_cursor();
        self.probe_effects()
    }

    /// Build and launch `operation` over the current targets.
    pub fn start_operation(&mut self, operation: Operation) -> Vec<Effect> {
        let targets = resolve_targets(
            &self.selected.iter().copied().collect::<Vec<_>>(),
            Some(self.cursor),
            self.manager.plugins.len(),
        );
        let input = BuildInput {
            plugins: &self.manager.plugins,
            orphans: &self.manager.orphans,
            targets: &targets,
            multi_select: !self.selected.is_empty(),
        };
        let pending = operation.build(&input);
        if pending.is_empty() {
            self.push_notification(format!("nothing to {operation}"));
            return Vec::new();
        }

        self.launch(operation, pending)
    }

    fn install_from_browse(&mut self, item: &CatalogItem) -> Vec<Effect> {
        let spec = match PluginSpec::parse(&item.repo) {
            Ok(spec) => spec,
            Err(err) => {
                self.push_notification(format!("{}: {err}", item.name));
                return Vec::new();
            }
        };

        if let Some(plugin) = self.manager.find(&spec.name)
            && plugin.status.is_installed()
        {
            self.push_notification(format!("{} is already installed", spec.name));
            return Vec::new();
        }

        let pending = vec![PendingOperation {
            name: spec.name.clone(),
            clone_spec: spec.clone_spec.clone(),
            branch: spec.branch.clone(),
            path: self.manager.root().join(&spec.name),
        }];
        let effects = self.launch(Operation::Install, pending);
        if !effects.is_empty() {
            self.browse_installs.insert(spec.name.clone(), spec);
        }
        effects
    }

    fn launch(&mut self, operation: Operation, pending: Vec<PendingOperation>) -> Vec<Effect> {
        if let Err(err) = self.manager.ensure_root() {
            tracing::error!("{operation} aborted: {err}");
            self.push_notification(format!("{operation} aborted: {err}"));
            return Vec::new();
        }

        match self.orchestrator.start(operation, pending) {
            Some(effects) => {
                self.progress = ProgressView::default();
                self.screen = Screen::Progress;
                effects
            }
            None => Vec::new(),
        }
    }

    fn return_to_list(&mut self) {
        if self.orchestrator.operation() == Operation::Clean {
            let removed = self.orchestrator.succeeded_names();
            self.manager.forget_orphans(&removed);
        }
        self.orchestrator.reset();
        self.browse_installs.clear();
        self.progress = ProgressView::default();
        self.selected.clear();
        self.clamp_cursor();
        self.screen = Screen::List;
    }

    fn clamp_cursor(&mut self) {
        self.cursor = self.cursor.min(self.manager.plugins.len().saturating_sub(1));
    }

    fn result_has_commits(&self, index: usize) -> bool {
        self.orchestrator
            .results()
            .get(index)
            .is_some_and(|r| r.success && !r.commits.is_empty())
    }
}
