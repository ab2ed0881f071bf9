use std::sync::Arc;
use std::sync::mpsc;
use std::thread;

use crate::effect::Effect;
use crate::git::GitGateway;
use crate::hooks::Hooks;
use crate::model::config::Timeouts;
use crate::msg::{Hook, Msg};
use crate::plugin::operation::ExecContext;
use crate::plugin::probe;
use crate::registry::CatalogSource;

/// Runs effects on worker threads and posts their outcome back to the
/// single event queue the reducer consumes.
#[derive(Clone)]
pub struct Driver {
    tx: mpsc::Sender<Msg>,
    git: Arc<dyn GitGateway>,
    hooks: Arc<dyn Hooks>,
    catalog: Arc<dyn CatalogSource>,
    timeouts: Timeouts,
    check_concurrency: usize,
}

impl Driver {
    pub fn new(
        tx: mpsc::Sender<Msg>,
        git: Arc<dyn GitGateway>,
        hooks: Arc<dyn Hooks>,
        catalog: Arc<dyn CatalogSource>,
        timeouts: Timeouts,
        check_concurrency: usize,
    ) -> Self {
        Self {
            tx,
            git,
            hooks,
            catalog,
            timeouts,
            check_concurrency,
        }
    }

    /// Work effects each get a thread. Hook effects share one thread and run
    /// in the order given, since they all touch tmux.conf.
    pub fn spawn_all(&self, effects: Vec<Effect>) {
        let (hooks, work): (Vec<Effect>, Vec<Effect>) = effects
            .into_iter()
            .partition(|e| matches!(e, Effect::ReloadConfig | Effect::DeclarePlugin(_)));
        for effect in work {
            self.spawn(effect);
        }
        if !hooks.is_empty() {
            let worker = self.clone();
            thread::spawn(move || {
                for effect in hooks {
                    worker.run(effect);
                }
            });
        }
    }

    pub fn spawn(&self, effect: Effect) {
        let worker = self.clone();
        thread::spawn(move || worker.run(effect));
    }

    fn run(&self, effect: Effect) {
        match effect {
            Effect::Execute { operation, pending } => {
                let ctx = ExecContext {
                    git: self.git.as_ref(),
                    timeouts: self.timeouts,
                };
                let result = operation.execute(&pending, &ctx);
                self.post(Msg::OperationFinished { operation, result });
            }
            Effect::ProbeStatuses(targets) => {
                probe::resolve_all(
                    targets,
                    self.git.as_ref(),
                    self.timeouts.status_check,
                    self.check_concurrency,
                    |name, outcome| self.post(Msg::StatusResolved { name, outcome }),
                );
            }
            Effect::ReloadConfig => {
                let result = self.hooks.reload_config().map_err(|e| format!("{e:#}"));
                self.post(Msg::HookFinished {
                    hook: Hook::ReloadConfig,
                    result,
                });
            }
            Effect::DeclarePlugin(spec) => {
                let result = self.hooks.declare_plugin(&spec).map_err(|e| format!("{e:#}"));
                self.post(Msg::HookFinished {
                    hook: Hook::DeclarePlugin,
                    result,
                });
            }
            Effect::FetchCatalog => {
                let result = self.catalog.fetch().map_err(|e| format!("{e:#}"));
                self.post(Msg::CatalogLoaded(result));
            }
        }
    }

    fn post(&self, msg: Msg) {
        if self.tx.send(msg).is_err() {
            tracing::debug!("event loop gone, dropping background result");
        }
    }
}
