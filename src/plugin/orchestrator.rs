//! Bounded incremental dispatcher for one batch of plugin operations.
//!
//! The orchestrator is a plain state machine driven from a single thread: the
//! batch is started once, then every completion event is folded in with
//! [`Orchestrator::complete`]. Both return the [`Effect`]s to launch next, so
//! at most `max_concurrent` operations are ever outstanding and no locking is
//! needed. At every step
//! `completed + queue.len() + in_flight.len() == total` holds.

use std::collections::{HashSet, VecDeque};

use crate::effect::Effect;
use crate::plugin::manager::PluginManager;
use crate::plugin::operation::{Operation, PendingOperation, ResultRecord};

pub const DEFAULT_MAX_CONCURRENT: usize = 3;

#[derive(Debug, Clone)]
pub struct Orchestrator {
    operation: Operation,
    queue: VecDeque<PendingOperation>,
    in_flight: HashSet<String>,
    results: Vec<ResultRecord>,
    total: usize,
    completed: usize,
    processing: bool,
    max_concurrent: usize,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT)
    }
}

impl Orchestrator {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            operation: Operation::None,
            queue: VecDeque::new(),
            in_flight: HashSet::new(),
            results: Vec::new(),
            total: 0,
            completed: 0,
            processing: false,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Queue `pending` and launch the first wave.
    ///
    /// Returns `None` without touching any state when there is nothing to do
    /// or a batch is already running.
    pub fn start(
        &mut self,
        operation: Operation,
        pending: Vec<PendingOperation>,
    ) -> Option<Vec<Effect>> {
        if self.processing {
            tracing::warn!("{operation} requested while {} is running", self.operation);
            return None;
        }

        let mut seen = HashSet::new();
        let queue: VecDeque<PendingOperation> = pending
            .into_iter()
            .filter(|p| seen.insert(p.name.clone()))
            .collect();
        if queue.is_empty() || operation == Operation::None {
            return None;
        }

        tracing::info!("starting {operation} of {} plugin(s)", queue.len());
        *self = Self {
            operation,
            total: queue.len(),
            queue,
            processing: true,
            ..Self::new(self.max_concurrent)
        };
        Some(self.dispatch_next())
    }

    /// Launch as many queued operations as free slots allow.
    pub fn dispatch_next(&mut self) -> Vec<Effect> {
        let slots = self.max_concurrent.saturating_sub(self.in_flight.len());
        if slots == 0 {
            return Vec::new();
        }

        if self.queue.is_empty() {
            if self.in_flight.is_empty() && self.processing {
                self.processing = false;
                let (ok, failed) = self.tally();
                tracing::info!("{} finished: {ok} ok, {failed} failed", self.operation);
                if self.operation.reloads_config() {
                    return vec![Effect::ReloadConfig];
                }
            }
            return Vec::new();
        }

        let take = slots.min(self.queue.len());
        let operation = self.operation;
        self.queue
            .drain(..take)
            .map(|pending| {
                tracing::debug!("dispatching {operation} of {}", pending.name);
                self.in_flight.insert(pending.name.clone());
                Effect::Execute { operation, pending }
            })
            .collect()
    }

    /// Fold one completion event into the batch and the plugin statuses,
    /// then dispatch whatever the freed slot allows.
    pub fn complete(
        &mut self,
        operation: Operation,
        result: ResultRecord,
        manager: &mut PluginManager,
    ) -> Vec<Effect> {
        if !self.processing || operation != self.operation || !self.in_flight.contains(&result.name) {
            tracing::warn!("dropping stale {operation} result for {}", result.name);
            return Vec::new();
        }

        if result.success {
            if let Some(event) = operation.success_event() {
                manager.apply(&result.name, &event);
            }
        } else {
            tracing::warn!("{operation} of {} failed: {}", result.name, result.message);
        }

        self.in_flight.remove(&result.name);
        self.completed += 1;
        self.results.push(result);

        self.dispatch_next()
    }

    /// Forget the finished batch. Ignored while processing.
    pub fn reset(&mut self) {
        if self.processing {
            return;
        }
        *self = Self::new(self.max_concurrent);
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn results(&self) -> &[ResultRecord] {
        &self.results
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, name: &str) -> bool {
        self.in_flight.contains(name)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// (succeeded, failed) among completed results.
    pub fn tally(&self) -> (usize, usize) {
        let ok = self.results.iter().filter(|r| r.success).count();
        (ok, self.results.len() - ok)
    }

    pub fn succeeded_names(&self) -> HashSet<String> {
        self.results
            .iter()
            .filter(|r| r.success)
            .map(|r| r.name.clone())
            .collect()
    }
}
