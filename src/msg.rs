use crossterm::event::KeyEvent;

use crate::plugin::operation::{Operation, ResultRecord};
use crate::plugin::status::CheckOutcome;
use crate::registry::CatalogItem;

/// External collaborator calls whose outcome is only reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    ReloadConfig,
    DeclarePlugin,
}

/// All possible messages that drive state transitions.
#[derive(Debug)]
pub enum Msg {
    // -- Input events (raw)
    Key(KeyEvent),
    Resize(u16, u16),

    // -- Background completions
    StatusResolved {
        name: String,
        outcome: CheckOutcome,
    },
    OperationFinished {
        operation: Operation,
        result: ResultRecord,
    },
    CatalogLoaded(Result<Vec<CatalogItem>, String>),
    HookFinished {
        hook: Hook,
        result: Result<(), String>,
    },

    // -- System
    Tick,
}
