pub mod installer;
pub mod manager;
pub mod operation;
pub mod orchestrator;
pub mod probe;
pub mod spec;
pub mod status;

pub use manager::PluginManager;
