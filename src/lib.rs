pub mod config;
pub mod core;
pub mod data;
pub mod debouncer;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod state;
pub mod ui;
pub mod utils;

pub use crate::engine::{ComputedView, ExportScope, GridEngine, GridEngineBuilder, ViewRow};
pub use crate::state::events::{Command, DispatchOutcome, SelectCommand, StateEvent};
