//! Utility functions and helpers
//!
//! Time sources, cancellable timers, logging setup and platform paths.

pub mod app_paths;
pub mod clock;
pub mod logging;
pub mod timer;
