//! View-side helpers that stay independent of any painting toolkit

pub mod cell_renderer;
pub mod viewport_manager;
