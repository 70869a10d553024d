//! Interaction state that sits on top of the data layer
//!
//! Selection and marking, inline edit transactions, and the undo/redo
//! history with its "undo last delete" notice.

pub mod edit_manager;
pub mod history_manager;
pub mod selection_manager;
pub mod undo_notice;
