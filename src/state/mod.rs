//! State module for tracking sync progress
//!
//! # Components
//!
//! - `CycleState`: the Idle/Running/terminal state machine of one sync driver
//! - `Watermark`: per-account cursor used to stop incremental extraction

mod cycle_state;
mod watermark;

// Re-export main types
pub use cycle_state::CycleState;
pub use watermark::Watermark;
