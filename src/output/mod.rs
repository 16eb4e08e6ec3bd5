//! Output module for reporting harvest results
//!
//! This module handles printing statistics gathered from the database.

pub mod stats;

pub use stats::{load_statistics, print_statistics, SyncStatistics};
