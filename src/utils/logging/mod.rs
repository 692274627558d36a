//! Logging utilities for output and progress tracking
//!
//! This module provides utilities for logging and progress tracking.

pub mod log;
pub mod progress;

// Re-export commonly used functions for convenience
pub use self::log::{log_stage_complete, log_stage_start, log_stage_warning};
pub use self::progress::{
    add_block_progress_bar, create_block_progress_bar, create_multi_progress, finish_and_clear,
    finish_progress_bar,
};
