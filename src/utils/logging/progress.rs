//! Progress reporting utilities for long-running solves
//!
//! This module provides standardized progress reporting functionality
//! for multi-block solves, using the indicatif crate. Bars are hidden
//! unless progress display is requested.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Default style for a main progress bar
pub const DEFAULT_MAIN_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({per_sec}) {msg}";

/// Default style for a block progress bar
pub const DEFAULT_BLOCK_TEMPLATE: &str =
    "{spinner} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}";

fn styled_bar(length: u64, template: &str, description: Option<&str>, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(length);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    if let Some(desc) = description {
        pb.set_message(desc.to_string());
    }

    pb
}

/// Create a progress bar over blocks
///
/// # Arguments
/// * `length` - Number of blocks
/// * `description` - Optional description to display as the initial message
/// * `visible` - Whether to draw the bar at all
#[must_use]
pub fn create_block_progress_bar(length: u64, description: Option<&str>, visible: bool) -> ProgressBar {
    styled_bar(length, DEFAULT_MAIN_TEMPLATE, description, visible)
}

/// Create a multi-progress setup with a main progress bar
///
/// # Returns
/// A tuple containing the `MultiProgress` instance and the main `ProgressBar`
#[must_use]
pub fn create_multi_progress(
    total: u64,
    description: Option<&str>,
    visible: bool,
) -> (MultiProgress, ProgressBar) {
    // Bars added to a multi-progress take over its draw target
    let mp = if visible {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    };
    let main_pb = mp.add(styled_bar(total, DEFAULT_MAIN_TEMPLATE, description, visible));

    (mp, main_pb)
}

/// Add a per-block progress bar to a `MultiProgress` instance
#[must_use]
pub fn add_block_progress_bar(
    mp: &MultiProgress,
    length: u64,
    block: Option<&str>,
    visible: bool,
) -> ProgressBar {
    let description = block.map(|key| format!("Block {key}"));
    mp.add(styled_bar(length, DEFAULT_BLOCK_TEMPLATE, description.as_deref(), visible))
}

/// Finish a progress bar with a completion message
pub fn finish_progress_bar(pb: &ProgressBar, message: Option<&str>) {
    if let Some(msg) = message {
        pb.finish_with_message(msg.to_string());
    } else {
        pb.finish();
    }
}

/// Finish a progress bar and clear it from display
pub fn finish_and_clear(pb: &ProgressBar) {
    pb.finish_and_clear();
}
