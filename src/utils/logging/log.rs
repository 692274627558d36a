//! Stage logging
//!
//! Loading and writing stages report through these helpers so that every
//! run log reads `<stage> <subject>` on entry and a unit count on exit.

use std::time::Duration;

/// Announce that a stage begins working on `subject`
pub fn log_stage_start(stage: &str, subject: &str) {
    log::info!("{stage} {subject}");
}

/// Report the units a stage handled, with its duration when timed
pub fn log_stage_complete(stage: &str, subject: &str, units: usize, elapsed: Option<Duration>) {
    match elapsed {
        Some(duration) => log::info!("{stage} {units} units from {subject} in {duration:.2?}"),
        None => log::info!("{stage} {units} units from {subject}"),
    }
}

/// Warn about a stage outcome that is valid but probably unintended
pub fn log_stage_warning(message: &str, subject: Option<&str>) {
    match subject {
        Some(subject) => log::warn!("{message}: {subject}"),
        None => log::warn!("{message}"),
    }
}
