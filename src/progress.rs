//! Textual progress bars for status messages.
//!
//! A bar looks like `[▬▬▬▬🔘▬▬▬▬▬▬▬▬▬▬▬▬▬▬▬▬] 01:05 / 05:12`: `width` track
//! cells with one marker cell inserted after the filled part, followed by
//! the elapsed and total time.

use std::time::Duration;

/// Number of track cells in a bar unless configured otherwise.
pub const DEFAULT_WIDTH: usize = 20;

/// Positions this close to the end are drawn as finished. Polling once per
/// second otherwise leaves bars that never quite reach the end.
pub const SNAP_TO_END: Duration = Duration::from_secs(3);

const CELL: char = '▬';
const MARKER: char = '🔘';

/// Renders a progress bar for `current` out of `total`.
///
/// Returns an empty string when the total is unknown or zero.
#[must_use]
pub fn format_bar(current: Duration, total: Option<Duration>, width: usize) -> String {
    let Some(total) = total.filter(|total| !total.is_zero()) else {
        return String::new();
    };

    let current = if current + SNAP_TO_END >= total {
        total
    } else {
        current
    };

    let progress = (current.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0);

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let filled = ((width as f64 * progress).floor() as usize).min(width);

    let mut bar = String::with_capacity((width + 1) * CELL.len_utf8() + 2);
    bar.extend(std::iter::repeat_n(CELL, filled));
    bar.push(MARKER);
    bar.extend(std::iter::repeat_n(CELL, width - filled));

    format!(
        "[{bar}] {} / {}",
        format_time(current.min(total)),
        format_time(total)
    )
}

/// Formats a position as `HH:MM:SS`, or `MM:SS` below one hour.
#[must_use]
pub fn format_time(position: Duration) -> String {
    let secs = position.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}
