//! Utility functions for identifiers, timestamps and stack capture.

use chrono::Utc;
use std::backtrace::{Backtrace, BacktraceStatus};
use uuid::Uuid;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// # Examples
///
/// ```
/// use stagepool::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// assert!(ts.ends_with("+00:00"));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Generates a new random UUID (v4).
#[must_use]
pub fn generate_uuid() -> Uuid {
    Uuid::new_v4()
}

/// Captures the current call stack without resolving symbols.
///
/// Capture is forced regardless of `RUST_BACKTRACE`. Symbol resolution is
/// deferred until the backtrace is rendered, see [`render_frames`].
#[must_use]
pub fn capture_backtrace() -> Backtrace {
    Backtrace::force_capture()
}

/// Renders a backtrace as one string per line, resolving symbols.
///
/// Empty when nothing was captured, e.g. on platforms without unwinding support.
#[must_use]
pub fn render_frames(backtrace: &Backtrace) -> Vec<String> {
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    backtrace
        .to_string()
        .lines()
        .map(|line| line.trim_end().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uuid_is_v4() {
        let id = generate_uuid();
        assert_eq!(id.get_version_num(), 4);
        assert_ne!(id, generate_uuid());
    }

    #[test]
    fn test_iso_timestamp_parses() {
        let ts = iso_timestamp();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn test_render_frames_has_no_blank_lines() {
        let frames = render_frames(&capture_backtrace());
        assert!(frames.iter().all(|f| !f.trim().is_empty()));
    }

    #[test]
    fn test_disabled_backtrace_renders_nothing() {
        assert!(render_frames(&Backtrace::disabled()).is_empty());
    }
}
