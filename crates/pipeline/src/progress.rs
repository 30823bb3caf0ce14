//! Timemark parsing and progress events for the final encode pass.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Progress of the pass that writes the final output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Fraction complete in `[0, 1]`
    pub progress: f64,
    pub current_time_seconds: f64,
    pub total_duration_seconds: f64,
}

/// Parse an `HH:MM:SS[.frac]` timemark into seconds.
///
/// Returns `None` for `N/A`, negative marks and anything malformed.
pub fn parse_timemark(mark: &str) -> Option<f64> {
    let mut parts = mark.trim().split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds_str = parts.next()?;
    if parts.next().is_some() || seconds_str.starts_with(['-', '+']) {
        return None;
    }
    let seconds: f64 = seconds_str.parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

/// Extract the value of a `time=` token from an engine status line
pub fn extract_timemark(line: &str) -> Option<&str> {
    let idx = line.find("time=")?;
    let rest = line[idx + "time=".len()..].trim_start();
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let mark = &rest[..end];
    (!mark.is_empty()).then_some(mark)
}

/// Turns successive timemarks into clamped, non-decreasing progress events
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_duration: f64,
    last_progress: f64,
}

impl ProgressTracker {
    pub fn new(total_duration: f64) -> Self {
        Self {
            total_duration,
            last_progress: 0.0,
        }
    }

    /// Fold in one timemark; unparseable marks produce no event
    pub fn update(&mut self, mark: &str) -> Option<ProgressEvent> {
        let current = parse_timemark(mark)?;
        let fraction = if self.total_duration > 0.0 {
            (current / self.total_duration).clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.last_progress = self.last_progress.max(fraction);
        Some(ProgressEvent {
            progress: self.last_progress,
            current_time_seconds: current,
            total_duration_seconds: self.total_duration,
        })
    }

    /// The terminal event sent once the pass succeeds
    pub fn finish(&mut self) -> ProgressEvent {
        self.last_progress = 1.0;
        ProgressEvent {
            progress: 1.0,
            current_time_seconds: self.total_duration,
            total_duration_seconds: self.total_duration,
        }
    }
}

/// Forward raw timemarks from the engine as progress events until the
/// engine side of the channel closes.
///
/// Events are dropped while `events` is full, so a slow or idle receiver
/// never stalls the engine.
pub async fn forward_progress(
    mut timemarks: mpsc::Receiver<String>,
    mut tracker: ProgressTracker,
    events: mpsc::Sender<ProgressEvent>,
) -> ProgressTracker {
    while let Some(mark) = timemarks.recv().await {
        if let Some(event) = tracker.update(&mark) {
            let _ = events.try_send(event);
        }
    }
    tracker
}
