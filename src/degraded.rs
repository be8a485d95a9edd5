use crate::models::{CheckResult, CheckStatus};

/// How many recent checks are considered when looking for a latency trend.
pub const DEGRADED_SAMPLE_WINDOW: usize = 5;
/// Fewer samples than this is not enough history to call a trend.
pub const DEGRADED_MIN_SAMPLES: usize = 3;
pub const DEGRADED_SLOW_RATIO: f64 = 0.6;

/// Classifies a slow but otherwise successful check.
///
/// `recent` is the monitor's own history, newest first. Only the newest
/// `DEGRADED_SAMPLE_WINDOW` entries are looked at, and entries without a
/// response time among them are not samples.
pub fn classify_slow_response(recent: &[CheckResult], threshold_ms: u64) -> CheckStatus {
    let samples: Vec<u64> = recent
        .iter()
        .take(DEGRADED_SAMPLE_WINDOW)
        .filter_map(|r| r.response_time_ms)
        .collect();

    if samples.len() < DEGRADED_MIN_SAMPLES {
        return CheckStatus::Up;
    }

    let slow = samples.iter().filter(|&&ms| ms > threshold_ms).count();
    let ratio = slow as f64 / samples.len() as f64;
    if ratio >= DEGRADED_SLOW_RATIO {
        CheckStatus::Degraded
    } else {
        CheckStatus::Up
    }
}
