use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::{ProbeFailure, ProbeOutcome};

const PING_FAILED: &str = "Ping failed";

/// Arguments for a single echo request with the platform's `ping`.
fn ping_args(target: &str, timeout: Duration) -> Vec<String> {
    let secs = timeout.as_secs().max(1);
    if cfg!(target_os = "windows") {
        vec![
            "-n".into(),
            "1".into(),
            "-w".into(),
            secs.saturating_mul(1000).to_string(),
            target.into(),
        ]
    } else if cfg!(target_os = "macos") {
        vec!["-c".into(), "1".into(), "-t".into(), secs.to_string(), target.into()]
    } else {
        vec!["-c".into(), "1".into(), "-W".into(), secs.to_string(), target.into()]
    }
}

/// The ping binary enforces its own deadline; this only guards against a hung process.
fn guard_timeout(timeout: Duration) -> Duration {
    timeout.saturating_add(Duration::from_secs(1))
}

pub async fn check(target: &str, timeout: Duration) -> ProbeOutcome {
    let target = target.trim();
    if target.is_empty() || target.starts_with('-') {
        return Err(ProbeFailure::new(None, format!("Invalid ping target '{target}'")));
    }

    let mut command = Command::new("ping");
    command
        .args(ping_args(target, timeout))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(guard_timeout(timeout), command.status()).await {
        Ok(Ok(status)) if status.success() => Ok(None),
        Ok(Ok(status)) => {
            debug!(target = %target, code = ?status.code(), "Ping exited unsuccessfully.");
            Err(ProbeFailure::new(None, PING_FAILED))
        }
        Ok(Err(e)) => {
            debug!(target = %target, error = %e, "Failed to spawn ping.");
            Err(ProbeFailure::new(None, PING_FAILED))
        }
        Err(_) => Err(ProbeFailure::new(None, PING_FAILED)),
    }
}
