use std::time::Duration;
use tokio::net::TcpStream;

use super::{ProbeFailure, ProbeOutcome};

pub async fn check(host: &str, port: u16, timeout: Duration) -> ProbeOutcome {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => Ok(None),
        Ok(Err(e)) => Err(ProbeFailure::new(None, format!("Error: {e}"))),
        Err(_) => Err(ProbeFailure::new(
            None,
            format!("Connection timed out after {}s", timeout.as_secs()),
        )),
    }
}
