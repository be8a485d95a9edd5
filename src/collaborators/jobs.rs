use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use super::{JobRegistry, ScheduledJob};
use crate::error::EngineError;

/// Runs registered jobs on a fixed tokio interval.
///
/// Only hourly and daily cron expressions are understood; anything else is
/// rejected at registration.
#[derive(Default)]
pub struct IntervalJobRegistry {
    jobs: DashMap<String, JoinHandle<()>>,
}

impl IntervalJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

pub fn period_for_cron(expression: &str) -> Option<Duration> {
    match expression.split_whitespace().collect::<Vec<_>>().as_slice() {
        ["@hourly"] | ["0", "*", "*", "*", "*"] => Some(Duration::from_secs(60 * 60)),
        ["@daily"] | ["@midnight"] | ["0", "0", "*", "*", "*"] => {
            Some(Duration::from_secs(24 * 60 * 60))
        }
        _ => None,
    }
}

#[async_trait]
impl JobRegistry for IntervalJobRegistry {
    async fn register_job(&self, job: ScheduledJob) -> Result<(), EngineError> {
        let period = period_for_cron(&job.cron_expression).ok_or_else(|| {
            EngineError::JobRegistry(format!(
                "unsupported cron expression '{}' for job {}",
                job.cron_expression, job.id
            ))
        })?;

        let job_id = job.id.clone();
        let task_job_id = job.id.clone();
        let execute = job.execute.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                debug!(job_id = %task_job_id, "Running scheduled job.");
                (execute)().await;
            }
        });

        if let Some(previous) = self.jobs.insert(job_id.clone(), handle) {
            previous.abort();
        }
        info!(job_id = %job_id, cron = %job.cron_expression, "Registered job.");
        Ok(())
    }

    async fn unregister_job(&self, job_id: &str) -> Result<(), EngineError> {
        if let Some((_, handle)) = self.jobs.remove(job_id) {
            handle.abort();
            info!(job_id = %job_id, "Unregistered job.");
        }
        Ok(())
    }
}
