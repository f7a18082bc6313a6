use crate::buffer::{ClickBuffer, DrainReport};
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use typed_builder::TypedBuilder;
use tunnel_core::{AggregateRepository, ClickCounter};

#[derive(Debug, Clone, TypedBuilder)]
pub struct SchedulerSettings {
    /// Delay between passes while drains succeed.
    #[builder(default = Duration::from_secs(60))]
    pub interval: Duration,
    /// Upper bound for the delay after consecutive failing passes.
    #[builder(default = Duration::from_secs(480))]
    pub max_backoff: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Runs [`ClickBuffer::drain`] periodically.
///
/// After a pass that leaves work behind (failed writes or counter errors)
/// the delay doubles, up to `max_backoff`; a clean pass resets it.
pub struct DrainScheduler<C, A> {
    buffer: Arc<ClickBuffer<C, A>>,
    settings: SchedulerSettings,
}

impl<C: ClickCounter, A: AggregateRepository> DrainScheduler<C, A> {
    pub fn new(buffer: Arc<ClickBuffer<C, A>>, settings: SchedulerSettings) -> Self {
        Self { buffer, settings }
    }

    /// Delay before the next pass after `failures` consecutive failing ones.
    pub fn next_delay(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.settings
            .interval
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.settings.max_backoff.max(self.settings.interval))
    }

    /// Runs one drain pass and logs its outcome.
    pub async fn run_once(&self) -> Result<DrainReport> {
        let report = self.buffer.drain().await?;
        if report.is_clean() {
            info!(
                persisted = report.total_persisted(),
                mappings = report.persisted.len(),
                retired = report.retired,
                "Drained click buffer"
            );
        } else {
            warn!(
                persisted = report.total_persisted(),
                failed = report.total_failed(),
                counter_errors = report.counter_errors,
                "Drained click buffer with failures, remaining clicks stay pending"
            );
        }
        Ok(report)
    }

    /// Drains on every tick until `shutdown` resolves, then drains once more
    /// and returns the result of that final pass.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<DrainReport>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut failures: u32 = 0;

        loop {
            let delay = self.next_delay(failures);
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, running final drain");
                    return self.run_once().await;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let clean = match self.run_once().await {
                Ok(report) => report.is_clean(),
                Err(e) => {
                    warn!(error = %e, "Drain pass failed");
                    false
                }
            };

            if clean {
                failures = 0;
            } else {
                failures = failures.saturating_add(1);
                warn!(
                    failures,
                    next_delay_secs = self.next_delay(failures).as_secs(),
                    "Backing off before next drain"
                );
            }
        }
    }
}
