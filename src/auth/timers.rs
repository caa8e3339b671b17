// Background periodic cycles

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Spawn a loop running one cycle per `period`.
///
/// Each cycle is awaited before the next tick, so cycles never overlap;
/// ticks missed while a cycle runs are skipped. `cycle` returns `None` once
/// its owner is gone, which ends the loop.
pub(crate) fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    run_immediately: bool,
    mut cycle: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Option<Fut> + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let start = if run_immediately {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::debug!(timer = name, period_secs = period.as_secs(), "Timer started");

        loop {
            ticker.tick().await;
            let Some(run) = cycle() else {
                tracing::debug!(timer = name, "Timer owner dropped, stopping");
                break;
            };
            run.await;
        }
    })
}
