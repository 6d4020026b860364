//! Cron-driven sweep ticker.

use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::followup::sweep::FollowupSweep;

/// Next local fire time for a schedule, if it has one.
pub fn next_sweep_fire(schedule: &cron::Schedule) -> Option<DateTime<Local>> {
    schedule.upcoming(Local).next()
}

/// First fire strictly after `after`.
pub fn fire_after(schedule: &cron::Schedule, after: &DateTime<Local>) -> Option<DateTime<Local>> {
    schedule.after(after).next()
}

/// Spawn the background task that runs the sweep on `schedule`.
///
/// Each run uses the local calendar date at fire time. Errors are logged,
/// and the ticker keeps going.
pub fn spawn_sweep_ticker(
    sweep: Arc<FollowupSweep>,
    schedule: cron::Schedule,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut upcoming = next_sweep_fire(&schedule);
        loop {
            let Some(next) = upcoming else {
                tracing::warn!("Sweep schedule has no upcoming fire time, ticker stopping");
                return;
            };
            tracing::debug!(next = %next, "Next follow-up sweep scheduled");

            let wait = (next - Local::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            let today = Local::now().date_naive();
            match sweep.run(today).await {
                Ok(report) => tracing::debug!(?report, "Scheduled sweep complete"),
                Err(e) => tracing::error!(error = %e, "Scheduled sweep failed"),
            }

            // Advance from the slot just handled so an early wake-up cannot refire it.
            upcoming = fire_after(&schedule, &next);
        }
    })
}
