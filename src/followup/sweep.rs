//! The periodic follow-up sweep.
//!
//! One [`FollowupSweep::run`] advances every NC lead by at most one step:
//! a scheduled email or demotion to Cold. Leads are processed sequentially.
//! A failure on one lead is logged and counted, never propagated.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{DatabaseError, FollowupError};
use crate::followup::leads::LeadService;
use crate::followup::machine::{Action, LeadState, days_elapsed, next_action};
use crate::followup::model::{Lead, LeadUpdate};
use crate::followup::stages::{StageCache, StageRole};
use crate::mail::TemplateSender;
use crate::store::LeadFilter;

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// NC leads that got their missing entry date set.
    pub backfilled: usize,
    /// Candidates evaluated by the state machine.
    pub evaluated: usize,
    pub sent: usize,
    pub demoted: usize,
    /// Leads whose action failed. Retried on the next sweep.
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Success,
    Info,
}

/// User-facing result of the manual entry-date action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillNotice {
    pub title: String,
    pub message: String,
    pub kind: NoticeKind,
    pub updated: usize,
}

impl BackfillNotice {
    fn from_count(updated: usize) -> Self {
        if updated > 0 {
            Self {
                title: "NC Stage Date Set".into(),
                message: format!("Set NC Stage Date to today for {updated} leads"),
                kind: NoticeKind::Success,
                updated,
            }
        } else {
            Self {
                title: "No Leads Updated".into(),
                message: "No leads in NC stage found without an NC Stage Date".into(),
                kind: NoticeKind::Info,
                updated,
            }
        }
    }
}

/// Outcome of applying one action to one lead.
enum Applied {
    Sent,
    Demoted,
    Skipped,
}

pub struct FollowupSweep {
    leads: Arc<LeadService>,
    stages: Arc<StageCache>,
    sender: Arc<dyn TemplateSender>,
    run_lock: Mutex<()>,
}

impl FollowupSweep {
    pub fn new(
        leads: Arc<LeadService>,
        stages: Arc<StageCache>,
        sender: Arc<dyn TemplateSender>,
    ) -> Self {
        Self {
            leads,
            stages,
            sender,
            run_lock: Mutex::new(()),
        }
    }

    /// Run one sweep for `today`.
    ///
    /// Fails without touching any lead if the NC or Cold stage is missing,
    /// or if another sweep is still running.
    pub async fn run(&self, today: NaiveDate) -> Result<SweepReport, FollowupError> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| FollowupError::SweepInProgress)?;

        let nc_stage = self.stages.require(StageRole::NotConnected).await?;
        let cold_stage = self.stages.require(StageRole::Cold).await?;

        tracing::info!(date = %today, "Follow-up sweep started");

        let mut report = SweepReport {
            backfilled: self.backfill(nc_stage, today).await?,
            ..Default::default()
        };

        let candidates = self
            .leads
            .db()
            .search_leads(
                &LeadFilter::in_stage(nc_stage)
                    .with_nc_entry_date(true)
                    .with_moved_to_cold(false),
            )
            .await?;

        for lead in candidates {
            report.evaluated += 1;
            match self.process_lead(&lead, nc_stage, cold_stage, today).await {
                Ok(Applied::Sent) => report.sent += 1,
                Ok(Applied::Demoted) => report.demoted += 1,
                Ok(Applied::Skipped) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(lead_id = %lead.id, error = %e, "Follow-up action failed");
                }
            }
        }

        tracing::info!(
            backfilled = report.backfilled,
            evaluated = report.evaluated,
            sent = report.sent,
            demoted = report.demoted,
            failed = report.failed,
            "Follow-up sweep finished"
        );
        Ok(report)
    }

    /// Manually stamp today's date on every NC lead that lacks one.
    pub async fn set_entry_date_today(
        &self,
        today: NaiveDate,
    ) -> Result<BackfillNotice, FollowupError> {
        let nc_stage = self.stages.require(StageRole::NotConnected).await?;
        let updated = self.backfill(nc_stage, today).await?;
        Ok(BackfillNotice::from_count(updated))
    }

    /// Leads the sweep demoted that are still sitting in Cold.
    pub async fn cold_leads(&self) -> Result<Vec<Lead>, FollowupError> {
        let cold_stage = self.stages.require(StageRole::Cold).await?;
        let leads = self
            .leads
            .db()
            .search_leads(&LeadFilter::in_stage(cold_stage).with_moved_to_cold(true))
            .await?;
        tracing::info!(count = leads.len(), "Cold leads found");
        Ok(leads)
    }

    async fn backfill(&self, nc_stage: Uuid, today: NaiveDate) -> Result<usize, DatabaseError> {
        let missing = self
            .leads
            .db()
            .search_leads(&LeadFilter::in_stage(nc_stage).with_nc_entry_date(false))
            .await?;

        let mut updated = 0;
        for lead in &missing {
            if self
                .leads
                .write(lead.id, &LeadUpdate::nc_entry_date(today), today)
                .await?
                .is_some()
            {
                updated += 1;
            }
        }

        if updated > 0 {
            tracing::info!(count = updated, date = %today, "Backfilled NC entry dates");
        }
        Ok(updated)
    }

    async fn process_lead(
        &self,
        candidate: &Lead,
        nc_stage: Uuid,
        cold_stage: Uuid,
        today: NaiveDate,
    ) -> Result<Applied, FollowupError> {
        // The candidate list is a snapshot; earlier sends may have moved this lead.
        let Some(lead) = self.leads.get(candidate.id).await? else {
            tracing::debug!(lead_id = %candidate.id, "Lead deleted during sweep");
            return Ok(Applied::Skipped);
        };
        if lead.stage_id != Some(nc_stage) || lead.moved_to_cold {
            tracing::debug!(lead_id = %lead.id, "Lead left NC during sweep");
            return Ok(Applied::Skipped);
        }

        let Some(entry) = lead.nc_entry_date else {
            return Ok(Applied::Skipped);
        };
        let days = days_elapsed(today, entry);

        // Candidates are selected by NC stage, so the state is known.
        match next_action(LeadState::NotConnected, &lead.flags(), days) {
            Action::SendFollowup(step) => {
                if let Err(e) = self
                    .sender
                    .send_template(step.template_id(), lead.id, true)
                    .await
                {
                    tracing::error!(
                        lead_id = %lead.id,
                        step = step.number(),
                        days_in_nc = days,
                        error = %e,
                        "Failed to send follow-up email"
                    );
                    return Err(FollowupError::Delivery(e));
                }
                self.leads
                    .write(lead.id, &LeadUpdate::mark_sent(step), today)
                    .await?;
                tracing::info!(
                    lead_id = %lead.id,
                    step = step.number(),
                    days_in_nc = days,
                    "Sent {step}"
                );
                Ok(Applied::Sent)
            }
            Action::MoveToCold => {
                self.leads
                    .write(
                        lead.id,
                        &LeadUpdate::stage(cold_stage).with_moved_to_cold(true),
                        today,
                    )
                    .await?;
                tracing::info!(lead_id = %lead.id, days_in_nc = days, "Moved lead to Cold");
                Ok(Applied::Demoted)
            }
            Action::Nothing => {
                tracing::debug!(lead_id = %lead.id, days_in_nc = days, "No follow-up action");
                Ok(Applied::Skipped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::config::StageNames;
    use crate::error::DeliveryError;
    use crate::followup::model::NewLead;
    use crate::store::{Database, LibSqlBackend};

    /// Records sends; fails for any lead listed in `failing`.
    #[derive(Default)]
    struct RecordingSender {
        sent: StdMutex<Vec<(String, Uuid, bool)>>,
        failing: StdMutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl TemplateSender for RecordingSender {
        async fn send_template(
            &self,
            template_id: &str,
            lead_id: Uuid,
            force_send: bool,
        ) -> Result<(), DeliveryError> {
            if self.failing.lock().unwrap().contains(&lead_id) {
                return Err(DeliveryError::Transport("relay down".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((template_id.to_string(), lead_id, force_send));
            Ok(())
        }
    }

    struct Fixture {
        db: Arc<dyn Database>,
        leads: Arc<LeadService>,
        sender: Arc<RecordingSender>,
        sweep: FollowupSweep,
        nc: Uuid,
        cold: Uuid,
    }

    async fn fixture() -> Fixture {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let nc = db.create_stage("Not Connected (NC)", 1).await.unwrap().id;
        let cold = db.create_stage("Cold Lead", 2).await.unwrap().id;
        let stages = Arc::new(StageCache::new(Arc::clone(&db), StageNames::default()));
        let leads = Arc::new(LeadService::new(Arc::clone(&db), Arc::clone(&stages)));
        let sender = Arc::new(RecordingSender::default());
        let sweep = FollowupSweep::new(
            Arc::clone(&leads),
            stages,
            Arc::clone(&sender) as Arc<dyn TemplateSender>,
        );
        Fixture {
            db,
            leads,
            sender,
            sweep,
            nc,
            cold,
        }
    }

    fn day(n: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 5).unwrap() + chrono::Duration::days(n)
    }

    async fn nc_lead(f: &Fixture, name: &str) -> Lead {
        f.leads
            .create(
                &NewLead {
                    name: name.into(),
                    email: Some(format!("{name}@example.com")),
                    stage_id: Some(f.nc),
                },
                day(0),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn day_zero_sends_first_email_once() {
        let f = fixture().await;
        let lead = nc_lead(&f, "ada").await;

        let report = f.sweep.run(day(0)).await.unwrap();
        assert_eq!(report.sent, 1);
        let stored = f.db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.email_sent, [true, false, false, false]);

        let again = f.sweep.run(day(0)).await.unwrap();
        assert_eq!(again.sent, 0);
        let sent = f.sender.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("followup-template-1".to_string(), lead.id, true)]);
    }

    #[tokio::test]
    async fn odd_days_do_nothing() {
        let f = fixture().await;
        let lead = nc_lead(&f, "bo").await;

        for n in [1, 3, 5] {
            let report = f.sweep.run(day(n)).await.unwrap();
            assert_eq!(report.evaluated, 1);
            assert_eq!((report.sent, report.demoted), (0, 0), "day {n}");
        }
        let stored = f.db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.email_sent, [false; 4]);
    }

    #[tokio::test]
    async fn seventh_day_demotes_and_then_excludes() {
        let f = fixture().await;
        let lead = nc_lead(&f, "cy").await;

        let report = f.sweep.run(day(7)).await.unwrap();
        assert_eq!(report.demoted, 1);
        let stored = f.db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.stage_id, Some(f.cold));
        assert!(stored.moved_to_cold);

        let later = f.sweep.run(day(8)).await.unwrap();
        assert_eq!(later.evaluated, 0);
    }

    #[tokio::test]
    async fn delivery_failure_leaves_flag_and_continues() {
        let f = fixture().await;
        let broken = nc_lead(&f, "dee").await;
        let fine = nc_lead(&f, "eli").await;
        f.sender.failing.lock().unwrap().push(broken.id);

        let report = f.sweep.run(day(0)).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 1);

        let broken = f.db.get_lead(broken.id).await.unwrap().unwrap();
        assert!(!broken.email_sent[0]);
        let fine = f.db.get_lead(fine.id).await.unwrap().unwrap();
        assert!(fine.email_sent[0]);

        // Retried while still inside the day window.
        f.sender.failing.lock().unwrap().clear();
        let retry = f.sweep.run(day(0)).await.unwrap();
        assert_eq!(retry.sent, 1);
    }

    #[tokio::test]
    async fn backfill_makes_lead_eligible_same_run() {
        let f = fixture().await;
        // Written straight to the store, bypassing the watcher.
        let lead = f
            .db
            .create_lead(&NewLead {
                name: "fay".into(),
                email: Some("fay@example.com".into()),
                stage_id: Some(f.nc),
            })
            .await
            .unwrap();
        assert!(lead.nc_entry_date.is_none());

        let report = f.sweep.run(day(3)).await.unwrap();
        assert_eq!(report.backfilled, 1);
        assert_eq!(report.sent, 1);
        let stored = f.db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.nc_entry_date, Some(day(3)));
        assert!(stored.email_sent[0]);
    }

    #[tokio::test]
    async fn missing_cold_stage_aborts_without_writes() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let nc = db.create_stage("Not Connected (NC)", 1).await.unwrap().id;
        let lead = db
            .create_lead(&NewLead {
                name: "gus".into(),
                email: None,
                stage_id: Some(nc),
            })
            .await
            .unwrap();
        let stages = Arc::new(StageCache::new(Arc::clone(&db), StageNames::default()));
        let leads = Arc::new(LeadService::new(Arc::clone(&db), Arc::clone(&stages)));
        let sweep = FollowupSweep::new(leads, stages, Arc::new(RecordingSender::default()));

        let err = sweep.run(day(0)).await.unwrap_err();
        assert!(matches!(err, FollowupError::StageNotFound { ref role, .. } if role == "cold"));
        let stored = db.get_lead(lead.id).await.unwrap().unwrap();
        assert!(stored.nc_entry_date.is_none());
    }

    #[tokio::test]
    async fn overlapping_run_is_rejected() {
        let f = fixture().await;
        let _held = f.sweep.run_lock.lock().await;
        let err = f.sweep.run(day(0)).await.unwrap_err();
        assert!(matches!(err, FollowupError::SweepInProgress));
    }

    #[tokio::test]
    async fn manual_backfill_notice() {
        let f = fixture().await;
        for name in ["hal", "ivy"] {
            f.db
                .create_lead(&NewLead {
                    name: name.into(),
                    email: None,
                    stage_id: Some(f.nc),
                })
                .await
                .unwrap();
        }

        let notice = f.sweep.set_entry_date_today(day(1)).await.unwrap();
        assert_eq!(notice.kind, NoticeKind::Success);
        assert_eq!(notice.title, "NC Stage Date Set");
        assert_eq!(notice.message, "Set NC Stage Date to today for 2 leads");

        let again = f.sweep.set_entry_date_today(day(1)).await.unwrap();
        assert_eq!(again.kind, NoticeKind::Info);
        assert_eq!(again.title, "No Leads Updated");
        assert_eq!(again.updated, 0);
    }

    /// Moves `target` into `reengaged` while sending for any other lead.
    struct InterleavingSender {
        db: Arc<dyn Database>,
        target: Uuid,
        reengaged: Uuid,
    }

    #[async_trait]
    impl TemplateSender for InterleavingSender {
        async fn send_template(
            &self,
            _template_id: &str,
            lead_id: Uuid,
            _force_send: bool,
        ) -> Result<(), DeliveryError> {
            if lead_id != self.target {
                self.db
                    .write_lead(
                        self.target,
                        &LeadUpdate::stage(self.reengaged).with_moved_to_cold(false),
                    )
                    .await?;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn lead_moved_mid_sweep_is_not_demoted() {
        let f = fixture().await;
        let reengaged = f.db.create_stage("Email Re-engaged", 3).await.unwrap().id;
        let first = f
            .leads
            .create(
                &NewLead {
                    name: "lou".into(),
                    email: Some("lou@example.com".into()),
                    stage_id: Some(f.nc),
                },
                day(7),
            )
            .await
            .unwrap();
        let second = nc_lead(&f, "max").await;

        let stages = Arc::new(StageCache::new(Arc::clone(&f.db), StageNames::default()));
        let sweep = FollowupSweep::new(
            Arc::clone(&f.leads),
            stages,
            Arc::new(InterleavingSender {
                db: Arc::clone(&f.db),
                target: second.id,
                reengaged,
            }),
        );

        let report = sweep.run(day(7)).await.unwrap();
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.sent, 1);
        assert_eq!(report.demoted, 0);

        let stored = f.db.get_lead(second.id).await.unwrap().unwrap();
        assert_eq!(stored.stage_id, Some(reengaged));
        assert!(!stored.moved_to_cold);
        let stored = f.db.get_lead(first.id).await.unwrap().unwrap();
        assert!(stored.email_sent[0]);
    }

    #[tokio::test]
    async fn cold_leads_lists_demoted_only() {
        let f = fixture().await;
        let demoted = nc_lead(&f, "jo").await;
        f.sweep.run(day(7)).await.unwrap();
        // In Cold by hand, never demoted by the sweep.
        f.leads
            .create(
                &NewLead {
                    name: "kit".into(),
                    email: None,
                    stage_id: Some(f.cold),
                },
                day(7),
            )
            .await
            .unwrap();

        let cold = f.sweep.cold_leads().await.unwrap();
        assert_eq!(cold.len(), 1);
        assert_eq!(cold[0].id, demoted.id);
    }
}
