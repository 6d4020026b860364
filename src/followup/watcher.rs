//! Stage watcher: stamps `nc_entry_date` the first time a lead lands in NC.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::DatabaseError;
use crate::followup::model::{Lead, LeadField, LeadUpdate};
use crate::followup::stages::{StageCache, StageRole};
use crate::store::Database;

pub struct StageWatcher {
    db: Arc<dyn Database>,
    stages: Arc<StageCache>,
}

impl StageWatcher {
    pub fn new(db: Arc<dyn Database>, stages: Arc<StageCache>) -> Self {
        Self { db, stages }
    }

    /// Called after a lead has been persisted for the first time.
    pub async fn on_lead_created(&self, lead: &Lead, today: NaiveDate) -> Result<bool, DatabaseError> {
        self.check_and_stamp_nc_entry(lead, today).await
    }

    /// Called after a write. Only a stage change can start an NC episode.
    pub async fn on_lead_updated(
        &self,
        lead: &Lead,
        changed: &[LeadField],
        today: NaiveDate,
    ) -> Result<bool, DatabaseError> {
        if !changed.contains(&LeadField::Stage) {
            return Ok(false);
        }
        self.check_and_stamp_nc_entry(lead, today).await
    }

    /// Set `nc_entry_date = today` if the lead is in NC and has no date yet.
    ///
    /// Returns whether a write happened. An unresolvable NC stage is logged
    /// and treated as a no-op.
    pub async fn check_and_stamp_nc_entry(
        &self,
        lead: &Lead,
        today: NaiveDate,
    ) -> Result<bool, DatabaseError> {
        let Some(nc_stage) = self.stages.resolve(StageRole::NotConnected).await? else {
            tracing::error!(
                lead_id = %lead.id,
                name = self.stages.name_for(StageRole::NotConnected),
                "NC stage not found, cannot stamp entry date"
            );
            return Ok(false);
        };

        if lead.stage_id != Some(nc_stage) || lead.nc_entry_date.is_some() {
            return Ok(false);
        }

        self.db
            .write_lead(lead.id, &LeadUpdate::nc_entry_date(today))
            .await?;
        tracing::info!(lead_id = %lead.id, date = %today, "Lead entered NC stage");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageNames;
    use crate::followup::model::NewLead;
    use crate::store::LibSqlBackend;
    use uuid::Uuid;

    struct Fixture {
        db: Arc<dyn Database>,
        watcher: StageWatcher,
        nc: Uuid,
        other: Uuid,
    }

    async fn fixture(with_nc: bool) -> Fixture {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let nc = if with_nc {
            db.create_stage("Not Connected (NC)", 1).await.unwrap().id
        } else {
            Uuid::nil()
        };
        let other = db.create_stage("Qualified", 2).await.unwrap().id;
        let stages = Arc::new(StageCache::new(Arc::clone(&db), StageNames::default()));
        let watcher = StageWatcher::new(Arc::clone(&db), stages);
        Fixture { db, watcher, nc, other }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, 4).unwrap()
    }

    async fn lead_in(f: &Fixture, stage: Uuid) -> Lead {
        f.db
            .create_lead(&NewLead {
                name: "Lead".into(),
                email: None,
                stage_id: Some(stage),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn stamps_lead_created_in_nc() {
        let f = fixture(true).await;
        let lead = lead_in(&f, f.nc).await;

        assert!(f.watcher.on_lead_created(&lead, today()).await.unwrap());
        let stored = f.db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.nc_entry_date, Some(today()));
    }

    #[tokio::test]
    async fn ignores_other_stages() {
        let f = fixture(true).await;
        let lead = lead_in(&f, f.other).await;

        assert!(!f.watcher.on_lead_created(&lead, today()).await.unwrap());
        let stored = f.db.get_lead(lead.id).await.unwrap().unwrap();
        assert!(stored.nc_entry_date.is_none());
    }

    #[tokio::test]
    async fn never_overwrites_existing_date() {
        let f = fixture(true).await;
        let lead = lead_in(&f, f.nc).await;
        let earlier = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        f.db
            .write_lead(lead.id, &LeadUpdate::nc_entry_date(earlier))
            .await
            .unwrap();
        let lead = f.db.get_lead(lead.id).await.unwrap().unwrap();

        assert!(!f.watcher.check_and_stamp_nc_entry(&lead, today()).await.unwrap());
        let stored = f.db.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.nc_entry_date, Some(earlier));
    }

    #[tokio::test]
    async fn update_without_stage_change_is_ignored() {
        let f = fixture(true).await;
        let lead = lead_in(&f, f.nc).await;

        let stamped = f
            .watcher
            .on_lead_updated(&lead, &[LeadField::Name], today())
            .await
            .unwrap();
        assert!(!stamped);

        let stamped = f
            .watcher
            .on_lead_updated(&lead, &[LeadField::Stage], today())
            .await
            .unwrap();
        assert!(stamped);
    }

    #[tokio::test]
    async fn missing_nc_stage_is_noop() {
        let f = fixture(false).await;
        let lead = lead_in(&f, f.other).await;
        assert!(!f.watcher.on_lead_created(&lead, today()).await.unwrap());
    }
}
