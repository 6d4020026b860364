//! Lead writes with the stage watcher hooked in.
//!
//! Every component that creates or modifies a lead goes through
//! [`LeadService`], so the NC entry date is stamped no matter who moved the
//! lead.

use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::followup::model::{Lead, LeadUpdate, NewLead};
use crate::followup::stages::StageCache;
use crate::followup::watcher::StageWatcher;
use crate::store::Database;

pub struct LeadService {
    db: Arc<dyn Database>,
    watcher: StageWatcher,
}

impl LeadService {
    pub fn new(db: Arc<dyn Database>, stages: Arc<StageCache>) -> Self {
        let watcher = StageWatcher::new(Arc::clone(&db), stages);
        Self { db, watcher }
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Persist a new lead, then run the creation hook.
    pub async fn create(&self, new: &NewLead, today: NaiveDate) -> Result<Lead, DatabaseError> {
        let lead = self.db.create_lead(new).await?;
        tracing::info!(lead_id = %lead.id, name = %lead.name, "Lead created");

        if self.watcher.on_lead_created(&lead, today).await? {
            return self.reload(lead.id).await;
        }
        Ok(lead)
    }

    /// Apply a partial write, then run the update hook.
    ///
    /// Returns `None` if the lead does not exist.
    pub async fn write(
        &self,
        id: Uuid,
        update: &LeadUpdate,
        today: NaiveDate,
    ) -> Result<Option<Lead>, DatabaseError> {
        if !self.db.write_lead(id, update).await? {
            return Ok(None);
        }

        let lead = self.reload(id).await?;
        if self
            .watcher
            .on_lead_updated(&lead, &update.changed_fields(), today)
            .await?
        {
            return self.reload(id).await.map(Some);
        }
        Ok(Some(lead))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
        self.db.get_lead(id).await
    }

    async fn reload(&self, id: Uuid) -> Result<Lead, DatabaseError> {
        self.db
            .get_lead(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "lead".into(),
                id: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageNames;
    use crate::store::LibSqlBackend;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 10).unwrap()
    }

    async fn service() -> (LeadService, Uuid, Uuid) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let nc = db.create_stage("Not Connected (NC)", 1).await.unwrap().id;
        let new = db.create_stage("New", 0).await.unwrap().id;
        let stages = Arc::new(StageCache::new(Arc::clone(&db), StageNames::default()));
        (LeadService::new(db, stages), nc, new)
    }

    #[tokio::test]
    async fn create_in_nc_returns_stamped_lead() {
        let (svc, nc, _) = service().await;
        let lead = svc
            .create(
                &NewLead {
                    name: "Ana".into(),
                    email: Some("ana@example.com".into()),
                    stage_id: Some(nc),
                },
                today(),
            )
            .await
            .unwrap();
        assert_eq!(lead.nc_entry_date, Some(today()));
    }

    #[tokio::test]
    async fn moving_into_nc_stamps_date() {
        let (svc, nc, new) = service().await;
        let lead = svc
            .create(
                &NewLead {
                    name: "Ben".into(),
                    email: None,
                    stage_id: Some(new),
                },
                today(),
            )
            .await
            .unwrap();
        assert!(lead.nc_entry_date.is_none());

        let moved = svc
            .write(lead.id, &LeadUpdate::stage(nc), today())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.stage_id, Some(nc));
        assert_eq!(moved.nc_entry_date, Some(today()));
    }

    #[tokio::test]
    async fn reentering_nc_keeps_original_date() {
        let (svc, nc, new) = service().await;
        let first = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let lead = svc
            .create(
                &NewLead {
                    name: "Cleo".into(),
                    email: None,
                    stage_id: Some(nc),
                },
                first,
            )
            .await
            .unwrap();

        svc.write(lead.id, &LeadUpdate::stage(new), today()).await.unwrap();
        let back = svc
            .write(lead.id, &LeadUpdate::stage(nc), today())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back.nc_entry_date, Some(first));
    }

    #[tokio::test]
    async fn write_to_missing_lead_is_none() {
        let (svc, nc, _) = service().await;
        let result = svc
            .write(Uuid::new_v4(), &LeadUpdate::stage(nc), today())
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
