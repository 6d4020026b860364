//! Stage resolution.
//!
//! Stages are looked up by display name once and cached by role. A miss is
//! re-resolved on the next call, so a stage created after startup is picked
//! up without a restart. `invalidate()` forces a full re-resolve, e.g. after
//! a rename.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::StageNames;
use crate::error::{DatabaseError, FollowupError};
use crate::followup::machine::LeadState;
use crate::followup::model::Stage;
use crate::store::Database;

/// The stages the follow-up flow depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    NotConnected,
    Cold,
    Reengaged,
}

impl StageRole {
    pub const ALL: [StageRole; 3] = [StageRole::NotConnected, StageRole::Cold, StageRole::Reengaged];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageRole::NotConnected => "not_connected",
            StageRole::Cold => "cold",
            StageRole::Reengaged => "reengaged",
        }
    }

    fn state(self) -> LeadState {
        match self {
            StageRole::NotConnected => LeadState::NotConnected,
            StageRole::Cold => LeadState::Cold,
            StageRole::Reengaged => LeadState::Reengaged,
        }
    }
}

impl std::fmt::Display for StageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role → stage id cache backed by the record store.
pub struct StageCache {
    db: Arc<dyn Database>,
    names: StageNames,
    resolved: RwLock<HashMap<StageRole, Uuid>>,
}

impl StageCache {
    pub fn new(db: Arc<dyn Database>, names: StageNames) -> Self {
        Self {
            db,
            names,
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Configured display name for a role.
    pub fn name_for(&self, role: StageRole) -> &str {
        match role {
            StageRole::NotConnected => &self.names.not_connected,
            StageRole::Cold => &self.names.cold,
            StageRole::Reengaged => &self.names.reengaged,
        }
    }

    /// Stage id for a role, or `None` if no stage carries the configured name.
    pub async fn resolve(&self, role: StageRole) -> Result<Option<Uuid>, DatabaseError> {
        if let Some(id) = self.resolved.read().await.get(&role) {
            return Ok(Some(*id));
        }

        let name = self.name_for(role);
        let Some(stage) = self.db.find_stage_by_name(name).await? else {
            return Ok(None);
        };

        self.resolved.write().await.insert(role, stage.id);
        tracing::debug!(role = %role, stage_id = %stage.id, name, "Stage resolved");
        Ok(Some(stage.id))
    }

    /// Like [`resolve`](Self::resolve), but a missing stage is an error.
    pub async fn require(&self, role: StageRole) -> Result<Uuid, FollowupError> {
        self.resolve(role)
            .await?
            .ok_or_else(|| FollowupError::StageNotFound {
                role: role.to_string(),
                name: self.name_for(role).to_string(),
            })
    }

    /// Map a lead's stage reference onto the follow-up state set.
    ///
    /// Roles whose stage does not resolve simply never match.
    pub async fn classify(&self, stage_id: Option<Uuid>) -> Result<LeadState, DatabaseError> {
        let Some(stage_id) = stage_id else {
            return Ok(LeadState::Untracked);
        };
        for role in StageRole::ALL {
            if self.resolve(role).await? == Some(stage_id) {
                return Ok(role.state());
            }
        }
        Ok(LeadState::Untracked)
    }

    /// Resolve every role up front. Returns the roles that are missing.
    pub async fn warm(&self) -> Result<Vec<StageRole>, DatabaseError> {
        let mut missing = Vec::new();
        for role in StageRole::ALL {
            if self.resolve(role).await?.is_none() {
                tracing::error!(
                    role = %role,
                    name = self.name_for(role),
                    "Follow-up stage not found"
                );
                missing.push(role);
            }
        }
        Ok(missing)
    }

    /// Create any stage whose configured name does not exist yet.
    pub async fn seed_missing(&self) -> Result<Vec<Stage>, DatabaseError> {
        let mut created = Vec::new();
        let base = self
            .db
            .list_stages()
            .await?
            .iter()
            .map(|s| s.sequence)
            .max()
            .unwrap_or(0);

        for (offset, role) in StageRole::ALL.into_iter().enumerate() {
            if self.resolve(role).await?.is_some() {
                continue;
            }
            let stage = self
                .db
                .create_stage(self.name_for(role), base + 1 + offset as i64)
                .await?;
            tracing::info!(role = %role, name = %stage.name, "Seeded follow-up stage");
            created.push(stage);
        }
        Ok(created)
    }

    /// Drop all cached ids.
    pub async fn invalidate(&self) {
        self.resolved.write().await.clear();
        tracing::info!("Stage cache invalidated");
    }
}
