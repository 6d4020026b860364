//! Re-engagement on inbound channel messages.
//!
//! A message whose body carries the channel marker and which is attached to
//! a lead in NC or Cold pulls that lead into the Re-engaged stage. The
//! follow-up history (`email_sent`, `nc_entry_date`) is left as is.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::{DatabaseError, FollowupError};
use crate::followup::leads::LeadService;
use crate::followup::machine::LeadState;
use crate::followup::model::{InboundMessage, LeadUpdate, NoteKind};
use crate::followup::stages::{StageCache, StageRole};

const REENGAGED_NOTE: &str =
    "Lead automatically moved to 'Email Re-engaged' stage due to WhatsApp message.";

pub struct ReengagementDetector {
    leads: Arc<LeadService>,
    stages: Arc<StageCache>,
    marker: String,
}

impl ReengagementDetector {
    pub fn new(leads: Arc<LeadService>, stages: Arc<StageCache>, marker: impl Into<String>) -> Self {
        Self {
            leads,
            stages,
            marker: marker.into(),
        }
    }

    /// Inspect a freshly stored message. Returns whether the lead moved.
    pub async fn on_message_created(
        &self,
        message: &InboundMessage,
        today: NaiveDate,
    ) -> Result<bool, FollowupError> {
        let Some(body) = message.body_text() else {
            return Ok(false);
        };
        if !body.contains(self.marker.as_str()) {
            return Ok(false);
        }

        let Some(lead_id) = message.lead_id() else {
            tracing::warn!(
                message_id = %message.id,
                model = ?message.model,
                res_id = ?message.res_id,
                "Channel message is not attached to a lead"
            );
            return Ok(false);
        };

        let Some(reengaged) = self.stages.resolve(StageRole::Reengaged).await? else {
            tracing::error!(
                name = self.stages.name_for(StageRole::Reengaged),
                "Re-engaged stage not found"
            );
            return Ok(false);
        };

        let Some(lead) = self.leads.get(lead_id).await? else {
            tracing::warn!(lead_id = %lead_id, "Channel message references unknown lead");
            return Ok(false);
        };

        let state = self.stages.classify(lead.stage_id).await?;
        if !matches!(state, LeadState::NotConnected | LeadState::Cold) {
            tracing::debug!(lead_id = %lead_id, state = %state, "Lead not eligible for re-engagement");
            return Ok(false);
        }

        self.leads
            .write(
                lead_id,
                &LeadUpdate::stage(reengaged).with_moved_to_cold(false),
                today,
            )
            .await?;

        // The audit note is best-effort.
        if let Err(e) = self
            .leads
            .db()
            .append_note(lead_id, REENGAGED_NOTE, NoteKind::Notification)
            .await
        {
            tracing::warn!(lead_id = %lead_id, error = %e, "Failed to log re-engagement note");
        }

        tracing::info!(lead_id = %lead_id, from = %state, "Lead re-engaged via channel message");
        Ok(true)
    }
}

/// Ingestion-side entry point: store the message, then run the detector.
///
/// Only storage errors surface. Detector failures are logged so they can
/// never block ingestion.
pub struct MessageIngest {
    leads: Arc<LeadService>,
    detector: Arc<ReengagementDetector>,
}

impl MessageIngest {
    pub fn new(leads: Arc<LeadService>, detector: Arc<ReengagementDetector>) -> Self {
        Self { leads, detector }
    }

    pub async fn ingest(
        &self,
        message: &InboundMessage,
        today: NaiveDate,
    ) -> Result<bool, DatabaseError> {
        self.leads.db().insert_message(message).await?;

        match self.detector.on_message_created(message, today).await {
            Ok(moved) => Ok(moved),
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "Re-engagement check failed");
                Ok(false)
            }
        }
    }
}
