//! Unified `Database` trait: single async interface for all persistence.
//!
//! The follow-up components only ever talk to the record store through
//! this trait, so tests can run against the in-memory libSQL backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::followup::model::{InboundMessage, Lead, LeadNote, LeadUpdate, NewLead, NoteKind, Stage};

/// Predicate on a lead's stage reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFilter {
    Is(Uuid),
    IsNot(Uuid),
}

/// Conjunction of predicates for [`Database::search_leads`]. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeadFilter {
    pub stage: Option<StageFilter>,
    /// `Some(true)`: entry date present. `Some(false)`: absent.
    pub has_nc_entry_date: Option<bool>,
    pub moved_to_cold: Option<bool>,
}

impl LeadFilter {
    pub fn in_stage(stage_id: Uuid) -> Self {
        Self {
            stage: Some(StageFilter::Is(stage_id)),
            ..Default::default()
        }
    }

    pub fn not_in_stage(stage_id: Uuid) -> Self {
        Self {
            stage: Some(StageFilter::IsNot(stage_id)),
            ..Default::default()
        }
    }

    pub fn with_nc_entry_date(mut self, present: bool) -> Self {
        self.has_nc_entry_date = Some(present);
        self
    }

    pub fn with_moved_to_cold(mut self, value: bool) -> Self {
        self.moved_to_cold = Some(value);
        self
    }
}

/// A stored email template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailTemplate {
    pub id: String,
    pub subject: String,
    pub body: String,
}

/// Delivery state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Recorded for later delivery.
    Queued,
    /// Handed to the SMTP relay.
    Sent,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Queued => "queued",
            OutboxStatus::Sent => "sent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "sent" => OutboxStatus::Sent,
            _ => OutboxStatus::Queued,
        }
    }
}

/// One rendered email, queued or sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMail {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub template_id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Backend-agnostic database trait covering stages, leads, notes, messages and mail.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Stages ──────────────────────────────────────────────────────

    /// Look up a stage by exact display name. Lowest sequence wins on duplicates.
    async fn find_stage_by_name(&self, name: &str) -> Result<Option<Stage>, DatabaseError>;

    /// Create a stage and return it.
    async fn create_stage(&self, name: &str, sequence: i64) -> Result<Stage, DatabaseError>;

    /// All stages ordered by sequence.
    async fn list_stages(&self) -> Result<Vec<Stage>, DatabaseError>;

    // ── Leads ───────────────────────────────────────────────────────

    /// Insert a lead with default tracking fields.
    async fn create_lead(&self, lead: &NewLead) -> Result<Lead, DatabaseError>;

    /// Get a lead by ID.
    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError>;

    /// All leads matching every predicate in `filter`, oldest first.
    async fn search_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, DatabaseError>;

    /// Apply a partial update. Returns `false` if the lead does not exist.
    async fn write_lead(&self, id: Uuid, update: &LeadUpdate) -> Result<bool, DatabaseError>;

    // ── Activity log ────────────────────────────────────────────────

    /// Append a note to a lead's activity log.
    async fn append_note(
        &self,
        lead_id: Uuid,
        body: &str,
        kind: NoteKind,
    ) -> Result<(), DatabaseError>;

    /// Notes for a lead, oldest first.
    async fn list_notes(&self, lead_id: Uuid) -> Result<Vec<LeadNote>, DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Persist an inbound message.
    async fn insert_message(&self, message: &InboundMessage) -> Result<(), DatabaseError>;

    // ── Mail ────────────────────────────────────────────────────────

    /// Get an email template by ID.
    async fn get_mail_template(&self, id: &str) -> Result<Option<MailTemplate>, DatabaseError>;

    /// Record an outbound email.
    async fn record_outbound_mail(&self, mail: &OutboundMail) -> Result<(), DatabaseError>;

    /// Outbox rows for a lead, oldest first.
    async fn list_outbox(&self, lead_id: Uuid) -> Result<Vec<OutboundMail>, DatabaseError>;
}
