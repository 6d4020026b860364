//! Records the follow-up flow reads and writes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::machine::{FOLLOWUP_STEPS, FollowupFlags, FollowupStep};

/// Owning-model tag carried by messages attached to a lead.
pub const LEAD_MODEL: &str = "crm.lead";

/// A named pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: Uuid,
    pub name: String,
    pub sequence: i64,
}

/// A sales lead with its follow-up tracking fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub stage_id: Option<Uuid>,
    /// Date the lead entered the Not Connected stage. Set once per lead.
    pub nc_entry_date: Option<NaiveDate>,
    /// One flag per scheduled follow-up, in schedule order.
    pub email_sent: [bool; 4],
    pub moved_to_cold: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn flags(&self) -> FollowupFlags {
        FollowupFlags {
            email_sent: self.email_sent,
            moved_to_cold: self.moved_to_cold,
        }
    }

}

/// Fields supplied when creating a lead. Tracking fields start at their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewLead {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub stage_id: Option<Uuid>,
}

/// Identifies one writable lead field, for change detection after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeadField {
    Name,
    Email,
    Stage,
    NcEntryDate,
    EmailSent(FollowupStep),
    MovedToCold,
}

/// A partial write against a lead. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub stage_id: Option<Uuid>,
    #[serde(default)]
    pub nc_entry_date: Option<NaiveDate>,
    #[serde(default)]
    pub email_sent: [Option<bool>; 4],
    #[serde(default)]
    pub moved_to_cold: Option<bool>,
}

impl LeadUpdate {
    pub fn stage(stage_id: Uuid) -> Self {
        Self {
            stage_id: Some(stage_id),
            ..Default::default()
        }
    }

    pub fn nc_entry_date(date: NaiveDate) -> Self {
        Self {
            nc_entry_date: Some(date),
            ..Default::default()
        }
    }

    pub fn mark_sent(step: FollowupStep) -> Self {
        let mut update = Self::default();
        update.email_sent[step.index()] = Some(true);
        update
    }

    pub fn with_moved_to_cold(mut self, value: bool) -> Self {
        self.moved_to_cold = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changed_fields().is_empty()
    }

    /// Fields this update writes.
    pub fn changed_fields(&self) -> Vec<LeadField> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push(LeadField::Name);
        }
        if self.email.is_some() {
            fields.push(LeadField::Email);
        }
        if self.stage_id.is_some() {
            fields.push(LeadField::Stage);
        }
        if self.nc_entry_date.is_some() {
            fields.push(LeadField::NcEntryDate);
        }
        for step in FOLLOWUP_STEPS {
            if self.email_sent[step.index()].is_some() {
                fields.push(LeadField::EmailSent(step));
            }
        }
        if self.moved_to_cold.is_some() {
            fields.push(LeadField::MovedToCold);
        }
        fields
    }
}

/// Kind of an entry in a lead's activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// System-generated notice.
    Notification,
    /// Free-form comment.
    Comment,
}

impl NoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteKind::Notification => "notification",
            NoteKind::Comment => "comment",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "notification" => NoteKind::Notification,
            _ => NoteKind::Comment,
        }
    }
}

/// An entry in a lead's activity log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadNote {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub body: String,
    pub kind: NoteKind,
    pub created_at: DateTime<Utc>,
}

/// An inbound message as handed over by the ingestion pipeline.
///
/// `model`/`res_id` name the record the message is attached to. Both
/// `res_id` and the body are kept as raw JSON: other models carry integer
/// ids, and the pipeline does not guarantee a textual body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub res_id: Option<serde_json::Value>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

impl InboundMessage {
    pub fn text(model: &str, res_id: Uuid, body: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            model: Some(model.to_string()),
            res_id: Some(serde_json::Value::String(res_id.to_string())),
            body: Some(serde_json::Value::String(body.to_string())),
        }
    }

    /// The body, if present and textual.
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_ref().and_then(|b| b.as_str())
    }

    /// `res_id` as stored text. Strings are kept verbatim, other scalars
    /// use their JSON form.
    pub fn res_id_text(&self) -> Option<String> {
        match self.res_id.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// The subject lead id, if this message is attached to a lead.
    pub fn lead_id(&self) -> Option<Uuid> {
        if self.model.as_deref() != Some(LEAD_MODEL) {
            return None;
        }
        self.res_id
            .as_ref()
            .and_then(|raw| raw.as_str())
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
    }
}
