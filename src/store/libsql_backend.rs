//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::followup::model::{
    InboundMessage, Lead, LeadNote, LeadUpdate, NewLead, NoteKind, Stage,
};
use crate::store::migrations;
use crate::store::traits::{
    Database, LeadFilter, MailTemplate, OutboundMail, OutboxStatus, StageFilter,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).unwrap_or_else(|_| Uuid::nil())
}

fn opt_text(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

fn opt_flag(b: Option<bool>) -> libsql::Value {
    match b {
        Some(b) => libsql::Value::Integer(b as i64),
        None => libsql::Value::Null,
    }
}

fn row_to_stage(row: &libsql::Row) -> Result<Stage, libsql::Error> {
    let id_str: String = row.get(0)?;
    Ok(Stage {
        id: parse_uuid(&id_str),
        name: row.get(1)?,
        sequence: row.get(2)?,
    })
}

/// Map a libsql Row to a Lead.
///
/// Column order matches LEAD_COLUMNS:
/// 0:id, 1:name, 2:email, 3:stage_id, 4:nc_entry_date, 5-8:email_N_sent,
/// 9:moved_to_cold, 10:created_at, 11:updated_at
fn row_to_lead(row: &libsql::Row) -> Result<Lead, libsql::Error> {
    let id_str: String = row.get(0)?;
    let stage_str: Option<String> = row.get::<String>(3).ok();
    let entry_str: Option<String> = row.get::<String>(4).ok();
    let created_str: String = row.get(10)?;
    let updated_str: String = row.get(11)?;

    let mut email_sent = [false; 4];
    for (i, sent) in email_sent.iter_mut().enumerate() {
        *sent = row.get::<i64>(5 + i as i32)? != 0;
    }

    Ok(Lead {
        id: parse_uuid(&id_str),
        name: row.get(1)?,
        email: row.get::<String>(2).ok(),
        stage_id: stage_str.as_deref().and_then(|s| Uuid::parse_str(s).ok()),
        nc_entry_date: entry_str.as_deref().and_then(parse_date),
        email_sent,
        moved_to_cold: row.get::<i64>(9)? != 0,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_note(row: &libsql::Row) -> Result<LeadNote, libsql::Error> {
    let id_str: String = row.get(0)?;
    let lead_str: String = row.get(1)?;
    let kind_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;
    Ok(LeadNote {
        id: parse_uuid(&id_str),
        lead_id: parse_uuid(&lead_str),
        body: row.get(2)?,
        kind: NoteKind::parse(&kind_str),
        created_at: parse_datetime(&created_str),
    })
}

fn row_to_outbound(row: &libsql::Row) -> Result<OutboundMail, libsql::Error> {
    let id_str: String = row.get(0)?;
    let lead_str: String = row.get(1)?;
    let status_str: String = row.get(6)?;
    let created_str: String = row.get(7)?;
    let sent_str: Option<String> = row.get::<String>(8).ok();
    Ok(OutboundMail {
        id: parse_uuid(&id_str),
        lead_id: parse_uuid(&lead_str),
        template_id: row.get(2)?,
        recipient: row.get(3)?,
        subject: row.get(4)?,
        body: row.get(5)?,
        status: OutboxStatus::parse(&status_str),
        created_at: parse_datetime(&created_str),
        sent_at: sent_str.as_deref().map(parse_datetime),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const STAGE_COLUMNS: &str = "id, name, sequence";

const LEAD_COLUMNS: &str = "id, name, email, stage_id, nc_entry_date, email_1_sent, email_2_sent, email_3_sent, email_4_sent, moved_to_cold, created_at, updated_at";

const OUTBOX_COLUMNS: &str =
    "id, lead_id, template_id, recipient, subject, body, status, created_at, sent_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Stages ──────────────────────────────────────────────────────

    async fn find_stage_by_name(&self, name: &str) -> Result<Option<Stage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {STAGE_COLUMNS} FROM stages WHERE name = ?1 \
                     ORDER BY sequence ASC, rowid ASC LIMIT 1"
                ),
                params![name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_stage_by_name: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_stage(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("find_stage_by_name row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_stage_by_name: {e}"))),
        }
    }

    async fn create_stage(&self, name: &str, sequence: i64) -> Result<Stage, DatabaseError> {
        let stage = Stage {
            id: Uuid::new_v4(),
            name: name.to_string(),
            sequence,
        };
        self.conn()
            .execute(
                "INSERT INTO stages (id, name, sequence) VALUES (?1, ?2, ?3)",
                params![stage.id.to_string(), stage.name.clone(), sequence],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_stage: {e}")))?;

        debug!(stage_id = %stage.id, name = %stage.name, "Stage created");
        Ok(stage)
    }

    async fn list_stages(&self) -> Result<Vec<Stage>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {STAGE_COLUMNS} FROM stages ORDER BY sequence ASC, rowid ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_stages: {e}")))?;

        let mut stages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(stage) = row_to_stage(&row) {
                stages.push(stage);
            }
        }
        Ok(stages)
    }

    // ── Leads ───────────────────────────────────────────────────────

    async fn create_lead(&self, lead: &NewLead) -> Result<Lead, DatabaseError> {
        let id = Uuid::new_v4();
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO leads (id, name, email, stage_id, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    id.to_string(),
                    lead.name.clone(),
                    opt_text(lead.email.clone()),
                    opt_text(lead.stage_id.map(|s| s.to_string())),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_lead: {e}")))?;

        debug!(lead_id = %id, "Lead inserted into DB");
        self.get_lead(id).await?.ok_or_else(|| DatabaseError::NotFound {
            entity: "lead".into(),
            id: id.to_string(),
        })
    }

    async fn get_lead(&self, id: Uuid) -> Result<Option<Lead>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_lead: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_lead(&row)
                .map(Some)
                .map_err(|e| DatabaseError::Query(format!("get_lead row parse: {e}"))),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_lead: {e}"))),
        }
    }

    async fn search_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, DatabaseError> {
        let (stage_eq, stage_ne) = match filter.stage {
            Some(StageFilter::Is(id)) => (Some(id.to_string()), None),
            Some(StageFilter::IsNot(id)) => (None, Some(id.to_string())),
            None => (None, None),
        };

        // A NULL parameter disables its predicate. A lead without a stage
        // counts as "not in" any stage.
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {LEAD_COLUMNS} FROM leads \
                     WHERE (?1 IS NULL OR stage_id = ?1) \
                     AND (?2 IS NULL OR stage_id IS NULL OR stage_id != ?2) \
                     AND (?3 IS NULL OR (?3 = 1 AND nc_entry_date IS NOT NULL) \
                                     OR (?3 = 0 AND nc_entry_date IS NULL)) \
                     AND (?4 IS NULL OR moved_to_cold = ?4) \
                     ORDER BY created_at ASC, rowid ASC"
                ),
                params![
                    opt_text(stage_eq),
                    opt_text(stage_ne),
                    opt_flag(filter.has_nc_entry_date),
                    opt_flag(filter.moved_to_cold),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("search_leads: {e}")))?;

        let mut leads = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => leads.push(
                    row_to_lead(&row)
                        .map_err(|e| DatabaseError::Query(format!("search_leads row parse: {e}")))?,
                ),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("search_leads: {e}"))),
            }
        }
        Ok(leads)
    }

    async fn write_lead(&self, id: Uuid, update: &LeadUpdate) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE leads SET \
                   name = COALESCE(?1, name), \
                   email = COALESCE(?2, email), \
                   stage_id = COALESCE(?3, stage_id), \
                   nc_entry_date = COALESCE(?4, nc_entry_date), \
                   email_1_sent = COALESCE(?5, email_1_sent), \
                   email_2_sent = COALESCE(?6, email_2_sent), \
                   email_3_sent = COALESCE(?7, email_3_sent), \
                   email_4_sent = COALESCE(?8, email_4_sent), \
                   moved_to_cold = COALESCE(?9, moved_to_cold), \
                   updated_at = ?10 \
                 WHERE id = ?11",
                params![
                    opt_text(update.name.clone()),
                    opt_text(update.email.clone()),
                    opt_text(update.stage_id.map(|s| s.to_string())),
                    opt_text(update.nc_entry_date.map(|d| d.format(DATE_FORMAT).to_string())),
                    opt_flag(update.email_sent[0]),
                    opt_flag(update.email_sent[1]),
                    opt_flag(update.email_sent[2]),
                    opt_flag(update.email_sent[3]),
                    opt_flag(update.moved_to_cold),
                    now,
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("write_lead: {e}")))?;

        debug!(lead_id = %id, fields = ?update.changed_fields(), "Lead updated in DB");
        Ok(count > 0)
    }

    // ── Activity log ────────────────────────────────────────────────

    async fn append_note(
        &self,
        lead_id: Uuid,
        body: &str,
        kind: NoteKind,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO lead_notes (id, lead_id, body, kind, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    lead_id.to_string(),
                    body,
                    kind.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("append_note: {e}")))?;
        Ok(())
    }

    async fn list_notes(&self, lead_id: Uuid) -> Result<Vec<LeadNote>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, lead_id, body, kind, created_at FROM lead_notes \
                 WHERE lead_id = ?1 ORDER BY created_at ASC, rowid ASC",
                params![lead_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_notes: {e}")))?;

        let mut notes = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(note) = row_to_note(&row) {
                notes.push(note);
            }
        }
        Ok(notes)
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn insert_message(&self, message: &InboundMessage) -> Result<(), DatabaseError> {
        let body = match &message.body {
            Some(value) => Some(
                serde_json::to_string(value)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
            ),
            None => None,
        };

        self.conn()
            .execute(
                "INSERT INTO messages (id, model, res_id, body, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    message.id.to_string(),
                    opt_text(message.model.clone()),
                    opt_text(message.res_id_text()),
                    opt_text(body),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_message: {e}")))?;

        debug!(message_id = %message.id, "Message inserted into DB");
        Ok(())
    }

    // ── Mail ────────────────────────────────────────────────────────

    async fn get_mail_template(&self, id: &str) -> Result<Option<MailTemplate>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, subject, body FROM mail_templates WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_mail_template: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let template = MailTemplate {
                    id: row
                        .get(0)
                        .map_err(|e| DatabaseError::Query(format!("get_mail_template: {e}")))?,
                    subject: row
                        .get(1)
                        .map_err(|e| DatabaseError::Query(format!("get_mail_template: {e}")))?,
                    body: row
                        .get(2)
                        .map_err(|e| DatabaseError::Query(format!("get_mail_template: {e}")))?,
                };
                Ok(Some(template))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_mail_template: {e}"))),
        }
    }

    async fn record_outbound_mail(&self, mail: &OutboundMail) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO mail_outbox ({OUTBOX_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    mail.id.to_string(),
                    mail.lead_id.to_string(),
                    mail.template_id.clone(),
                    mail.recipient.clone(),
                    mail.subject.clone(),
                    mail.body.clone(),
                    mail.status.as_str(),
                    mail.created_at.to_rfc3339(),
                    opt_text(mail.sent_at.map(|t| t.to_rfc3339())),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_outbound_mail: {e}")))?;

        debug!(
            lead_id = %mail.lead_id,
            template = %mail.template_id,
            status = mail.status.as_str(),
            "Outbound mail recorded"
        );
        Ok(())
    }

    async fn list_outbox(&self, lead_id: Uuid) -> Result<Vec<OutboundMail>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {OUTBOX_COLUMNS} FROM mail_outbox WHERE lead_id = ?1 \
                     ORDER BY created_at ASC, rowid ASC"
                ),
                params![lead_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_outbox: {e}")))?;

        let mut mails = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(mail) = row_to_outbound(&row) {
                mails.push(mail);
            }
        }
        Ok(mails)
    }
}
