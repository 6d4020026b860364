//! Templated follow-up email delivery.
//!
//! [`TemplateSender`] is the seam the sweep talks to. [`TemplateMailer`]
//! loads the stored template and the lead's address, then either relays the
//! message over SMTP right away or leaves it in the outbox as `queued`.
//! Every attempt that gets as far as a valid message is recorded in the
//! `mail_outbox` table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use uuid::Uuid;

use crate::config::MailConfig;
use crate::error::DeliveryError;
use crate::store::{Database, MailTemplate, OutboundMail, OutboxStatus};

/// Sends a stored email template to a lead.
#[async_trait]
pub trait TemplateSender: Send + Sync {
    /// `force_send` delivers immediately instead of queueing.
    async fn send_template(
        &self,
        template_id: &str,
        lead_id: Uuid,
        force_send: bool,
    ) -> Result<(), DeliveryError>;
}

/// SMTP-backed [`TemplateSender`] with a persistent outbox.
pub struct TemplateMailer {
    db: Arc<dyn Database>,
    smtp: Option<MailConfig>,
}

impl TemplateMailer {
    /// `smtp: None` disables immediate delivery; queueing still works.
    pub fn new(db: Arc<dyn Database>, smtp: Option<MailConfig>) -> Self {
        Self { db, smtp }
    }

    async fn load_template(&self, template_id: &str) -> Result<MailTemplate, DeliveryError> {
        self.db
            .get_mail_template(template_id)
            .await?
            .ok_or_else(|| DeliveryError::TemplateNotFound {
                template: template_id.to_string(),
            })
    }

    async fn deliver(&self, to: Mailbox, template: &MailTemplate) -> Result<(), DeliveryError> {
        let Some(cfg) = self.smtp.clone() else {
            return Err(DeliveryError::Transport(
                "SMTP is not configured (SMTP_HOST unset)".into(),
            ));
        };

        let from: Mailbox = cfg
            .from_address
            .parse()
            .map_err(|e| DeliveryError::InvalidAddress(format!("{}: {e}", cfg.from_address)))?;

        let email = build_message(from, to, template)?;

        // lettre's SmtpTransport is blocking.
        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(
                cfg.username.clone(),
                cfg.password.expose_secret().to_string(),
            );
            let transport = SmtpTransport::relay(&cfg.smtp_host)
                .map_err(|e| DeliveryError::Transport(format!("SMTP relay error: {e}")))?
                .port(cfg.smtp_port)
                .credentials(creds)
                .build();

            transport
                .send(&email)
                .map(|_| ())
                .map_err(|e| DeliveryError::Transport(format!("SMTP send failed: {e}")))
        })
        .await
        .map_err(|e| DeliveryError::Transport(format!("SMTP task failed: {e}")))?
    }
}

fn build_message(
    from: Mailbox,
    to: Mailbox,
    template: &MailTemplate,
) -> Result<Message, DeliveryError> {
    Message::builder()
        .from(from)
        .to(to)
        .subject(template.subject.clone())
        .body(template.body.clone())
        .map_err(|e| DeliveryError::Build(e.to_string()))
}

#[async_trait]
impl TemplateSender for TemplateMailer {
    async fn send_template(
        &self,
        template_id: &str,
        lead_id: Uuid,
        force_send: bool,
    ) -> Result<(), DeliveryError> {
        let template = self.load_template(template_id).await?;

        let lead = self
            .db
            .get_lead(lead_id)
            .await?
            .ok_or(DeliveryError::NoRecipient { lead_id })?;
        let recipient = lead
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or(DeliveryError::NoRecipient { lead_id })?;
        let to: Mailbox = recipient
            .trim()
            .parse()
            .map_err(|e| DeliveryError::InvalidAddress(format!("{recipient}: {e}")))?;

        let status = if force_send {
            self.deliver(to, &template).await?;
            OutboxStatus::Sent
        } else {
            OutboxStatus::Queued
        };

        let now = Utc::now();
        self.db
            .record_outbound_mail(&OutboundMail {
                id: Uuid::new_v4(),
                lead_id,
                template_id: template.id.clone(),
                recipient: recipient.trim().to_string(),
                subject: template.subject.clone(),
                body: template.body.clone(),
                status,
                created_at: now,
                sent_at: (status == OutboxStatus::Sent).then_some(now),
            })
            .await?;

        tracing::info!(
            lead_id = %lead_id,
            template = template_id,
            status = status.as_str(),
            "Follow-up email handled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::followup::model::NewLead;
    use crate::store::LibSqlBackend;

    async fn setup(email: Option<&str>) -> (Arc<dyn Database>, TemplateMailer, Uuid) {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let lead = db
            .create_lead(&NewLead {
                name: "Mailee".into(),
                email: email.map(String::from),
                stage_id: None,
            })
            .await
            .unwrap();
        let mailer = TemplateMailer::new(Arc::clone(&db), None);
        (db, mailer, lead.id)
    }

    #[tokio::test]
    async fn queued_send_records_outbox_row() {
        let (db, mailer, lead_id) = setup(Some("mailee@example.com")).await;
        mailer
            .send_template("followup-template-3", lead_id, false)
            .await
            .unwrap();

        let outbox = db.list_outbox(lead_id).await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].status, OutboxStatus::Queued);
        assert_eq!(outbox[0].template_id, "followup-template-3");
        assert_eq!(outbox[0].recipient, "mailee@example.com");
        assert!(outbox[0].sent_at.is_none());
    }

    #[tokio::test]
    async fn forced_send_without_smtp_fails_and_records_nothing() {
        let (db, mailer, lead_id) = setup(Some("mailee@example.com")).await;
        let err = mailer
            .send_template("followup-template-1", lead_id, true)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
        assert!(db.list_outbox(lead_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_template_is_reported() {
        let (_db, mailer, lead_id) = setup(Some("mailee@example.com")).await;
        let err = mailer
            .send_template("followup-template-9", lead_id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::TemplateNotFound { .. }));
    }

    #[tokio::test]
    async fn lead_without_email_has_no_recipient() {
        let (_db, mailer, lead_id) = setup(None).await;
        let err = mailer
            .send_template("followup-template-1", lead_id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::NoRecipient { .. }));
    }

    #[tokio::test]
    async fn malformed_address_is_rejected() {
        let (_db, mailer, lead_id) = setup(Some("not an address")).await;
        let err = mailer
            .send_template("followup-template-1", lead_id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidAddress(_)));
    }

    #[test]
    fn message_uses_template_subject() {
        let template = MailTemplate {
            id: "followup-template-2".into(),
            subject: "Still interested?".into(),
            body: "Hello".into(),
        };
        let msg = build_message(
            "Sales <sales@example.com>".parse().unwrap(),
            "lead@example.com".parse().unwrap(),
            &template,
        )
        .unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("Subject: Still interested?"));
        assert!(raw.contains("To: lead@example.com"));
    }
}
