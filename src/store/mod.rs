//! Persistence layer: libSQL-backed record store for leads, stages, notes and mail.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    Database, LeadFilter, MailTemplate, OutboundMail, OutboxStatus, StageFilter,
};
