//! NC follow-up: timed follow-up emails and Cold demotion for unreached leads.

pub mod api;
pub mod config;
pub mod error;
pub mod followup;
pub mod mail;
pub mod store;
