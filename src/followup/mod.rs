//! Not Connected follow-up flow.
//!
//! - [`machine`]: pure decision logic for one lead on one sweep.
//! - [`stages`]: role → stage id cache, resolved by display name.
//! - [`watcher`] / [`leads`]: stamp the NC entry date on every lead write.
//! - [`sweep`]: the periodic pass that sends follow-ups and demotes to Cold.
//! - [`reengage`]: moves leads out of NC/Cold when a tracked channel replies.
//! - [`ticker`]: cron-driven background task that runs the sweep.

pub mod leads;
pub mod machine;
pub mod model;
pub mod reengage;
pub mod stages;
pub mod sweep;
pub mod ticker;
pub mod watcher;

pub use leads::LeadService;
pub use machine::{Action, FollowupFlags, FollowupStep, LeadState, next_action};
pub use model::{InboundMessage, Lead, LeadUpdate, NewLead, Stage};
pub use reengage::{MessageIngest, ReengagementDetector};
pub use stages::{StageCache, StageRole};
pub use sweep::{BackfillNotice, FollowupSweep, NoticeKind, SweepReport};
pub use watcher::StageWatcher;
