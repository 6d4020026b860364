//! The stage-timed follow-up state machine.
//!
//! A lead in the Not Connected stage receives four follow-up emails on day
//! offsets 0, 2, 4 and 6 after it entered the stage, and is moved to Cold
//! once seven or more days have passed. Matching on the day offsets is exact:
//! a sweep that misses the day skips that email for good.
//!
//! Everything here is pure. Persistence and delivery live in
//! [`super::sweep`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Days after NC entry at which a lead is demoted to Cold.
pub const COLD_AFTER_DAYS: i64 = 7;

/// All follow-up steps, in schedule order.
pub const FOLLOWUP_STEPS: [FollowupStep; 4] = [
    FollowupStep::First,
    FollowupStep::Second,
    FollowupStep::Third,
    FollowupStep::Fourth,
];

const DAY_OFFSETS: [i64; 4] = [0, 2, 4, 6];

const TEMPLATE_IDS: [&str; 4] = [
    "followup-template-1",
    "followup-template-2",
    "followup-template-3",
    "followup-template-4",
];

/// Where a lead sits relative to the follow-up flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadState {
    /// Any stage the flow does not care about.
    Untracked,
    NotConnected,
    Cold,
    Reengaged,
}

impl std::fmt::Display for LeadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeadState::Untracked => write!(f, "untracked"),
            LeadState::NotConnected => write!(f, "not_connected"),
            LeadState::Cold => write!(f, "cold"),
            LeadState::Reengaged => write!(f, "reengaged"),
        }
    }
}

/// One scheduled follow-up email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowupStep {
    First,
    Second,
    Third,
    Fourth,
}

impl FollowupStep {
    /// Position in [`FOLLOWUP_STEPS`], 0-based.
    pub fn index(self) -> usize {
        match self {
            FollowupStep::First => 0,
            FollowupStep::Second => 1,
            FollowupStep::Third => 2,
            FollowupStep::Fourth => 3,
        }
    }

    /// 1-based email number, as shown to humans.
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    /// Days after NC entry on which this email goes out.
    pub fn day_offset(self) -> i64 {
        DAY_OFFSETS[self.index()]
    }

    pub fn template_id(self) -> &'static str {
        TEMPLATE_IDS[self.index()]
    }
}

impl std::fmt::Display for FollowupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "followup #{}", self.number())
    }
}

/// Idempotency flags carried on the lead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowupFlags {
    pub email_sent: [bool; 4],
    pub moved_to_cold: bool,
}

impl FollowupFlags {
    pub fn is_sent(&self, step: FollowupStep) -> bool {
        self.email_sent[step.index()]
    }
}

/// What a sweep should do for one lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "step", rename_all = "snake_case")]
pub enum Action {
    SendFollowup(FollowupStep),
    MoveToCold,
    Nothing,
}

/// Whole calendar days from `entry` to `today`. Negative if `entry` is in the future.
pub fn days_elapsed(today: NaiveDate, entry: NaiveDate) -> i64 {
    today.signed_duration_since(entry).num_days()
}

/// Decide the single action for a lead on this sweep.
///
/// Branches are checked in schedule order and the first match wins. Leads
/// outside Not Connected, or already moved to Cold, never act.
pub fn next_action(state: LeadState, flags: &FollowupFlags, days_elapsed: i64) -> Action {
    if state != LeadState::NotConnected || flags.moved_to_cold {
        return Action::Nothing;
    }

    for step in FOLLOWUP_STEPS {
        if days_elapsed == step.day_offset() && !flags.is_sent(step) {
            return Action::SendFollowup(step);
        }
    }

    if days_elapsed >= COLD_AFTER_DAYS {
        return Action::MoveToCold;
    }

    Action::Nothing
}
