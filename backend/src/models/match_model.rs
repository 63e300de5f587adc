use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

use super::rating_event::RatingEvent;

/// Longest note kept on a match, counted after trimming.
pub const MAX_NOTE_CHARS: usize = 280;

/// Match lifecycle state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "match_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    PendingConfirm,
    Confirmed,
    Rejected,
}

impl MatchStatus {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, to: &MatchStatus) -> bool {
        matches!(
            (self, to),
            (MatchStatus::PendingConfirm, MatchStatus::Confirmed)
                | (MatchStatus::PendingConfirm, MatchStatus::Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, MatchStatus::PendingConfirm)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::PendingConfirm => "pending_confirm",
            MatchStatus::Confirmed => "confirmed",
            MatchStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of a doubles match. Serialized as `1` or `2`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum Team {
    One,
    Two,
}

impl Team {
    pub fn opponent(self) -> Team {
        match self {
            Team::One => Team::Two,
            Team::Two => Team::One,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            Team::One => 1,
            Team::Two => 2,
        }
    }
}

impl TryFrom<u8> for Team {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Team::One),
            2 => Ok(Team::Two),
            other => Err(format!("team must be 1 or 2, got {}", other)),
        }
    }
}

impl From<Team> for u8 {
    fn from(team: Team) -> Self {
        team.number()
    }
}

/// What an opponent decides about a pending match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Confirm,
    Reject,
}

impl Decision {
    pub fn target_status(self) -> MatchStatus {
        match self {
            Decision::Confirm => MatchStatus::Confirmed,
            Decision::Reject => MatchStatus::Rejected,
        }
    }
}

/// A reported doubles match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub team1_p1: Uuid,
    pub team1_p2: Uuid,
    pub team2_p1: Uuid,
    pub team2_p2: Uuid,
    pub winning_team: Team,
    pub note: Option<String>,
    pub status: MatchStatus,
    pub submitted_by: Uuid,
    pub confirmed_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Match {
    pub fn participants(&self) -> [Uuid; 4] {
        [self.team1_p1, self.team1_p2, self.team2_p1, self.team2_p2]
    }

    pub fn team_members(&self, team: Team) -> [Uuid; 2] {
        match team {
            Team::One => [self.team1_p1, self.team1_p2],
            Team::Two => [self.team2_p1, self.team2_p2],
        }
    }

    pub fn team_of(&self, player: Uuid) -> Option<Team> {
        if self.team_members(Team::One).contains(&player) {
            Some(Team::One)
        } else if self.team_members(Team::Two).contains(&player) {
            Some(Team::Two)
        } else {
            None
        }
    }

    /// Only the two players opposite the submitter may confirm or reject.
    pub fn can_be_resolved_by(&self, actor: Uuid) -> bool {
        match (self.team_of(self.submitted_by), self.team_of(actor)) {
            (Some(submitter_team), Some(actor_team)) => actor_team == submitter_team.opponent(),
            _ => false,
        }
    }
}

// ===== API DTOs =====

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
pub struct SubmitMatchDTO {
    pub team1: [Uuid; 2],
    pub team2: [Uuid; 2],
    #[validate(range(min = 1, max = 2, message = "winning team must be 1 or 2"))]
    pub winning_team: u8,
    pub note: Option<String>,
}

impl SubmitMatchDTO {
    pub fn participants(&self) -> [Uuid; 4] {
        [self.team1[0], self.team1[1], self.team2[0], self.team2[1]]
    }

    /// The note without surrounding whitespace; blank notes become `None`.
    pub fn trimmed_note(&self) -> Option<&str> {
        self.note.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ResolveMatchDTO {
    pub decision: Decision,
}

/// A match awaiting confirmation, with its participants' display names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMatch {
    #[serde(flatten)]
    pub match_data: Match,
    pub names: HashMap<Uuid, String>,
}

/// Match plus the ledger rows it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDetail {
    #[serde(flatten)]
    pub match_data: Match,
    pub rating_events: Vec<RatingEvent>,
}
