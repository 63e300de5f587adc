use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only ledger row: one per (match, player) for every confirmed match.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct RatingEvent {
    pub match_id: Uuid,
    pub player_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub rating_before: i32,
    pub rating_after: i32,
    pub delta: i32,
}

impl RatingEvent {
    pub fn new(
        match_id: Uuid,
        player_id: Uuid,
        rating_before: i32,
        rating_after: i32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            match_id,
            player_id,
            created_at,
            rating_before,
            rating_after,
            delta: rating_after - rating_before,
        }
    }
}

/// Outcome of settling one confirmed match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settlement {
    pub match_id: Uuid,
    /// Logistic expectation for team 1 before the match.
    pub expected_team1: f64,
    pub team1_delta: i32,
    pub team2_delta: i32,
    pub events: Vec<RatingEvent>,
}
