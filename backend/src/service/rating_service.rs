//! Elo settlement for doubles matches.
//!
//! A team's rating is the mean of its two members. Both members of a team
//! receive the team's delta, and the losing delta is the exact negation of
//! the winning one, so every settlement sums to zero.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::models::{LeaderboardEntry, Match, RatingEvent, Settlement, Team};
use crate::store::{Store, StoreError, StoreTxn};

pub const DEFAULT_K_FACTOR: f64 = 32.0;

pub const MAX_LEADERBOARD_LIMIT: i64 = 200;
pub const MAX_HISTORY_LIMIT: i64 = 50;

/// Deltas for one settlement, before they are applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettlementDeltas {
    pub expected_team1: f64,
    pub team1_delta: i32,
    pub team2_delta: i32,
}

pub fn team_rating(members: [i32; 2]) -> f64 {
    (f64::from(members[0]) + f64::from(members[1])) / 2.0
}

/// Logistic expectation that a team rated `own` beats a team rated `other`.
pub fn expected_score(own: f64, other: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((other - own) / 400.0))
}

pub fn compute_settlement(
    team1: [i32; 2],
    team2: [i32; 2],
    winner: Team,
    k_factor: f64,
) -> SettlementDeltas {
    let r1 = team_rating(team1);
    let r2 = team_rating(team2);
    let expected_team1 = expected_score(r1, r2);

    let expected_winner = match winner {
        Team::One => expected_team1,
        Team::Two => 1.0 - expected_team1,
    };
    let winner_delta = (k_factor * (1.0 - expected_winner)).round() as i32;

    let (team1_delta, team2_delta) = match winner {
        Team::One => (winner_delta, -winner_delta),
        Team::Two => (-winner_delta, winner_delta),
    };

    SettlementDeltas {
        expected_team1,
        team1_delta,
        team2_delta,
    }
}

/// Settle a match inside the caller's transaction.
///
/// Locks the four participants, updates their ratings and counters and
/// appends one ledger row each. Nothing is committed here; if the caller
/// drops the transaction, none of it happened.
pub async fn apply_settlement(
    txn: &mut dyn StoreTxn,
    m: &Match,
    k_factor: f64,
    at: DateTime<Utc>,
) -> Result<Settlement, ApiError> {
    let participants = m.participants();
    let mut players: HashMap<Uuid, _> = txn
        .lock_players(&participants)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let rating_of = |id: &Uuid| {
        players
            .get(id)
            .map(|p| p.rating)
            .ok_or_else(|| StoreError::Corrupt(format!("participant {} missing", id)))
    };
    let team1 = [rating_of(&m.team1_p1)?, rating_of(&m.team1_p2)?];
    let team2 = [rating_of(&m.team2_p1)?, rating_of(&m.team2_p2)?];

    let deltas = compute_settlement(team1, team2, m.winning_team, k_factor);
    debug!(
        match_id = %m.id,
        expected_team1 = deltas.expected_team1,
        team1_delta = deltas.team1_delta,
        team2_delta = deltas.team2_delta,
        "Computed settlement"
    );

    let mut events = Vec::with_capacity(participants.len());
    for team in [Team::One, Team::Two] {
        let delta = match team {
            Team::One => deltas.team1_delta,
            Team::Two => deltas.team2_delta,
        };
        let won = team == m.winning_team;

        for id in m.team_members(team) {
            let player = players
                .get_mut(&id)
                .ok_or_else(|| StoreError::Corrupt(format!("participant {} missing", id)))?;
            let before = player.rating;
            player.record_result(delta, won);

            txn.update_player_stats(player).await?;
            let event = RatingEvent::new(m.id, id, before, player.rating, at);
            txn.append_rating_event(&event).await?;
            events.push(event);
        }
    }

    info!(
        match_id = %m.id,
        team1_delta = deltas.team1_delta,
        team2_delta = deltas.team2_delta,
        "Match settled"
    );

    Ok(Settlement {
        match_id: m.id,
        expected_team1: deltas.expected_team1,
        team1_delta: deltas.team1_delta,
        team2_delta: deltas.team2_delta,
        events,
    })
}

/// Read projections over ratings and the ledger.
pub struct RatingService {
    store: Arc<dyn Store>,
}

impl RatingService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn leaderboard(&self, limit: Option<i64>) -> Result<Vec<LeaderboardEntry>, ApiError> {
        let limit = limit
            .unwrap_or(MAX_LEADERBOARD_LIMIT)
            .clamp(1, MAX_LEADERBOARD_LIMIT);
        Ok(self.store.leaderboard(limit).await?)
    }

    /// A player's rating changes, newest first.
    pub async fn history(
        &self,
        player_id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<RatingEvent>, ApiError> {
        if self.store.get_player(player_id).await?.is_none() {
            return Err(ApiError::not_found(format!("Player {} not found", player_id)));
        }

        let limit = limit.unwrap_or(MAX_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.store.rating_history(player_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_teams_split_half_k() {
        let deltas = compute_settlement([1500, 1500], [1500, 1500], Team::One, 32.0);
        assert_eq!(deltas.expected_team1, 0.5);
        assert_eq!(deltas.team1_delta, 16);
        assert_eq!(deltas.team2_delta, -16);
    }

    #[test]
    fn test_team_rating_is_mean() {
        assert_eq!(team_rating([1400, 1601]), 1500.5);
    }

    #[test]
    fn test_expected_scores_are_complementary() {
        let e = expected_score(1600.0, 1400.0);
        assert!((e + expected_score(1400.0, 1600.0) - 1.0).abs() < 1e-12);
        assert!((e - 0.759746926647958).abs() < 1e-9);
    }

    #[test]
    fn test_upset_pays_more_than_expected_win() {
        let favourite_wins = compute_settlement([1600, 1600], [1400, 1400], Team::One, 32.0);
        let underdog_wins = compute_settlement([1600, 1600], [1400, 1400], Team::Two, 32.0);

        // 32 * (1 - 0.7597) = 7.69
        assert_eq!(favourite_wins.team1_delta, 8);
        // 32 * 0.7597 = 24.31
        assert_eq!(underdog_wins.team2_delta, 24);
        assert_eq!(underdog_wins.team1_delta, -24);
    }

    #[test]
    fn test_deltas_always_sum_to_zero() {
        let cases = [
            ([1500, 1500], [1500, 1500]),
            ([1723, 1411], [1580, 1499]),
            ([2100, 900], [1500, 1500]),
            ([1000, 1001], [1999, 2000]),
        ];
        for (team1, team2) in cases {
            for winner in [Team::One, Team::Two] {
                let d = compute_settlement(team1, team2, winner, 32.0);
                assert_eq!(d.team1_delta + d.team2_delta, 0);
                let winner_delta = match winner {
                    Team::One => d.team1_delta,
                    Team::Two => d.team2_delta,
                };
                assert!(winner_delta >= 0);
            }
        }
    }
}
