use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::api_error::ApiError;
use crate::models::{
    Decision, Match, MatchDetail, MatchStatus, PendingMatch, Settlement, SubmitMatchDTO, Team,
    MAX_NOTE_CHARS,
};
use crate::service::rating_service::{apply_settlement, DEFAULT_K_FACTOR};
use crate::service::retry::{with_retry, RetryPolicy};
use crate::store::Store;

pub const MAX_PENDING_LIMIT: i64 = 50;

/// A match after `resolve`, with the settlement it produced on confirm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    #[serde(flatten)]
    pub match_data: Match,
    pub settlement: Option<Settlement>,
}

/// Match Lifecycle Engine: submission and opponent confirmation.
///
/// `pending_confirm` moves to `confirmed` or `rejected` exactly once, and
/// a confirmation commits together with its rating settlement.
pub struct MatchService {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
    k_factor: f64,
}

impl MatchService {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            k_factor: DEFAULT_K_FACTOR,
        }
    }

    pub fn with_k_factor(mut self, k_factor: f64) -> Self {
        self.k_factor = k_factor;
        self
    }

    // =============================================================================
    // SUBMIT
    // =============================================================================

    /// Record a reported match as `pending_confirm`. No rating effect.
    pub async fn submit(&self, dto: SubmitMatchDTO, submitted_by: Uuid) -> Result<Match, ApiError> {
        dto.validate()?;

        let participants = dto.participants();
        let distinct: HashSet<Uuid> = participants.iter().copied().collect();
        if distinct.len() != participants.len() {
            return Err(ApiError::bad_request("All four players must be distinct"));
        }
        if !distinct.contains(&submitted_by) {
            return Err(ApiError::bad_request("Submitter must be one of the four players"));
        }

        let winning_team = Team::try_from(dto.winning_team).map_err(ApiError::bad_request)?;
        let note = dto.trimmed_note().map(str::to_string);
        if note.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTE_CHARS) {
            return Err(ApiError::bad_request(format!(
                "Note must be at most {} characters",
                MAX_NOTE_CHARS
            )));
        }

        let new_match = Match {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            team1_p1: dto.team1[0],
            team1_p2: dto.team1[1],
            team2_p1: dto.team2[0],
            team2_p2: dto.team2[1],
            winning_team,
            note,
            status: MatchStatus::PendingConfirm,
            submitted_by,
            confirmed_by: None,
            resolved_at: None,
        };
        let new_match = &new_match;

        with_retry(&self.retry, "submit match", move || async move {
            let mut txn = self.store.begin().await?;
            for id in new_match.participants() {
                match txn.get_player(id).await? {
                    None => return Err(ApiError::not_found(format!("Player {} not found", id))),
                    Some(p) if !p.claimed => {
                        return Err(ApiError::bad_request(format!(
                            "Player '{}' has not been claimed yet",
                            p.display_name
                        )))
                    }
                    Some(_) => {}
                }
            }
            txn.insert_match(new_match).await?;
            txn.commit().await?;
            Ok(())
        })
        .await?;

        info!(
            match_id = %new_match.id,
            submitted_by = %submitted_by,
            winning_team = new_match.winning_team.number(),
            "Match submitted, awaiting opponent confirmation"
        );
        Ok(new_match.clone())
    }

    // =============================================================================
    // RESOLVE
    // =============================================================================

    /// Confirm or reject a pending match on behalf of `actor`.
    ///
    /// Only a player on the team opposite the submitter may resolve. The
    /// status write is a compare-and-set, so of several concurrent calls
    /// exactly one succeeds and the rest see `AlreadyResolved`.
    pub async fn resolve(
        &self,
        match_id: Uuid,
        actor: Uuid,
        decision: Decision,
    ) -> Result<Resolution, ApiError> {
        let k_factor = self.k_factor;

        let resolution = with_retry(&self.retry, "resolve match", move || async move {
            let mut txn = self.store.begin().await?;

            let mut m = txn
                .get_match(match_id)
                .await?
                .ok_or_else(|| ApiError::not_found(format!("Match {} not found", match_id)))?;

            if !m.can_be_resolved_by(actor) {
                warn!(
                    match_id = %match_id,
                    actor = %actor,
                    submitted_by = %m.submitted_by,
                    "Resolve attempted by a player not on the opposing team"
                );
                return Err(ApiError::forbidden(
                    "Only an opponent of the submitter may confirm or reject this match",
                ));
            }

            let target = decision.target_status();
            if m.status.is_terminal() {
                debug!(match_id = %match_id, status = %m.status, "Match already resolved");
                return Err(ApiError::AlreadyResolved);
            }

            let now = Utc::now();
            if !txn.transition_match(match_id, target, actor, now).await? {
                warn!(match_id = %match_id, actor = %actor, "Resolve lost the race");
                return Err(ApiError::AlreadyResolved);
            }
            m.status = target;
            m.confirmed_by = Some(actor);
            m.resolved_at = Some(now);

            let settlement = match decision {
                Decision::Confirm => Some(apply_settlement(&mut *txn, &m, k_factor, now).await?),
                Decision::Reject => None,
            };

            txn.commit().await?;
            Ok(Resolution {
                match_data: m,
                settlement,
            })
        })
        .await?;

        info!(
            match_id = %match_id,
            actor = %actor,
            status = %resolution.match_data.status,
            "Match resolved"
        );
        Ok(resolution)
    }

    // =============================================================================
    // QUERIES
    // =============================================================================

    pub async fn get_match(&self, match_id: Uuid) -> Result<MatchDetail, ApiError> {
        let match_data = self
            .store
            .get_match(match_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Match {} not found", match_id)))?;
        let rating_events = self.store.match_events(match_id).await?;

        Ok(MatchDetail {
            match_data,
            rating_events,
        })
    }

    /// Matches awaiting an opponent, newest first, with participant names.
    pub async fn list_pending(&self, limit: Option<i64>) -> Result<Vec<PendingMatch>, ApiError> {
        let limit = limit.unwrap_or(MAX_PENDING_LIMIT).clamp(1, MAX_PENDING_LIMIT);
        let pending = self.store.pending_matches(limit).await?;

        let ids: Vec<Uuid> = pending
            .iter()
            .flat_map(Match::participants)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let names: HashMap<Uuid, String> = self
            .store
            .player_summaries(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p.display_name))
            .collect();

        Ok(pending
            .into_iter()
            .map(|m| PendingMatch {
                names: m
                    .participants()
                    .iter()
                    .filter_map(|id| names.get(id).map(|name| (*id, name.clone())))
                    .collect(),
                match_data: m,
            })
            .collect())
    }
}
