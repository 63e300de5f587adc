//! In-memory store used by tests and by `STORE_BACKEND=memory` runs.
//!
//! A transaction owns the state lock for its whole lifetime and works on a
//! staged copy. Commit publishes the copy; dropping the transaction throws
//! it away. Transactions are therefore serializable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::{Store, StoreError, StoreResult, StoreTxn};
use crate::models::{
    name_key, LeaderboardEntry, Match, MatchStatus, Player, PlayerSummary, RatingEvent,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    players: HashMap<Uuid, Player>,
    // lowercase display name -> player id
    name_index: HashMap<String, Uuid>,
    matches: HashMap<Uuid, Match>,
    events: Vec<RatingEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    failing_commits: Arc<AtomicU32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` commits abort with a transient error.
    #[cfg(test)]
    pub fn fail_next_commits(&self, n: u32) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Total ledger rows, across all matches.
    #[cfg(test)]
    pub async fn event_count(&self) -> usize {
        self.state.lock().await.events.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTxn>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTxn {
            guard,
            staged,
            failing_commits: self.failing_commits.clone(),
        }))
    }

    async fn search_players(&self, needle: &str, limit: i64) -> StoreResult<Vec<PlayerSummary>> {
        let needle = needle.to_lowercase();
        let state = self.state.lock().await;

        let mut hits: Vec<&Player> = state
            .players
            .values()
            .filter(|p| p.display_name.to_lowercase().contains(&needle))
            .collect();
        hits.sort_by_key(|p| p.name_key());

        Ok(hits
            .into_iter()
            .take(limit.max(0) as usize)
            .map(PlayerSummary::from)
            .collect())
    }

    async fn get_player(&self, id: Uuid) -> StoreResult<Option<Player>> {
        Ok(self.state.lock().await.players.get(&id).cloned())
    }

    async fn player_summaries(&self, ids: &[Uuid]) -> StoreResult<Vec<PlayerSummary>> {
        let state = self.state.lock().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.players.get(id))
            .map(PlayerSummary::from)
            .collect())
    }

    async fn leaderboard(&self, limit: i64) -> StoreResult<Vec<LeaderboardEntry>> {
        let state = self.state.lock().await;

        let mut players: Vec<&Player> = state.players.values().collect();
        players.sort_by(|a, b| {
            b.rating
                .cmp(&a.rating)
                .then_with(|| a.name_key().cmp(&b.name_key()))
        });

        Ok(players
            .into_iter()
            .take(limit.max(0) as usize)
            .map(LeaderboardEntry::from)
            .collect())
    }

    async fn rating_history(&self, player_id: Uuid, limit: i64) -> StoreResult<Vec<RatingEvent>> {
        let state = self.state.lock().await;

        // Ledger is append-only, so reverse insertion order is newest first.
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| e.player_id == player_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_match(&self, id: Uuid) -> StoreResult<Option<Match>> {
        Ok(self.state.lock().await.matches.get(&id).cloned())
    }

    async fn match_events(&self, match_id: Uuid) -> StoreResult<Vec<RatingEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.match_id == match_id)
            .cloned()
            .collect())
    }

    async fn pending_matches(&self, limit: i64) -> StoreResult<Vec<Match>> {
        let state = self.state.lock().await;

        let mut pending: Vec<&Match> = state
            .matches
            .values()
            .filter(|m| m.status == MatchStatus::PendingConfirm)
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(pending
            .into_iter()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

struct MemoryTxn {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    failing_commits: Arc<AtomicU32>,
}

#[async_trait]
impl StoreTxn for MemoryTxn {
    async fn get_player(&mut self, id: Uuid) -> StoreResult<Option<Player>> {
        Ok(self.staged.players.get(&id).cloned())
    }

    async fn insert_player(&mut self, player: &Player) -> StoreResult<()> {
        let key = player.name_key();
        if self.staged.name_index.contains_key(&key) {
            return Err(StoreError::UniqueViolation(format!(
                "display name '{}' already exists",
                player.display_name
            )));
        }
        if self.staged.players.contains_key(&player.id) {
            return Err(StoreError::UniqueViolation(format!(
                "player id {} already exists",
                player.id
            )));
        }

        self.staged.name_index.insert(key, player.id);
        self.staged.players.insert(player.id, player.clone());
        Ok(())
    }

    async fn claim_player(&mut self, id: Uuid, credential_ref: &str) -> StoreResult<bool> {
        match self.staged.players.get_mut(&id) {
            Some(player) if !player.claimed => {
                player.claimed = true;
                player.credential_ref = Some(credential_ref.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn lock_players(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Player>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.staged.players.get(id).cloned())
            .collect())
    }

    async fn update_player_stats(&mut self, player: &Player) -> StoreResult<()> {
        let stored = self
            .staged
            .players
            .get_mut(&player.id)
            .ok_or_else(|| StoreError::Corrupt(format!("player {} vanished", player.id)))?;

        stored.rating = player.rating;
        stored.games_played = player.games_played;
        stored.wins = player.wins;
        stored.losses = player.losses;
        Ok(())
    }

    async fn get_match(&mut self, id: Uuid) -> StoreResult<Option<Match>> {
        Ok(self.staged.matches.get(&id).cloned())
    }

    async fn insert_match(&mut self, m: &Match) -> StoreResult<()> {
        if self.staged.matches.contains_key(&m.id) {
            return Err(StoreError::UniqueViolation(format!("match {} already exists", m.id)));
        }
        self.staged.matches.insert(m.id, m.clone());
        Ok(())
    }

    async fn transition_match(
        &mut self,
        id: Uuid,
        to: MatchStatus,
        confirmed_by: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        match self.staged.matches.get_mut(&id) {
            Some(m) if m.status.can_transition_to(&to) => {
                m.status = to;
                m.confirmed_by = Some(confirmed_by);
                m.resolved_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_rating_event(&mut self, event: &RatingEvent) -> StoreResult<()> {
        let duplicate = self
            .staged
            .events
            .iter()
            .any(|e| e.match_id == event.match_id && e.player_id == event.player_id);
        if duplicate {
            return Err(StoreError::UniqueViolation(format!(
                "rating event for match {} and player {} already exists",
                event.match_id, event.player_id
            )));
        }
        self.staged.events.push(event.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTxn {
            mut guard,
            staged,
            failing_commits,
        } = *self;

        let injected = failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!("Injected commit failure, discarding staged state");
            return Err(StoreError::Transient("injected commit failure".to_string()));
        }

        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_transaction_rolls_back() {
        let store = MemoryStore::new();
        let player = Player::new_unclaimed("Ghost", 1500);

        {
            let mut txn = store.begin().await.unwrap();
            txn.insert_player(&player).await.unwrap();
            // dropped without commit
        }

        assert!(store.get_player(player.id).await.unwrap().is_none());
        assert!(store.search_players("ghost", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_name_uniqueness_ignores_case() {
        let store = MemoryStore::new();

        let mut txn = store.begin().await.unwrap();
        txn.insert_player(&Player::new_unclaimed("Al", 1500)).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin().await.unwrap();
        let err = txn
            .insert_player(&Player::new_unclaimed("aL", 1500))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_set() {
        let store = MemoryStore::new();
        let player = Player::new_unclaimed("Dana", 1500);

        let mut txn = store.begin().await.unwrap();
        txn.insert_player(&player).await.unwrap();
        assert!(txn.claim_player(player.id, "first").await.unwrap());
        assert!(!txn.claim_player(player.id, "second").await.unwrap());
        assert!(!txn.claim_player(Uuid::new_v4(), "nobody").await.unwrap());
        txn.commit().await.unwrap();

        let stored = store.get_player(player.id).await.unwrap().unwrap();
        assert_eq!(stored.credential_ref.as_deref(), Some("first"));
    }

    fn pending_match(submitted_by: Uuid) -> Match {
        Match {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            team1_p1: submitted_by,
            team1_p2: Uuid::new_v4(),
            team2_p1: Uuid::new_v4(),
            team2_p2: Uuid::new_v4(),
            winning_team: crate::models::Team::One,
            note: None,
            status: MatchStatus::PendingConfirm,
            submitted_by,
            confirmed_by: None,
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = MemoryStore::new();
        let m = pending_match(Uuid::new_v4());
        let (first, second) = (m.team2_p1, m.team2_p2);

        let mut txn = store.begin().await.unwrap();
        txn.insert_match(&m).await.unwrap();
        assert!(txn
            .transition_match(m.id, MatchStatus::Confirmed, first, Utc::now())
            .await
            .unwrap());
        assert!(!txn
            .transition_match(m.id, MatchStatus::Rejected, second, Utc::now())
            .await
            .unwrap());
        assert!(!txn
            .transition_match(Uuid::new_v4(), MatchStatus::Confirmed, first, Utc::now())
            .await
            .unwrap());
        txn.commit().await.unwrap();

        let stored = store.get_match(m.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::Confirmed);
        assert_eq!(stored.confirmed_by, Some(first));

        let mut txn = store.begin().await.unwrap();
        assert!(!txn
            .transition_match(m.id, MatchStatus::Rejected, second, Utc::now())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_player_summaries_skip_unknown_ids() {
        let store = MemoryStore::new();
        let player = Player::new_unclaimed("Finn", 1500);
        let mut txn = store.begin().await.unwrap();
        txn.insert_player(&player).await.unwrap();
        txn.commit().await.unwrap();

        let found = store
            .player_summaries(&[player.id, Uuid::new_v4()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].display_name, "Finn");
    }

    #[tokio::test]
    async fn test_injected_commit_failure_discards_writes() {
        let store = MemoryStore::new();
        store.fail_next_commits(1);
        let player = Player::new_unclaimed("Eve", 1500);

        let mut txn = store.begin().await.unwrap();
        txn.insert_player(&player).await.unwrap();
        let err = txn.commit().await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.get_player(player.id).await.unwrap().is_none());

        let mut txn = store.begin().await.unwrap();
        txn.insert_player(&player).await.unwrap();
        txn.commit().await.unwrap();
        assert!(store.get_player(player.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive_substring_in_name_order() {
        let store = MemoryStore::new();
        let mut txn = store.begin().await.unwrap();
        for name in ["zed", "Alfred", "freda", "Bob"] {
            txn.insert_player(&Player::new_unclaimed(name, 1500)).await.unwrap();
        }
        txn.commit().await.unwrap();

        let names: Vec<String> = store
            .search_players("FRED", 50)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.display_name)
            .collect();
        assert_eq!(names, vec!["Alfred", "freda"]);

        assert_eq!(store.search_players("", 2).await.unwrap().len(), 2);
    }
}
