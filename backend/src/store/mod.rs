//! Durable state behind the claim, match and settlement services.
//!
//! Every mutation happens inside a [`StoreTxn`]. A transaction that is
//! dropped without [`StoreTxn::commit`] (error path, panic, or the
//! caller's future being cancelled) leaves no trace in the store.
//!
//! Guarded transitions are compare-and-set operations: the store checks
//! the precondition and performs the write as one step, and reports
//! whether the write happened.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    LeaderboardEntry, Match, MatchStatus, Player, PlayerSummary, RatingEvent,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Serialization failure or deadlock; the whole transaction may be retried.
    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        let code = err
            .as_database_error()
            .and_then(|db| db.code().map(|c| c.into_owned()));

        match code.as_deref() {
            // serialization_failure, deadlock_detected
            Some("40001") | Some("40P01") => StoreError::Transient(err.to_string()),
            // unique_violation
            Some("23505") => StoreError::UniqueViolation(err.to_string()),
            _ => StoreError::Database(err),
        }
    }
}

/// Shared store handle used by all services.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a scoped transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTxn>>;

    /// Case-insensitive substring match on display names, ordered by name.
    async fn search_players(&self, needle: &str, limit: i64) -> StoreResult<Vec<PlayerSummary>>;

    async fn get_player(&self, id: Uuid) -> StoreResult<Option<Player>>;

    /// Summaries for the given ids; unknown ids are skipped.
    async fn player_summaries(&self, ids: &[Uuid]) -> StoreResult<Vec<PlayerSummary>>;

    /// Players ordered by rating, highest first.
    async fn leaderboard(&self, limit: i64) -> StoreResult<Vec<LeaderboardEntry>>;

    /// A player's ledger rows, newest first.
    async fn rating_history(&self, player_id: Uuid, limit: i64) -> StoreResult<Vec<RatingEvent>>;

    async fn get_match(&self, id: Uuid) -> StoreResult<Option<Match>>;

    async fn match_events(&self, match_id: Uuid) -> StoreResult<Vec<RatingEvent>>;

    /// Matches awaiting an opponent, newest first.
    async fn pending_matches(&self, limit: i64) -> StoreResult<Vec<Match>>;

    async fn health_check(&self) -> StoreResult<()>;
}

/// One open transaction.
#[async_trait]
pub trait StoreTxn: Send {
    async fn get_player(&mut self, id: Uuid) -> StoreResult<Option<Player>>;

    /// Fails with [`StoreError::UniqueViolation`] if the display name is taken, ignoring case.
    async fn insert_player(&mut self, player: &Player) -> StoreResult<()>;

    /// Attach a credential if and only if the player is still unclaimed.
    /// Returns `false` when the player is already claimed or does not exist.
    async fn claim_player(&mut self, id: Uuid, credential_ref: &str) -> StoreResult<bool>;

    /// Read players for update; concurrent writers of the same rows wait.
    async fn lock_players(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Player>>;

    /// Persist rating, games played, wins and losses.
    async fn update_player_stats(&mut self, player: &Player) -> StoreResult<()>;

    async fn get_match(&mut self, id: Uuid) -> StoreResult<Option<Match>>;

    async fn insert_match(&mut self, m: &Match) -> StoreResult<()>;

    /// Move a match out of `pending_confirm` if and only if it is still pending.
    async fn transition_match(
        &mut self,
        id: Uuid,
        to: MatchStatus,
        confirmed_by: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn append_rating_event(&mut self, event: &RatingEvent) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
