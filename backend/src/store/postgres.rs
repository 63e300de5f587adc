//! Postgres-backed store.
//!
//! Every transaction runs at REPEATABLE READ. Guarded writes are conditional
//! `UPDATE`s whose `rows_affected()` tells the caller whether it won the
//! race; a write against a row changed by a concurrent commit fails with
//! SQLSTATE 40001, which the services retry on a fresh snapshot.
//! Settlement locks the four players with `SELECT ... FOR UPDATE` in id
//! order so that overlapping settlements queue instead of deadlocking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

use super::{Store, StoreError, StoreResult, StoreTxn};
use crate::models::{
    LeaderboardEntry, Match, MatchStatus, Player, PlayerSummary, RatingEvent, Team,
};

const PLAYER_COLUMNS: &str = "id, display_name, claimed, credential_ref, rating, \
                              games_played, wins, losses, created_at";

const MATCH_COLUMNS: &str = "id, created_at, team1_p1, team1_p2, team2_p1, team2_p2, \
                             winning_team, note, status, submitted_by, confirmed_by, resolved_at";

const EVENT_COLUMNS: &str = "match_id, player_id, created_at, rating_before, rating_after, delta";

const SET_ISOLATION: &str = "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Raw `matches` row; `winning_team` is a SMALLINT in the schema.
#[derive(Debug, FromRow)]
struct MatchRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    team1_p1: Uuid,
    team1_p2: Uuid,
    team2_p1: Uuid,
    team2_p2: Uuid,
    winning_team: i16,
    note: Option<String>,
    status: MatchStatus,
    submitted_by: Uuid,
    confirmed_by: Option<Uuid>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<MatchRow> for Match {
    type Error = StoreError;

    fn try_from(row: MatchRow) -> Result<Self, Self::Error> {
        let winning_team = u8::try_from(row.winning_team)
            .ok()
            .and_then(|n| Team::try_from(n).ok())
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "match {} has winning_team {}",
                    row.id, row.winning_team
                ))
            })?;

        Ok(Match {
            id: row.id,
            created_at: row.created_at,
            team1_p1: row.team1_p1,
            team1_p2: row.team1_p2,
            team2_p1: row.team2_p1,
            team2_p2: row.team2_p2,
            winning_team,
            note: row.note,
            status: row.status,
            submitted_by: row.submitted_by,
            confirmed_by: row.confirmed_by,
            resolved_at: row.resolved_at,
        })
    }
}

/// Open a transaction with a snapshot taken at its first statement.
async fn begin_snapshot(pool: &PgPool) -> StoreResult<Transaction<'static, Postgres>> {
    let mut tx = pool.begin().await?;
    sqlx::query(SET_ISOLATION).execute(&mut *tx).await?;
    Ok(tx)
}

/// Escape LIKE metacharacters so the needle matches literally.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTxn>> {
        let tx = begin_snapshot(&self.pool).await?;
        Ok(Box::new(PgTxn { tx }))
    }

    async fn search_players(&self, needle: &str, limit: i64) -> StoreResult<Vec<PlayerSummary>> {
        let rows = sqlx::query_as::<_, PlayerSummary>(
            r#"
            SELECT id, display_name, claimed
            FROM players
            WHERE display_name ILIKE $1 ESCAPE '\'
            ORDER BY lower(display_name)
            LIMIT $2
            "#,
        )
        .bind(like_pattern(needle))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_player(&self, id: Uuid) -> StoreResult<Option<Player>> {
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id = $1");
        let player = sqlx::query_as::<_, Player>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(player)
    }

    async fn player_summaries(&self, ids: &[Uuid]) -> StoreResult<Vec<PlayerSummary>> {
        let rows = sqlx::query_as::<_, PlayerSummary>(
            "SELECT id, display_name, claimed FROM players WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn leaderboard(&self, limit: i64) -> StoreResult<Vec<LeaderboardEntry>> {
        let rows = sqlx::query_as::<_, LeaderboardEntry>(
            r#"
            SELECT id, display_name, rating, games_played, wins, losses
            FROM players
            ORDER BY rating DESC, lower(display_name)
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn rating_history(&self, player_id: Uuid, limit: i64) -> StoreResult<Vec<RatingEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM rating_events \
             WHERE player_id = $1 ORDER BY created_at DESC LIMIT $2"
        );
        let rows = sqlx::query_as::<_, RatingEvent>(&sql)
            .bind(player_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn get_match(&self, id: Uuid) -> StoreResult<Option<Match>> {
        let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = $1");
        sqlx::query_as::<_, MatchRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Match::try_from)
            .transpose()
    }

    async fn match_events(&self, match_id: Uuid) -> StoreResult<Vec<RatingEvent>> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM rating_events WHERE match_id = $1 ORDER BY player_id"
        );
        let rows = sqlx::query_as::<_, RatingEvent>(&sql)
            .bind(match_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn pending_matches(&self, limit: i64) -> StoreResult<Vec<Match>> {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches \
             WHERE status = 'pending_confirm' ORDER BY created_at DESC LIMIT $1"
        );
        sqlx::query_as::<_, MatchRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Match::try_from)
            .collect()
    }

    async fn health_check(&self) -> StoreResult<()> {
        crate::db::health_check(&self.pool).await
    }
}

/// Rolled back by sqlx when dropped without commit.
struct PgTxn {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTxn for PgTxn {
    async fn get_player(&mut self, id: Uuid) -> StoreResult<Option<Player>> {
        let sql = format!("SELECT {PLAYER_COLUMNS} FROM players WHERE id = $1");
        let player = sqlx::query_as::<_, Player>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(player)
    }

    async fn insert_player(&mut self, player: &Player) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO players (
                id, display_name, claimed, credential_ref, rating,
                games_played, wins, losses, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(player.id)
        .bind(&player.display_name)
        .bind(player.claimed)
        .bind(&player.credential_ref)
        .bind(player.rating)
        .bind(player.games_played)
        .bind(player.wins)
        .bind(player.losses)
        .bind(player.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn claim_player(&mut self, id: Uuid, credential_ref: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE players
            SET claimed = TRUE, credential_ref = $2
            WHERE id = $1 AND claimed = FALSE
            "#,
        )
        .bind(id)
        .bind(credential_ref)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn lock_players(&mut self, ids: &[Uuid]) -> StoreResult<Vec<Player>> {
        let sql = format!(
            "SELECT {PLAYER_COLUMNS} FROM players WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        );
        let players = sqlx::query_as::<_, Player>(&sql)
            .bind(ids)
            .fetch_all(&mut *self.tx)
            .await?;
        debug!(requested = ids.len(), locked = players.len(), "Locked players");
        Ok(players)
    }

    async fn update_player_stats(&mut self, player: &Player) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE players
            SET rating = $2, games_played = $3, wins = $4, losses = $5
            WHERE id = $1
            "#,
        )
        .bind(player.id)
        .bind(player.rating)
        .bind(player.games_played)
        .bind(player.wins)
        .bind(player.losses)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Corrupt(format!("player {} vanished", player.id)));
        }
        Ok(())
    }

    async fn get_match(&mut self, id: Uuid) -> StoreResult<Option<Match>> {
        let sql = format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = $1");
        sqlx::query_as::<_, MatchRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(Match::try_from)
            .transpose()
    }

    async fn insert_match(&mut self, m: &Match) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO matches (
                id, created_at, team1_p1, team1_p2, team2_p1, team2_p2,
                winning_team, note, status, submitted_by, confirmed_by, resolved_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(m.id)
        .bind(m.created_at)
        .bind(m.team1_p1)
        .bind(m.team1_p2)
        .bind(m.team2_p1)
        .bind(m.team2_p2)
        .bind(i16::from(m.winning_team.number()))
        .bind(&m.note)
        .bind(m.status)
        .bind(m.submitted_by)
        .bind(m.confirmed_by)
        .bind(m.resolved_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn transition_match(
        &mut self,
        id: Uuid,
        to: MatchStatus,
        confirmed_by: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE matches
            SET status = $2, confirmed_by = $3, resolved_at = $4
            WHERE id = $1 AND status = 'pending_confirm'
            "#,
        )
        .bind(id)
        .bind(to)
        .bind(confirmed_by)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn append_rating_event(&mut self, event: &RatingEvent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rating_events (
                match_id, player_id, created_at, rating_before, rating_after, delta
            ) VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.match_id)
        .bind(event.player_id)
        .bind(event.created_at)
        .bind(event.rating_before)
        .bind(event.rating_after)
        .bind(event.delta)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("al"), "%al%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern(""), "%%");
    }

    async fn live_store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.unwrap();
        crate::db::run_migrations(&pool).await.unwrap();
        PgStore::new(pool)
    }

    #[tokio::test]
    #[ignore = "requires a Postgres database at DATABASE_URL"]
    async fn test_transactions_run_at_repeatable_read() {
        let store = live_store().await;
        let mut tx = begin_snapshot(&store.pool).await.unwrap();

        let level: String = sqlx::query_scalar("SHOW transaction_isolation")
            .fetch_one(&mut *tx)
            .await
            .unwrap();
        assert_eq!(level, "repeatable read");
    }

    #[tokio::test]
    #[ignore = "requires a Postgres database at DATABASE_URL"]
    async fn test_claim_on_stale_snapshot_is_transient() {
        let store = live_store().await;
        let name = format!("pg-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let player = Player::new_unclaimed(name, 1500);

        let mut txn = store.begin().await.unwrap();
        txn.insert_player(&player).await.unwrap();
        txn.commit().await.unwrap();

        // the late transaction takes its snapshot before the winner commits
        let mut late = store.begin().await.unwrap();
        assert!(late.get_player(player.id).await.unwrap().is_some());

        let mut winner = store.begin().await.unwrap();
        assert!(winner.claim_player(player.id, "first").await.unwrap());
        winner.commit().await.unwrap();

        let err = late.claim_player(player.id, "second").await.unwrap_err();
        assert!(err.is_transient(), "got {:?}", err);
        drop(late);

        let stored = store.get_player(player.id).await.unwrap().unwrap();
        assert_eq!(stored.credential_ref.as_deref(), Some("first"));
    }
}
