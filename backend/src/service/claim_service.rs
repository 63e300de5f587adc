use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::api_error::ApiError;
use crate::auth::{CredentialHasher, JwtService};
use crate::models::{
    ClaimPlayerDTO, CreatePlayerDTO, Player, PlayerSummary, Session, DEFAULT_INITIAL_RATING,
};
use crate::service::retry::{with_retry, RetryPolicy};
use crate::store::{Store, StoreError};

pub const MAX_SEARCH_LIMIT: i64 = 50;

const SIGN_IN_FAILED: &str = "Invalid player or secret";

/// Run a bcrypt call on the blocking pool so it does not stall the worker.
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal_error(format!("Credential task failed: {}", e)))?
}

/// Player identity: search, placeholder creation, one-time claim, sign-in.
pub struct ClaimService {
    store: Arc<dyn Store>,
    hasher: Arc<dyn CredentialHasher>,
    jwt: Arc<JwtService>,
    retry: RetryPolicy,
    initial_rating: i32,
}

impl ClaimService {
    pub fn new(
        store: Arc<dyn Store>,
        hasher: Arc<dyn CredentialHasher>,
        jwt: Arc<JwtService>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            hasher,
            jwt,
            retry,
            initial_rating: DEFAULT_INITIAL_RATING,
        }
    }

    pub fn with_initial_rating(mut self, rating: i32) -> Self {
        self.initial_rating = rating;
        self
    }

    /// Case-insensitive substring search over display names, ordered by name.
    pub async fn search(
        &self,
        needle: &str,
        limit: Option<i64>,
    ) -> Result<Vec<PlayerSummary>, ApiError> {
        let limit = limit.unwrap_or(MAX_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT);
        let hits = self.store.search_players(needle.trim(), limit).await?;
        debug!(needle = %needle.trim(), hits = hits.len(), "Player search");
        Ok(hits)
    }

    /// Reserve a display name as a new unclaimed player.
    pub async fn create(&self, dto: CreatePlayerDTO) -> Result<Uuid, ApiError> {
        let dto = CreatePlayerDTO {
            display_name: dto.display_name.trim().to_string(),
        };
        dto.validate()?;

        let player = Player::new_unclaimed(dto.display_name, self.initial_rating);
        let player = &player;

        with_retry(&self.retry, "create player", move || async move {
            let mut txn = self.store.begin().await?;
            match txn.insert_player(player).await {
                Ok(()) => {}
                Err(StoreError::UniqueViolation(_)) => {
                    warn!(display_name = %player.display_name, "Display name already taken");
                    return Err(ApiError::conflict(format!(
                        "Display name '{}' is already taken",
                        player.display_name
                    )));
                }
                Err(e) => return Err(e.into()),
            }
            txn.commit().await?;
            Ok(())
        })
        .await?;

        info!(player_id = %player.id, display_name = %player.display_name, "Player created");
        Ok(player.id)
    }

    /// Attach a credential to an unclaimed player. At most one claim ever wins.
    pub async fn claim(&self, player_id: Uuid, secret: &str) -> Result<(), ApiError> {
        ClaimPlayerDTO {
            secret: secret.to_string(),
        }
        .validate()?;

        // Hash before opening the transaction.
        let hasher = self.hasher.clone();
        let owned = secret.to_string();
        let credential_ref = run_blocking(move || hasher.hash(&owned)).await?;
        let credential_ref = credential_ref.as_str();

        with_retry(&self.retry, "claim player", move || async move {
            let mut txn = self.store.begin().await?;
            if txn.get_player(player_id).await?.is_none() {
                return Err(ApiError::not_found(format!("Player {} not found", player_id)));
            }
            if !txn.claim_player(player_id, credential_ref).await? {
                warn!(player_id = %player_id, "Claim lost: player already claimed");
                return Err(ApiError::AlreadyClaimed);
            }
            txn.commit().await?;
            Ok(())
        })
        .await?;

        info!(player_id = %player_id, "Player claimed");
        Ok(())
    }

    /// Exchange a claimed player's secret for a session token.
    pub async fn sign_in(&self, player_id: Uuid, secret: &str) -> Result<Session, ApiError> {
        let credential_ref = match self.store.get_player(player_id).await? {
            Some(Player {
                claimed: true,
                credential_ref: Some(credential_ref),
                ..
            }) => credential_ref,
            _ => {
                warn!(player_id = %player_id, "Sign-in for unknown or unclaimed player");
                return Err(ApiError::unauthorized(SIGN_IN_FAILED));
            }
        };

        let hasher = self.hasher.clone();
        let owned = secret.to_string();
        let verified = run_blocking(move || hasher.verify(&owned, &credential_ref)).await?;
        if !verified {
            warn!(player_id = %player_id, "Sign-in with wrong secret");
            return Err(ApiError::unauthorized(SIGN_IN_FAILED));
        }

        let session = self
            .jwt
            .issue_session(player_id)
            .map_err(|e| ApiError::internal_error(e.to_string()))?;
        info!(player_id = %player_id, "Player signed in");
        Ok(session)
    }

    pub async fn get_player(&self, player_id: Uuid) -> Result<Player, ApiError> {
        self.store
            .get_player(player_id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("Player {} not found", player_id)))
    }
}
