use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Rating every new player starts from unless configured otherwise.
pub const DEFAULT_INITIAL_RATING: i32 = 1500;

/// bcrypt only reads the first 72 bytes of its input.
pub const MAX_SECRET_BYTES: usize = 72;

/// Player identity and rating record.
///
/// `display_name` is unique ignoring case across claimed and unclaimed
/// players. `credential_ref` is present iff `claimed`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Player {
    pub id: Uuid,
    pub display_name: String,
    pub claimed: bool,
    #[serde(skip_serializing, default)]
    pub credential_ref: Option<String>,
    pub rating: i32,
    pub games_played: i32,
    pub wins: i32,
    pub losses: i32,
    pub created_at: DateTime<Utc>,
}

impl Player {
    /// A fresh, unclaimed placeholder with no games.
    pub fn new_unclaimed(display_name: impl Into<String>, rating: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            claimed: false,
            credential_ref: None,
            rating,
            games_played: 0,
            wins: 0,
            losses: 0,
            created_at: Utc::now(),
        }
    }

    /// Key used for the case-insensitive uniqueness of display names.
    pub fn name_key(&self) -> String {
        name_key(&self.display_name)
    }

    /// Record a settled game against this player.
    pub fn record_result(&mut self, delta: i32, won: bool) {
        self.rating += delta;
        self.games_played += 1;
        if won {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
    }
}

pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Search hit for the claim flow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct PlayerSummary {
    pub id: Uuid,
    pub display_name: String,
    pub claimed: bool,
}

impl From<&Player> for PlayerSummary {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id,
            display_name: player.display_name.clone(),
            claimed: player.claimed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct LeaderboardEntry {
    pub id: Uuid,
    pub display_name: String,
    pub rating: i32,
    pub games_played: i32,
    pub wins: i32,
    pub losses: i32,
}

impl From<&Player> for LeaderboardEntry {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id,
            display_name: player.display_name.clone(),
            rating: player.rating,
            games_played: player.games_played,
            wins: player.wins,
            losses: player.losses,
        }
    }
}

// ===== API DTOs =====

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
pub struct CreatePlayerDTO {
    #[validate(length(min = 2, max = 24, message = "display name must be 2 to 24 characters"))]
    pub display_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePlayerResponse {
    pub id: Uuid,
}

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
pub struct ClaimPlayerDTO {
    #[validate(
        length(min = 8, message = "secret must be at least 8 characters"),
        custom(function = "validate_secret_bytes")
    )]
    pub secret: String,
}

fn validate_secret_bytes(secret: &str) -> Result<(), ValidationError> {
    if secret.len() > MAX_SECRET_BYTES {
        return Err(ValidationError::new("secret_too_long")
            .with_message(format!("secret must be at most {} bytes", MAX_SECRET_BYTES).into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SignInDTO {
    pub secret: String,
}

/// Proof that the bearer holds a claimed player's credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub player_id: Uuid,
}
