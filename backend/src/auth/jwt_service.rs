use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::models::Session;

/// Session token errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Token generation failed: {0}")]
    TokenGeneration(String),

    #[error("Token validation failed: {0}")]
    TokenValidation(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    InvalidToken,
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
            _ => JwtError::TokenValidation(err.to_string()),
        }
    }
}

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // player id
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl Claims {
    pub fn player_id(&self) -> Result<Uuid, JwtError> {
        Uuid::parse_str(&self.sub).map_err(|_| JwtError::InvalidToken)
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret_key: String,
    pub access_token_expiry: Duration,
    pub algorithm: Algorithm,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl JwtConfig {
    pub fn from_auth_config(auth: &AuthConfig) -> Self {
        Self {
            secret_key: auth.jwt_secret.clone(),
            access_token_expiry: Duration::seconds(auth.jwt_expires_in_secs),
            algorithm: Algorithm::HS256,
            issuer: Some(auth.jwt_issuer.clone()),
            audience: Some(format!("{} API", auth.jwt_issuer)),
        }
    }
}

/// Issues and checks the bearer tokens handed out at sign-in.
///
/// Keys and the validation rules are derived once from [`JwtConfig`].
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let mut validation = Validation::new(config.algorithm);
        if let Some(issuer) = config.issuer.as_deref() {
            validation.set_issuer(&[issuer]);
        }
        if let Some(audience) = config.audience.as_deref() {
            validation.set_audience(&[audience]);
        }

        Self {
            encoding_key: EncodingKey::from_secret(config.secret_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret_key.as_bytes()),
            validation,
            config,
        }
    }

    /// Sign a session token whose subject is the player.
    pub fn issue_session(&self, player_id: Uuid) -> Result<Session, JwtError> {
        let now = Utc::now();
        let claims = Claims {
            sub: player_id.to_string(),
            exp: (now + self.config.access_token_expiry).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
        };

        let access_token = encode(&Header::new(self.config.algorithm), &claims, &self.encoding_key)
            .map_err(|e| JwtError::TokenGeneration(e.to_string()))?;

        info!(player_id = %player_id, jti = %claims.jti, "Session token issued");

        Ok(Session {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_expiry.num_seconds(),
            player_id,
        })
    }

    /// Check signature, expiry, issuer and audience; return the claims.
    pub fn validate_token(&self, token: &str) -> Result<Claims, JwtError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims;
        // subject must be a player id
        claims.player_id()?;

        debug!(sub = %claims.sub, "Token validated");
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret_key: "test_secret_key_for_unit_testing_12345".to_string(),
            access_token_expiry: Duration::minutes(15),
            algorithm: Algorithm::HS256,
            issuer: Some("CapsElo-Test".to_string()),
            audience: Some("CapsElo-Test API".to_string()),
        }
    }

    #[test]
    fn test_issue_and_validate_round_trip() {
        let service = JwtService::new(test_config());
        let player_id = Uuid::new_v4();

        let session = service.issue_session(player_id).unwrap();
        assert_eq!(session.token_type, "Bearer");
        assert_eq!(session.expires_in, 15 * 60);
        assert_eq!(session.player_id, player_id);

        let claims = service.validate_token(&session.access_token).unwrap();
        assert_eq!(claims.player_id().unwrap(), player_id);
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut config = test_config();
        // Beyond the default 60s leeway.
        config.access_token_expiry = Duration::minutes(-5);
        let service = JwtService::new(config);

        let session = service.issue_session(Uuid::new_v4()).unwrap();
        let result = service.validate_token(&session.access_token);
        assert!(matches!(result, Err(JwtError::TokenExpired)));
    }

    #[test]
    fn test_token_signed_with_other_secret_rejected() {
        let issuer = JwtService::new(test_config());
        let mut other = test_config();
        other.secret_key = "a_completely_different_secret_value".to_string();
        let verifier = JwtService::new(other);

        let session = issuer.issue_session(Uuid::new_v4()).unwrap();
        assert!(matches!(
            verifier.validate_token(&session.access_token),
            Err(JwtError::TokenValidation(_))
        ));
    }

    #[test]
    fn test_garbage_token_rejected() {
        let service = JwtService::new(test_config());
        assert!(service.validate_token("not.a.token").is_err());
    }
}
