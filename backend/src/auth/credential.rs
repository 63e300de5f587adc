use bcrypt::{hash, verify};

use crate::api_error::ApiError;

/// Turns a player's secret into a stored credential reference and checks it later.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, secret: &str) -> Result<String, ApiError>;

    fn verify(&self, secret: &str, credential_ref: &str) -> Result<bool, ApiError>;
}

#[derive(Debug, Clone)]
pub struct BcryptHasher {
    cost: u32,
}

impl BcryptHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

impl CredentialHasher for BcryptHasher {
    fn hash(&self, secret: &str) -> Result<String, ApiError> {
        hash(secret, self.cost)
            .map_err(|e| ApiError::internal_error(format!("Password hashing failed: {}", e)))
    }

    fn verify(&self, secret: &str, credential_ref: &str) -> Result<bool, ApiError> {
        verify(secret, credential_ref)
            .map_err(|e| ApiError::internal_error(format!("Password verification failed: {}", e)))
    }
}
