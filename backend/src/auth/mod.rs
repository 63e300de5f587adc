pub mod credential;
pub mod jwt_service;
pub mod middleware;

pub use credential::{BcryptHasher, CredentialHasher};
pub use jwt_service::{Claims, JwtConfig, JwtError, JwtService};
pub use middleware::{AuthMiddleware, ClaimsExt};
