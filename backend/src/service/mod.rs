// Service layer: claim protocol, match lifecycle and rating settlement
pub mod claim_service;
pub mod match_service;
pub mod rating_service;
pub mod retry;

#[cfg(test)]
mod claim_service_test;

pub use claim_service::ClaimService;
pub use match_service::{MatchService, Resolution};
pub use rating_service::{compute_settlement, RatingService, SettlementDeltas};
pub use retry::{with_retry, RetryPolicy};
