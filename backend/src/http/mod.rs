pub mod health;
pub mod match_handler;
pub mod player_handler;

use actix_web::web;
use std::sync::Arc;

use crate::auth::{AuthMiddleware, BcryptHasher, JwtConfig, JwtService};
use crate::config::{AuthConfig, RatingConfig};
use crate::service::{ClaimService, MatchService, RatingService, RetryPolicy};
use crate::store::Store;

/// Shared state handed to every handler.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub jwt: Arc<JwtService>,
    pub claim_service: Arc<ClaimService>,
    pub match_service: Arc<MatchService>,
    pub rating_service: Arc<RatingService>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        auth: &AuthConfig,
        rating: &RatingConfig,
        retry_attempts: usize,
    ) -> Self {
        let jwt = Arc::new(JwtService::new(JwtConfig::from_auth_config(auth)));
        let retry = RetryPolicy::with_attempts(retry_attempts);

        let claim_service = ClaimService::new(
            store.clone(),
            Arc::new(BcryptHasher::new(auth.bcrypt_cost)),
            jwt.clone(),
            retry.clone(),
        )
        .with_initial_rating(rating.initial_rating);

        let match_service =
            MatchService::new(store.clone(), retry).with_k_factor(rating.k_factor);

        Self {
            rating_service: Arc::new(RatingService::new(store.clone())),
            claim_service: Arc::new(claim_service),
            match_service: Arc::new(match_service),
            jwt,
            store,
        }
    }
}

/// Mount every route under `/api`.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health::health_check))
            .route("/leaderboard", web::get().to(player_handler::leaderboard))
            .service(
                web::scope("/players")
                    .route("", web::post().to(player_handler::create_player))
                    .route("/search", web::get().to(player_handler::search_players))
                    .route("/{id}", web::get().to(player_handler::get_player))
                    .route("/{id}/claim", web::post().to(player_handler::claim_player))
                    .route("/{id}/session", web::post().to(player_handler::sign_in))
                    .route("/{id}/history", web::get().to(player_handler::player_history)),
            )
            .service(
                web::scope("/matches")
                    .service(
                        web::resource("")
                            .route(web::post().to(match_handler::submit_match))
                            .wrap(AuthMiddleware),
                    )
                    .route("/pending", web::get().to(match_handler::list_pending))
                    .route("/{id}", web::get().to(match_handler::get_match))
                    .service(
                        web::resource("/{id}/resolve")
                            .route(web::post().to(match_handler::resolve_match))
                            .wrap(AuthMiddleware),
                    ),
            ),
    );
}
