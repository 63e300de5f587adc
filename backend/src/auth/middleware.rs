use crate::api_error::ApiError;
use crate::auth::jwt_service::{Claims, JwtError};
use crate::http::AppState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error, HttpMessage,
};
use futures::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Authentication middleware for routes that act on behalf of a player.
///
/// Validates `Authorization: Bearer <token>` against the `JwtService` held
/// in [`AppState`] and stores the [`Claims`] in the request extensions.
#[derive(Clone, Copy, Default)]
pub struct AuthMiddleware;

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        Box::pin(async move {
            let state = req
                .app_data::<web::Data<AppState>>()
                .cloned()
                .ok_or_else(|| ApiError::internal_error("application state not configured"))?;

            let token = req
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_owned);

            let Some(token) = token else {
                warn!(path = %req.path(), "Missing or malformed authorization header");
                return Err(ApiError::unauthorized("Missing bearer token").into());
            };

            match state.jwt.validate_token(&token) {
                Ok(claims) => {
                    debug!(player_id = %claims.sub, "Request authenticated");
                    req.extensions_mut().insert(claims);
                    service.call(req).await
                }
                Err(JwtError::TokenExpired) => {
                    warn!("Token expired");
                    Err(ApiError::unauthorized("Token expired").into())
                }
                Err(e) => {
                    warn!(error = %e, "Token validation failed");
                    Err(ApiError::unauthorized("Invalid token").into())
                }
            }
        })
    }
}

/// Identifies the authenticated caller inside route handlers.
pub trait ClaimsExt {
    fn claims(&self) -> Option<Claims>;
    fn player_id(&self) -> Option<Uuid>;
}

impl ClaimsExt for actix_web::HttpRequest {
    fn claims(&self) -> Option<Claims> {
        self.extensions().get::<Claims>().cloned()
    }

    fn player_id(&self) -> Option<Uuid> {
        self.claims().and_then(|c| c.player_id().ok())
    }
}
