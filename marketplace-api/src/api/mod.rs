use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequest, Request},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use validator::Validate;

use crate::auth::JwtService;
use crate::error::AppError;
use crate::DbPool;

mod accounts;
mod games;
mod orders;
mod products;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub jwt: Arc<JwtService>,
    pub bootstrap_admin_email: Option<String>,
}

impl FromRef<AppState> for Arc<JwtService> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/auth/register", post(accounts::register))
        .route("/auth/login", post(accounts::login))
        .route("/users/me", get(accounts::me))
        .route("/users/:id/roles", post(accounts::assign_role))
        .route("/users/:id/roles/:role", delete(accounts::revoke_role))
        .route("/roles", get(accounts::list_roles).post(accounts::create_role))
        .route("/games", get(games::list).post(games::create))
        .route(
            "/games/:id",
            get(games::get_one).patch(games::update).delete(games::remove),
        )
        .route("/products", get(products::list).post(products::create))
        .route(
            "/products/:id",
            get(products::get_one)
                .patch(products::update)
                .delete(products::remove),
        )
        .route("/products/:id/stock", patch(products::update_stock))
        .route("/orders", get(orders::list_all).post(orders::create))
        .route("/orders/my", get(orders::list_mine))
        .route(
            "/orders/:id",
            get(orders::get_one).patch(orders::update_status),
        )
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn health_check() -> &'static str {
    "OK"
}

/// JSON body that has been deserialized and validated. Both failures are
/// reported as `AppError::Validation`.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(payload) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
        payload.validate()?;
        Ok(ValidatedJson(payload))
    }
}
