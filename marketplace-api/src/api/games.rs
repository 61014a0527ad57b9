use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use shared::*;

use super::{AppState, ValidatedJson};
use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::games::GameService;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<GameDto>>, AppError> {
    let games = GameService::new(state.pool).list().await?;
    Ok(Json(games))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(game_id): Path<i32>,
) -> Result<Json<GameDto>, AppError> {
    let game = GameService::new(state.pool).get(game_id).await?;
    Ok(Json(game))
}

pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(request): ValidatedJson<CreateGameRequest>,
) -> Result<(StatusCode, Json<GameDto>), AppError> {
    user.require_admin()?;
    let game = GameService::new(state.pool).create(request).await?;
    Ok((StatusCode::CREATED, Json(game)))
}

pub async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(game_id): Path<i32>,
    ValidatedJson(request): ValidatedJson<UpdateGameRequest>,
) -> Result<Json<GameDto>, AppError> {
    user.require_admin()?;
    let game = GameService::new(state.pool).update(game_id, request).await?;
    Ok(Json(game))
}

pub async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(game_id): Path<i32>,
) -> Result<StatusCode, AppError> {
    user.require_admin()?;
    GameService::new(state.pool).delete(game_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
