use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use shared::*;

use super::{AppState, ValidatedJson};
use crate::accounts::AccountService;
use crate::auth::CurrentUser;
use crate::error::AppError;

fn service(state: AppState) -> AccountService {
    AccountService::new(state.pool, state.jwt, state.bootstrap_admin_email)
}

pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let response = service(state).register(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let response = service(state).login(request).await?;
    Ok(Json(response))
}

pub async fn me(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<UserDto>, AppError> {
    let profile = service(state).profile(user.id).await?;
    Ok(Json(profile))
}

pub async fn list_roles(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<RoleDto>>, AppError> {
    user.require_admin()?;
    let roles = service(state).list_roles().await?;
    Ok(Json(roles))
}

pub async fn create_role(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(request): ValidatedJson<CreateRoleRequest>,
) -> Result<(StatusCode, Json<RoleDto>), AppError> {
    user.require_admin()?;
    let role = service(state).create_role(request).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn assign_role(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<i32>,
    ValidatedJson(request): ValidatedJson<AssignRoleRequest>,
) -> Result<Json<UserDto>, AppError> {
    user.require_admin()?;
    let profile = service(state).assign_role(user_id, &request.role).await?;
    Ok(Json(profile))
}

pub async fn revoke_role(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((user_id, role)): Path<(i32, String)>,
) -> Result<Json<UserDto>, AppError> {
    user.require_admin()?;
    let profile = service(state).revoke_role(user_id, &role).await?;
    Ok(Json(profile))
}
