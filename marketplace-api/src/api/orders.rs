use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use shared::*;

use super::{AppState, ValidatedJson};
use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::orders::OrderService;

pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(request): ValidatedJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderDto>), AppError> {
    let order = OrderService::new(state.pool)
        .place_order(user.id, request.items)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_mine(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<Vec<OrderDto>>, AppError> {
    let orders = OrderService::new(state.pool).list_for_buyer(user.id).await?;
    Ok(Json(orders))
}

pub async fn list_all(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<OrderDto>>, AppError> {
    user.require_admin()?;
    let orders = OrderService::new(state.pool).list_all(page).await?;
    Ok(Json(orders))
}

pub async fn get_one(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(order_id): Path<i32>,
) -> Result<Json<OrderDto>, AppError> {
    let order = OrderService::new(state.pool)
        .find_one(order_id, &user)
        .await?;
    Ok(Json(order))
}

pub async fn update_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(order_id): Path<i32>,
    ValidatedJson(request): ValidatedJson<UpdateOrderStatusRequest>,
) -> Result<Json<OrderDto>, AppError> {
    user.require_admin()?;
    let order = OrderService::new(state.pool)
        .update_status(order_id, request.status)
        .await?;
    Ok(Json(order))
}
