use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use shared::*;

use super::{AppState, ValidatedJson};
use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::products::ProductService;

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<Vec<ProductDto>>, AppError> {
    let products = ProductService::new(state.pool).list(query).await?;
    Ok(Json(products))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(product_id): Path<i32>,
) -> Result<Json<ProductDto>, AppError> {
    let product = ProductService::new(state.pool).get(product_id).await?;
    Ok(Json(product))
}

pub async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidatedJson(request): ValidatedJson<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductDto>), AppError> {
    let product = ProductService::new(state.pool)
        .create(&user, request)
        .await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(product_id): Path<i32>,
    ValidatedJson(request): ValidatedJson<UpdateProductRequest>,
) -> Result<Json<ProductDto>, AppError> {
    let product = ProductService::new(state.pool)
        .update(product_id, &user, request)
        .await?;
    Ok(Json(product))
}

pub async fn update_stock(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(product_id): Path<i32>,
    ValidatedJson(request): ValidatedJson<UpdateStockRequest>,
) -> Result<Json<ProductDto>, AppError> {
    let product = ProductService::new(state.pool)
        .update_stock(product_id, &user, request.stock)
        .await?;
    Ok(Json(product))
}

pub async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(product_id): Path<i32>,
) -> Result<StatusCode, AppError> {
    ProductService::new(state.pool)
        .delete(product_id, &user)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
