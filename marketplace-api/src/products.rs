use bigdecimal::BigDecimal;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use num_traits::Zero;
use shared::*;
use tracing::info;

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::inventory::{fits_money_column, lock_existing, set_stock, PgLedger, MAX_MONEY};
use crate::models::*;
use crate::schema::*;
use crate::DbPool;

pub struct ProductService {
    pool: DbPool,
}

impl ProductService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Active products, newest first.
    pub async fn list(&self, query: ProductQuery) -> Result<Vec<ProductDto>, AppError> {
        let mut conn = self.pool.get().await?;
        let page = query.pagination();

        let mut select = products::table
            .filter(products::is_active.eq(true))
            .select(Product::as_select())
            .into_boxed();

        if let Some(game_id) = query.game_id {
            select = select.filter(products::game_id.eq(game_id));
        }
        if let Some(seller_id) = query.seller_id {
            select = select.filter(products::seller_id.eq(seller_id));
        }

        let found = select
            .order((products::created_at.desc(), products::id.desc()))
            .offset(page.offset())
            .limit(page.limit())
            .load(&mut conn)
            .await?;

        Ok(found.into_iter().map(ProductDto::from).collect())
    }

    pub async fn get(&self, product_id: i32) -> Result<ProductDto, AppError> {
        let mut conn = self.pool.get().await?;

        let product = products::table
            .filter(products::id.eq(product_id))
            .select(Product::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::not_found(format!("product {} not found", product_id)))?;

        Ok(product.into())
    }

    pub async fn create(
        &self,
        seller: &CurrentUser,
        request: CreateProductRequest,
    ) -> Result<ProductDto, AppError> {
        if !(seller.is_seller() || seller.is_admin()) {
            return Err(AppError::forbidden("seller role required"));
        }
        check_price(&request.price)?;
        if request.stock < 0 {
            return Err(AppError::Validation("stock cannot be negative".to_string()));
        }

        let mut conn = self.pool.get().await?;

        let game_exists: bool = diesel::select(diesel::dsl::exists(
            games::table.filter(games::id.eq(request.game_id)),
        ))
        .get_result(&mut conn)
        .await?;
        if !game_exists {
            return Err(AppError::not_found(format!(
                "game {} not found",
                request.game_id
            )));
        }

        let new_product = NewProduct {
            seller_id: seller.id,
            game_id: request.game_id,
            title: request.title,
            description: request.description,
            price: request.price.with_scale(2),
            stock: request.stock,
            is_active: request.is_active,
        };

        let product = diesel::insert_into(products::table)
            .values(&new_product)
            .returning(Product::as_returning())
            .get_result(&mut conn)
            .await?;

        info!(product_id = product.id, seller_id = seller.id, "product created");
        Ok(product.into())
    }

    /// Updates product fields under the row lock so a concurrent order cannot
    /// interleave a stock write with this one.
    pub async fn update(
        &self,
        product_id: i32,
        requester: &CurrentUser,
        request: UpdateProductRequest,
    ) -> Result<ProductDto, AppError> {
        if let Some(price) = &request.price {
            check_price(price)?;
        }

        let mut conn = self.pool.get().await?;
        let requester = requester.clone();
        let product = self
            .update_tx(&mut conn, product_id, requester, request)
            .await?;

        info!(product_id, stock = product.stock, "product updated");
        Ok(product.into())
    }

    async fn update_tx(
        &self,
        conn: &mut AsyncPgConnection,
        product_id: i32,
        requester: CurrentUser,
        request: UpdateProductRequest,
    ) -> Result<Product, AppError> {
        conn.transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let mut product = {
                    let mut ledger = PgLedger::new(conn);
                    let locked = lock_existing(&mut ledger, product_id).await?;
                    ensure_can_manage(&locked, &requester)?;
                    match request.stock {
                        Some(stock) => set_stock(&mut ledger, locked, stock).await?,
                        None => locked,
                    }
                };

                let changes = ProductChanges {
                    title: request.title,
                    description: request.description,
                    price: request.price.map(|p| p.with_scale(2)),
                    is_active: request.is_active,
                };

                if has_changes(&changes) {
                    product = diesel::update(products::table.filter(products::id.eq(product_id)))
                        .set((changes, products::updated_at.eq(chrono::Utc::now())))
                        .returning(Product::as_returning())
                        .get_result(conn)
                        .await?;
                }

                Ok(product)
            })
        })
        .await
    }

    /// Sets an absolute stock level: lock, validate, write, commit.
    pub async fn update_stock(
        &self,
        product_id: i32,
        requester: &CurrentUser,
        new_stock: i32,
    ) -> Result<ProductDto, AppError> {
        let mut conn = self.pool.get().await?;
        let requester = requester.clone();
        let product = self
            .update_stock_tx(&mut conn, product_id, requester, new_stock)
            .await?;

        info!(product_id, stock = product.stock, "stock updated");
        Ok(product.into())
    }

    async fn update_stock_tx(
        &self,
        conn: &mut AsyncPgConnection,
        product_id: i32,
        requester: CurrentUser,
        new_stock: i32,
    ) -> Result<Product, AppError> {
        conn.transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let mut ledger = PgLedger::new(conn);
                let locked = lock_existing(&mut ledger, product_id).await?;
                ensure_can_manage(&locked, &requester)?;
                set_stock(&mut ledger, locked, new_stock).await
            })
        })
        .await
    }

    /// Deletes a product nobody has ordered yet. Products referenced by order
    /// items are kept for order history.
    pub async fn delete(&self, product_id: i32, requester: &CurrentUser) -> Result<(), AppError> {
        let mut conn = self.pool.get().await?;

        let product = products::table
            .filter(products::id.eq(product_id))
            .select(Product::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::not_found(format!("product {} not found", product_id)))?;
        ensure_can_manage(&product, requester)?;

        let referenced: bool = diesel::select(diesel::dsl::exists(
            order_items::table.filter(order_items::product_id.eq(product_id)),
        ))
        .get_result(&mut conn)
        .await?;
        if referenced {
            return Err(AppError::Conflict(format!(
                "product {} is referenced by existing orders; deactivate it instead",
                product_id
            )));
        }

        diesel::delete(products::table.filter(products::id.eq(product_id)))
            .execute(&mut conn)
            .await?;

        info!(product_id, "product deleted");
        Ok(())
    }
}

pub fn ensure_can_manage(product: &Product, requester: &CurrentUser) -> Result<(), AppError> {
    if requester.is_admin() || product.seller_id == requester.id {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "product {} belongs to another seller",
            product.id
        )))
    }
}

/// Prices are non-negative, fit the money column and have at most two
/// decimal places.
pub fn check_price(price: &BigDecimal) -> Result<(), AppError> {
    if *price < BigDecimal::zero() {
        return Err(AppError::Validation("price cannot be negative".to_string()));
    }
    if !fits_money_column(price) {
        return Err(AppError::Validation(format!(
            "price cannot exceed {}",
            MAX_MONEY
        )));
    }
    if price.with_scale(2) != *price {
        return Err(AppError::Validation(
            "price supports at most two decimal places".to_string(),
        ));
    }
    Ok(())
}

fn has_changes(changes: &ProductChanges) -> bool {
    changes.title.is_some()
        || changes.description.is_some()
        || changes.price.is_some()
        || changes.is_active.is_some()
}
