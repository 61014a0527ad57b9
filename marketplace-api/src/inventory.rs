//! Row-locked stock movements.
//!
//! Every stock change goes through a [`StockLedger`] that is bound to an open
//! database transaction. `lock_product` takes a `SELECT ... FOR UPDATE` lock
//! that is held until that transaction commits or rolls back, so concurrent
//! orders touching the same product are serialized by Postgres and never by
//! process memory.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use num_traits::Zero;
use shared::OrderItemRequest;
use tracing::debug;

use crate::error::{AppError, InventoryError};
use crate::models::Product;
use crate::schema::products;

#[async_trait]
pub trait StockLedger: Send {
    /// Reads the product row and holds an exclusive lock on it for the rest of
    /// the transaction.
    async fn lock_product(&mut self, product_id: i32) -> Result<Option<Product>, AppError>;

    /// Writes a new stock level for a row previously returned by `lock_product`
    /// and returns the row's new `updated_at`.
    async fn write_stock(
        &mut self,
        product_id: i32,
        stock: i32,
    ) -> Result<DateTime<Utc>, AppError>;
}

pub struct PgLedger<'c> {
    conn: &'c mut AsyncPgConnection,
}

impl<'c> PgLedger<'c> {
    pub fn new(conn: &'c mut AsyncPgConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl<'c> StockLedger for PgLedger<'c> {
    async fn lock_product(&mut self, product_id: i32) -> Result<Option<Product>, AppError> {
        let product = products::table
            .filter(products::id.eq(product_id))
            .select(Product::as_select())
            .for_update()
            .get_result(&mut *self.conn)
            .await
            .optional()?;
        Ok(product)
    }

    async fn write_stock(
        &mut self,
        product_id: i32,
        stock: i32,
    ) -> Result<DateTime<Utc>, AppError> {
        let updated_at = diesel::update(products::table.filter(products::id.eq(product_id)))
            .set((
                products::stock.eq(stock),
                products::updated_at.eq(Utc::now()),
            ))
            .returning(products::updated_at)
            .get_result(&mut *self.conn)
            .await?;
        Ok(updated_at)
    }
}

/// One accepted order line with the price captured at reservation time.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservedLine {
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub lines: Vec<ReservedLine>,
    pub total_price: BigDecimal,
}

/// Largest amount a `NUMERIC(12,2)` money column holds.
pub const MAX_MONEY: &str = "9999999999.99";

pub fn fits_money_column(amount: &BigDecimal) -> bool {
    *amount < BigDecimal::from(10_000_000_000i64)
}

/// Rejects requests that must never reach a transaction.
pub fn validate_lines(lines: &[OrderItemRequest]) -> Result<(), AppError> {
    if lines.is_empty() {
        return Err(AppError::Validation(
            "an order needs at least one item".to_string(),
        ));
    }
    if let Some(line) = lines.iter().find(|line| line.quantity < 1) {
        return Err(AppError::Validation(format!(
            "quantity for product {} must be at least 1, got {}",
            line.product_id, line.quantity
        )));
    }
    Ok(())
}

/// Locks, checks and decrements each line in the order given.
///
/// Stock is written back as soon as a line is accepted, so a later line for
/// the same product sees the reduced level. Lines are not sorted: lock
/// acquisition order is the caller's order.
///
/// Any error leaves earlier decrements in the ledger; discarding them is the
/// job of the enclosing transaction.
pub async fn reserve_lines<L>(
    ledger: &mut L,
    lines: &[OrderItemRequest],
) -> Result<Reservation, AppError>
where
    L: StockLedger + ?Sized,
{
    let mut total_price = BigDecimal::zero();
    let mut reserved = Vec::with_capacity(lines.len());

    for line in lines {
        let product = ledger
            .lock_product(line.product_id)
            .await?
            .ok_or(InventoryError::ProductNotFound {
                product_id: line.product_id,
            })?;

        if !product.is_active {
            return Err(InventoryError::ProductInactive {
                product_id: product.id,
            }
            .into());
        }

        if product.stock < line.quantity {
            return Err(InventoryError::InsufficientStock {
                product_id: product.id,
                requested: line.quantity,
                available: product.stock,
            }
            .into());
        }

        total_price += product.price.clone() * BigDecimal::from(line.quantity);
        if !fits_money_column(&total_price) {
            return Err(AppError::Validation(format!(
                "order total exceeds the maximum of {}",
                MAX_MONEY
            )));
        }

        let remaining = product.stock - line.quantity;
        ledger.write_stock(product.id, remaining).await?;
        debug!(
            product_id = product.id,
            quantity = line.quantity,
            remaining,
            "reserved stock"
        );

        reserved.push(ReservedLine {
            product_id: product.id,
            quantity: line.quantity,
            unit_price: product.price,
        });
    }

    Ok(Reservation {
        lines: reserved,
        total_price: total_price.with_scale(2),
    })
}

/// Locks a product for a single-row update, failing with 404 when it is absent.
pub async fn lock_existing<L>(ledger: &mut L, product_id: i32) -> Result<Product, AppError>
where
    L: StockLedger + ?Sized,
{
    ledger
        .lock_product(product_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("product {} not found", product_id)))
}

/// Overwrites the stock of an already locked product.
pub async fn set_stock<L>(
    ledger: &mut L,
    mut product: Product,
    new_stock: i32,
) -> Result<Product, AppError>
where
    L: StockLedger + ?Sized,
{
    if new_stock < 0 {
        return Err(AppError::Validation(format!(
            "stock cannot be negative, got {}",
            new_stock
        )));
    }

    product.updated_at = ledger.write_stock(product.id, new_stock).await?;
    product.stock = new_stock;
    Ok(product)
}
