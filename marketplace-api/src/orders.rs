use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use tracing::{info, warn};

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::inventory::{reserve_lines, validate_lines, PgLedger};
use crate::models::*;
use crate::schema::*;
use crate::DbPool;

pub struct OrderService {
    pool: DbPool,
}

impl OrderService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Places an order for `buyer_id`, reserving stock for every line inside a
    /// single transaction. Nothing is reserved unless every line is accepted.
    pub async fn place_order(
        &self,
        buyer_id: i32,
        lines: Vec<OrderItemRequest>,
    ) -> Result<OrderDto, AppError> {
        validate_lines(&lines)?;

        let mut conn = self.pool.get().await?;
        match self.create_order_tx(&mut conn, buyer_id, lines).await {
            Ok((order, items)) => {
                info!(
                    order_id = order.id,
                    buyer_id,
                    total_price = %order.total_price,
                    items = items.len(),
                    "order placed"
                );
                order.into_dto(items)
            }
            Err(e) => {
                warn!(buyer_id, error = %e, "order rejected");
                Err(e)
            }
        }
    }

    async fn create_order_tx(
        &self,
        conn: &mut AsyncPgConnection,
        buyer_id: i32,
        lines: Vec<OrderItemRequest>,
    ) -> Result<(Order, Vec<OrderItem>), AppError> {
        conn.transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let reservation = {
                    let mut ledger = PgLedger::new(conn);
                    reserve_lines(&mut ledger, &lines).await?
                };

                let new_order = NewOrder {
                    buyer_id,
                    status: OrderStatus::Pending.as_str().to_string(),
                    total_price: reservation.total_price,
                };

                let order = diesel::insert_into(orders::table)
                    .values(&new_order)
                    .returning(Order::as_returning())
                    .get_result(conn)
                    .await?;

                let new_items: Vec<NewOrderItem> = reservation
                    .lines
                    .into_iter()
                    .map(|line| NewOrderItem {
                        order_id: order.id,
                        product_id: line.product_id,
                        quantity: line.quantity,
                        unit_price: line.unit_price,
                    })
                    .collect();

                let items = diesel::insert_into(order_items::table)
                    .values(&new_items)
                    .returning(OrderItem::as_returning())
                    .get_results(conn)
                    .await?;

                Ok((order, items))
            })
        })
        .await
    }

    /// Orders placed by `buyer_id`, newest first.
    pub async fn list_for_buyer(&self, buyer_id: i32) -> Result<Vec<OrderDto>, AppError> {
        let mut conn = self.pool.get().await?;

        let found = orders::table
            .filter(orders::buyer_id.eq(buyer_id))
            .order((orders::created_at.desc(), orders::id.desc()))
            .select(Order::as_select())
            .load(&mut conn)
            .await?;

        with_items(&mut conn, found).await
    }

    pub async fn list_all(&self, page: Pagination) -> Result<Vec<OrderDto>, AppError> {
        let mut conn = self.pool.get().await?;

        let found = orders::table
            .order((orders::created_at.desc(), orders::id.desc()))
            .offset(page.offset())
            .limit(page.limit())
            .select(Order::as_select())
            .load(&mut conn)
            .await?;

        with_items(&mut conn, found).await
    }

    /// Loads one order. Non-admin callers may only see their own orders.
    pub async fn find_one(
        &self,
        order_id: i32,
        requester: &CurrentUser,
    ) -> Result<OrderDto, AppError> {
        let mut conn = self.pool.get().await?;

        let order = orders::table
            .filter(orders::id.eq(order_id))
            .select(Order::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::not_found(format!("order {} not found", order_id)))?;

        ensure_can_view(&order, requester)?;

        let mut loaded = with_items(&mut conn, vec![order]).await?;
        loaded
            .pop()
            .ok_or_else(|| AppError::not_found(format!("order {} not found", order_id)))
    }

    /// Overwrites the status. Any status may follow any other.
    pub async fn update_status(
        &self,
        order_id: i32,
        status: OrderStatus,
    ) -> Result<OrderDto, AppError> {
        let mut conn = self.pool.get().await?;

        let order = diesel::update(orders::table.filter(orders::id.eq(order_id)))
            .set(orders::status.eq(status.as_str()))
            .returning(Order::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::not_found(format!("order {} not found", order_id)))?;

        info!(order_id, status = %status, "order status overwritten");

        let mut loaded = with_items(&mut conn, vec![order]).await?;
        loaded
            .pop()
            .ok_or_else(|| AppError::not_found(format!("order {} not found", order_id)))
    }
}

pub fn ensure_can_view(order: &Order, requester: &CurrentUser) -> Result<(), AppError> {
    if requester.is_admin() || order.buyer_id == requester.id {
        Ok(())
    } else {
        Err(AppError::forbidden(format!(
            "order {} belongs to another buyer",
            order.id
        )))
    }
}

async fn with_items(
    conn: &mut AsyncPgConnection,
    found: Vec<Order>,
) -> Result<Vec<OrderDto>, AppError> {
    let items = OrderItem::belonging_to(&found)
        .order(order_items::id.asc())
        .select(OrderItem::as_select())
        .load(conn)
        .await?
        .grouped_by(&found);

    found
        .into_iter()
        .zip(items)
        .map(|(order, items)| order.into_dto(items))
        .collect()
}
