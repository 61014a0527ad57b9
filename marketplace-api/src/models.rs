use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use shared::*;

use crate::error::AppError;
use crate::schema::{games, order_items, orders, products, roles, user_roles, users};

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i32,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = roles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Role {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = roles)]
pub struct NewRole {
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = user_roles)]
pub struct UserRole {
    pub user_id: i32,
    pub role_id: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = games)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Game {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = games)]
pub struct NewGame {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = games)]
pub struct GameChanges {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable)]
#[diesel(table_name = products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Product {
    pub id: i32,
    pub seller_id: i32,
    pub game_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub price: BigDecimal,
    pub stock: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = products)]
pub struct NewProduct {
    pub seller_id: i32,
    pub game_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub price: BigDecimal,
    pub stock: i32,
    pub is_active: bool,
}

/// Column updates for a product. Stock is not part of this changeset; it is
/// written only through `StockLedger::write_stock` under the row lock.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = products)]
pub struct ProductChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<BigDecimal>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Order {
    pub id: i32,
    pub buyer_id: i32,
    pub status: String,
    pub total_price: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = orders)]
pub struct NewOrder {
    pub buyer_id: i32,
    pub status: String,
    pub total_price: BigDecimal,
}

#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Associations)]
#[diesel(belongs_to(Order))]
#[diesel(table_name = order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItem {
    pub id: i32,
    pub order_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = order_items)]
pub struct NewOrderItem {
    pub order_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub unit_price: BigDecimal,
}

impl From<Game> for GameDto {
    fn from(game: Game) -> Self {
        Self {
            id: game.id,
            title: game.title,
            description: game.description,
            created_at: game.created_at,
        }
    }
}

impl From<Product> for ProductDto {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            seller_id: product.seller_id,
            game_id: product.game_id,
            title: product.title,
            description: product.description,
            price: product.price,
            stock: product.stock,
            is_active: product.is_active,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

impl From<Role> for RoleDto {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            name: role.name,
        }
    }
}

impl From<OrderItem> for OrderItemDto {
    fn from(item: OrderItem) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            quantity: item.quantity,
            unit_price: item.unit_price,
        }
    }
}

impl User {
    pub fn into_dto(self, roles: Vec<String>) -> UserDto {
        UserDto {
            id: self.id,
            email: self.email,
            username: self.username,
            roles,
            created_at: self.created_at,
        }
    }
}

impl Order {
    pub fn into_dto(self, items: Vec<OrderItem>) -> Result<OrderDto, AppError> {
        let status: OrderStatus = self
            .status
            .parse()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("order {}: {}", self.id, e)))?;

        Ok(OrderDto {
            id: self.id,
            buyer_id: self.buyer_id,
            status,
            total_price: self.total_price,
            created_at: self.created_at,
            items: items.into_iter().map(OrderItemDto::from).collect(),
        })
    }
}
