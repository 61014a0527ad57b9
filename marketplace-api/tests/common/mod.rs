#![allow(dead_code)]

use std::str::FromStr;
use std::sync::{Arc, Once};

use bigdecimal::BigDecimal;
use marketplace_api::accounts::AccountService;
use marketplace_api::auth::{CurrentUser, JwtService};
use marketplace_api::games::GameService;
use marketplace_api::products::ProductService;
use marketplace_api::DbPool;
use shared::*;
use uuid::Uuid;

static MIGRATE: Once = Once::new();

/// Pool against `TEST_DATABASE_URL`, or `None` when the variable is unset.
pub async fn test_pool() -> Option<DbPool> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping database test");
        return None;
    };

    MIGRATE.call_once(|| {
        marketplace_api::run_migrations(&url).expect("migrations should apply");
    });

    Some(
        marketplace_api::build_pool(&url, 16)
            .await
            .expect("pool should connect"),
    )
}

pub fn jwt() -> Arc<JwtService> {
    Arc::new(JwtService::new("integration-test-secret", 60))
}

pub async fn register(pool: &DbPool, seller: bool) -> CurrentUser {
    let accounts = AccountService::new(pool.clone(), jwt(), None);
    let response = accounts
        .register(RegisterRequest {
            email: format!("user-{}@test.local", Uuid::new_v4()),
            username: "tester".to_string(),
            password: "password123".to_string(),
            seller,
        })
        .await
        .expect("registration should succeed");

    CurrentUser {
        id: response.user.id,
        roles: response.user.roles,
    }
}

pub fn as_admin(user: &CurrentUser) -> CurrentUser {
    CurrentUser {
        id: user.id,
        roles: vec![ROLE_ADMIN.to_string()],
    }
}

pub fn price(text: &str) -> BigDecimal {
    BigDecimal::from_str(text).unwrap()
}

pub async fn game(pool: &DbPool) -> GameDto {
    GameService::new(pool.clone())
        .create(CreateGameRequest {
            title: format!("game {}", Uuid::new_v4()),
            description: None,
        })
        .await
        .expect("game should be created")
}

pub async fn product(
    pool: &DbPool,
    seller: &CurrentUser,
    unit_price: &str,
    stock: i32,
    is_active: bool,
) -> ProductDto {
    let game = game(pool).await;
    ProductService::new(pool.clone())
        .create(
            seller,
            CreateProductRequest {
                game_id: game.id,
                title: "Game key".to_string(),
                description: None,
                price: price(unit_price),
                stock,
                is_active,
            },
        )
        .await
        .expect("product should be created")
}

pub async fn stock_of(pool: &DbPool, product_id: i32) -> i32 {
    ProductService::new(pool.clone())
        .get(product_id)
        .await
        .expect("product should exist")
        .stock
}

pub fn line(product_id: i32, quantity: i32) -> OrderItemRequest {
    OrderItemRequest {
        product_id,
        quantity,
    }
}
