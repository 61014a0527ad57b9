//! Order placement against a live Postgres. Set `TEST_DATABASE_URL` to run.

mod common;

use common::*;
use futures::future::join_all;
use marketplace_api::error::{AppError, InventoryError};
use marketplace_api::orders::OrderService;
use marketplace_api::products::ProductService;
use shared::*;

#[tokio::test]
async fn places_order_and_decrements_stock() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let key = product(&pool, &seller, "10.00", 5, true).await;

    let order = OrderService::new(pool.clone())
        .place_order(buyer.id, vec![line(key.id, 3)])
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.buyer_id, buyer.id);
    assert_eq!(order.total_price, price("30.00"));
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].quantity, 3);
    assert_eq!(order.items[0].unit_price, price("10.00"));
    assert_eq!(stock_of(&pool, key.id).await, 2);
}

#[tokio::test]
async fn insufficient_stock_leaves_stock_untouched() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let key = product(&pool, &seller, "10.00", 2, true).await;

    let err = OrderService::new(pool.clone())
        .place_order(buyer.id, vec![line(key.id, 3)])
        .await
        .unwrap_err();

    match err {
        AppError::Inventory(InventoryError::InsufficientStock {
            product_id,
            requested,
            available,
        }) => {
            assert_eq!(product_id, key.id);
            assert_eq!(requested, 3);
            assert_eq!(available, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(stock_of(&pool, key.id).await, 2);
}

#[tokio::test]
async fn failed_line_rolls_back_earlier_lines() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let key = product(&pool, &seller, "4.50", 6, true).await;
    let service = OrderService::new(pool.clone());

    let err = service
        .place_order(buyer.id, vec![line(key.id, 2), line(i32::MAX, 1)])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::Inventory(InventoryError::ProductNotFound { product_id }) if product_id == i32::MAX
    ));
    assert_eq!(stock_of(&pool, key.id).await, 6);
    assert!(service.list_for_buyer(buyer.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn inactive_products_cannot_be_ordered() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let hidden = product(&pool, &seller, "9.99", 4, false).await;

    let err = OrderService::new(pool.clone())
        .place_order(buyer.id, vec![line(hidden.id, 1)])
        .await
        .unwrap_err();

    assert_eq!(err.code(), "PRODUCT_INACTIVE");
    assert_eq!(stock_of(&pool, hidden.id).await, 4);
}

#[tokio::test]
async fn repeated_product_lines_share_the_same_stock() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let key = product(&pool, &seller, "1.25", 4, true).await;
    let service = OrderService::new(pool.clone());

    let err = service
        .place_order(buyer.id, vec![line(key.id, 3), line(key.id, 2)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Inventory(InventoryError::InsufficientStock { available: 1, .. })
    ));
    assert_eq!(stock_of(&pool, key.id).await, 4);

    let order = service
        .place_order(buyer.id, vec![line(key.id, 3), line(key.id, 1)])
        .await
        .unwrap();
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.total_price, price("5.00"));
    assert_eq!(stock_of(&pool, key.id).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_orders_never_oversell() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let key = product(&pool, &seller, "2.00", 10, true).await;

    let attempts = (0..8).map(|_| {
        let pool = pool.clone();
        let buyer_id = buyer.id;
        let product_id = key.id;
        tokio::spawn(async move {
            OrderService::new(pool)
                .place_order(buyer_id, vec![line(product_id, 3)])
                .await
        })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("order task panicked"))
        .collect();

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 3);
    for rejected in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(
            rejected,
            AppError::Inventory(InventoryError::InsufficientStock {
                requested: 3,
                available: 1,
                ..
            })
        ));
    }
    assert_eq!(stock_of(&pool, key.id).await, 1);
}

#[tokio::test]
async fn order_total_is_a_snapshot() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let key = product(&pool, &seller, "10.00", 5, true).await;
    let orders = OrderService::new(pool.clone());

    let placed = orders
        .place_order(buyer.id, vec![line(key.id, 2)])
        .await
        .unwrap();

    ProductService::new(pool.clone())
        .update(
            key.id,
            &seller,
            UpdateProductRequest {
                price: Some(price("99.00")),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let reloaded = orders.find_one(placed.id, &buyer).await.unwrap();
    assert_eq!(reloaded.total_price, price("20.00"));
    assert_eq!(reloaded.items[0].unit_price, price("10.00"));
}

#[tokio::test]
async fn orders_are_private_to_their_buyer() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let stranger = register(&pool, false).await;
    let key = product(&pool, &seller, "3.00", 5, true).await;
    let orders = OrderService::new(pool.clone());

    let placed = orders
        .place_order(buyer.id, vec![line(key.id, 1)])
        .await
        .unwrap();

    let err = orders.find_one(placed.id, &stranger).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let seen_by_admin = orders
        .find_one(placed.id, &as_admin(&stranger))
        .await
        .unwrap();
    assert_eq!(seen_by_admin.id, placed.id);

    let first = orders.find_one(placed.id, &buyer).await.unwrap();
    let second = orders.find_one(placed.id, &buyer).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(stock_of(&pool, key.id).await, 4);
}

#[tokio::test]
async fn missing_order_is_not_found() {
    let Some(pool) = test_pool().await else { return };
    let buyer = register(&pool, false).await;

    let err = OrderService::new(pool.clone())
        .find_one(i32::MAX, &buyer)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn status_is_overwritten_without_touching_stock() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let key = product(&pool, &seller, "5.00", 3, true).await;
    let orders = OrderService::new(pool.clone());

    let placed = orders
        .place_order(buyer.id, vec![line(key.id, 2)])
        .await
        .unwrap();

    let cancelled = orders
        .update_status(placed.id, OrderStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&pool, key.id).await, 1);

    let reopened = orders
        .update_status(placed.id, OrderStatus::Pending)
        .await
        .unwrap();
    assert_eq!(reopened.status, OrderStatus::Pending);
}

#[tokio::test]
async fn buyer_history_is_newest_first() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let key = product(&pool, &seller, "1.00", 10, true).await;
    let orders = OrderService::new(pool.clone());

    let first = orders
        .place_order(buyer.id, vec![line(key.id, 1)])
        .await
        .unwrap();
    let second = orders
        .place_order(buyer.id, vec![line(key.id, 2)])
        .await
        .unwrap();

    let history = orders.list_for_buyer(buyer.id).await.unwrap();
    let ids: Vec<i32> = history.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
}

#[tokio::test]
async fn stock_updates_are_owner_only_and_non_negative() {
    let Some(pool) = test_pool().await else { return };
    let owner = register(&pool, true).await;
    let rival = register(&pool, true).await;
    let key = product(&pool, &owner, "7.00", 1, true).await;
    let products = ProductService::new(pool.clone());

    let err = products.update_stock(key.id, &rival, 50).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = products.update_stock(key.id, &owner, -1).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let updated = products.update_stock(key.id, &owner, 12).await.unwrap();
    assert_eq!(updated.stock, 12);
}

#[tokio::test]
async fn ordered_products_cannot_be_deleted() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let key = product(&pool, &seller, "6.00", 2, true).await;
    let unsold = product(&pool, &seller, "6.00", 2, true).await;

    OrderService::new(pool.clone())
        .place_order(buyer.id, vec![line(key.id, 1)])
        .await
        .unwrap();

    let products = ProductService::new(pool.clone());
    let err = products.delete(key.id, &seller).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    products.delete(unsold.id, &seller).await.unwrap();
    assert!(matches!(
        products.get(unsold.id).await.unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn prices_beyond_the_money_column_are_rejected() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let catalogue = game(&pool).await;

    let err = ProductService::new(pool.clone())
        .create(
            &seller,
            CreateProductRequest {
                game_id: catalogue.id,
                title: "Collector's edition".to_string(),
                description: None,
                price: price("100000000000"),
                stock: 1,
                is_active: true,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(err.code(), "VALIDATION_FAILED");
}

#[tokio::test]
async fn order_total_beyond_the_money_column_is_rejected() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let key = product(&pool, &seller, "9999999999.99", 5, true).await;
    let orders = OrderService::new(pool.clone());

    let err = orders
        .place_order(buyer.id, vec![line(key.id, 2)])
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(stock_of(&pool, key.id).await, 5);
    assert!(orders.list_for_buyer(buyer.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn general_update_can_set_stock() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let key = product(&pool, &seller, "8.00", 3, true).await;
    let products = ProductService::new(pool.clone());

    let updated = products
        .update(
            key.id,
            &seller,
            UpdateProductRequest {
                stock: Some(9),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let stored = products.get(key.id).await.unwrap();
    assert_eq!(updated.stock, 9);
    assert_eq!(stored.stock, 9);
    assert_eq!(updated.updated_at, stored.updated_at);
    assert!(updated.updated_at > key.updated_at);

    let renamed = products
        .update(
            key.id,
            &seller,
            UpdateProductRequest {
                title: Some("Deluxe key".to_string()),
                stock: Some(4),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.title, "Deluxe key");
    assert_eq!(renamed.stock, 4);
    assert_eq!(renamed, products.get(key.id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stock_reset_racing_orders_matches_a_serial_schedule() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let key = product(&pool, &seller, "1.00", 20, true).await;

    let order_tasks: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            let buyer_id = buyer.id;
            let product_id = key.id;
            tokio::spawn(async move {
                OrderService::new(pool)
                    .place_order(buyer_id, vec![line(product_id, 2)])
                    .await
            })
        })
        .collect();
    let reset = {
        let pool = pool.clone();
        let seller = seller.clone();
        let product_id = key.id;
        tokio::spawn(async move {
            ProductService::new(pool)
                .update_stock(product_id, &seller, 10)
                .await
        })
    };

    for placed in join_all(order_tasks).await {
        placed.expect("order task panicked").unwrap();
    }
    reset.await.expect("reset task panicked").unwrap();

    // Orders serialized before the reset are overwritten by it, orders after
    // it each take 2 of the 10.
    let serial_outcomes = [10, 8, 6, 4, 2];
    let final_stock = stock_of(&pool, key.id).await;
    assert!(
        serial_outcomes.contains(&final_stock),
        "stock {} is not reachable by any serial schedule",
        final_stock
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn price_edits_racing_orders_keep_every_decrement() {
    let Some(pool) = test_pool().await else { return };
    let seller = register(&pool, true).await;
    let buyer = register(&pool, false).await;
    let key = product(&pool, &seller, "5.00", 20, true).await;

    let order_tasks: Vec<_> = (0..5)
        .map(|_| {
            let pool = pool.clone();
            let buyer_id = buyer.id;
            let product_id = key.id;
            tokio::spawn(async move {
                OrderService::new(pool)
                    .place_order(buyer_id, vec![line(product_id, 3)])
                    .await
            })
        })
        .collect();
    let edit_tasks: Vec<_> = ["6.00", "7.00", "8.00"]
        .into_iter()
        .map(|new_price| {
            let pool = pool.clone();
            let seller = seller.clone();
            let product_id = key.id;
            tokio::spawn(async move {
                ProductService::new(pool)
                    .update(
                        product_id,
                        &seller,
                        UpdateProductRequest {
                            price: Some(price(new_price)),
                            ..Default::default()
                        },
                    )
                    .await
            })
        })
        .collect();

    let known_prices = [price("5.00"), price("6.00"), price("7.00"), price("8.00")];
    for placed in join_all(order_tasks).await {
        let order = placed.expect("order task panicked").unwrap();
        assert!(known_prices.contains(&order.items[0].unit_price));
    }
    for edited in join_all(edit_tasks).await {
        edited.expect("edit task panicked").unwrap();
    }

    assert_eq!(stock_of(&pool, key.id).await, 5);
}
