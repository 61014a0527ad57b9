diesel::table! {
    games (id) {
        id -> Int4,
        title -> Varchar,
        description -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (id) {
        id -> Int4,
        order_id -> Int4,
        product_id -> Int4,
        quantity -> Int4,
        unit_price -> Numeric,
    }
}

diesel::table! {
    orders (id) {
        id -> Int4,
        buyer_id -> Int4,
        status -> Varchar,
        total_price -> Numeric,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    products (id) {
        id -> Int4,
        seller_id -> Int4,
        game_id -> Int4,
        title -> Varchar,
        description -> Nullable<Text>,
        price -> Numeric,
        stock -> Int4,
        is_active -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    roles (id) {
        id -> Int4,
        name -> Varchar,
    }
}

diesel::table! {
    user_roles (user_id, role_id) {
        user_id -> Int4,
        role_id -> Int4,
    }
}

diesel::table! {
    users (id) {
        id -> Int4,
        email -> Varchar,
        username -> Varchar,
        password_hash -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(order_items -> products (product_id));
diesel::joinable!(orders -> users (buyer_id));
diesel::joinable!(products -> games (game_id));
diesel::joinable!(products -> users (seller_id));
diesel::joinable!(user_roles -> roles (role_id));
diesel::joinable!(user_roles -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    games,
    order_items,
    orders,
    products,
    roles,
    user_roles,
    users,
);
