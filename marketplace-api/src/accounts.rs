use std::sync::Arc;

use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use tracing::{info, warn};

use crate::auth::{hash_password, verify_password, JwtService};
use crate::error::AppError;
use crate::models::*;
use crate::schema::*;
use crate::DbPool;

/// Users, credentials and role grants.
pub struct AccountService {
    pool: DbPool,
    jwt: Arc<JwtService>,
    bootstrap_admin_email: Option<String>,
}

impl AccountService {
    pub fn new(pool: DbPool, jwt: Arc<JwtService>, bootstrap_admin_email: Option<String>) -> Self {
        Self {
            pool,
            jwt,
            bootstrap_admin_email,
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, AppError> {
        let email = normalize_email(&request.email);
        let password_hash = hash_password(&request.password)?;
        let granted = initial_roles(
            &email,
            request.seller,
            self.bootstrap_admin_email.as_deref(),
        );

        let mut conn = self.pool.get().await?;
        let new_user = NewUser {
            email,
            username: request.username,
            password_hash,
        };

        let user = self
            .insert_user_tx(&mut conn, new_user, granted.clone())
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => AppError::Conflict("email already registered".to_string()),
                other => other,
            })?;

        info!(user_id = user.id, roles = ?granted, "user registered");
        let access_token = self.jwt.issue(user.id, &granted)?;
        Ok(AuthResponse {
            access_token,
            user: user.into_dto(granted),
        })
    }

    async fn insert_user_tx(
        &self,
        conn: &mut AsyncPgConnection,
        new_user: NewUser,
        granted: Vec<String>,
    ) -> Result<User, AppError> {
        conn.transaction::<_, AppError, _>(|conn| {
            Box::pin(async move {
                let user = diesel::insert_into(users::table)
                    .values(&new_user)
                    .returning(User::as_returning())
                    .get_result(conn)
                    .await?;

                let role_ids: Vec<i32> = roles::table
                    .filter(roles::name.eq_any(&granted))
                    .select(roles::id)
                    .load(conn)
                    .await?;

                let grants: Vec<UserRole> = role_ids
                    .into_iter()
                    .map(|role_id| UserRole {
                        user_id: user.id,
                        role_id,
                    })
                    .collect();

                diesel::insert_into(user_roles::table)
                    .values(&grants)
                    .execute(conn)
                    .await?;

                Ok(user)
            })
        })
        .await
    }

    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, AppError> {
        let email = normalize_email(&request.email);
        let mut conn = self.pool.get().await?;

        let user = users::table
            .filter(users::email.eq(&email))
            .select(User::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        let user = match user {
            Some(user) if verify_password(&request.password, &user.password_hash) => user,
            _ => {
                warn!(email = %email, "login failed");
                return Err(AppError::InvalidCredentials);
            }
        };

        let granted = role_names(&mut conn, user.id).await?;
        let access_token = self.jwt.issue(user.id, &granted)?;
        Ok(AuthResponse {
            access_token,
            user: user.into_dto(granted),
        })
    }

    pub async fn profile(&self, user_id: i32) -> Result<UserDto, AppError> {
        let mut conn = self.pool.get().await?;

        let user = users::table
            .filter(users::id.eq(user_id))
            .select(User::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::not_found(format!("user {} not found", user_id)))?;

        let granted = role_names(&mut conn, user.id).await?;
        Ok(user.into_dto(granted))
    }

    pub async fn list_roles(&self) -> Result<Vec<RoleDto>, AppError> {
        let mut conn = self.pool.get().await?;
        let found = roles::table
            .order(roles::name.asc())
            .select(Role::as_select())
            .load(&mut conn)
            .await?;
        Ok(found.into_iter().map(RoleDto::from).collect())
    }

    pub async fn create_role(&self, request: CreateRoleRequest) -> Result<RoleDto, AppError> {
        let mut conn = self.pool.get().await?;
        let role = diesel::insert_into(roles::table)
            .values(&NewRole {
                name: request.name.trim().to_lowercase(),
            })
            .returning(Role::as_returning())
            .get_result(&mut conn)
            .await?;

        info!(role = %role.name, "role created");
        Ok(role.into())
    }

    /// Grants a role. Granting a role the user already has is a no-op.
    pub async fn assign_role(&self, user_id: i32, role_name: &str) -> Result<UserDto, AppError> {
        let mut conn = self.pool.get().await?;
        let role = find_role(&mut conn, role_name).await?;
        ensure_user_exists(&mut conn, user_id).await?;

        diesel::insert_into(user_roles::table)
            .values(&UserRole {
                user_id,
                role_id: role.id,
            })
            .on_conflict_do_nothing()
            .execute(&mut conn)
            .await?;

        info!(user_id, role = %role.name, "role granted");
        drop(conn);
        self.profile(user_id).await
    }

    pub async fn revoke_role(&self, user_id: i32, role_name: &str) -> Result<UserDto, AppError> {
        let mut conn = self.pool.get().await?;
        let role = find_role(&mut conn, role_name).await?;
        ensure_user_exists(&mut conn, user_id).await?;

        diesel::delete(
            user_roles::table
                .filter(user_roles::user_id.eq(user_id))
                .filter(user_roles::role_id.eq(role.id)),
        )
        .execute(&mut conn)
        .await?;

        info!(user_id, role = %role.name, "role revoked");
        drop(conn);
        self.profile(user_id).await
    }
}

async fn role_names(conn: &mut AsyncPgConnection, user_id: i32) -> Result<Vec<String>, AppError> {
    let names = user_roles::table
        .inner_join(roles::table)
        .filter(user_roles::user_id.eq(user_id))
        .order(roles::name.asc())
        .select(roles::name)
        .load(conn)
        .await?;
    Ok(names)
}

/// Whether `user_roles` still grants `role` to the user.
pub async fn holds_role(
    conn: &mut AsyncPgConnection,
    user_id: i32,
    role: &str,
) -> Result<bool, AppError> {
    let held: bool = diesel::select(diesel::dsl::exists(
        user_roles::table
            .inner_join(roles::table)
            .filter(user_roles::user_id.eq(user_id))
            .filter(roles::name.eq(role)),
    ))
    .get_result(conn)
    .await?;
    Ok(held)
}

async fn find_role(conn: &mut AsyncPgConnection, name: &str) -> Result<Role, AppError> {
    roles::table
        .filter(roles::name.eq(name))
        .select(Role::as_select())
        .first(conn)
        .await
        .optional()?
        .ok_or_else(|| AppError::not_found(format!("role {} not found", name)))
}

async fn ensure_user_exists(conn: &mut AsyncPgConnection, user_id: i32) -> Result<(), AppError> {
    let exists: bool = diesel::select(diesel::dsl::exists(
        users::table.filter(users::id.eq(user_id)),
    ))
    .get_result(conn)
    .await?;
    if exists {
        Ok(())
    } else {
        Err(AppError::not_found(format!("user {} not found", user_id)))
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Roles granted at sign-up.
fn initial_roles(email: &str, seller: bool, bootstrap_admin: Option<&str>) -> Vec<String> {
    let mut granted = vec![ROLE_BUYER.to_string()];
    if seller {
        granted.push(ROLE_SELLER.to_string());
    }
    if bootstrap_admin.is_some_and(|admin| normalize_email(admin) == email) {
        granted.push(ROLE_ADMIN.to_string());
    }
    granted
}
