use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use shared::*;
use tracing::info;

use crate::error::AppError;
use crate::models::*;
use crate::schema::*;
use crate::DbPool;

pub struct GameService {
    pool: DbPool,
}

impl GameService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<GameDto>, AppError> {
        let mut conn = self.pool.get().await?;
        let found = games::table
            .order(games::title.asc())
            .select(Game::as_select())
            .load(&mut conn)
            .await?;
        Ok(found.into_iter().map(GameDto::from).collect())
    }

    pub async fn get(&self, game_id: i32) -> Result<GameDto, AppError> {
        let mut conn = self.pool.get().await?;
        let game = games::table
            .filter(games::id.eq(game_id))
            .select(Game::as_select())
            .first(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::not_found(format!("game {} not found", game_id)))?;
        Ok(game.into())
    }

    pub async fn create(&self, request: CreateGameRequest) -> Result<GameDto, AppError> {
        let mut conn = self.pool.get().await?;
        let game = diesel::insert_into(games::table)
            .values(&NewGame {
                title: request.title,
                description: request.description,
            })
            .returning(Game::as_returning())
            .get_result(&mut conn)
            .await?;

        info!(game_id = game.id, "game created");
        Ok(game.into())
    }

    pub async fn update(
        &self,
        game_id: i32,
        request: UpdateGameRequest,
    ) -> Result<GameDto, AppError> {
        if request.title.is_none() && request.description.is_none() {
            return self.get(game_id).await;
        }

        let mut conn = self.pool.get().await?;
        let changes = GameChanges {
            title: request.title,
            description: request.description,
        };
        let game = diesel::update(games::table.filter(games::id.eq(game_id)))
            .set(&changes)
            .returning(Game::as_returning())
            .get_result(&mut conn)
            .await
            .optional()?
            .ok_or_else(|| AppError::not_found(format!("game {} not found", game_id)))?;
        Ok(game.into())
    }

    /// Games with listed products cannot be deleted.
    pub async fn delete(&self, game_id: i32) -> Result<(), AppError> {
        let mut conn = self.pool.get().await?;

        let has_products: bool = diesel::select(diesel::dsl::exists(
            products::table.filter(products::game_id.eq(game_id)),
        ))
        .get_result(&mut conn)
        .await?;
        if has_products {
            return Err(AppError::Conflict(format!(
                "game {} still has products",
                game_id
            )));
        }

        let deleted = diesel::delete(games::table.filter(games::id.eq(game_id)))
            .execute(&mut conn)
            .await?;
        if deleted == 0 {
            return Err(AppError::not_found(format!("game {} not found", game_id)));
        }

        info!(game_id, "game deleted");
        Ok(())
    }
}
