use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use common_auth::{
    AuthContext, PERM_DELETE_DRINKS, PERM_GET_DRINKS_DETAIL, PERM_PATCH_DRINKS, PERM_POST_DRINKS,
};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as DbJson;
use sqlx::{query, query_as, PgPool};

use crate::app_state::AppState;
use crate::ApiError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub color: String,
    pub parts: i32,
}

#[derive(Debug, sqlx::FromRow)]
pub struct Drink {
    pub id: i64,
    pub title: String,
    pub recipe: DbJson<Vec<Ingredient>>,
}

/// Public representation: ingredient names withheld, only color and parts.
#[derive(Debug, Serialize)]
pub struct ShortIngredient {
    pub color: String,
    pub parts: i32,
}

#[derive(Debug, Serialize)]
pub struct DrinkShort {
    pub id: i64,
    pub title: String,
    pub recipe: Vec<ShortIngredient>,
}

#[derive(Debug, Serialize)]
pub struct DrinkLong {
    pub id: i64,
    pub title: String,
    pub recipe: Vec<Ingredient>,
}

impl Drink {
    pub fn short(&self) -> DrinkShort {
        DrinkShort {
            id: self.id,
            title: self.title.clone(),
            recipe: self
                .recipe
                .0
                .iter()
                .map(|ingredient| ShortIngredient {
                    color: ingredient.color.clone(),
                    parts: ingredient.parts,
                })
                .collect(),
        }
    }

    pub fn long(&self) -> DrinkLong {
        DrinkLong {
            id: self.id,
            title: self.title.clone(),
            recipe: self.recipe.0.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DrinksResponse<T> {
    pub success: bool,
    pub drinks: Vec<T>,
}

impl<T> DrinksResponse<T> {
    fn new(drinks: Vec<T>) -> Self {
        Self {
            success: true,
            drinks,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NewDrink {
    pub title: String,
    pub recipe: Vec<Ingredient>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDrink {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub recipe: Option<Vec<Ingredient>>,
}

fn unprocessable(err: sqlx::Error) -> ApiError {
    tracing::error!(?err, "drink store query failed");
    ApiError::Unprocessable
}

async fn all_drinks(db: &PgPool) -> Result<Vec<Drink>, ApiError> {
    query_as::<_, Drink>("SELECT id, title, recipe FROM drinks ORDER BY id")
        .fetch_all(db)
        .await
        .map_err(unprocessable)
}

/// GET /drinks — public, short representation.
pub async fn list_drinks(
    State(state): State<AppState>,
) -> Result<Json<DrinksResponse<DrinkShort>>, ApiError> {
    let drinks = all_drinks(&state.db).await?;
    Ok(Json(DrinksResponse::new(
        drinks.iter().map(Drink::short).collect(),
    )))
}

/// GET /drinks-detail — long representation for holders of
/// `get:drinks-detail`.
pub async fn drinks_detail(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<DrinksResponse<DrinkLong>>, ApiError> {
    auth.require(PERM_GET_DRINKS_DETAIL)?;

    let drinks = all_drinks(&state.db).await?;
    Ok(Json(DrinksResponse::new(
        drinks.iter().map(Drink::long).collect(),
    )))
}

/// POST /drinks — create a drink, respond with the full list.
pub async fn create_drink(
    State(state): State<AppState>,
    auth: AuthContext,
    payload: Result<Json<NewDrink>, JsonRejection>,
) -> Result<Json<DrinksResponse<DrinkLong>>, ApiError> {
    auth.require(PERM_POST_DRINKS)?;

    let Json(new) = payload.map_err(|_| ApiError::Unprocessable)?;
    query("INSERT INTO drinks (title, recipe) VALUES ($1, $2)")
        .bind(new.title)
        .bind(DbJson(new.recipe))
        .execute(&state.db)
        .await
        .map_err(unprocessable)?;

    let drinks = all_drinks(&state.db).await?;
    Ok(Json(DrinksResponse::new(
        drinks.iter().map(Drink::long).collect(),
    )))
}

/// PATCH /drinks/{id} — partial update; absent fields keep their stored
/// value.
pub async fn update_drink(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(drink_id): Path<i64>,
    payload: Result<Json<UpdateDrink>, JsonRejection>,
) -> Result<Json<DrinksResponse<DrinkLong>>, ApiError> {
    auth.require(PERM_PATCH_DRINKS)?;

    let Json(upd) = payload.map_err(|_| ApiError::Unprocessable)?;
    let existing = query_as::<_, Drink>("SELECT id, title, recipe FROM drinks WHERE id = $1")
        .bind(drink_id)
        .fetch_optional(&state.db)
        .await
        .map_err(unprocessable)?;
    if existing.is_none() {
        return Err(ApiError::NotFound);
    }

    query("UPDATE drinks SET title = COALESCE($1, title), recipe = COALESCE($2, recipe) WHERE id = $3")
        .bind(upd.title)
        .bind(upd.recipe.map(DbJson))
        .bind(drink_id)
        .execute(&state.db)
        .await
        .map_err(unprocessable)?;

    let drinks = all_drinks(&state.db).await?;
    Ok(Json(DrinksResponse::new(
        drinks.iter().map(Drink::long).collect(),
    )))
}

/// DELETE /drinks/{id} — remove a drink, respond with the remaining list.
pub async fn delete_drink(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(drink_id): Path<i64>,
) -> Result<Json<DrinksResponse<DrinkLong>>, ApiError> {
    auth.require(PERM_DELETE_DRINKS)?;

    let result = query("DELETE FROM drinks WHERE id = $1")
        .bind(drink_id)
        .execute(&state.db)
        .await
        .map_err(unprocessable)?;
    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound);
    }

    let drinks = all_drinks(&state.db).await?;
    Ok(Json(DrinksResponse::new(
        drinks.iter().map(Drink::long).collect(),
    )))
}
