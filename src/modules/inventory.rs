use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post, put},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::web::{
    AppState,
    responses::{ApiResult, Deleted, HandlerError, bad_request, conflict, internal_error, not_found},
};

use super::clean_optional;

const ITEM_COLUMNS: &str = "id, name, category, quantity, location, notes, created_at, updated_at";

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct InventoryItem {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub quantity: i32,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub(crate) struct ItemInput {
    name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    quantity: i32,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct QuantityChange {
    delta: i32,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/inventory", get(list_items))
        .route("/api/inventory", post(create_item))
        .route("/api/inventory/:id", put(update_item).delete(delete_item))
        .route("/api/inventory/:id/quantity", patch(adjust_quantity))
}

/// Stock after applying `delta`, or `None` if it would go negative or overflow.
pub fn apply_delta(quantity: i32, delta: i32) -> Option<i32> {
    quantity.checked_add(delta).filter(|next| *next >= 0)
}

fn validate(input: ItemInput) -> Result<ItemInput, HandlerError> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(bad_request("Item name is required."));
    }
    if input.quantity < 0 {
        return Err(bad_request("Quantity cannot be negative."));
    }
    Ok(ItemInput {
        name,
        category: clean_optional(input.category),
        quantity: input.quantity,
        location: clean_optional(input.location),
        notes: clean_optional(input.notes),
    })
}

async fn list_items(State(state): State<AppState>) -> ApiResult<Vec<InventoryItem>> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM inventory_items ORDER BY category NULLS LAST, name");
    sqlx::query_as::<_, InventoryItem>(&sql)
        .fetch_all(state.pool())
        .await
        .map(Json)
        .map_err(|err| internal_error(err, "failed to list inventory"))
}

async fn create_item(
    State(state): State<AppState>,
    Json(input): Json<ItemInput>,
) -> Result<(StatusCode, Json<InventoryItem>), HandlerError> {
    let item = validate(input)?;
    let sql = format!(
        "INSERT INTO inventory_items (id, name, category, quantity, location, notes)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {ITEM_COLUMNS}"
    );
    let row = sqlx::query_as::<_, InventoryItem>(&sql)
        .bind(Uuid::new_v4())
        .bind(&item.name)
        .bind(&item.category)
        .bind(item.quantity)
        .bind(&item.location)
        .bind(&item.notes)
        .fetch_one(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to create inventory item"))?;

    info!(item_id = %row.id, name = %row.name, "inventory item created");
    Ok((StatusCode::CREATED, Json(row)))
}

async fn update_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<ItemInput>,
) -> ApiResult<InventoryItem> {
    let item = validate(input)?;
    let sql = format!(
        "UPDATE inventory_items
         SET name = $2, category = $3, quantity = $4, location = $5, notes = $6, updated_at = NOW()
         WHERE id = $1
         RETURNING {ITEM_COLUMNS}"
    );
    sqlx::query_as::<_, InventoryItem>(&sql)
        .bind(id)
        .bind(&item.name)
        .bind(&item.category)
        .bind(item.quantity)
        .bind(&item.location)
        .bind(&item.notes)
        .fetch_optional(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to update inventory item"))?
        .map(Json)
        .ok_or_else(|| not_found("Inventory item"))
}

async fn adjust_quantity(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(change): Json<QuantityChange>,
) -> ApiResult<InventoryItem> {
    let sql = format!(
        "UPDATE inventory_items
         SET quantity = quantity + $2, updated_at = NOW()
         WHERE id = $1 AND quantity + $2 >= 0
         RETURNING {ITEM_COLUMNS}"
    );
    let updated = sqlx::query_as::<_, InventoryItem>(&sql)
        .bind(id)
        .bind(change.delta)
        .fetch_optional(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to adjust inventory quantity"))?;

    if let Some(item) = updated {
        info!(item_id = %id, delta = change.delta, quantity = item.quantity, "inventory adjusted");
        return Ok(Json(item));
    }

    // Either the item is gone or the guard rejected the delta.
    let current: Option<i32> = sqlx::query_scalar("SELECT quantity FROM inventory_items WHERE id = $1")
        .bind(id)
        .fetch_optional(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to load inventory item"))?;

    match current {
        None => Err(not_found("Inventory item")),
        Some(quantity) if apply_delta(quantity, change.delta).is_some() => Err(conflict(
            "Stock changed while applying the update, please retry.",
        )),
        Some(quantity) => Err(conflict(format!(
            "Only {quantity} in stock; cannot apply a change of {}.",
            change.delta
        ))),
    }
}

async fn delete_item(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Deleted> {
    let result = sqlx::query("DELETE FROM inventory_items WHERE id = $1")
        .bind(id)
        .execute(state.pool())
        .await
        .map_err(|err| internal_error(err, "failed to delete inventory item"))?;

    if result.rows_affected() == 0 {
        return Err(not_found("Inventory item"));
    }
    Ok(Deleted::json())
}
