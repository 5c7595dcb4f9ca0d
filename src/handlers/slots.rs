use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::db::queries;
use crate::errors::AppError;
use crate::models::Slot;
use crate::services::availability;
use crate::state::AppState;

// GET /api/shops/:shop_id/slots?date=2025-06-16&services=cut,trim&interval=30
#[derive(Deserialize)]
pub struct SlotsQuery {
    pub date: String,
    pub services: String,
    pub interval: Option<u32>,
}

#[derive(Serialize)]
pub struct SlotsResponse {
    shop_id: String,
    date: NaiveDate,
    slots: Vec<Slot>,
}

pub async fn get_slots(
    State(state): State<Arc<AppState>>,
    Path(shop_id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<SlotsResponse>, AppError> {
    let date = NaiveDate::parse_from_str(query.date.trim(), queries::DATE_FORMAT)
        .map_err(|_| AppError::validation(format!("invalid date (expected YYYY-MM-DD): {}", query.date)))?;

    let service_ids: Vec<String> = query
        .services
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    let slots = availability::available_slots(&state, &shop_id, date, &service_ids, query.interval).await?;

    Ok(Json(SlotsResponse { shop_id, date, slots }))
}
