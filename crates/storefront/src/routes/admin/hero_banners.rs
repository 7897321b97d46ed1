//! Hero banner management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::instrument;

use meridian_core::HeroBannerId;

use crate::error::{AppError, Result};
use crate::extract::ValidatedJson;
use crate::middleware::RequireAdmin;
use crate::models::{HeroBanner, HeroBannerInput};
use crate::state::AppState;

fn not_found(id: HeroBannerId) -> AppError {
    AppError::NotFound(format!("Hero banner {id} not found"))
}

#[instrument(skip(state, _admin))]
pub async fn list(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> Result<Json<Vec<HeroBanner>>> {
    Ok(Json(state.catalog().all_banners().await?))
}

#[instrument(skip(state, admin, input), fields(admin = %admin.email))]
pub async fn create(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    ValidatedJson(input): ValidatedJson<HeroBannerInput>,
) -> Result<(StatusCode, Json<HeroBanner>)> {
    let banner = state.catalog().create_banner(&input).await?;
    Ok((StatusCode::CREATED, Json(banner)))
}

#[instrument(skip(state, admin, input), fields(admin = %admin.email))]
pub async fn update(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<HeroBannerId>,
    ValidatedJson(input): ValidatedJson<HeroBannerInput>,
) -> Result<Json<HeroBanner>> {
    state
        .catalog()
        .update_banner(id, &input)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

#[instrument(skip(state, admin), fields(admin = %admin.email))]
pub async fn delete(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<HeroBannerId>,
) -> Result<StatusCode> {
    if state.catalog().delete_banner(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(id))
    }
}
