//! JSON endpoints for machine clients. Every route here needs the service principal.
use axum::{
    extract::{Path, Query, State},
    Json,
};
use base64::Engine;
use serde::Deserialize;
use vg::basic_models::{GalleryEntry, LeaderboardEntry, RoastRequest, RoastResponse};

use super::AppState;
use crate::auth::ServicePrincipal;
use crate::errors::{WebError, WebResult};
use crate::gallery;

/// Lets a client check its secret before doing anything expensive
pub async fn auth_check(_: ServicePrincipal) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// Every image with its counters, in drive order
pub async fn images(
    State(state): State<AppState>,
    _: ServicePrincipal,
) -> WebResult<Json<Vec<GalleryEntry>>> {
    let files = state.gallery.files().await?;
    let doc = state.db.load().await?;
    Ok(Json(gallery::entries(&files, &doc)))
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_top")]
    n: usize,
}

fn default_top() -> usize {
    5
}

pub async fn leaderboard(
    State(state): State<AppState>,
    _: ServicePrincipal,
    Query(query): Query<LeaderboardQuery>,
) -> WebResult<Json<Vec<LeaderboardEntry>>> {
    let files = state.gallery.files().await?;
    let doc = state.db.load().await?;
    Ok(Json(gallery::leaderboard(&files, &doc, query.n)))
}

/// Roast an image on behalf of a client, returning the audio inline.
pub async fn roast(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    _: ServicePrincipal,
    Json(request): Json<RoastRequest>,
) -> WebResult<Json<RoastResponse>> {
    state
        .gallery
        .find(&file_id)
        .await?
        .ok_or(WebError::NotFound)?;
    let roasted = state.roast(&file_id, request.level, request.voice).await?;
    Ok(Json(RoastResponse {
        file_id,
        text: roasted.record.text,
        level: roasted.record.level,
        audio_base64: roasted
            .audio
            .map(|a| base64::engine::general_purpose::STANDARD.encode(a)),
    }))
}
