//! Public order tracking route.

use axum::extract::State;
use axum::Json;
use std::sync::Arc;

use super::error::ApiPath;
use crate::tracking::{TrackingReader, TrackingView};
use crate::Result;

pub async fn track_order(State(reader): State<Arc<TrackingReader>>, ApiPath(query): ApiPath<String>) -> Result<Json<TrackingView>> {
    Ok(Json(reader.track(&query).await?))
}
