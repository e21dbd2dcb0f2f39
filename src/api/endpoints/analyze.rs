//! Transcript analysis endpoint.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::models::{AnalysisResponse, AnalyzeBody};

/// `POST /analyze`: run the cascade on one transcript.
///
/// Malformed bodies and validation failures are `400`; every analysis
/// outcome, including fallbacks, is a `200` envelope.
pub async fn analyze(
    State(ctx): State<ApiContext>,
    payload: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Result<Json<AnalysisResponse>, ApiError> {
    let Json(body) = payload?;
    let response = ctx.gateway.handle(body).await?;
    Ok(Json(response))
}
