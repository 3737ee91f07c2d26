use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use margin_engine::{ForecastError, RateCurveError, ValuationError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Valuation(#[from] ValuationError),
    #[error(transparent)]
    Forecast(#[from] ForecastError),
    #[error("invalid rate curve: {0}")]
    RateCurve(#[from] RateCurveError),
}

fn valuation_status(err: &ValuationError) -> StatusCode {
    match err {
        ValuationError::StalePositions { .. } => StatusCode::CONFLICT,
        ValuationError::KindMismatch { .. } => StatusCode::BAD_REQUEST,
        ValuationError::NegativeAggregate { .. } | ValuationError::Number(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::RateCurve(_) => StatusCode::BAD_REQUEST,
            ApiError::Valuation(err) | ApiError::Forecast(ForecastError::Valuation(err)) => {
                valuation_status(err)
            }
            ApiError::Forecast(ForecastError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Forecast(ForecastError::SelfMatch | ForecastError::Number(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Forecast(ForecastError::Simulation(_)) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(target: "risk_api", error = %self, "request failed");
        } else {
            debug!(target: "risk_api", error = %self, %status, "request refused");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
