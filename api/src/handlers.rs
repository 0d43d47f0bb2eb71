//! Route handlers.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use tezdel_store::is_valid_year;
use tezdel_types::Delegation;

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct DelegationsQuery {
    pub year: Option<String>,
}

/// Public shape of a delegation. The upstream id stays internal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationView {
    pub timestamp: String,
    pub delegator: String,
    pub amount: String,
    pub level: String,
}

impl From<Delegation> for DelegationView {
    fn from(d: Delegation) -> Self {
        Self {
            timestamp: d.timestamp,
            delegator: d.delegator,
            amount: d.amount,
            level: d.level,
        }
    }
}

/// `GET /xzt/delegations?year=YYYY`. Without `year`, the current UTC year.
///
/// Responds with a bare JSON array, newest first.
pub async fn delegations(
    State(state): State<AppState>,
    Query(query): Query<DelegationsQuery>,
) -> Result<Json<Vec<DelegationView>>, ApiError> {
    let year = match query.year.filter(|y| !y.is_empty()) {
        Some(year) => year,
        None => Utc::now().year().to_string(),
    };
    if !is_valid_year(&year) {
        return Err(ApiError::InvalidYear(year));
    }

    let delegations = state.store.get_by_year(&year)?;
    Ok(Json(
        delegations.into_iter().map(DelegationView::from).collect(),
    ))
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .metrics
        .encode()
        .map_err(|e| ApiError::Metrics(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
