use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::adjustment::AdjustmentError;
use super::alias::Alias;
use super::dataset::ScoreChangeError;
use super::percentile::{PercentileBasis, PercentileError};
use super::repository::{ScoreStore, StoreError};
use super::score::ScoreError;
use super::service::{RankingService, RankingServiceError};

/// Router builder exposing the read views, rankings, percentiles and adjustment endpoints.
pub fn ranking_router<S>(service: Arc<RankingService<S>>) -> Router
where
    S: ScoreStore + 'static,
{
    Router::new()
        .route("/api/roles", get(roles_handler::<S>))
        .route("/api/members", get(members_handler::<S>))
        .route("/api/metrics", get(metrics_handler::<S>))
        .route("/api/scores", get(scores_handler::<S>))
        .route("/api/rankings", get(rankings_handler::<S>))
        .route("/api/mismatches", get(mismatches_handler::<S>))
        .route("/api/percentiles", get(percentiles_handler::<S>))
        .route("/api/adjust/preview", post(preview_handler::<S>))
        .route("/api/adjust/validate", post(validate_handler::<S>))
        .route("/api/adjust/apply", post(apply_handler::<S>))
        .route("/api/reload", post(reload_handler::<S>))
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RankingsQuery {
    /// Comma-separated role filter.
    roles: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct PercentilesQuery {
    basis: Option<String>,
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PreviewBody {
    alias: Alias,
    selected_metrics: Vec<String>,
    percent: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChangesBody {
    alias: Alias,
    changes: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
struct RowsPayload<T> {
    count: usize,
    rows: Vec<T>,
}

impl<T> From<Vec<T>> for RowsPayload<T> {
    fn from(rows: Vec<T>) -> Self {
        Self {
            count: rows.len(),
            rows,
        }
    }
}

pub(crate) async fn roles_handler<S>(State(service): State<Arc<RankingService<S>>>) -> Response
where
    S: ScoreStore + 'static,
{
    (StatusCode::OK, Json(service.roles())).into_response()
}

pub(crate) async fn members_handler<S>(State(service): State<Arc<RankingService<S>>>) -> Response
where
    S: ScoreStore + 'static,
{
    let payload = RowsPayload::from(service.members());
    (StatusCode::OK, Json(payload)).into_response()
}

pub(crate) async fn metrics_handler<S>(State(service): State<Arc<RankingService<S>>>) -> Response
where
    S: ScoreStore + 'static,
{
    let payload = RowsPayload::from(service.metrics());
    (StatusCode::OK, Json(payload)).into_response()
}

pub(crate) async fn scores_handler<S>(State(service): State<Arc<RankingService<S>>>) -> Response
where
    S: ScoreStore + 'static,
{
    (StatusCode::OK, Json(service.scores())).into_response()
}

pub(crate) async fn rankings_handler<S>(
    State(service): State<Arc<RankingService<S>>>,
    Query(query): Query<RankingsQuery>,
) -> Response
where
    S: ScoreStore + 'static,
{
    let filter = query.roles.as_deref().map(parse_role_filter);
    match service.compute_rankings(filter.as_ref()) {
        Ok(rows) => (StatusCode::OK, Json(RowsPayload::from(rows))).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn mismatches_handler<S>(
    State(service): State<Arc<RankingService<S>>>,
) -> Response
where
    S: ScoreStore + 'static,
{
    match service.mismatches() {
        Ok(rows) => (StatusCode::OK, Json(RowsPayload::from(rows))).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn percentiles_handler<S>(
    State(service): State<Arc<RankingService<S>>>,
    Query(query): Query<PercentilesQuery>,
) -> Response
where
    S: ScoreStore + 'static,
{
    let basis = match query.basis.as_deref() {
        Some(raw) => match raw.parse::<PercentileBasis>() {
            Ok(basis) => basis,
            Err(error) => return error_response(&RankingServiceError::from(error)),
        },
        None => PercentileBasis::default(),
    };
    let role = query
        .role
        .as_deref()
        .map(str::trim)
        .filter(|role| !role.is_empty());

    match service.compute_percentiles(role, basis) {
        Ok(by_role) => {
            let payload = json!({ "basis": basis, "roles": by_role });
            (StatusCode::OK, Json(payload)).into_response()
        }
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn preview_handler<S>(
    State(service): State<Arc<RankingService<S>>>,
    Json(body): Json<PreviewBody>,
) -> Response
where
    S: ScoreStore + 'static,
{
    match service.preview_adjustment(&body.alias, body.selected_metrics, body.percent) {
        Ok(preview) => (StatusCode::OK, Json(preview)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn validate_handler<S>(
    State(service): State<Arc<RankingService<S>>>,
    Json(body): Json<ChangesBody>,
) -> Response
where
    S: ScoreStore + 'static,
{
    match service.check_one_level(&body.alias, &body.changes) {
        Ok(shift) => (StatusCode::OK, Json(shift)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn apply_handler<S>(
    State(service): State<Arc<RankingService<S>>>,
    Json(body): Json<ChangesBody>,
) -> Response
where
    S: ScoreStore + 'static,
{
    match service.apply_adjustment(&body.alias, &body.changes) {
        Ok(applied) => (StatusCode::OK, Json(applied)).into_response(),
        Err(error) => error_response(&error),
    }
}

pub(crate) async fn reload_handler<S>(State(service): State<Arc<RankingService<S>>>) -> Response
where
    S: ScoreStore + 'static,
{
    match service.reload() {
        Ok(summary) => (StatusCode::OK, Json(summary)).into_response(),
        Err(error) => error_response(&error),
    }
}

fn parse_role_filter(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect()
}

/// JSON error body shared by every ranking endpoint.
pub fn error_response(error: &RankingServiceError) -> Response {
    let (status, code) = classify(error);
    let mut body = json!({
        "code": code,
        "message": error.to_string(),
    });
    if let RankingServiceError::Store(store) = error {
        if store.is_retryable() {
            body["retryable"] = json!(true);
        }
        if let StoreError::Validation(report) = store {
            body["findings"] = json!(report.findings);
        }
    }
    (status, Json(json!({ "error": body }))).into_response()
}

fn classify(error: &RankingServiceError) -> (StatusCode, &'static str) {
    match error {
        RankingServiceError::Store(store) => classify_store(store),
        RankingServiceError::Score(score) => classify_score(score),
        RankingServiceError::Change(change) => classify_change(change),
        RankingServiceError::Percentile(PercentileError::UnknownRole(_)) => {
            (StatusCode::NOT_FOUND, "unknown_role")
        }
        RankingServiceError::Percentile(PercentileError::UnknownBasis(_)) => {
            (StatusCode::BAD_REQUEST, "invalid_basis")
        }
        RankingServiceError::Percentile(PercentileError::Score(score)) => classify_score(score),
        RankingServiceError::Adjustment(adjustment) => classify_adjustment(adjustment),
        RankingServiceError::EmptyChanges => (StatusCode::BAD_REQUEST, "empty_changes"),
    }
}

fn classify_store(error: &StoreError) -> (StatusCode, &'static str) {
    match error {
        StoreError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed"),
        StoreError::Conflict => (StatusCode::CONFLICT, "conflict"),
        StoreError::Locked => (StatusCode::CONFLICT, "locked"),
        StoreError::Change(change) => classify_change(change),
        StoreError::Io(_) | StoreError::Csv(_) | StoreError::Unavailable(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "store_error")
        }
    }
}

fn classify_score(error: &ScoreError) -> (StatusCode, &'static str) {
    match error {
        ScoreError::UnknownMember(_) => (StatusCode::NOT_FOUND, "unknown_member"),
        ScoreError::MissingScore { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "missing_score"),
    }
}

fn classify_change(error: &ScoreChangeError) -> (StatusCode, &'static str) {
    match error {
        ScoreChangeError::UnknownMember(_) => (StatusCode::NOT_FOUND, "unknown_member"),
        ScoreChangeError::UnknownMetric(_) => (StatusCode::BAD_REQUEST, "unknown_metric"),
        ScoreChangeError::NonFinite { .. } => (StatusCode::BAD_REQUEST, "invalid_score"),
    }
}

fn classify_adjustment(error: &AdjustmentError) -> (StatusCode, &'static str) {
    use AdjustmentError as E;
    match error {
        E::UnknownMember(_) => (StatusCode::NOT_FOUND, "unknown_member"),
        E::UnknownMetric(_) => (StatusCode::BAD_REQUEST, "unknown_metric"),
        E::EmptySelection => (StatusCode::BAD_REQUEST, "empty_selection"),
        E::InvalidPercent(_) => (StatusCode::BAD_REQUEST, "invalid_percent"),
        E::ZeroWeightSelection { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "zero_weight_selection")
        }
        E::InapplicableMetric { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "inapplicable_metric"),
        E::ReferenceOutsideCohort { .. } | E::SelfReference(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_reference")
        }
        E::NoExpectedRank(_) => (StatusCode::UNPROCESSABLE_ENTITY, "no_expected_rank"),
        E::AlreadyAtExpectedRank { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "already_at_expected_rank")
        }
        E::NoReferenceMember { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "no_reference_member"),
        E::Score(score) => classify_score(score),
        E::Change(change) => classify_change(change),
    }
}
