use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use seedwarden_core::{
    rules::ActionKind, ActivityFilter, ActivityOutcome, ActivityRecord, RuleId,
};

use super::handlers::{error_response, ErrorResponse};
use crate::state::AppState;

/// Maximum allowed limit for activity queries
const MAX_LIMIT: i64 = 1000;

/// Default limit for activity queries
const DEFAULT_LIMIT: i64 = 100;

/// Query parameters for activity endpoint
#[derive(Debug, Deserialize)]
pub struct ActivityQueryParams {
    /// Filter by instance name
    pub instance: Option<String>,
    /// Filter by rule ID
    pub rule_id: Option<RuleId>,
    /// Filter by torrent hash
    pub torrent_hash: Option<String>,
    /// Filter by action (e.g. "delete", "tags_added")
    pub action: Option<String>,
    /// Filter by outcome (success, failed, rejected, skipped)
    pub outcome: Option<String>,
    /// Filter events after this timestamp (ISO 8601)
    pub from: Option<DateTime<Utc>>,
    /// Filter events before this timestamp (ISO 8601)
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of events to return (default 100, max 1000)
    pub limit: Option<i64>,
    /// Pagination offset (default 0)
    pub offset: Option<i64>,
}

/// Response for activity query endpoint
#[derive(Debug, Serialize)]
pub struct ActivityQueryResponse {
    /// List of activity records, newest first
    pub events: Vec<ActivityRecord>,
    /// Total number of matching events
    pub total: i64,
    /// Limit used for this query
    pub limit: i64,
    /// Offset used for this query
    pub offset: i64,
}

/// Query activity records
pub async fn query_activity(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActivityQueryParams>,
) -> Result<Json<ActivityQueryResponse>, (StatusCode, Json<ErrorResponse>)> {
    // Validate and cap limit
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    // Build base filter (shared between query and count)
    let mut base_filter = ActivityFilter::new();

    if let Some(ref instance) = params.instance {
        base_filter = base_filter.with_instance(instance);
    }

    if let Some(rule_id) = params.rule_id {
        base_filter = base_filter.with_rule_id(rule_id);
    }

    if let Some(ref hash) = params.torrent_hash {
        base_filter = base_filter.with_torrent_hash(hash.to_lowercase());
    }

    if let Some(ref action) = params.action {
        let action = ActionKind::parse(action).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("Unknown action: {}", action),
            )
        })?;
        base_filter = base_filter.with_action(action);
    }

    if let Some(ref outcome) = params.outcome {
        let outcome = ActivityOutcome::parse(outcome).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("Unknown outcome: {}", outcome),
            )
        })?;
        base_filter = base_filter.with_outcome(outcome);
    }

    if params.from.is_some() || params.to.is_some() {
        base_filter = base_filter.with_time_range(params.from, params.to);
    }

    // Create query filter with pagination
    let query_filter = base_filter.clone().with_limit(limit).with_offset(offset);

    let events = state.activity_store().query(&query_filter).map_err(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to query activity: {}", e),
        )
    })?;

    // Total count ignores limit/offset
    let total = state.activity_store().count(&base_filter).map_err(|e| {
        error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to count activity: {}", e),
        )
    })?;

    Ok(Json(ActivityQueryResponse {
        events,
        total,
        limit,
        offset,
    }))
}
