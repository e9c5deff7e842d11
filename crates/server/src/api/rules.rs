use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use seedwarden_core::{AutomationEngine, CycleReport, EngineError, Rule, RuleId, RuleRunStatus};

use super::handlers::{error_response, ErrorResponse};
use crate::state::AppState;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// A rule definition with its scheduling state
#[derive(Debug, Serialize)]
pub struct RuleView {
    #[serde(flatten)]
    pub rule: Rule,
    pub status: RuleRunStatus,
}

/// Response for the rule listing endpoint
#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub instance: String,
    pub version: u64,
    pub rules: Vec<RuleView>,
}

/// Request body for replacing an instance's rules
#[derive(Debug, Deserialize)]
pub struct ReplaceRulesRequest {
    pub rules: Vec<Rule>,
}

/// Response after replacing rules
#[derive(Debug, Serialize)]
pub struct ReplaceRulesResponse {
    pub instance: String,
    pub version: u64,
    pub rule_count: usize,
}

fn engine_for<'a>(
    state: &'a AppState,
    instance: &str,
) -> Result<&'a Arc<AutomationEngine>, ApiError> {
    state.engine(instance).ok_or_else(|| {
        error_response(
            StatusCode::NOT_FOUND,
            format!("Instance not found: {}", instance),
        )
    })
}

/// List an instance's rules with run status
pub async fn list_rules(
    State(state): State<Arc<AppState>>,
    Path(instance): Path<String>,
) -> Result<Json<RulesResponse>, ApiError> {
    let engine = engine_for(&state, &instance)?;
    let rule_set = engine.rules().await;
    let mut statuses: HashMap<RuleId, RuleRunStatus> = engine
        .rule_statuses()
        .await
        .into_iter()
        .map(|s| (s.rule_id, s))
        .collect();

    // A concurrent replace may drop a status; such rules are skipped.
    let rules = rule_set
        .definitions()
        .into_iter()
        .filter_map(|rule| {
            let status = statuses.remove(&rule.id)?;
            Some(RuleView { rule, status })
        })
        .collect();

    Ok(Json(RulesResponse {
        instance,
        version: rule_set.version(),
        rules,
    }))
}

/// Validate and replace an instance's rules
pub async fn replace_rules(
    State(state): State<Arc<AppState>>,
    Path(instance): Path<String>,
    Json(request): Json<ReplaceRulesRequest>,
) -> Result<Json<ReplaceRulesResponse>, ApiError> {
    let engine = engine_for(&state, &instance)?;
    let rule_count = request.rules.len();

    match engine.replace_rules(request.rules).await {
        Ok(version) => {
            info!(instance = %instance, version, "Rules replaced via API");
            Ok(Json(ReplaceRulesResponse {
                instance,
                version,
                rule_count,
            }))
        }
        Err(EngineError::InvalidRules(e)) => {
            warn!(instance = %instance, error = %e, "Rejected rule set");
            Err(error_response(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => Err(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            e.to_string(),
        )),
    }
}

/// Run a rule now, bypassing its interval
pub async fn apply_rule(
    State(state): State<Arc<AppState>>,
    Path((instance, rule_id)): Path<(String, RuleId)>,
) -> Result<Json<CycleReport>, ApiError> {
    let engine = engine_for(&state, &instance)?;

    engine.apply_now(rule_id).await.map(Json).map_err(|e| {
        let status = match e {
            EngineError::RuleNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::RuleDisabled(_) => StatusCode::CONFLICT,
            EngineError::ListTorrents(_) => StatusCode::BAD_GATEWAY,
            EngineError::InvalidRules(_) => StatusCode::BAD_REQUEST,
        };
        error_response(status, e.to_string())
    })
}
