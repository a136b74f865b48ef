//! Tool execution handler

use axum::{extract::State, Json};
use loreforge_common::errors::Result;
use serde::{Deserialize, Serialize};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    pub tool: String,

    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Serialize)]
pub struct ExecuteResponse {
    pub tool: String,
    pub data: serde_json::Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted: Option<String>,
}

/// Execute one tool by name
///
/// Validation failures surface as 400s with per-parameter details;
/// execution failures come back as `success: false` outcomes.
pub async fn execute(
    State(state): State<AppState>,
    Json(body): Json<ExecuteBody>,
) -> Result<Json<ExecuteResponse>> {
    let result = state.tools.execute(&body.tool, body.parameters).await?;

    Ok(Json(ExecuteResponse {
        tool: result.outcome.tool,
        data: result.outcome.data,
        success: result.outcome.success,
        error: result.outcome.error,
        formatted: Some(result.formatted),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_defaults_parameters_to_null() {
        let body: ExecuteBody = serde_json::from_str(r#"{"tool": "search_knowledge"}"#).unwrap();
        assert_eq!(body.tool, "search_knowledge");
        assert!(body.parameters.is_null());
    }

    #[test]
    fn test_response_skips_empty_error() {
        let response = ExecuteResponse {
            tool: "search_knowledge".to_string(),
            data: serde_json::json!([]),
            success: true,
            error: None,
            formatted: Some("**search_knowledge**: no results".to_string()),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("\"error\""));
        assert!(json.contains("\"formatted\""));
    }
}
