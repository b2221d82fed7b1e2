//! Gateway error types and their HTTP response mapping.

use actix_web::http::StatusCode;
use serde_json::json;

use crate::middleware::response::GatewayResponse;

/// Unexpected failures inside the pipeline.
///
/// Expected outcomes (rate-limit denials, breaker refusals, upstream errors
/// and timeouts) are regular responses built by their stages; this enum only
/// covers faults the chain driver has to convert into a 500. The driver tags
/// untagged errors with the name of the stage that raised them.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("stage {stage} failed: {message}")]
    Stage {
        stage: &'static str,
        message: String,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The offending stage, when known.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            GatewayError::Stage { stage, .. } => Some(stage),
            GatewayError::Internal(_) => None,
        }
    }

    /// Maps the error to the 500 response the client receives.
    pub fn to_response(&self) -> GatewayResponse {
        let body = match self {
            GatewayError::Stage { stage, message } => json!({
                "error": message,
                "stage": stage,
                "type": "internal",
            }),
            GatewayError::Internal(message) => json!({
                "error": message,
                "type": "internal",
            }),
        };
        GatewayResponse::json(StatusCode::INTERNAL_SERVER_ERROR, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_errors_name_the_stage() {
        let err = GatewayError::Stage {
            stage: "proxy",
            message: "backend missing".to_string(),
        };
        let response = err.to_response();
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["stage"], "proxy");
    }
}
