use std::fmt::Display;
use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Deployment environment. Only `Development` exposes error details.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Production,
    Development,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" => Ok(Self::Development),
            other => Err(format!(
                "unknown environment `{other}` (expected production or development)"
            )),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}")]
    Upstream {
        message: &'static str,
        details: Option<String>,
    },
}

impl ApiError {
    /// A database or model failure. The cause is always logged; it reaches
    /// the client only in development.
    pub fn upstream(environment: Environment, message: &'static str, err: impl Display) -> Self {
        error!(error = %err, "{message}");
        Self::Upstream {
            message,
            details: environment.is_development().then(|| err.to_string()),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self {
            Self::BadRequest(message) => {
                warn!(status = %status, error = %message, "rejected request");
                ErrorBody {
                    error: message,
                    details: None,
                }
            }
            Self::Upstream { message, details } => ErrorBody {
                error: message.to_string(),
                details,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parses_and_defaults_to_production() {
        assert_eq!(Environment::default(), Environment::Production);
        assert_eq!("Development".parse::<Environment>(), Ok(Environment::Development));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn details_only_in_development() {
        let prod = ApiError::upstream(Environment::Production, "Failed", "connection refused");
        assert!(matches!(prod, ApiError::Upstream { details: None, .. }));

        let dev = ApiError::upstream(Environment::Development, "Failed", "connection refused");
        let ApiError::Upstream { details, .. } = dev else {
            panic!("expected upstream error");
        };
        assert_eq!(details.as_deref(), Some("connection refused"));
    }
}
