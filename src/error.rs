//! Gateway error taxonomy and its JSON envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

/// Errors surfaced by the federation, credential, token and proxy layers.
///
/// Every variant renders as `{"error": <kind>, "details": <string>}` with a
/// matching HTTP status. Detail strings must never carry secrets.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The identity provider reported validation errors for the assertion.
    #[error("SAML validation failed: {}", .0.join("; "))]
    SamlValidation(Vec<String>),

    /// The assertion was well formed but the user is not authenticated.
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// No vendor credentials stored in the session.
    #[error("FortiFlex credentials not found in session")]
    CredentialError,

    /// The token endpoint rejected the exchange.
    #[error("{0}")]
    TokenError(String),

    /// A session field required by the operation is absent.
    #[error("{0}")]
    SessionFieldMissing(String),

    /// The inbound request body is malformed.
    #[error("{0}")]
    Validation(String),

    /// The vendor API failed or returned a non-success status.
    #[error("{message}")]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    /// Store, configuration or other infrastructure failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Machine-readable kind used in the error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SamlValidation(_) => "saml_validation_error",
            Self::NotAuthenticated(_) => "not_authenticated",
            Self::CredentialError => "credential_error",
            Self::TokenError(_) => "token_error",
            Self::SessionFieldMissing(_) => "session_field_missing",
            Self::Validation(_) => "validation_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotAuthenticated(_)
            | Self::CredentialError
            | Self::TokenError(_)
            | Self::SessionFieldMissing(_) => StatusCode::UNAUTHORIZED,
            Self::SamlValidation(_) | Self::Validation(_) | Self::Upstream { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build the response envelope.
    pub fn envelope(&self) -> ErrorEnvelope {
        let details = match self {
            // Infrastructure detail stays in the logs.
            Self::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        };

        ErrorEnvelope {
            error: self.kind(),
            details,
            errors: match self {
                Self::SamlValidation(errors) => Some(errors.clone()),
                _ => None,
            },
        }
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(format!("{:#}", e))
    }
}

/// JSON body returned for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: &'static str,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let Self::Internal(ref detail) = self {
            error!(error = %detail, "Gateway internal error");
        }
        (self.status(), Json(self.envelope())).into_response()
    }
}
