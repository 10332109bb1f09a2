use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use serde_json::json;
use thiserror::Error;

/// Domain-level error, translated to an HTTP response only at the edge.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("authentication failed")]
    Unauthenticated,

    #[error("not authorized")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("merchant has no active wallet")]
    NoActiveWallet,

    #[error("{0}")]
    Conflict(String),

    /// Fatal to the enclosing create request. Never carries a placeholder
    /// address - constructing this variant is the only way a derivation
    /// failure can surface, so there is no code path that persists a
    /// payment without a real on-chain address.
    #[error("address derivation failed: {0}")]
    AddressDerivation(String),

    /// Chain indexer failure. Swallowed by the monitor, never surfaced
    /// to a merchant-facing response.
    #[error("upstream chain indexer error: {0}")]
    Upstream(String),

    /// Webhook delivery failure after retries exhausted.
    #[error("webhook delivery failed: {0}")]
    Delivery(String),

    #[error("internal error")]
    Internal,
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "store error");
        GatewayError::Internal
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GatewayError::Unauthorized => StatusCode::FORBIDDEN,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::NoActiveWallet => StatusCode::BAD_REQUEST,
            GatewayError::Conflict(_) => StatusCode::BAD_REQUEST,
            GatewayError::AddressDerivation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Unauthenticated/Unauthorized never leak which part of the
        // credential check failed - the message is the same either way.
        let message = match self {
            GatewayError::Unauthenticated | GatewayError::Unauthorized => {
                "authentication failed".to_string()
            }
            other => other.to_string(),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "code": self.status_code().as_u16(),
                "message": message,
                "type": self.error_type(),
            }
        }))
    }
}

impl GatewayError {
    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "VALIDATION_ERROR",
            GatewayError::Unauthenticated => "UNAUTHENTICATED",
            GatewayError::Unauthorized => "UNAUTHORIZED",
            GatewayError::NotFound(_) => "NOT_FOUND",
            GatewayError::NoActiveWallet => "NO_ACTIVE_WALLET",
            GatewayError::Conflict(_) => "CONFLICT",
            GatewayError::AddressDerivation(_) => "ADDRESS_DERIVATION_ERROR",
            GatewayError::Upstream(_) => "UPSTREAM_ERROR",
            GatewayError::Delivery(_) => "DELIVERY_ERROR",
            GatewayError::Internal => "INTERNAL_ERROR",
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
