//! Error types for the spreadsheet transport, the store and the HTTP layer.

use serde::Deserialize;
use thiserror::Error;

/// Failure talking to the spreadsheet service.
#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("spreadsheet API error: {0}")]
    Unknown(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl SheetsError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SheetsError::RateLimited(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SheetsError::NotFound(_))
    }

    /// Classify an error response from the spreadsheet API.
    ///
    /// The HTTP status and the structured `error.status` field decide first.
    /// Only when neither is conclusive is the message text inspected; the API
    /// reports a missing tab as a 400 "Unable to parse range".
    pub fn from_response(http_status: u16, body: &str) -> Self {
        let parsed: Option<ApiErrorBody> = serde_json::from_str(body).ok();
        let (api_status, message) = match parsed {
            Some(ApiErrorBody { error }) => (error.status.unwrap_or_default(), error.message),
            None => (String::new(), body.chars().take(200).collect()),
        };

        match (http_status, api_status.as_str()) {
            (429, _) | (_, "RESOURCE_EXHAUSTED") => SheetsError::RateLimited(message),
            (401, _) | (403, _) | (_, "PERMISSION_DENIED") | (_, "UNAUTHENTICATED") => {
                SheetsError::PermissionDenied(message)
            }
            (404, _) | (_, "NOT_FOUND") => SheetsError::NotFound(message),
            _ => Self::classify_message(message),
        }
    }

    /// Fallback classification for unstructured messages.
    pub fn classify_message(message: String) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("unable to parse range") || lower.contains("not found") {
            SheetsError::NotFound(message)
        } else if lower.contains("quota") || lower.contains("rate limit") {
            SheetsError::RateLimited(message)
        } else if lower.contains("permission") || lower.contains("does not have access") {
            SheetsError::PermissionDenied(message)
        } else {
            SheetsError::Unknown(message)
        }
    }
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    status: Option<String>,
}

/// Failure in the data-access layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("violation not found: {0}")]
    ViolationNotFound(String),

    #[error("tenant '{0}' has no valid spreadsheet URL")]
    MissingSpreadsheet(String),

    #[error("no tab matching {0:?} found")]
    TabNotFound(Vec<String>),

    #[error("field '{field}' does not exist on the {tab} tab")]
    FieldNotOnTab { field: String, tab: String },

    #[error("'{value}' is not a valid {field}")]
    InvalidValue { field: String, value: String },

    #[error(transparent)]
    Sheets(#[from] SheetsError),
}

#[cfg(feature = "web")]
pub use web::AppError;

#[cfg(feature = "web")]
mod web {
    use super::{SheetsError, StoreError};
    use crate::auth::AuthError;
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };
    use serde_json::json;
    use thiserror::Error;

    /// Error returned by HTTP handlers.
    #[derive(Debug, Error)]
    pub enum AppError {
        #[error("not authenticated")]
        Unauthenticated,

        #[error("forbidden: {0}")]
        Forbidden(String),

        #[error("invalid request: {0}")]
        BadRequest(String),

        #[error("not found: {0}")]
        NotFound(String),

        #[error("identity provider unavailable: {0}")]
        IdentityProvider(String),

        #[error("support mail is not configured")]
        MailDisabled,

        #[error("failed to send mail: {0}")]
        Mail(String),

        #[error("export failed: {0}")]
        Export(String),

        #[error(transparent)]
        Store(#[from] StoreError),
    }

    impl From<SheetsError> for AppError {
        fn from(err: SheetsError) -> Self {
            AppError::Store(StoreError::Sheets(err))
        }
    }

    impl From<AuthError> for AppError {
        fn from(err: AuthError) -> Self {
            match err {
                AuthError::MissingToken | AuthError::InvalidToken => AppError::Unauthenticated,
                other => AppError::IdentityProvider(other.to_string()),
            }
        }
    }

    impl AppError {
        fn status_and_message(&self) -> (StatusCode, String) {
            match self {
                AppError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
                AppError::Forbidden(_) => (StatusCode::FORBIDDEN, self.to_string()),
                AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
                AppError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
                AppError::IdentityProvider(e) => {
                    log::error!("Identity provider failed: {}", e);
                    (StatusCode::BAD_GATEWAY, "Could not verify session".to_string())
                }
                AppError::MailDisabled => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
                AppError::Mail(e) => {
                    log::error!("Support mail failed: {}", e);
                    (StatusCode::BAD_GATEWAY, "Failed to send message".to_string())
                }
                AppError::Export(e) => {
                    log::error!("Export failed: {}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Export failed".to_string())
                }
                AppError::Store(err) => match err {
                    StoreError::TenantNotFound(_) | StoreError::ViolationNotFound(_) => {
                        (StatusCode::NOT_FOUND, err.to_string())
                    }
                    StoreError::FieldNotOnTab { .. } | StoreError::InvalidValue { .. } => {
                        (StatusCode::BAD_REQUEST, err.to_string())
                    }
                    StoreError::MissingSpreadsheet(_) | StoreError::TabNotFound(_) => {
                        log::error!("Tenant spreadsheet misconfigured: {}", err);
                        (StatusCode::BAD_GATEWAY, err.to_string())
                    }
                    StoreError::Sheets(SheetsError::RateLimited(_)) => (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Spreadsheet service is busy, try again shortly".to_string(),
                    ),
                    StoreError::Sheets(SheetsError::PermissionDenied(e)) => {
                        log::error!("Spreadsheet permission denied: {}", e);
                        (
                            StatusCode::BAD_GATEWAY,
                            "Spreadsheet access denied".to_string(),
                        )
                    }
                    StoreError::Sheets(SheetsError::NotFound(_)) => {
                        (StatusCode::NOT_FOUND, err.to_string())
                    }
                    StoreError::Sheets(e) => {
                        log::error!("Spreadsheet error: {}", e);
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Internal error".to_string(),
                        )
                    }
                },
            }
        }
    }

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            let (status, message) = self.status_and_message();
            let body = Json(json!({
                "error": message,
                "status": status.as_u16(),
            }));
            (status, body).into_response()
        }
    }

}
