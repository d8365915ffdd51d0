use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{Value, json};

/// Errors surfaced at the HTTP boundary.
///
/// Anything that is not a validation or lookup failure becomes `Internal`;
/// its detail is logged where it is raised and never echoed to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{message}")]
    NotFound {
        message: String,
        /// Extra `(field, value)` pair echoed in the body, e.g. the region id.
        key: Option<(&'static str, String)>,
    },

    #[error("{message}")]
    Internal {
        message: String,
        key: Option<(&'static str, Option<String>)>,
    },
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            key: None,
        }
    }

    pub fn not_found_for(message: impl Into<String>, field: &'static str, id: &str) -> Self {
        Self::NotFound {
            message: message.into(),
            key: Some((field, id.to_string())),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            key: None,
        }
    }

    pub fn internal_for(
        message: impl Into<String>,
        field: &'static str,
        id: Option<String>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            key: Some((field, id)),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> Value {
        let mut body = json!({ "error": self.to_string() });
        match self {
            Self::Validation(_) => {}
            Self::NotFound { key, .. } => {
                if let Some((field, id)) = key {
                    body[*field] = json!(id);
                }
            }
            Self::Internal { key, .. } => {
                if let Some((field, id)) = key {
                    body["status"] = json!("error");
                    body[*field] = json!(id);
                }
            }
        }
        body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
