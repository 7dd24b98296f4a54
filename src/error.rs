use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Token invalid or missing required permissions.")]
    Unauthorized,

    #[error("{0} is already being updated.")]
    Busy(&'static str),

    #[error("Nothing found for {0}.")]
    NotFound(String),

    /// Any failed round trip with the hosting API: network, auth, stale hash.
    #[error("{message}")]
    Hosting { status: Option<u16>, message: String },

    #[error("Malformed content in {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid base64 content: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("{0}")]
    Form(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn hosting(status: Option<u16>, message: impl Into<String>) -> Self {
        AppError::Hosting {
            status,
            message: message.into(),
        }
    }

    pub fn malformed(path: &str, source: serde_json::Error) -> Self {
        AppError::Malformed {
            path: path.to_string(),
            source,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Busy(_) => StatusCode::CONFLICT,
            AppError::Hosting { .. } | AppError::Form(_) => StatusCode::BAD_GATEWAY,
            AppError::Malformed { .. }
            | AppError::Encoding(_)
            | AppError::Config(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosting_failures_map_to_bad_gateway() {
        let error = AppError::hosting(Some(409), "is at abc but expected def");
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(error.to_string(), "is at abc but expected def");
    }

    #[test]
    fn busy_names_the_collection() {
        let error = AppError::Busy("products");
        assert_eq!(error.status_code(), StatusCode::CONFLICT);
        assert_eq!(error.to_string(), "products is already being updated.");
    }
}
