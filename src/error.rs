use axum::{
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Body returned when the `url` query parameter is absent or empty
pub const MISSING_URL_MESSAGE: &str = "URL parameter is missing.";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("URL parameter is missing.")]
    MissingUrl,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Origin not allowed: {0}")]
    BlockedOrigin(String),

    #[error("{0}")]
    Upstream(#[from] reqwest::Error),

    #[error("too many redirects (more than {limit}) starting at {url}")]
    TooManyRedirects { limit: u32, url: String },
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingUrl | ProxyError::InvalidUrl(_) | ProxyError::BlockedOrigin(_) => {
                StatusCode::BAD_REQUEST
            }
            ProxyError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::TooManyRedirects { .. } => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Proxy request failed ({}): {}", status, self);
        } else {
            warn!("Rejected proxy request ({}): {}", status, self);
        }

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("Proxy error: {}", self),
        )
            .into_response()
    }
}
