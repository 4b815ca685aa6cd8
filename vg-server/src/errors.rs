use axum::{
    http,
    response::{IntoResponse, Response},
};
pub type WebResult<T> = std::result::Result<T, WebError>;

#[derive(thiserror::Error, Debug)]
pub enum WebError {
    #[error("Internal Server Error: {0:#}")]
    Internal(#[from] anyhow::Error),
    #[error("Templating error: {0:#}")]
    Template(#[from] minijinja::Error),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found")]
    NotFound,
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            WebError::Internal(_) | WebError::Template(_) => {
                tracing::error!("{}", message);
                if cfg!(debug_assertions) {
                    (http::StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
                } else {
                    (http::StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                        .into_response()
                }
            }
            // Validation failures are always explained
            WebError::BadRequest(_) => (http::StatusCode::BAD_REQUEST, message).into_response(),
            WebError::NotFound => (http::StatusCode::NOT_FOUND, "Not Found").into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_status_codes() {
        let response = WebError::Internal(anyhow::anyhow!("drive is down")).into_response();
        assert_eq!(response.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        let response = WebError::BadRequest("Votes are 1 to 5 stars".into()).into_response();
        assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
        assert_eq!(
            WebError::NotFound.into_response().status(),
            http::StatusCode::NOT_FOUND
        );
    }
}
