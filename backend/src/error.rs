use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::pipeline::{BatchError, PipelineError};

/// Everything a handler or gate can answer with besides success.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    BatchTooLarge(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("File too large: at most {0} bytes per file")]
    PayloadTooLarge(usize),
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("{0}")]
    Identification(String),
    #[error("Identifier unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Internal server error")]
    Internal(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            err @ PipelineError::InvalidInput(_) => ApiError::InvalidInput(err.to_string()),
            PipelineError::ServiceUnavailable(msg) => ApiError::ServiceUnavailable(msg),
            PipelineError::Identification(msg) => ApiError::Identification(msg),
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        ApiError::BatchTooLarge(err.to_string())
    }
}

impl From<actix_web::error::BlockingError> for ApiError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<actix_multipart::MultipartError> for ApiError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        ApiError::BadRequest(format!("Malformed multipart body: {err}"))
    }
}

impl ApiError {
    pub fn body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::InvalidInput(_) | ApiError::BatchTooLarge(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Identification(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        if let ApiError::Internal(detail) = self {
            log::error!("Internal error: {}", detail);
        }
        let mut builder = HttpResponse::build(self.status_code());
        if matches!(self, ApiError::Unauthorized(_)) {
            builder.insert_header((header::WWW_AUTHENTICATE, "Bearer"));
        }
        builder.json(self.body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::ImageError;

    #[test]
    fn pipeline_errors_map_to_statuses() {
        let invalid: ApiError = PipelineError::InvalidInput(ImageError::UnsupportedFormat("a.txt".into())).into();
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);

        let unavailable: ApiError = PipelineError::ServiceUnavailable("no weights".into()).into();
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let failed: ApiError = PipelineError::Identification("low light".into()).into();
        assert_eq!(failed.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failed.to_string(), "low light");

        let batch: ApiError = BatchError::TooLarge { max: 10, actual: 12 }.into();
        assert_eq!(batch.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ApiError::Internal("thread pool gone".into());
        assert_eq!(err.body().error, "Internal server error");
    }

    #[test]
    fn unauthorized_sets_challenge_header() {
        let resp = ApiError::Unauthorized("Invalid API key".into()).error_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(resp.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
    }
}
