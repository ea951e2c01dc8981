use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};

use crate::pages;
use crate::repo::RepoError;
use crate::storage::ImageStoreError;

pub const LOGIN_URL: &str = "/auth/login/";

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("not found")] NotFound,
    #[error("login required")] LoginRequired { next: String },
    #[error("forbidden")] Forbidden,
    #[error("bad request")] BadRequest,
    #[error("internal error")] Internal,
}

impl From<RepoError> for AppError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => AppError::NotFound,
            RepoError::Conflict => AppError::BadRequest,
            RepoError::Internal(msg) => {
                tracing::error!("repository failure: {msg}");
                AppError::Internal
            }
        }
    }
}

impl From<ImageStoreError> for AppError {
    fn from(e: ImageStoreError) -> Self {
        match e {
            ImageStoreError::NotFound => AppError::NotFound,
            ImageStoreError::Other(msg) => {
                tracing::error!("image store failure: {msg}");
                AppError::Internal
            }
        }
    }
}

/// `/auth/login/?next=<path>` with slashes left readable.
pub fn login_redirect_target(next: &str) -> String {
    let encoded = urlencoding::encode(next).replace("%2F", "/");
    format!("{LOGIN_URL}?next={encoded}")
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::LoginRequired { .. } => StatusCode::FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest => StatusCode::BAD_REQUEST,
            AppError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::LoginRequired { next } => {
                return HttpResponse::Found()
                    .insert_header((header::LOCATION, login_redirect_target(next)))
                    .finish();
            }
            AppError::NotFound => pages::not_found(None),
            AppError::Forbidden => pages::forbidden(),
            AppError::BadRequest => pages::bad_request(),
            AppError::Internal => pages::server_error(),
        };
        HttpResponse::build(self.status_code())
            .content_type(header::ContentType::html())
            .body(body)
    }
}
