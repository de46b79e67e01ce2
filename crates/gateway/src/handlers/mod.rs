//! API handlers module

pub mod health;
pub mod stories;
pub mod users;
pub mod voices;

use fairytale_common::errors::AppError;

/// Turn an extractor rejection into the `请求有误` envelope
pub(crate) fn bad_request(rejection: impl std::fmt::Display) -> AppError {
    AppError::Validation {
        message: rejection.to_string(),
        field: None,
    }
}

pub(crate) fn invalid(errors: validator::ValidationErrors) -> AppError {
    let field = errors.field_errors().keys().next().map(|k| k.to_string());
    AppError::Validation {
        message: errors.to_string(),
        field,
    }
}
