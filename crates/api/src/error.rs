//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, OrderError};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The caller may not access the resource.
    Forbidden(String),
    /// Saga operation error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn order_error_status(err: &OrderError) -> StatusCode {
    match err {
        OrderError::EmptyCart
        | OrderError::InvalidQuantity { .. }
        | OrderError::InvalidPrice { .. }
        | OrderError::TotalOverflow => StatusCode::BAD_REQUEST,
        OrderError::NotOwner { .. } => StatusCode::FORBIDDEN,
        OrderError::NotCancellable { .. } | OrderError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        OrderError::UnknownStatus(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    let status = match &err {
        SagaError::Order(order_err) => order_error_status(order_err),
        SagaError::OrderNotFound(_) => StatusCode::NOT_FOUND,
        SagaError::Domain(domain_err) => match domain_err {
            DomainError::Order(order_err) => order_error_status(order_err),
            DomainError::OrderNotFound(_) => StatusCode::NOT_FOUND,
            DomainError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use common::{OrderId, UserId};
    use domain::OrderStatus;

    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_business_errors_map_to_client_statuses() {
        assert_eq!(
            status_of(SagaError::Order(OrderError::EmptyCart).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                SagaError::Order(OrderError::NotOwner {
                    user_id: UserId::new(2)
                })
                .into()
            ),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(
                SagaError::Order(OrderError::NotCancellable {
                    status: OrderStatus::Confirmed
                })
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SagaError::OrderNotFound(OrderId::new()).into()),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_store_failures_are_internal() {
        let err = SagaError::Domain(DomainError::Serialization(
            serde_json::from_str::<u32>("x").unwrap_err(),
        ));
        assert_eq!(status_of(err.into()), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
