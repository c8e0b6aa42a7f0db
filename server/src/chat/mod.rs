pub mod conversations;
pub mod names;
pub mod notifications;
pub mod store;

use axum::http::StatusCode;

use crate::chat::store::StoreError;

/// Log a store failure and map it onto a REST status.
pub(crate) fn store_failure(err: StoreError) -> StatusCode {
    match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        err => {
            tracing::error!(error = %err, "Store request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
