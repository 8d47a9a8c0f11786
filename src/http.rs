//! HTTP surface for the console: one route per aggregate operation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::domain::aggregates::{Product, ProductInput};
use crate::domain::events::ChangeNotifier;
use crate::store::RemoteStore;
use crate::writer::ProductWriter;
use crate::AggregateError;

pub fn router<S: RemoteStore, N: ChangeNotifier>(writer: ProductWriter<S, N>) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "opensase-catalog"})) }))
        .route("/api/v1/products", post(create_product::<S, N>))
        .route("/api/v1/products/:id", put(update_product::<S, N>).delete(delete_product::<S, N>))
        .with_state(writer)
}

async fn create_product<S: RemoteStore, N: ChangeNotifier>(
    State(writer): State<ProductWriter<S, N>>,
    Json(input): Json<ProductInput>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let product = writer.create(input).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product<S: RemoteStore, N: ChangeNotifier>(
    State(writer): State<ProductWriter<S, N>>,
    Path(id): Path<Uuid>,
    Json(input): Json<ProductInput>,
) -> Result<Json<Product>, ApiError> {
    Ok(Json(writer.update(id, input).await?))
}

async fn delete_product<S: RemoteStore, N: ChangeNotifier>(
    State(writer): State<ProductWriter<S, N>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = writer.delete(id).await?;
    Ok(Json(json!({ "id": id })))
}

/// Maps a classified write failure onto a status code and a body that says
/// which step and collection failed.
pub struct ApiError(AggregateError);

impl From<AggregateError> for ApiError {
    fn from(err: AggregateError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match &err {
            AggregateError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AggregateError::NotFound { .. } => StatusCode::NOT_FOUND,
            AggregateError::Gate(_) => StatusCode::SERVICE_UNAVAILABLE,
            AggregateError::RootWrite { .. } | AggregateError::ChildSync { .. } => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "product write failed");
        }
        let body = json!({
            "error": err.to_string(),
            "step": err.step(),
            "collection": err.collection(),
            "product_id": err.product_id(),
            "partial": err.is_partial(),
        });
        (status, Json(body)).into_response()
    }
}
