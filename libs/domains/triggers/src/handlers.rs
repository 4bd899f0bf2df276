use axum::{
    Json, Router,
    extract::{FromRequest, FromRequestParts, Path, Request, State},
    http::{StatusCode, request::Parts},
    response::IntoResponse,
    routing::{delete, post},
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use utoipa::OpenApi;

use crate::error::{ErrorResponse, TriggerError, TriggerResult};
use crate::models::{
    BroadcastRequest, BulkTriggerRequest, DispatchAck, ResolvedSubscriber, TenantContext,
    TriggerRequest,
};
use crate::service::TriggerService;

pub const ENVIRONMENT_HEADER: &str = "x-environment-id";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";
pub const USER_HEADER: &str = "x-user-id";

/// OpenAPI documentation for the Events API
#[derive(OpenApi)]
#[openapi(
    paths(trigger_event, trigger_bulk, broadcast_event, cancel_trigger),
    components(schemas(
        TriggerRequest,
        BulkTriggerRequest,
        BroadcastRequest,
        DispatchAck,
        ResolvedSubscriber,
        TenantContext,
        ErrorResponse
    )),
    tags(
        (name = "Events", description = "Workflow trigger endpoints")
    )
)]
pub struct ApiDoc;

/// Create the events router
pub fn router(service: TriggerService) -> Router {
    let shared_service = Arc::new(service);

    Router::new()
        .route("/trigger", post(trigger_event))
        .route("/trigger/bulk", post(trigger_bulk))
        .route("/trigger/broadcast", post(broadcast_event))
        .route("/trigger/{transaction_id}", delete(cancel_trigger))
        .with_state(shared_service)
}

/// Tenant context is set by the upstream auth layer as plain headers.
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = TriggerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &'static str| -> Result<String, TriggerError> {
            parts
                .headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .ok_or_else(|| TriggerError::MissingTenant(name.to_string()))
        };

        Ok(TenantContext::new(
            header(ENVIRONMENT_HEADER)?,
            header(ORGANIZATION_HEADER)?,
            header(USER_HEADER)?,
        ))
    }
}

/// JSON body whose rejections use the trigger error body.
pub struct TriggerJson<T>(pub T);

impl<T, S> FromRequest<S> for TriggerJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = TriggerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(data) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| TriggerError::Validation(rejection.body_text()))?;
        Ok(TriggerJson(data))
    }
}

/// Trigger a workflow
#[utoipa::path(
    post,
    path = "/trigger",
    tag = "Events",
    request_body = TriggerRequest,
    responses(
        (status = 201, description = "Trigger accepted", body = DispatchAck),
        (status = 400, description = "Invalid request or actor", body = ErrorResponse),
        (status = 401, description = "Missing tenant headers", body = ErrorResponse),
        (status = 409, description = "Transaction id already used", body = ErrorResponse),
        (status = 502, description = "Workflow engine error", body = ErrorResponse)
    )
)]
async fn trigger_event(
    State(service): State<Arc<TriggerService>>,
    tenant: TenantContext,
    TriggerJson(request): TriggerJson<TriggerRequest>,
) -> TriggerResult<impl IntoResponse> {
    let ack = service.trigger(tenant, request).await?;
    Ok((StatusCode::CREATED, Json(ack)))
}

/// Trigger several workflows in order
#[utoipa::path(
    post,
    path = "/trigger/bulk",
    tag = "Events",
    request_body = BulkTriggerRequest,
    responses(
        (status = 201, description = "All triggers accepted", body = Vec<DispatchAck>),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Missing tenant headers", body = ErrorResponse),
        (status = 409, description = "Transaction id already used", body = ErrorResponse)
    )
)]
async fn trigger_bulk(
    State(service): State<Arc<TriggerService>>,
    tenant: TenantContext,
    TriggerJson(request): TriggerJson<BulkTriggerRequest>,
) -> TriggerResult<impl IntoResponse> {
    let acks = service.trigger_bulk(tenant, request).await?;
    Ok((StatusCode::CREATED, Json(acks)))
}

/// Trigger a workflow for every subscriber
#[utoipa::path(
    post,
    path = "/trigger/broadcast",
    tag = "Events",
    request_body = BroadcastRequest,
    responses(
        (status = 201, description = "Broadcast accepted", body = DispatchAck),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 401, description = "Missing tenant headers", body = ErrorResponse),
        (status = 409, description = "Transaction id already used", body = ErrorResponse)
    )
)]
async fn broadcast_event(
    State(service): State<Arc<TriggerService>>,
    tenant: TenantContext,
    TriggerJson(request): TriggerJson<BroadcastRequest>,
) -> TriggerResult<impl IntoResponse> {
    let ack = service.broadcast(tenant, request).await?;
    Ok((StatusCode::CREATED, Json(ack)))
}

/// Cancel pending work for a transaction
#[utoipa::path(
    delete,
    path = "/trigger/{transaction_id}",
    tag = "Events",
    params(
        ("transaction_id" = String, Path, description = "Transaction ID")
    ),
    responses(
        (status = 200, description = "Whether pending work was cancelled", body = bool),
        (status = 401, description = "Missing tenant headers", body = ErrorResponse)
    )
)]
async fn cancel_trigger(
    State(service): State<Arc<TriggerService>>,
    tenant: TenantContext,
    Path(transaction_id): Path<String>,
) -> TriggerResult<Json<bool>> {
    let cancelled = service.cancel(tenant, &transaction_id).await?;
    Ok(Json(cancelled))
}
