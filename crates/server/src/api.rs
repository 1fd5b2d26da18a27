//! Audit log read and report routes.
//!
//! - `GET /api/audit-logs`           list entries, newest first (JSON)
//! - `GET /api/audit-logs/export`    download a CSV or PDF report
//! - `GET /api/reports/audit-logs`   same report under its reporting path
//!
//! Every route needs an [`Actor`] in the request extensions and the audit view capability.

use std::str::FromStr;
use std::sync::Arc;

use attest_core::approvals::ApprovalRegistry;
use attest_core::authz::{Actor, AuthorizationGate, Role};
use attest_core::domain::approval::ApprovalId;
use attest_core::domain::audit::{AuditAction, AuditLogEntry, AuditQuery};
use attest_core::errors::{ApplicationError, InterfaceError};
use attest_core::export::{end_bound, start_bound, ExportEngine, ExportFormat, ReportRequest};
use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_EMAIL_HEADER: &str = "x-actor-email";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Clone)]
pub struct ApiState {
    registry: Arc<ApprovalRegistry>,
    exporter: ExportEngine,
    gate: AuthorizationGate,
}

pub fn router(registry: Arc<ApprovalRegistry>, exporter: ExportEngine) -> Router {
    let state = ApiState { registry, exporter, gate: AuthorizationGate };
    Router::new()
        .route("/api/audit-logs", get(list_audit_logs))
        .route("/api/audit-logs/export", get(export_report))
        .route("/api/reports/audit-logs", get(export_report))
        .layer(middleware::from_fn(identity_from_headers))
        .with_state(state)
}

/// Maps identity headers set by the fronting auth proxy onto an [`Actor`].
/// An actor already present in the extensions wins.
pub async fn identity_from_headers(mut request: Request, next: Next) -> Response {
    if request.extensions().get::<Actor>().is_none() {
        if let Some(actor) = actor_from_headers(request.headers()) {
            request.extensions_mut().insert(actor);
        }
    }
    next.run(request).await
}

fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    let email = value(ACTOR_EMAIL_HEADER)?;
    let id = value(ACTOR_ID_HEADER).unwrap_or_else(|| email.clone());
    let role = value(ACTOR_ROLE_HEADER).map_or(Role::Unrecognized(String::new()), |raw| Role::parse(&raw));
    Some(Actor::new(id, email, role))
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string)
}

#[derive(Debug)]
pub struct ApiError(InterfaceError);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
    pub detail: String,
    pub correlation_id: String,
}

impl ApiError {
    fn from_application(error: impl Into<ApplicationError>, correlation_id: &str) -> Self {
        Self(error.into().into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status =
            StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(
                event_name = "api.request_failed",
                correlation_id = %error.correlation_id(),
                error_class = error.class(),
                error = %error,
                "audit api request failed"
            );
        } else {
            warn!(
                event_name = "api.request_rejected",
                correlation_id = %error.correlation_id(),
                error_class = error.class(),
                error = %error,
                "audit api request rejected"
            );
        }

        let body = ErrorBody {
            error: error.class().to_string(),
            message: error.user_message().to_string(),
            detail: error.to_string(),
            correlation_id: error.correlation_id().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// The caller as established by the upstream auth layer.
pub struct AuthenticatedActor(pub Actor);

impl<S> FromRequestParts<S> for AuthenticatedActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Actor>() {
            Some(actor) => Ok(Self(actor.clone())),
            None => Err(ApiError(InterfaceError::Unauthorized {
                message: "no authenticated actor on request".to_string(),
                correlation_id: correlation_id(&parts.headers),
            })),
        }
    }
}

fn require_audit_access(
    gate: &AuthorizationGate,
    actor: &Actor,
    correlation_id: &str,
) -> Result<(), ApiError> {
    if gate.can_view_audit(&actor.role) {
        return Ok(());
    }
    Err(ApiError::from_application(
        ApplicationError::PermissionDenied(format!(
            "`{}` with role `{}` cannot view audit logs",
            actor.email, actor.role
        )),
        correlation_id,
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub approver_id: Option<String>,
    pub action: Option<String>,
    pub approval_id: Option<String>,
}

impl AuditLogParams {
    fn to_query(&self) -> Result<AuditQuery, ApplicationError> {
        let mut query = AuditQuery::default();
        if let Some(raw) = non_empty(&self.start_date) {
            query.start = Some(start_bound(raw)?);
        }
        if let Some(raw) = non_empty(&self.end_date) {
            query.end = Some(end_bound(raw)?);
        }
        if let Some(approver) = non_empty(&self.approver_id) {
            query = query.with_approver(approver);
        }
        if let Some(raw) = non_empty(&self.action) {
            query = query.with_action(AuditAction::from_str(raw)?);
        }
        if let Some(approval_id) = non_empty(&self.approval_id) {
            query.approval_id = Some(ApprovalId(approval_id.to_string()));
        }
        Ok(query)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

pub async fn list_audit_logs(
    State(state): State<ApiState>,
    headers: HeaderMap,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(params): Query<AuditLogParams>,
) -> Result<Json<Vec<AuditLogEntry>>, ApiError> {
    let correlation_id = correlation_id(&headers);
    require_audit_access(&state.gate, &actor, &correlation_id)?;

    let query =
        params.to_query().map_err(|error| ApiError::from_application(error, &correlation_id))?;
    let entries = state
        .registry
        .trail()
        .query(&query)
        .await
        .map_err(|error| {
            ApiError::from_application(ApplicationError::Persistence(error.to_string()), &correlation_id)
        })?;

    info!(
        event_name = "api.audit_logs.listed",
        correlation_id = %correlation_id,
        actor = %actor.email,
        entries = entries.len(),
        "audit log entries listed"
    );
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportParams {
    pub start_date: String,
    pub end_date: String,
    pub format: Option<String>,
}

pub async fn export_report(
    State(state): State<ApiState>,
    headers: HeaderMap,
    AuthenticatedActor(actor): AuthenticatedActor,
    Query(params): Query<ReportParams>,
) -> Result<Response, ApiError> {
    let correlation_id = correlation_id(&headers);
    require_audit_access(&state.gate, &actor, &correlation_id)?;

    let format = match non_empty(&params.format) {
        Some(raw) => ExportFormat::from_str(raw)
            .map_err(|error| ApiError::from_application(error, &correlation_id))?,
        None => ExportFormat::Csv,
    };
    let request = ReportRequest::new(params.start_date, params.end_date, format);
    let file = state
        .exporter
        .export(state.registry.trail(), &request)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    info!(
        event_name = "api.report.served",
        correlation_id = %correlation_id,
        actor = %actor.email,
        filename = %file.filename,
        rows = file.rows,
        "audit report served"
    );

    let disposition = file.content_disposition();
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, file.content_type.to_string()), (header::CONTENT_DISPOSITION, disposition)],
        file.bytes,
    )
        .into_response())
}
