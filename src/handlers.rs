use crate::applications::{
    ApplicationService, ApplicationView, CreatedApplication, RegistrationRequest,
    RegistrationResult,
};
use crate::config::Config;
use crate::errors::AppError;
use crate::models::{Actor, ActorRole, DealSummary, LoanPurpose};
use crate::orchestrator::{SaveOrchestrator, SaveReport};
use crate::progress::ProgressView;
use crate::step_schema::SaveStepRequest;
use crate::store::ApplicationStore;
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    pub applications: ApplicationService,
    /// Step save pipeline.
    pub orchestrator: SaveOrchestrator,
}

impl AppState {
    pub fn new(store: Arc<dyn ApplicationStore>, config: Config) -> Self {
        Self {
            applications: ApplicationService::new(store.clone(), config.require_verified_contact),
            orchestrator: SaveOrchestrator::new(store),
            config,
        }
    }
}

/// Caller identity, taken from the `X-Actor-Id` and `X-Actor-Role` headers
/// set by the authenticating gateway in front of this service.
#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let id = header("x-actor-id")
            .ok_or_else(|| AppError::Unauthorized("missing X-Actor-Id header".to_string()))?;
        let id = Uuid::parse_str(&id)
            .map_err(|_| AppError::Unauthorized(format!("malformed actor id '{}'", id)))?;
        let role: ActorRole = header("x-actor-role")
            .ok_or_else(|| AppError::Unauthorized("missing X-Actor-Role header".to_string()))?
            .parse()
            .map_err(|_| AppError::Unauthorized("unknown actor role".to_string()))?;

        Ok(Actor { id, role })
    }
}

/// Health check endpoint.
///
/// # Returns
///
/// * `(StatusCode, Json<serde_json::Value>)` - HTTP 200 OK with health status JSON.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-urla-api",
            "version": env!("CARGO_PKG_VERSION"),
            "storage": format!("{:?}", state.config.storage_backend).to_lowercase(),
        })),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApplicationRequest {
    pub loan_purpose: String,
    pub loan_amount: BigDecimal,
}

/// POST /api/v1/applications
///
/// Starts a new application owned by the calling employee or borrower.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `actor` - The authenticated caller.
/// * `payload` - Loan purpose and requested amount.
///
/// # Returns
///
/// * `Result<(StatusCode, Json<CreatedApplication>), AppError>` - 201 with the new deal id.
pub async fn create_application(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<CreateApplicationRequest>,
) -> Result<(StatusCode, Json<CreatedApplication>), AppError> {
    tracing::info!(
        "POST /applications - {} {} {}",
        actor,
        payload.loan_purpose,
        payload.loan_amount
    );

    let purpose: LoanPurpose = payload.loan_purpose.parse()?;
    let created = state
        .applications
        .create_application(actor, purpose, payload.loan_amount)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /api/v1/applications
///
/// Lists the caller's applications, most recently active first.
pub async fn list_applications(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<Vec<DealSummary>>, AppError> {
    tracing::info!("GET /applications - {}", actor);
    let deals = state.applications.list_applications(actor).await?;
    Ok(Json(deals))
}

/// GET /api/v1/applications/:id
///
/// # Arguments
///
/// * `state` - The application state.
/// * `id` - The deal UUID.
///
/// # Returns
///
/// * `Result<Json<ApplicationView>, AppError>` - Deal, loan and party snapshots.
pub async fn get_application(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<ApplicationView>, AppError> {
    tracing::info!("GET /applications/{}", id);
    let view = state.applications.get_application(id).await?;
    Ok(Json(view))
}

/// PUT /api/v1/applications/:id
///
/// Saves one form step. Non-critical sub-write failures come back as
/// `warnings` on a 200 response.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `id` - The deal UUID.
/// * `payload` - Step tag, next step and the step's data.
///
/// # Returns
///
/// * `Result<Json<SaveReport>, AppError>` - What was written and where the cursor now is.
pub async fn save_step(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<SaveStepRequest>,
) -> Result<Json<SaveReport>, AppError> {
    tracing::info!(
        "PUT /applications/{} - {} step={:?} next={:?}",
        id,
        actor,
        payload.step,
        payload.next_step
    );

    let report = state.orchestrator.save_step(id, &payload).await?;
    if !report.warnings.is_empty() {
        tracing::warn!(
            "Step save for deal {} completed with {} warning(s)",
            id,
            report.warnings.len()
        );
    }
    Ok(Json(report))
}

/// GET /api/v1/applications/:id/progress
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> Result<Json<ProgressView>, AppError> {
    let view = state.applications.get_progress(id).await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionCompleteRequest {
    pub section: String,
    pub complete: bool,
}

/// PUT /api/v1/applications/:id/progress/section
///
/// Explicitly marks a section complete or incomplete. Step saves never do this.
pub async fn set_section_complete(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<SectionCompleteRequest>,
) -> Result<Json<ProgressView>, AppError> {
    tracing::info!(
        "PUT /applications/{}/progress/section - {} {}={}",
        id,
        actor,
        payload.section,
        payload.complete
    );
    let view = state
        .applications
        .set_section_complete(id, &payload.section, payload.complete)
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct ProgressNotesRequest {
    pub notes: String,
}

/// PUT /api/v1/applications/:id/progress/notes
pub async fn set_progress_notes(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProgressNotesRequest>,
) -> Result<Json<ProgressView>, AppError> {
    tracing::info!("PUT /applications/{}/progress/notes - {}", id, actor);
    let view = state
        .applications
        .set_progress_notes(id, &payload.notes)
        .await?;
    Ok(Json(view))
}

/// POST /api/v1/registrations
///
/// Self-service signup. No actor headers: the caller has no account yet.
///
/// # Returns
///
/// * `Result<(StatusCode, Json<RegistrationResult>), AppError>` - 201 with the new
///   borrower and deal, or 409 with `"action": "login"` when the email or phone is
///   already registered.
pub async fn register_borrower(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<RegistrationResult>), AppError> {
    tracing::info!("POST /registrations - purpose={}", payload.loan_purpose);
    let result = state.applications.register_borrower(&payload).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// Versioned API routes. Rate limiting and body limits are layered on by the caller.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/v1/applications",
            post(create_application).get(list_applications),
        )
        .route(
            "/api/v1/applications/:id",
            get(get_application).put(save_step),
        )
        .route("/api/v1/applications/:id/progress", get(get_progress))
        .route(
            "/api/v1/applications/:id/progress/section",
            put(set_section_complete),
        )
        .route(
            "/api/v1/applications/:id/progress/notes",
            put(set_progress_notes),
        )
        .route("/api/v1/registrations", post(register_borrower))
}

/// Full router with health check, without the per-IP rate limiter.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(api_routes())
        .with_state(state)
}
