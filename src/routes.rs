use axum::{
    extract::{FromRef, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::issuance::{self, IssueOutcome};
use crate::models::*;
use crate::session::{bearer_token, Session, SessionSigner};
use crate::store::{IssuanceStore, PgStore};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub store: PgStore,
    pub signer: SessionSigner,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // sessions (the identity provider proper is external; this mints
        // tokens for local dev and tests)
        .route("/api/session", post(create_session))
        .route("/api/session/refresh", post(refresh_session))
        // progress + issuance trigger
        .route(
            "/api/progress/lessons/:lesson_id/complete",
            post(complete_lesson),
        )
        .route(
            "/api/progress/exercises/:exercise_id/complete",
            post(complete_exercise),
        )
        .route("/api/progress/xp", get(xp_total))
        // certificates
        .route("/api/certificates", get(my_certificates))
        .route("/api/certificates/validate/:code", get(validate_certificate))
        .with_state(state)
}

#[derive(Deserialize)]
struct CreateSessionReq {
    user_id: Uuid,
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionReq>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let profile = state
        .store
        .profile(req.user_id)
        .await
        .map_err(e500)?
        .ok_or(e404("profile not found"))?;
    let token = state.signer.issue(profile.id, &profile.role)?;
    Ok(Json(json!({ "token": token, "role": profile.role })))
}

async fn refresh_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let token = bearer_token(&headers)?;
    let refreshed = state.signer.refresh(token)?;
    Ok(Json(json!({ "token": refreshed })))
}

async fn complete_lesson(
    State(state): State<AppState>,
    session: Session,
    Path(lesson_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let lesson = state
        .store
        .lesson(lesson_id)
        .await
        .map_err(e500)?
        .ok_or(e404("lesson not found"))?;

    let newly_completed = state
        .store
        .complete_lesson(session.user_id, lesson.id)
        .await
        .map_err(e500)?;
    let xp_earned = if newly_completed { lesson.xp_reward } else { 0 };
    if xp_earned > 0 {
        state
            .store
            .award_xp(session.user_id, xp_earned as i64)
            .await
            .map_err(e500)?;
    }

    let outcome = evaluate_module(&state, &session, lesson.module_id).await?;
    Ok(Json(completion_response(xp_earned, outcome)))
}

async fn complete_exercise(
    State(state): State<AppState>,
    session: Session,
    Path(exercise_id): Path<Uuid>,
    Json(req): Json<CompleteExerciseReq>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    if let Some(score) = req.score {
        if !(0..=100).contains(&score) {
            return Err(e400("score must be between 0 and 100"));
        }
    }
    let exercise = state
        .store
        .exercise(exercise_id)
        .await
        .map_err(e500)?
        .ok_or(e404("exercise not found"))?;
    // content is validated when read, not trusted as loose JSON
    exercise.content().map_err(e500)?;

    let lesson = state
        .store
        .lesson(exercise.lesson_id)
        .await
        .map_err(e500)?
        .ok_or(e404("lesson not found"))?;

    let newly_completed = state
        .store
        .complete_exercise(session.user_id, exercise.id, req.score)
        .await
        .map_err(e500)?;
    let xp_earned = if newly_completed { exercise.xp_reward } else { 0 };
    if xp_earned > 0 {
        state
            .store
            .award_xp(session.user_id, xp_earned as i64)
            .await
            .map_err(e500)?;
    }

    let outcome = evaluate_module(&state, &session, lesson.module_id).await?;
    Ok(Json(completion_response(xp_earned, outcome)))
}

/// Resolves the module's course and runs the issuance workflow.
async fn evaluate_module(
    state: &AppState,
    session: &Session,
    module_id: Uuid,
) -> Result<IssueOutcome, (StatusCode, String)> {
    let module = state
        .store
        .module(module_id)
        .await
        .map_err(e500)?
        .ok_or(e404("module not found"))?;
    issuance::issue_module_certificate(&state.store, session.user_id, module.id, module.course_id)
        .await
        .map_err(e500)
}

fn completion_response(xp_earned: i32, outcome: IssueOutcome) -> serde_json::Value {
    let mut body = json!({ "xp_earned": xp_earned, "issuance": outcome.tag() });
    if let IssueOutcome::Issued(cert) = outcome {
        body["certificate"] = json!(cert);
    }
    body
}

async fn xp_total(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let xp = state
        .store
        .xp_total(session.user_id)
        .await
        .map_err(e500)?
        .ok_or(e404("profile not found"))?;
    Ok(Json(json!({ "xp": xp })))
}

async fn my_certificates(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<Vec<Certificate>>, (StatusCode, String)> {
    let certs = state
        .store
        .certificates_for_user(session.user_id)
        .await
        .map_err(e500)?;
    Ok(Json(certs))
}

async fn validate_certificate(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Certificate>, (StatusCode, String)> {
    let cert = state
        .store
        .certificate_by_code(&code)
        .await
        .map_err(e500)?
        .ok_or(e404("certificate not found"))?;
    Ok(Json(cert))
}

// --- helpers ---
fn e400<T: Into<String>>(msg: T) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, msg.into())
}

fn e404<T: Into<String>>(msg: T) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, msg.into())
}

fn e500<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    tracing::error!(error=%e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
