//! HTTP surface for the session lifecycle.
//!
//! Thin axum layer over `PracticeEngine`: every handler parses the request,
//! delegates, and maps `PracticeError` onto a status code. Authentication
//! is out of scope — callers identify themselves with a `userId` field and
//! ownership is enforced by the engine.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use uuid::Uuid;

use crate::practice::{Mode, PracticeEngine, PracticeError, PromptType, StartSession};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PracticeEngine>,
}

/// `PracticeError` carried through axum's response machinery
struct ApiError(PracticeError);

impl From<PracticeError> for ApiError {
    fn from(err: PracticeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PracticeError::NotFound(_) => StatusCode::NOT_FOUND,
            PracticeError::InvalidInput(_) | PracticeError::WrongCard { .. } => {
                StatusCode::BAD_REQUEST
            }
            // a drained session with no attempts is a caller-state problem
            // (only-next clients in hard mode), not a server fault
            PracticeError::PhaseViolation { .. } | PracticeError::NoPerformanceData(_) => {
                StatusCode::CONFLICT
            }
            PracticeError::Upstream(_) => StatusCode::BAD_GATEWAY,
            PracticeError::Integrity(_)
            | PracticeError::Sqlite(_)
            | PracticeError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("request failed: {}", self.0);
        }
        let mut body = json!({ "error": self.0.to_string() });
        if let PracticeError::WrongCard { expected, .. } = &self.0 {
            body["expectedCardId"] = json!(expected);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ==================== Requests ====================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewCard {
    question: String,
    answer: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSetRequest {
    user_id: Uuid,
    name: String,
    cards: Vec<NewCard>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionRequest {
    user_id: Uuid,
    set_id: Uuid,
    mode: String,
    display_time_secs: Option<f64>,
    answer_time_limit_secs: Option<u32>,
    group_size: Option<u32>,
    #[serde(default)]
    randomize_order: bool,
    adaptive_preview: Option<bool>,
    adaptive_answer: Option<bool>,
    /// Legacy single toggle, mapped onto both split flags
    adaptive_timing: Option<bool>,
    speed_modifier: Option<f64>,
    prompt_type: Option<String>,
    blank_ratio: Option<f64>,
    seed: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserQuery {
    user_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HardestQuery {
    user_id: Uuid,
    limit: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitAnswerRequest {
    user_id: Uuid,
    card_id: Uuid,
    answer: String,
    time_taken_secs: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalibrationRequest {
    total_words: u32,
    total_seconds: f64,
}

// ==================== Handlers ====================

async fn create_set(
    State(state): State<AppState>,
    Json(request): Json<CreateSetRequest>,
) -> ApiResult<impl IntoResponse> {
    let cards: Vec<(String, String)> = request
        .cards
        .into_iter()
        .map(|c| (c.question, c.answer))
        .collect();
    let (set, card_count) = state.engine.create_set(request.user_id, request.name, cards)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "setId": set.id, "cardCount": card_count })),
    ))
}

async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    let mode = Mode::parse(&request.mode)
        .ok_or_else(|| PracticeError::InvalidInput(format!("unknown mode {}", request.mode)))?;
    let prompt_type = request
        .prompt_type
        .as_deref()
        .map(|p| {
            PromptType::parse(p)
                .ok_or_else(|| PracticeError::InvalidInput(format!("unknown prompt type {}", p)))
        })
        .transpose()?;
    let session = state.engine.start_session(
        request.user_id,
        request.set_id,
        mode,
        StartSession {
            display_time_secs: request.display_time_secs,
            answer_time_limit_secs: request.answer_time_limit_secs,
            group_size: request.group_size,
            randomize_order: request.randomize_order,
            adaptive_preview: request.adaptive_preview,
            adaptive_answer: request.adaptive_answer,
            adaptive_timing: request.adaptive_timing,
            speed_modifier: request.speed_modifier,
            prompt_type,
            blank_ratio: request.blank_ratio,
            seed: request.seed,
        },
    )?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "sessionId": session.id,
            "cardCount": session.card_order.len(),
            "mode": session.mode,
        })),
    ))
}

async fn next_prompt(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<UserQuery>,
) -> ApiResult<impl IntoResponse> {
    let prompt = state.engine.next_prompt(session_id, query.user_id).await?;
    Ok(Json(prompt))
}

async fn submit_answer(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<SubmitAnswerRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .engine
        .submit_answer(
            session_id,
            request.user_id,
            request.card_id,
            &request.answer,
            request.time_taken_secs,
        )
        .await?;
    Ok(Json(outcome))
}

async fn review_hardest(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<HardestQuery>,
) -> ApiResult<impl IntoResponse> {
    let cards = state
        .engine
        .review_hardest(session_id, query.user_id, query.limit)?;
    Ok(Json(cards))
}

async fn calibrate(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<CalibrationRequest>,
) -> ApiResult<impl IntoResponse> {
    let calibration = state
        .engine
        .calibrate(user_id, request.total_words, request.total_seconds)?;
    Ok(Json(calibration))
}

async fn get_calibration(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let calibration = state.engine.get_calibration(user_id)?.ok_or_else(|| {
        PracticeError::NotFound(format!("no calibration for user {}", user_id))
    })?;
    Ok(Json(calibration))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sets", post(create_set))
        .route("/sessions", post(start_session))
        .route("/sessions/{id}/next", get(next_prompt))
        .route("/sessions/{id}/answers", post(submit_answer))
        .route("/sessions/{id}/hardest", get(review_hardest))
        .route("/users/{id}/calibration", put(calibrate).get(get_calibration))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("practice engine listening on http://{}", addr);
    axum::serve(listener, router(state)).await
}
