//! REST API endpoint handlers.
//!
//! Every handler forwards to the control loop through
//! [`ControlHandle`](raceway_core::runner::ControlHandle). None of them
//! read race state on their own.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness |
//! | `GET` | `/api/races` | List the queue |
//! | `POST` | `/api/races` | Queue a race |
//! | `GET` | `/api/races/next` | Next race to run |
//! | `GET` | `/api/races/{id}` | One queued race |
//! | `PUT` | `/api/races/{id}` | Rename and/or replace the roster |
//! | `DELETE` | `/api/races/{id}` | Remove a queued race |
//! | `POST` | `/api/races/{id}/drivers` | Add one driver |
//! | `DELETE` | `/api/races/{id}/drivers/{name}` | Remove one driver |
//! | `GET` | `/api/session` | Active session and status |
//! | `GET` | `/api/session/laps` | Lap ledger per car |
//! | `GET` | `/api/session/leaderboard` | Ranked leaderboard |

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use raceway_types::{ActiveSession, DriverAssignment, RaceId, RaceStatus};

use crate::error::ObserverError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Request body for `POST /api/races`.
#[derive(Debug, serde::Deserialize)]
pub struct CreateRaceRequest {
    /// Race name, unique among queued races.
    pub name: String,
    /// Initial roster. May be empty.
    #[serde(default)]
    pub drivers: Vec<DriverAssignment>,
}

/// Request body for `PUT /api/races/{id}`.
#[derive(Debug, serde::Deserialize)]
pub struct UpdateRaceRequest {
    /// New name, if renaming.
    pub name: Option<String>,
    /// Replacement roster, if editing drivers.
    pub drivers: Option<Vec<DriverAssignment>>,
}

/// Request body for `POST /api/races/{id}/drivers`.
#[derive(Debug, serde::Deserialize)]
pub struct AssignDriverRequest {
    /// Driver display name.
    pub driver_name: String,
    /// Car to assign. The lowest free car when omitted.
    pub car_number: Option<u8>,
}

/// Response body for `GET /api/session`.
#[derive(Debug, serde::Serialize)]
pub struct SessionResponse {
    /// The active session, or `null` when idle.
    pub session: Option<ActiveSession>,
    /// Current status (the idle status when no session is active).
    pub status: RaceStatus,
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// Liveness check. Answers even when the control loop has stopped.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "time": chrono::Utc::now(),
    }))
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// List every queued race in FIFO order.
pub async fn list_races(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let queue = state.control.list_queue().await?;
    Ok(Json(queue))
}

/// Queue a new race at the back.
pub async fn create_race(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRaceRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let entry = state.control.enqueue(body.name, body.drivers).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// The race that `start` would promote next.
pub async fn next_race(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    state.control.peek_head().await?.map_or_else(
        || Err(ObserverError::NotFound(String::from("no race is queued"))),
        |entry| Ok(Json(entry)),
    )
}

/// One queued race.
pub async fn get_race(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RaceId>,
) -> Result<impl IntoResponse, ObserverError> {
    let entry = state.control.get_race(id).await?;
    Ok(Json(entry))
}

/// Rename a race, replace its roster, or both.
///
/// Both fields travel in one control-loop request, so the edit applies
/// whole or not at all.
pub async fn update_race(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RaceId>,
    Json(body): Json<UpdateRaceRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    if body.name.is_none() && body.drivers.is_none() {
        return Err(ObserverError::InvalidRequest(String::from(
            "expected `name` and/or `drivers`",
        )));
    }

    let entry = state
        .control
        .update_race(id, body.name, body.drivers)
        .await?;
    Ok(Json(entry))
}

/// Remove a race from the queue.
pub async fn delete_race(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RaceId>,
) -> Result<impl IntoResponse, ObserverError> {
    state.control.remove_race(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Add one driver to a queued race.
pub async fn assign_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RaceId>,
    Json(body): Json<AssignDriverRequest>,
) -> Result<impl IntoResponse, ObserverError> {
    let entry = state
        .control
        .assign_driver(id, body.driver_name, body.car_number)
        .await?;
    Ok(Json(entry))
}

/// Remove one driver from a queued race.
pub async fn unassign_driver(
    State(state): State<Arc<AppState>>,
    Path((id, driver_name)): Path<(RaceId, String)>,
) -> Result<impl IntoResponse, ObserverError> {
    let entry = state.control.unassign_driver(id, driver_name).await?;
    Ok(Json(entry))
}

// ---------------------------------------------------------------------------
// Session (read-only)
// ---------------------------------------------------------------------------

/// The active session and its status.
pub async fn get_session(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let view = state.control.session().await?;
    Ok(Json(SessionResponse {
        session: view.session,
        status: view.status,
    }))
}

/// The full lap ledger, one entry per rostered car.
pub async fn session_laps(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let laps = state.control.laps().await?;
    Ok(Json(laps))
}

/// Cars ranked by best lap.
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ObserverError> {
    let rows = state.control.leaderboard().await?;
    Ok(Json(rows))
}
