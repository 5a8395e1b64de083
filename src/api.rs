use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use ulid::Ulid;

use crate::engine::{today, Engine, EngineError};
use crate::model::*;
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};

type AppState = Arc<Engine>;
type ApiResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Validation { .. } | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Conflict { .. } | EngineError::HasActiveBookings { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Network(_) | EngineError::WalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(self.to_body())).into_response()
    }
}

// ── Extractor rejections ─────────────────────────────────
//
// Malformed input gets the same error envelope as every other failure.

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| EngineError::validation("body", e.body_text()))
}

fn path_id(path: Result<Path<Ulid>, PathRejection>) -> ApiResult<Ulid> {
    path.map(|Path(id)| id)
        .map_err(|e| EngineError::validation("id", e.body_text()))
}

fn query<T>(q: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    q.map(|Query(v)| v)
        .map_err(|e| EngineError::validation("query", e.body_text()))
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/partners/rooms", post(create_room))
        .route(
            "/partners/rooms/{id}",
            get(list_rooms).put(update_room).delete(delete_room),
        )
        .route("/partners/rooms/{id}/status", patch(set_room_status))
        .route("/partners/bookings", post(create_booking))
        .route("/partners/bookings/{id}", get(list_bookings).put(update_booking))
        .route("/partners/bookings/{id}/status", put(set_booking_status))
        .route("/bookings", post(request_booking))
        .route("/bookings/user/{phone}", get(guest_bookings))
        .route("/rooms/{id}", get(room_view))
        .route("/rooms/{id}/availability", get(free_windows))
        .route("/health", get(health))
        .layer(middleware::from_fn(track_metrics))
        .with_state(engine)
}

async fn track_metrics(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = req.method().as_str().to_owned();
    let start = Instant::now();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::histogram!(REQUEST_DURATION_SECONDS, "route" => route.clone())
        .record(start.elapsed().as_secs_f64());
    metrics::counter!(REQUESTS_TOTAL, "route" => route, "method" => method, "status" => status)
        .increment(1);
    response
}

// ── Rooms ────────────────────────────────────────────────

async fn list_rooms(
    State(engine): State<AppState>,
    partner_id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<Json<Vec<Room>>> {
    let partner_id = path_id(partner_id)?;
    Ok(Json(engine.list_rooms(partner_id).await))
}

async fn create_room(
    State(engine): State<AppState>,
    payload: Result<Json<NewRoom>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Room>)> {
    let room = engine.create_room(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

async fn update_room(
    State(engine): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    payload: Result<Json<RoomDetails>, JsonRejection>,
) -> ApiResult<Json<Room>> {
    let id = path_id(id)?;
    Ok(Json(engine.update_room(id, body(payload)?).await?))
}

async fn delete_room(
    State(engine): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<StatusCode> {
    engine.delete_room(path_id(id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_room_status(
    State(engine): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    payload: Result<Json<StatusBody<RoomStatus>>, JsonRejection>,
) -> ApiResult<Json<Room>> {
    let id = path_id(id)?;
    let StatusBody { status } = body(payload)?;
    Ok(Json(engine.set_room_status(id, status).await?))
}

#[derive(Deserialize)]
struct ViewQuery {
    day: Option<Day>,
}

async fn room_view(
    State(engine): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    q: Result<Query<ViewQuery>, QueryRejection>,
) -> ApiResult<Json<RoomView>> {
    let id = path_id(id)?;
    let day = query(q)?.day.unwrap_or_else(today);
    Ok(Json(engine.room_view(id, day).await?))
}

#[derive(Deserialize)]
struct WindowQuery {
    from: Day,
    to: Day,
}

async fn free_windows(
    State(engine): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    q: Result<Query<WindowQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Stay>>> {
    let id = path_id(id)?;
    let WindowQuery { from, to } = query(q)?;
    Ok(Json(engine.room_free_windows(id, from, to).await?))
}

// ── Bookings ─────────────────────────────────────────────

async fn list_bookings(
    State(engine): State<AppState>,
    partner_id: Result<Path<Ulid>, PathRejection>,
) -> ApiResult<Json<Vec<Booking>>> {
    let partner_id = path_id(partner_id)?;
    Ok(Json(engine.list_bookings(partner_id).await))
}

async fn create_booking(
    State(engine): State<AppState>,
    payload: Result<Json<NewBooking>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Booking>)> {
    let booking = engine.create_booking(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn update_booking(
    State(engine): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    payload: Result<Json<BookingUpdate>, JsonRejection>,
) -> ApiResult<Json<Booking>> {
    let id = path_id(id)?;
    Ok(Json(engine.update_booking(id, body(payload)?).await?))
}

async fn set_booking_status(
    State(engine): State<AppState>,
    id: Result<Path<Ulid>, PathRejection>,
    payload: Result<Json<StatusBody<BookingStatus>>, JsonRejection>,
) -> ApiResult<Json<Booking>> {
    let id = path_id(id)?;
    let StatusBody { status } = body(payload)?;
    Ok(Json(engine.set_booking_status(id, status).await?))
}

async fn request_booking(
    State(engine): State<AppState>,
    payload: Result<Json<GuestRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Booking>)> {
    let booking = engine.request_booking(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn guest_bookings(
    State(engine): State<AppState>,
    Path(phone): Path<String>,
) -> ApiResult<Json<Vec<Booking>>> {
    Ok(Json(engine.guest_bookings(&phone).await?))
}

async fn health(State(engine): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": engine.state.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        let id = Ulid::new();
        assert_eq!(EngineError::validation("x", "y").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(EngineError::NotFound(id).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            EngineError::HasActiveBookings { room_id: id, active: 2 }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            EngineError::InvalidTransition {
                from: BookingStatus::Completed,
                to: BookingStatus::Pending,
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            EngineError::WalError("disk full".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn error_body_round_trips_through_client_mapping() {
        let original = EngineError::InvalidTransition {
            from: BookingStatus::Cancelled,
            to: BookingStatus::Confirmed,
        };
        let status = original.status_code().as_u16();
        let wire = serde_json::to_string(&original.to_body()).unwrap();
        let back = EngineError::from_body(status, serde_json::from_str(&wire).unwrap());
        assert_eq!(back, original);
    }
}
