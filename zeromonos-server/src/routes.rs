//! HTTP routes under `/api/v1`.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use zeromonos_core::{
    Booking, BookingDetails, BookingFilter, BookingId, BookingRequest, BookingService,
    BookingState, CreatedBooking, Municipality, PublicBookingView, StateChangeRecord,
};

use crate::error::AppError;
use crate::principal::Authenticated;

type AppState = Arc<BookingService>;
type ApiResult<T> = Result<Json<T>, AppError>;

#[derive(Debug, Deserialize)]
struct AvailabilityQuery {
    municipality: String,
    date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct MunicipalityQuery {
    district: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StateUpdate {
    state: BookingState,
}

/// Build the application router around a shared service.
pub(crate) fn router(service: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/bookings", get(list_bookings).post(create_booking))
        .route("/api/v1/bookings/me", get(list_own))
        .route("/api/v1/bookings/public/{token}", get(lookup_by_token))
        .route("/api/v1/bookings/available-times", get(available_times))
        .route(
            "/api/v1/bookings/{id}",
            get(booking_details).delete(cancel_booking),
        )
        .route("/api/v1/bookings/{id}/history", get(history))
        .route("/api/v1/bookings/{id}/state", put(update_state))
        .route("/api/v1/locations/districts", get(districts))
        .route("/api/v1/locations/municipalities", get(municipalities))
        .route(
            "/api/v1/locations/municipalities/{municipality}/villages",
            get(villages),
        )
        .with_state(service)
}

async fn health() -> &'static str {
    "ok"
}

async fn create_booking(
    State(service): State<AppState>,
    Authenticated(principal): Authenticated,
    payload: Result<Json<BookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedBooking>), AppError> {
    let Json(request) = payload?;
    let created = service.create_booking(&principal, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn list_own(
    State(service): State<AppState>,
    Authenticated(principal): Authenticated,
) -> ApiResult<Vec<Booking>> {
    Ok(Json(service.list_own(&principal).await?))
}

async fn list_bookings(
    State(service): State<AppState>,
    Authenticated(principal): Authenticated,
    filter: Result<Query<BookingFilter>, QueryRejection>,
) -> ApiResult<Vec<Booking>> {
    let Query(filter) = filter?;
    Ok(Json(service.list_for_staff(&principal, &filter).await?))
}

async fn lookup_by_token(
    State(service): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<PublicBookingView> {
    Ok(Json(service.lookup_by_token(&token).await?))
}

async fn available_times(
    State(service): State<AppState>,
    Authenticated(_principal): Authenticated,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> ApiResult<Vec<NaiveTime>> {
    let Query(query) = query?;
    Ok(Json(
        service
            .available_slots(&query.municipality, query.date)
            .await?,
    ))
}

async fn booking_details(
    State(service): State<AppState>,
    Authenticated(principal): Authenticated,
    id: Result<Path<BookingId>, PathRejection>,
) -> ApiResult<BookingDetails> {
    let Path(id) = id?;
    Ok(Json(service.booking_details(id, &principal).await?))
}

async fn history(
    State(service): State<AppState>,
    Authenticated(principal): Authenticated,
    id: Result<Path<BookingId>, PathRejection>,
) -> ApiResult<Vec<StateChangeRecord>> {
    let Path(id) = id?;
    Ok(Json(service.history(id, &principal).await?))
}

async fn cancel_booking(
    State(service): State<AppState>,
    Authenticated(principal): Authenticated,
    id: Result<Path<BookingId>, PathRejection>,
) -> ApiResult<Booking> {
    let Path(id) = id?;
    Ok(Json(service.cancel_booking(id, &principal).await?))
}

async fn update_state(
    State(service): State<AppState>,
    Authenticated(principal): Authenticated,
    id: Result<Path<BookingId>, PathRejection>,
    payload: Result<Json<StateUpdate>, JsonRejection>,
) -> ApiResult<Booking> {
    let Path(id) = id?;
    let Json(update) = payload?;
    Ok(Json(
        service.update_state(id, update.state, &principal).await?,
    ))
}

async fn districts(
    State(service): State<AppState>,
    Authenticated(_principal): Authenticated,
) -> ApiResult<Vec<String>> {
    Ok(Json(service.districts().await?))
}

async fn municipalities(
    State(service): State<AppState>,
    Authenticated(_principal): Authenticated,
    query: Result<Query<MunicipalityQuery>, QueryRejection>,
) -> ApiResult<Vec<Municipality>> {
    let Query(query) = query?;
    Ok(Json(service.municipalities(query.district.as_deref()).await?))
}

async fn villages(
    State(service): State<AppState>,
    Authenticated(_principal): Authenticated,
    Path(municipality): Path<String>,
) -> ApiResult<Vec<String>> {
    Ok(Json(service.villages(&municipality).await?))
}
