use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{BatchRequest, BatchResponse, CandidateContact, DateRangeQuery, ListQuery, ListResponse},
    reconcile::reconcile,
    services,
};
use crate::{
    auth::extractors::AuthUser,
    db::Contact,
    error::AppError,
    extract::{Json, Path, Query},
    state::AppState,
};

#[derive(Debug, serde::Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

pub fn contacts_routes() -> Router<AppState> {
    Router::new()
        .route("/contacts", get(list_contacts).post(create_contact))
        .route("/contacts/batch", post(batch_contacts))
        .route("/contacts/daterange", get(contacts_by_date_range))
        .route("/contacts/:id", put(update_contact).delete(delete_contact))
}

#[instrument(skip(state))]
pub async fn list_contacts(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    Ok(Json(services::list_contacts(&state, user_id, &params).await?))
}

#[instrument(skip(state, payload))]
pub async fn create_contact(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<CandidateContact>,
) -> Result<(StatusCode, Json<Contact>), AppError> {
    let contact = services::create_contact(&state, user_id, &payload).await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

#[instrument(skip(state, payload))]
pub async fn update_contact(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CandidateContact>,
) -> Result<Json<Contact>, AppError> {
    Ok(Json(services::update_contact(&state, user_id, id, &payload).await?))
}

#[instrument(skip(state))]
pub async fn delete_contact(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    services::delete_contact(&state, user_id, id).await?;
    Ok(Json(MessageResponse {
        message: "Contact deleted successfully",
    }))
}

#[instrument(skip(state))]
pub async fn contacts_by_date_range(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<DateRangeQuery>,
) -> Result<Json<Vec<Contact>>, AppError> {
    Ok(Json(services::contacts_in_range(&state, user_id, &params).await?))
}

/// Upserts every record by email; only newly created contacts are echoed.
#[instrument(skip(state, payload), fields(records = payload.contacts.len()))]
pub async fn batch_contacts(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError> {
    let created_contacts = reconcile(state.store.as_ref(), user_id, &payload.contacts).await?;
    Ok(Json(BatchResponse {
        message: "Batch processing completed",
        created_contacts,
    }))
}
