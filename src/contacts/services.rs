use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{CandidateContact, DateRangeQuery, ListQuery, ListResponse, Pagination};
use crate::{
    db::{Contact, StoreError},
    error::AppError,
    state::AppState,
};

const DUPLICATE_EMAIL: &str = "Contact with this email already exists";

pub async fn create_contact(
    st: &AppState,
    user_id: Uuid,
    candidate: &CandidateContact,
) -> Result<Contact, AppError> {
    let fields = candidate.validate().map_err(AppError::Validation)?;

    let mut tx = st.store.begin().await?;
    if tx
        .find_contact_by_email(user_id, &fields.email, true)
        .await?
        .is_some()
    {
        warn!(%user_id, "contact email already in use");
        return Err(AppError::Conflict(DUPLICATE_EMAIL.into()));
    }
    let contact = match tx.insert_contact(user_id, &fields).await {
        Ok(c) => c,
        Err(StoreError::UniqueViolation) => return Err(AppError::Conflict(DUPLICATE_EMAIL.into())),
        Err(e) => return Err(e.into()),
    };
    tx.commit().await?;

    info!(%user_id, contact_id = %contact.id, "contact created");
    Ok(contact)
}

pub async fn update_contact(
    st: &AppState,
    user_id: Uuid,
    id: Uuid,
    candidate: &CandidateContact,
) -> Result<Contact, AppError> {
    let fields = candidate.validate().map_err(AppError::Validation)?;

    let mut tx = st.store.begin().await?;
    if tx.find_contact(user_id, id).await?.is_none() {
        return Err(AppError::NotFound);
    }
    let contact = match tx.update_contact(id, &fields).await {
        Ok(c) => c,
        Err(StoreError::UniqueViolation) => return Err(AppError::Conflict(DUPLICATE_EMAIL.into())),
        Err(StoreError::RowNotFound) => return Err(AppError::NotFound),
        Err(e) => return Err(e.into()),
    };
    tx.commit().await?;

    info!(%user_id, contact_id = %id, "contact updated");
    Ok(contact)
}

/// Marks the contact deleted; the row is kept.
pub async fn delete_contact(st: &AppState, user_id: Uuid, id: Uuid) -> Result<(), AppError> {
    let mut tx = st.store.begin().await?;
    if tx.find_contact(user_id, id).await?.is_none() {
        return Err(AppError::NotFound);
    }
    tx.soft_delete_contact(id, OffsetDateTime::now_utc()).await?;
    tx.commit().await?;

    info!(%user_id, contact_id = %id, "contact deleted");
    Ok(())
}

pub async fn list_contacts(
    st: &AppState,
    user_id: Uuid,
    params: &ListQuery,
) -> Result<ListResponse, AppError> {
    let (query, window) = params.to_query().map_err(AppError::Validation)?;
    let mut tx = st.store.begin().await?;
    let (contacts, total) = tx.list_contacts(user_id, &query).await?;
    Ok(ListResponse {
        contacts,
        pagination: Pagination::new(window, total),
    })
}

/// Live contacts created within the range, oldest first.
pub async fn contacts_in_range(
    st: &AppState,
    user_id: Uuid,
    params: &DateRangeQuery,
) -> Result<Vec<Contact>, AppError> {
    let query = params.to_query().map_err(AppError::Validation)?;
    let mut tx = st.store.begin().await?;
    let (contacts, _) = tx.list_contacts(user_id, &query).await?;
    Ok(contacts)
}
