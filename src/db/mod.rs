//! Credential and contact storage.
//!
//! Every read and write goes through a [`StoreTx`] obtained from
//! [`Store::begin`]. Nothing is visible to other transactions until
//! [`StoreTx::commit`]; dropping a transaction rolls it back.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint (user email, live contact email) rejected the write.
    #[error("unique constraint violated")]
    UniqueViolation,
    #[error("row not found")]
    RowNotFound,
    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: Option<String>,
    pub email_verified: bool,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_expires: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: Option<String>,
    pub verification_token: Option<String>,
}

/// Partial user update. `None` leaves a column untouched; for nullable
/// columns `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub password_hash: Option<String>,
    pub email_verified: Option<bool>,
    pub verification_token: Option<Option<String>>,
    pub reset_token: Option<Option<String>>,
    pub reset_token_expires: Option<Option<OffsetDateTime>>,
}

impl UserChanges {
    pub fn apply(&self, user: &mut User) {
        if let Some(hash) = &self.password_hash {
            user.password_hash = hash.clone();
        }
        if let Some(verified) = self.email_verified {
            user.email_verified = verified;
        }
        if let Some(token) = &self.verification_token {
            user.verification_token = token.clone();
        }
        if let Some(token) = &self.reset_token {
            user.reset_token = token.clone();
        }
        if let Some(expires) = self.reset_token_expires {
            user.reset_token_expires = expires;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub timezone: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

/// Mutable contact columns, as written by inserts and in-place updates.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactFields {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub timezone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    Name,
    Email,
    Timezone,
    #[default]
    CreatedAt,
}

impl SortKey {
    pub fn column(self) -> &'static str {
        match self {
            SortKey::Name => "name",
            SortKey::Email => "email",
            SortKey::Timezone => "timezone",
            SortKey::CreatedAt => "created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filter, ordering and window for listing a user's live contacts.
#[derive(Debug, Clone, Default)]
pub struct ContactQuery {
    pub name: Option<String>,
    pub email: Option<String>,
    pub timezone: Option<String>,
    pub created_from: Option<OffsetDateTime>,
    pub created_to: Option<OffsetDateTime>,
    pub sort: SortKey,
    pub order: SortOrder,
    /// `None` returns every matching row.
    pub limit: Option<i64>,
    pub offset: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_user_by_id(&mut self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_user_by_verification_token(
        &mut self,
        token: &str,
    ) -> Result<Option<User>, StoreError>;
    async fn create_user(&mut self, user: NewUser) -> Result<User, StoreError>;
    async fn update_user(&mut self, id: Uuid, changes: UserChanges) -> Result<User, StoreError>;

    /// Live contact by id, scoped to its owner.
    async fn find_contact(&mut self, user_id: Uuid, id: Uuid)
        -> Result<Option<Contact>, StoreError>;
    async fn find_contact_by_email(
        &mut self,
        user_id: Uuid,
        email: &str,
        exclude_deleted: bool,
    ) -> Result<Option<Contact>, StoreError>;
    /// Fails with [`StoreError::UniqueViolation`] when the user already has a
    /// live contact with this email.
    async fn insert_contact(
        &mut self,
        user_id: Uuid,
        fields: &ContactFields,
    ) -> Result<Contact, StoreError>;
    async fn update_contact(
        &mut self,
        id: Uuid,
        fields: &ContactFields,
    ) -> Result<Contact, StoreError>;
    async fn soft_delete_contact(&mut self, id: Uuid, at: OffsetDateTime)
        -> Result<(), StoreError>;
    /// Matching live contacts and the total count before `limit`/`offset`.
    async fn list_contacts(
        &mut self,
        user_id: Uuid,
        query: &ContactQuery,
    ) -> Result<(Vec<Contact>, i64), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
