use std::{cmp::Ordering, sync::Arc};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    Contact, ContactFields, ContactQuery, NewUser, SortKey, SortOrder, Store, StoreError,
    StoreTx, User, UserChanges,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    users: Vec<User>,
    contacts: Vec<Contact>,
}

/// In-process store. A transaction holds the table lock for its whole
/// lifetime and works on a copy, so transactions are serialized and a
/// dropped transaction leaves no trace.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

impl MemoryTx {
    fn live_contact_mut(&mut self, id: Uuid) -> Option<&mut Contact> {
        self.working
            .contacts
            .iter_mut()
            .find(|c| c.id == id && c.deleted_at.is_none())
    }

    fn email_taken(&self, user_id: Uuid, email: &str, except: Option<Uuid>) -> bool {
        self.working.contacts.iter().any(|c| {
            c.user_id == user_id
                && c.email == email
                && c.deleted_at.is_none()
                && Some(c.id) != except
        })
    }
}

fn matches_query(c: &Contact, user_id: Uuid, q: &ContactQuery) -> bool {
    c.user_id == user_id
        && c.deleted_at.is_none()
        && q.name.as_deref().map_or(true, |n| c.name.contains(n))
        && q.email.as_deref().map_or(true, |e| c.email.contains(e))
        && q.timezone.as_deref().map_or(true, |tz| c.timezone == tz)
        && q.created_from.map_or(true, |from| c.created_at >= from)
        && q.created_to.map_or(true, |to| c.created_at <= to)
}

fn compare(a: &Contact, b: &Contact, key: SortKey) -> Ordering {
    match key {
        SortKey::Name => a.name.cmp(&b.name),
        SortKey::Email => a.email.cmp(&b.email),
        SortKey::Timezone => a.timezone.cmp(&b.timezone),
        SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.working.users.iter().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.working.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_verification_token(
        &mut self,
        token: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(self
            .working
            .users
            .iter()
            .find(|u| u.verification_token.as_deref() == Some(token))
            .cloned())
    }

    async fn create_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        if self.working.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::UniqueViolation);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            email_verified: false,
            verification_token: user.verification_token,
            reset_token: None,
            reset_token_expires: None,
            created_at: OffsetDateTime::now_utc(),
        };
        self.working.users.push(user.clone());
        Ok(user)
    }

    async fn update_user(&mut self, id: Uuid, changes: UserChanges) -> Result<User, StoreError> {
        let user = self
            .working
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::RowNotFound)?;
        changes.apply(user);
        Ok(user.clone())
    }

    async fn find_contact(
        &mut self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Contact>, StoreError> {
        Ok(self
            .working
            .contacts
            .iter()
            .find(|c| c.id == id && c.user_id == user_id && c.deleted_at.is_none())
            .cloned())
    }

    async fn find_contact_by_email(
        &mut self,
        user_id: Uuid,
        email: &str,
        exclude_deleted: bool,
    ) -> Result<Option<Contact>, StoreError> {
        let mut candidates: Vec<&Contact> = self
            .working
            .contacts
            .iter()
            .filter(|c| c.user_id == user_id && c.email == email)
            .filter(|c| !exclude_deleted || c.deleted_at.is_none())
            .collect();
        // live rows first, then newest
        candidates.sort_by(|a, b| {
            b.deleted_at
                .is_none()
                .cmp(&a.deleted_at.is_none())
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(candidates.first().map(|c| (*c).clone()))
    }

    async fn insert_contact(
        &mut self,
        user_id: Uuid,
        fields: &ContactFields,
    ) -> Result<Contact, StoreError> {
        if self.email_taken(user_id, &fields.email, None) {
            return Err(StoreError::UniqueViolation);
        }
        let contact = Contact {
            id: Uuid::new_v4(),
            user_id,
            name: fields.name.clone(),
            email: fields.email.clone(),
            phone: fields.phone.clone(),
            address: fields.address.clone(),
            timezone: fields.timezone.clone(),
            created_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        };
        self.working.contacts.push(contact.clone());
        Ok(contact)
    }

    async fn update_contact(
        &mut self,
        id: Uuid,
        fields: &ContactFields,
    ) -> Result<Contact, StoreError> {
        let owner = self
            .working
            .contacts
            .iter()
            .find(|c| c.id == id && c.deleted_at.is_none())
            .map(|c| c.user_id)
            .ok_or(StoreError::RowNotFound)?;
        if self.email_taken(owner, &fields.email, Some(id)) {
            return Err(StoreError::UniqueViolation);
        }
        let contact = self.live_contact_mut(id).ok_or(StoreError::RowNotFound)?;
        contact.name = fields.name.clone();
        contact.email = fields.email.clone();
        contact.phone = fields.phone.clone();
        contact.address = fields.address.clone();
        contact.timezone = fields.timezone.clone();
        Ok(contact.clone())
    }

    async fn soft_delete_contact(
        &mut self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let contact = self.live_contact_mut(id).ok_or(StoreError::RowNotFound)?;
        contact.deleted_at = Some(at);
        Ok(())
    }

    async fn list_contacts(
        &mut self,
        user_id: Uuid,
        query: &ContactQuery,
    ) -> Result<(Vec<Contact>, i64), StoreError> {
        let mut rows: Vec<Contact> = self
            .working
            .contacts
            .iter()
            .filter(|c| matches_query(c, user_id, query))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let ord = compare(a, b, query.sort);
            let ord = match query.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            ord.then(a.id.cmp(&b.id))
        });
        let total = rows.len() as i64;
        let offset = usize::try_from(query.offset.max(0)).unwrap_or(usize::MAX);
        let page: Vec<Contact> = match query.limit {
            Some(limit) => rows
                .into_iter()
                .skip(offset)
                .take(usize::try_from(limit.max(0)).unwrap_or(usize::MAX))
                .collect(),
            None => rows.into_iter().skip(offset).collect(),
        };
        Ok((page, total))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
