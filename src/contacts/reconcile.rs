//! Batch upsert of a user's contacts keyed by email.
//!
//! A batch runs in a single transaction: either every record lands or none
//! does. Records are applied in order, so a later record for the same email
//! overwrites an earlier one. Only contacts that did not exist before the
//! batch are returned; a contact created earlier in the same batch is
//! reported with its final values.

use std::collections::HashMap;

use tracing::{debug, error, info};
use uuid::Uuid;

use super::dto::CandidateContact;
use crate::{
    db::{Contact, ContactFields, Store, StoreError, StoreTx},
    error::AppError,
};

enum Upsert {
    Created(Contact),
    Updated(Contact),
}

/// Checks every record before any write; problems are prefixed with the
/// record's position in the batch.
pub fn validate_batch(records: &[CandidateContact]) -> Result<Vec<ContactFields>, AppError> {
    let mut problems = Vec::new();
    let mut valid = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        match record.validate() {
            Ok(fields) => valid.push(fields),
            Err(errs) => problems.extend(errs.into_iter().map(|e| format!("contacts[{i}]: {e}"))),
        }
    }
    if problems.is_empty() {
        Ok(valid)
    } else {
        Err(AppError::Validation(problems))
    }
}

pub async fn reconcile(
    store: &dyn Store,
    user_id: Uuid,
    records: &[CandidateContact],
) -> Result<Vec<Contact>, AppError> {
    let batch = validate_batch(records)?;

    let mut tx = store.begin().await?;
    let mut created: Vec<Contact> = Vec::new();
    let mut created_at_index: HashMap<Uuid, usize> = HashMap::new();
    let mut updated = 0usize;

    for (i, fields) in batch.iter().enumerate() {
        let outcome = upsert(&mut tx, user_id, fields).await.map_err(|e| {
            error!(error = %e, %user_id, index = i, "reconcile failed; batch rolled back");
            AppError::Internal(anyhow::Error::new(e).context("reconcile contacts"))
        })?;
        match outcome {
            Upsert::Created(contact) => {
                created_at_index.insert(contact.id, created.len());
                created.push(contact);
            }
            Upsert::Updated(contact) => {
                updated += 1;
                if let Some(&slot) = created_at_index.get(&contact.id) {
                    created[slot] = contact;
                }
            }
        }
    }

    tx.commit().await.map_err(|e| {
        error!(error = %e, %user_id, "reconcile commit failed");
        AppError::Internal(anyhow::Error::new(e).context("reconcile contacts"))
    })?;

    info!(%user_id, records = batch.len(), created = created.len(), updated, "contacts reconciled");
    Ok(created)
}

async fn upsert(
    tx: &mut Box<dyn StoreTx>,
    user_id: Uuid,
    fields: &ContactFields,
) -> Result<Upsert, StoreError> {
    if let Some(existing) = tx.find_contact_by_email(user_id, &fields.email, true).await? {
        return Ok(Upsert::Updated(tx.update_contact(existing.id, fields).await?));
    }
    match tx.insert_contact(user_id, fields).await {
        Ok(contact) => Ok(Upsert::Created(contact)),
        // Someone else inserted this email after our lookup; the row they
        // created is now the one to update.
        Err(StoreError::UniqueViolation) => {
            debug!(%user_id, "contact insert raced; retrying as update");
            let existing = tx
                .find_contact_by_email(user_id, &fields.email, true)
                .await?
                .ok_or(StoreError::RowNotFound)?;
            Ok(Upsert::Updated(tx.update_contact(existing.id, fields).await?))
        }
        Err(e) => Err(e),
    }
}
