use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    Contact, ContactFields, ContactQuery, NewUser, SortOrder, Store, StoreError, StoreTx, User,
    UserChanges,
};

const USER_COLUMNS: &str = "id, email, password_hash, name, email_verified, verification_token, \
                            reset_token, reset_token_expires, created_at";
const CONTACT_COLUMNS: &str =
    "id, user_id, name, email, phone, address, timezone, created_at, deleted_at";

// Shared by the page query and the count query; binds $1..$6.
const CONTACT_FILTER: &str = r#"
    WHERE user_id = $1
      AND deleted_at IS NULL
      AND ($2::text IS NULL OR strpos(name, $2) > 0)
      AND ($3::text IS NULL OR strpos(email, $3) > 0)
      AND ($4::text IS NULL OR timezone = $4)
      AND ($5::timestamptz IS NULL OR created_at >= $5)
      AND ($6::timestamptz IS NULL OR created_at <= $6)
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn map_unique(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::UniqueViolation,
        _ => StoreError::Backend(e),
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_user_by_email(&mut self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 FOR UPDATE");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(user)
    }

    async fn find_user_by_id(&mut self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(user)
    }

    async fn find_user_by_verification_token(
        &mut self,
        token: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE verification_token = $1 FOR UPDATE"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(token)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(user)
    }

    async fn create_user(&mut self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (email, password_hash, name, verification_token)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(&user.verification_token)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_unique)
    }

    async fn update_user(&mut self, id: Uuid, changes: UserChanges) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            UPDATE users SET
                password_hash       = COALESCE($2, password_hash),
                email_verified      = COALESCE($3, email_verified),
                verification_token  = CASE WHEN $4 THEN $5 ELSE verification_token END,
                reset_token         = CASE WHEN $6 THEN $7 ELSE reset_token END,
                reset_token_expires = CASE WHEN $8 THEN $9 ELSE reset_token_expires END
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(changes.password_hash)
            .bind(changes.email_verified)
            .bind(changes.verification_token.is_some())
            .bind(changes.verification_token.flatten())
            .bind(changes.reset_token.is_some())
            .bind(changes.reset_token.flatten())
            .bind(changes.reset_token_expires.is_some())
            .bind(changes.reset_token_expires.flatten())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_unique)?
            .ok_or(StoreError::RowNotFound)
    }

    async fn find_contact(
        &mut self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Contact>, StoreError> {
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts \
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL"
        );
        let contact = sqlx::query_as::<_, Contact>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(contact)
    }

    async fn find_contact_by_email(
        &mut self,
        user_id: Uuid,
        email: &str,
        exclude_deleted: bool,
    ) -> Result<Option<Contact>, StoreError> {
        let sql = format!(
            r#"
            SELECT {CONTACT_COLUMNS} FROM contacts
            WHERE user_id = $1 AND email = $2 AND (NOT $3 OR deleted_at IS NULL)
            ORDER BY deleted_at IS NULL DESC, created_at DESC
            LIMIT 1
            "#
        );
        let contact = sqlx::query_as::<_, Contact>(&sql)
            .bind(user_id)
            .bind(email)
            .bind(exclude_deleted)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(contact)
    }

    async fn insert_contact(
        &mut self,
        user_id: Uuid,
        fields: &ContactFields,
    ) -> Result<Contact, StoreError> {
        // DO NOTHING keeps the transaction usable after a conflict.
        let sql = format!(
            r#"
            INSERT INTO contacts (user_id, name, email, phone, address, timezone)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, email) WHERE deleted_at IS NULL DO NOTHING
            RETURNING {CONTACT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Contact>(&sql)
            .bind(user_id)
            .bind(&fields.name)
            .bind(&fields.email)
            .bind(&fields.phone)
            .bind(&fields.address)
            .bind(&fields.timezone)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or(StoreError::UniqueViolation)
    }

    async fn update_contact(
        &mut self,
        id: Uuid,
        fields: &ContactFields,
    ) -> Result<Contact, StoreError> {
        let sql = format!(
            r#"
            UPDATE contacts
            SET name = $2, email = $3, phone = $4, address = $5, timezone = $6
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {CONTACT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Contact>(&sql)
            .bind(id)
            .bind(&fields.name)
            .bind(&fields.email)
            .bind(&fields.phone)
            .bind(&fields.address)
            .bind(&fields.timezone)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_unique)?
            .ok_or(StoreError::RowNotFound)
    }

    async fn soft_delete_contact(
        &mut self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE contacts SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::RowNotFound);
        }
        Ok(())
    }

    async fn list_contacts(
        &mut self,
        user_id: Uuid,
        query: &ContactQuery,
    ) -> Result<(Vec<Contact>, i64), StoreError> {
        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM contacts {CONTACT_FILTER}"))
            .bind(user_id)
            .bind(&query.name)
            .bind(&query.email)
            .bind(&query.timezone)
            .bind(query.created_from)
            .bind(query.created_to)
            .fetch_one(&mut *self.tx)
            .await?;

        let direction = match query.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts {CONTACT_FILTER} \
             ORDER BY {} {direction}, id ASC LIMIT $7 OFFSET $8",
            query.sort.column()
        );
        let rows = sqlx::query_as::<_, Contact>(&sql)
            .bind(user_id)
            .bind(&query.name)
            .bind(&query.email)
            .bind(&query.timezone)
            .bind(query.created_from)
            .bind(query.created_to)
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok((rows, total))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
