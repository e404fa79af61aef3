//! Registration, login, email verification and password reset.
//!
//! Every state change runs inside one store transaction. Where a change
//! must be followed by an email (new verification token, new reset code),
//! the email is sent before commit; a failed send drops the transaction so
//! no token is left behind that its owner never received.

use time::OffsetDateTime;
use tracing::{error, info, warn};

use super::{
    dto::{LoginRequest, RegisterRequest, ResetPasswordRequest},
    password::{hash_password, verify_password},
    tokens,
    validation::{check_email, check_password, normalize_email},
};
use crate::{
    db::{NewUser, StoreError, User, UserChanges},
    error::AppError,
    state::AppState,
};

/// Creates an unverified account and sends its verification token.
pub async fn register(st: &AppState, req: RegisterRequest) -> Result<User, AppError> {
    let email = normalize_email(&req.email);
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    let mut problems = Vec::new();
    check_email(&email, &mut problems);
    check_password(&req.password, &mut problems);
    if !problems.is_empty() {
        warn!(email = %email, "registration rejected by validation");
        return Err(AppError::Validation(problems));
    }

    let password_hash = hash_password(&req.password)?;
    let verification_token = tokens::verification_token();

    let mut tx = st.store.begin().await?;
    if tx.find_user_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("Email already registered".into()));
    }
    let user = match tx
        .create_user(NewUser {
            email: email.clone(),
            password_hash,
            name,
            verification_token: Some(verification_token.clone()),
        })
        .await
    {
        Ok(u) => u,
        Err(StoreError::UniqueViolation) => {
            warn!(email = %email, "email already registered");
            return Err(AppError::Conflict("Email already registered".into()));
        }
        Err(e) => return Err(e.into()),
    };

    if let Err(e) = st
        .mailer
        .send_verification_email(&user.email, &verification_token)
        .await
    {
        error!(error = %e, email = %email, "verification email failed; registration rolled back");
        return Err(AppError::DeliveryFailure);
    }
    tx.commit().await?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

/// Checks credentials and returns a bearer token for a verified account.
pub async fn login(st: &AppState, req: LoginRequest) -> Result<(String, User), AppError> {
    let email = normalize_email(&req.email);

    let mut tx = st.store.begin().await?;
    let user = match tx.find_user_by_email(&email).await? {
        Some(u) => u,
        None => {
            warn!(email = %email, "login unknown email");
            return Err(AppError::InvalidCredentials);
        }
    };
    drop(tx);

    if !verify_password(&req.password, &user.password_hash) {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::InvalidCredentials);
    }
    if !user.email_verified {
        warn!(user_id = %user.id, "login before email verification");
        return Err(AppError::EmailNotVerified);
    }

    let token = st.jwt.issue(user.id)?;
    info!(user_id = %user.id, "user logged in");
    Ok((token, user))
}

/// Consumes a verification token. A token works once; replays fail.
pub async fn verify_email(st: &AppState, token: &str) -> Result<User, AppError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::InvalidToken);
    }

    let mut tx = st.store.begin().await?;
    let Some(user) = tx.find_user_by_verification_token(token).await? else {
        warn!("unknown verification token");
        return Err(AppError::InvalidToken);
    };
    let user = tx
        .update_user(
            user.id,
            UserChanges {
                email_verified: Some(true),
                verification_token: Some(None),
                ..Default::default()
            },
        )
        .await?;
    tx.commit().await?;

    info!(user_id = %user.id, "email verified");
    Ok(user)
}

/// Replaces the verification token of an unverified account and resends it.
/// Unknown or already verified addresses are accepted silently.
pub async fn resend_verification(st: &AppState, email: &str) -> Result<(), AppError> {
    let email = normalize_email(email);
    let mut problems = Vec::new();
    check_email(&email, &mut problems);
    if !problems.is_empty() {
        return Err(AppError::Validation(problems));
    }

    let mut tx = st.store.begin().await?;
    let user = match tx.find_user_by_email(&email).await? {
        Some(u) if !u.email_verified => u,
        _ => return Ok(()),
    };

    let token = tokens::verification_token();
    tx.update_user(
        user.id,
        UserChanges {
            verification_token: Some(Some(token.clone())),
            ..Default::default()
        },
    )
    .await?;
    if let Err(e) = st.mailer.send_verification_email(&user.email, &token).await {
        error!(error = %e, user_id = %user.id, "verification email failed; token not replaced");
        return Err(AppError::DeliveryFailure);
    }
    tx.commit().await?;

    info!(user_id = %user.id, "verification token reissued");
    Ok(())
}

pub async fn request_password_reset(st: &AppState, email: &str) -> Result<(), AppError> {
    request_password_reset_at(st, email, OffsetDateTime::now_utc()).await
}

/// Issues a reset code valid for one hour, replacing any pending one.
/// The outcome for an unknown address is the same as for a known one.
pub(crate) async fn request_password_reset_at(
    st: &AppState,
    email: &str,
    now: OffsetDateTime,
) -> Result<(), AppError> {
    let email = normalize_email(email);
    let mut problems = Vec::new();
    check_email(&email, &mut problems);
    if !problems.is_empty() {
        return Err(AppError::Validation(problems));
    }

    let mut tx = st.store.begin().await?;
    let Some(user) = tx.find_user_by_email(&email).await? else {
        info!("password reset requested for unknown email");
        return Ok(());
    };

    let code = tokens::reset_code();
    tx.update_user(
        user.id,
        UserChanges {
            reset_token: Some(Some(code.clone())),
            reset_token_expires: Some(Some(now + tokens::RESET_CODE_TTL)),
            ..Default::default()
        },
    )
    .await?;
    if let Err(e) = st.mailer.send_password_reset_email(&user.email, &code).await {
        error!(error = %e, user_id = %user.id, "reset email failed; code discarded");
        return Err(AppError::DeliveryFailure);
    }
    tx.commit().await?;

    info!(user_id = %user.id, "password reset code issued");
    Ok(())
}

pub async fn reset_password(st: &AppState, req: ResetPasswordRequest) -> Result<(), AppError> {
    reset_password_at(st, req, OffsetDateTime::now_utc()).await
}

/// Consumes a reset code: sets the new password and clears the code.
pub(crate) async fn reset_password_at(
    st: &AppState,
    req: ResetPasswordRequest,
    now: OffsetDateTime,
) -> Result<(), AppError> {
    let email = normalize_email(&req.email);
    let mut problems = Vec::new();
    check_password(&req.new_password, &mut problems);
    if !problems.is_empty() {
        return Err(AppError::Validation(problems));
    }

    let mut tx = st.store.begin().await?;
    let user = match tx.find_user_by_email(&email).await? {
        Some(u) if reset_code_matches(&u, req.code.trim(), now) => u,
        _ => {
            warn!(email = %email, "invalid or expired reset code");
            return Err(AppError::InvalidOrExpiredCode);
        }
    };

    let password_hash = hash_password(&req.new_password)?;
    tx.update_user(
        user.id,
        UserChanges {
            password_hash: Some(password_hash),
            reset_token: Some(None),
            reset_token_expires: Some(None),
            ..Default::default()
        },
    )
    .await?;
    tx.commit().await?;

    info!(user_id = %user.id, "password reset");
    Ok(())
}

fn reset_code_matches(user: &User, code: &str, now: OffsetDateTime) -> bool {
    match (&user.reset_token, user.reset_token_expires) {
        (Some(stored), Some(expires)) => {
            !code.is_empty() && constant_time_eq(stored.as_bytes(), code.as_bytes()) && expires > now
        }
        _ => false,
    }
}

// Runs over the whole input regardless of where the first mismatch is.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
