use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tracing::instrument;

use super::{
    dto::{
        AuthResponse, EmailRequest, LoginRequest, MessageResponse, PublicUser,
        RegisterRequest, RegisteredResponse, ResetPasswordRequest, VerifyEmailRequest,
    },
    extractors::AuthUser,
    services,
};
use crate::{error::AppError, extract::Json, state::AppState};

const RESET_REQUESTED: &str = "If the email exists, a reset code has been sent.";
const VERIFICATION_RESENT: &str =
    "If the account exists and is unverified, a new verification email has been sent.";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/verify", post(verify_email))
        .route("/auth/resend-verification", post(resend_verification))
        .route("/auth/reset-password-request", post(request_password_reset))
        .route("/auth/reset-password", post(reset_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisteredResponse>), AppError> {
    let user = services::register(&state, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisteredResponse {
            message: "User registered. Please check your email to verify your account.",
            user: user.into(),
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let (token, user) = services::login(&state, payload).await?;
    Ok(Json(AuthResponse {
        token,
        user: user.into(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::verify_email(&state, &payload.token).await?;
    Ok(Json(MessageResponse {
        message: "Email verified successfully",
    }))
}

#[instrument(skip(state, payload))]
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::resend_verification(&state, &payload.email).await?;
    Ok(Json(MessageResponse {
        message: VERIFICATION_RESENT,
    }))
}

#[instrument(skip(state, payload))]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<EmailRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::request_password_reset(&state, &payload.email).await?;
    Ok(Json(MessageResponse {
        message: RESET_REQUESTED,
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::reset_password(&state, payload).await?;
    Ok(Json(MessageResponse {
        message: "Password reset successfully",
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AppError> {
    let mut tx = state.store.begin().await?;
    // a valid token for a vanished account is treated as unauthenticated
    let user = tx
        .find_user_by_id(user_id)
        .await?
        .ok_or(AppError::Unauthenticated)?;
    Ok(Json(user.into()))
}
