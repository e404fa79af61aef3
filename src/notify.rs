//! Outbound notifications for the verification and reset flows.
//!
//! The default sender is `LogMailer`, which logs the link instead of
//! delivering mail. Any transport (SMTP, provider API, queue) plugs in by
//! implementing [`Mailer`]; an `Err` is reported to the caller as a
//! delivery failure and the pending token write is rolled back.

use async_trait::async_trait;
use tracing::info;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification_email(&self, email: &str, token: &str) -> anyhow::Result<()>;
    async fn send_password_reset_email(&self, email: &str, code: &str) -> anyhow::Result<()>;
}

#[derive(Clone, Debug)]
pub struct LogMailer {
    app_url: String,
}

impl LogMailer {
    pub fn new(app_url: impl Into<String>) -> Self {
        Self {
            app_url: app_url.into(),
        }
    }

    fn verification_link(&self, token: &str) -> String {
        format!("{}/verify-email?token={}", self.app_url, token)
    }

    fn reset_link(&self, code: &str) -> String {
        format!("{}/reset-password?token={}", self.app_url, code)
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification_email(&self, email: &str, token: &str) -> anyhow::Result<()> {
        info!(to_email = %email, link = %self.verification_link(token), "verification email");
        Ok(())
    }

    async fn send_password_reset_email(&self, email: &str, code: &str) -> anyhow::Result<()> {
        info!(to_email = %email, link = %self.reset_link(code), "password reset email");
        Ok(())
    }
}
