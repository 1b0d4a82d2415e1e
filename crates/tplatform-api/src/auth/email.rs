//! Confirmation email delivery
//!
//! The service hands each new or resent registration to an [`EmailSender`]
//! on a detached task. Delivery is outside this crate; the default
//! [`LogEmailSender`] only logs what would have been sent.

use super::models::Registration;
use async_trait::async_trait;
use tracing::info;

/// Email delivery abstraction used by the registration flow.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver the activation link and code for `registration`.
    async fn send_confirmation(&self, registration: &Registration) -> anyhow::Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_confirmation(&self, registration: &Registration) -> anyhow::Result<()> {
        info!(
            to_email = %registration.email,
            activation_path = %format!("/api/v1/auth/activate/{}", registration.activation_token),
            verify_code = %registration.verify_code,
            expires_at = %registration.expired_at,
            "confirmation email send stub"
        );
        Ok(())
    }
}

/// Sender that keeps every registration it was asked to confirm
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct RecordingEmailSender {
    sent: std::sync::Mutex<Vec<Registration>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl RecordingEmailSender {
    pub fn sent(&self) -> Vec<Registration> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_confirmation(&self, registration: &Registration) -> anyhow::Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(registration.clone());
        }
        Ok(())
    }
}
