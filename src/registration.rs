use rand::RngCore;
use subtle::ConstantTimeEq;
use url::Url;

use crate::error::{AppError, Result};
use crate::store::{Store, WebhookProvider};

const SECRET_LEN_BYTES: usize = 32;

/// Accepts client-facing requests: registers webhooks and ingests events.
/// Publication to the bus is deliberately not performed here — see
/// `OutboxWorker` — trading ingest latency for crash-safety.
pub struct RegistrationService {
    store: Store,
}

impl RegistrationService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn validate_url(url: &str) -> Result<()> {
        if url.is_empty() {
            return Err(AppError::Validation("url is required".into()));
        }
        let parsed = Url::parse(url)
            .map_err(|_| AppError::Validation("invalid url".into()))?;
        if parsed.cannot_be_a_base() {
            return Err(AppError::Validation("invalid url".into()));
        }
        Ok(())
    }

    pub async fn create_webhook(&self, url: &str) -> Result<(i64, String)> {
        Self::validate_url(url)?;

        let mut secret_bytes = [0u8; SECRET_LEN_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut secret_bytes);
        let secret = hex::encode(secret_bytes);

        let id = self.store.save_webhook(url, &secret).await?;
        Ok((id, secret))
    }

    pub async fn submit_event(
        &self,
        webhook_id: i64,
        payload: &str,
        secret: &str,
    ) -> Result<i64> {
        if secret.is_empty() {
            return Err(AppError::Validation("secret is required".into()));
        }

        let webhook = self.store.get_webhook(webhook_id).await?;

        if !secrets_match(&webhook.secret, secret) {
            return Err(AppError::InvalidSecret);
        }

        self.store.save_event_with_outbox(webhook_id, payload).await
    }
}

/// Constant-time comparison to avoid a timing oracle on the webhook
/// secret. Not called out explicitly as an operation in the data model,
/// but an intended contract of `SubmitEvent`.
fn secrets_match(expected: &str, supplied: &str) -> bool {
    expected.as_bytes().ct_eq(supplied.as_bytes()).unwrap_u8() == 1
}
