//! Push dispatcher: best-effort, content-free hints that wake a client to
//! go poll the relay.
//!
//! Grounded on `api::jwt::JwksCache`'s use of the `jsonwebtoken` crate —
//! same dependency, opposite direction: the teacher *verifies* inbound
//! JWTs against a JWKS, this module *signs* outbound ones with a
//! configured ES256 key.

use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::Result;

/// The kind of queue a hint refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HintKind {
    Approval,
    Question,
    Progress,
}

/// Content-free push hint payload: pairing id, kind, opaque id. No user
/// content, no command strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushHint {
    pub pairing_id: String,
    pub kind: HintKind,
    pub id: String,
}

#[derive(Debug, Serialize)]
struct HintClaims {
    sub: String,
    exp: u64,
    iss: String,
}

/// Delivers a push hint to a provider. Implemented by `HttpPushProvider`
/// in production; tests can supply a recording stub.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn deliver(&self, hint: &PushHint, auth_token: &str) -> Result<()>;
}

/// POSTs the hint payload, bearer-authenticated with a signed JWT, to a
/// configurable provider endpoint. This is the seam where a real
/// APNs/FCM transport plugs in; provisioning that credential is out of
/// scope, so this takes a pre-configured base URL and signing key rather
/// than a vendor SDK.
pub struct HttpPushProvider {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpPushProvider {
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn deliver(&self, hint: &PushHint, auth_token: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(auth_token)
            .json(hint)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(crate::Error::UpstreamUnavailable(format!(
                "push provider returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Signs short-lived ES256 JWTs and sends hints through a `PushProvider`.
/// Push is best-effort: failures are logged and never fail the caller's
/// enqueue operation (see `PushDispatcher::notify`).
pub struct PushDispatcher<P> {
    signing_key: EncodingKey,
    issuer: String,
    ttl: Duration,
    provider: P,
}

impl<P> PushDispatcher<P>
where
    P: PushProvider,
{
    /// Build a dispatcher from a PEM-encoded EC private key.
    ///
    /// # Errors
    ///
    /// Returns `Error::Crypto` if `ec_pem` is not a valid EC private key.
    pub fn new(ec_pem: &[u8], issuer: impl Into<String>, provider: P) -> Result<Self> {
        let signing_key = EncodingKey::from_ec_pem(ec_pem)
            .map_err(|e| crate::Error::Crypto(format!("invalid push signing key: {e}")))?;
        Ok(Self {
            signing_key,
            issuer: issuer.into(),
            ttl: Duration::from_secs(60),
            provider,
        })
    }

    /// Best-effort: enqueue callers never see this fail. Errors are
    /// logged at `warn` and swallowed.
    pub async fn notify(&self, hint: PushHint) {
        if let Err(err) = self.try_notify(&hint).await {
            tracing::warn!(
                pairing_id = %hint.pairing_id,
                error = %err,
                "push hint delivery failed"
            );
        }
    }

    async fn try_notify(&self, hint: &PushHint) -> Result<()> {
        let token = self.sign_token()?;
        self.provider.deliver(hint, &token).await
    }

    fn sign_token(&self) -> Result<String> {
        let exp = u64::try_from((chrono::Utc::now() + self.ttl).timestamp())
            .unwrap_or(0);
        let claims = HintClaims {
            sub: "claude-watch-relay".into(),
            exp,
            iss: self.issuer.clone(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &self.signing_key)
            .map_err(|e| crate::Error::Crypto(format!("failed to sign push token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct RecordingProvider {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PushProvider for RecordingProvider {
        async fn deliver(&self, _hint: &PushHint, _auth_token: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn new_rejects_malformed_signing_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = PushDispatcher::new(
            b"not a pem key",
            "claude-watch",
            RecordingProvider { calls },
        );
        assert!(dispatcher.is_err());
    }
}
