//! Direct Web Push delivery: `aesgcm` encryption plus VAPID authorization.

pub mod encrypt;
pub mod vapid;

use std::time::Duration;

use reqwest::{header, StatusCode};
use tracing::debug;

use crate::error::PushError;

pub use encrypt::{encrypt, EncryptedPayload, RecipientWebPushSubscription};
pub use vapid::{VapidHeader, VapidHeaderCache, VapidSigner};

pub struct WebPushSender {
    http: reqwest::Client,
    signer: VapidSigner,
    headers: VapidHeaderCache,
    ttl_seconds: u32,
}

impl WebPushSender {
    pub fn new(signer: VapidSigner, ttl_seconds: u32, timeout: Duration) -> Result<Self, PushError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            signer,
            headers: VapidHeaderCache::new(),
            ttl_seconds,
        })
    }

    pub fn public_key(&self) -> &str {
        self.signer.public_key()
    }

    pub fn header_cache(&self) -> &VapidHeaderCache {
        &self.headers
    }

    /// Encrypts `content` and POSTs it to the subscription endpoint.
    pub async fn send(
        &self,
        subscription: &RecipientWebPushSubscription,
        content: &[u8],
    ) -> Result<(), PushError> {
        let payload = encrypt(content, subscription)?;
        let audience = vapid::audience(subscription.endpoint())?;
        let authorization = self.headers.get_or_create(&self.signer, &audience).await?;

        let response = self
            .http
            .post(subscription.endpoint().clone())
            .header(header::AUTHORIZATION, authorization.value)
            .header("Crypto-Key", payload.crypto_key_header())
            .header("Encryption", payload.encryption_header())
            .header(header::CONTENT_ENCODING, "aesgcm")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header("TTL", self.ttl_seconds.to_string())
            .body(payload.body)
            .send()
            .await?;

        let status = response.status();
        match status {
            status if status.is_success() => {
                debug!("web push accepted by {audience} ({status})");
                Ok(())
            }
            StatusCode::NOT_FOUND | StatusCode::GONE => Err(PushError::SubscriptionExpired),
            StatusCode::PAYLOAD_TOO_LARGE => Err(PushError::PayloadTooLarge),
            _ => Err(PushError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::webpush::vapid::tests::make_keys;
    use base64::{encode_config, URL_SAFE_NO_PAD};
    use p256::{elliptic_curve::sec1::ToEncodedPoint, SecretKey};
    use rand::rngs::OsRng;
    use wiremock::{
        matchers::{header, header_exists, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    pub(crate) fn make_sender() -> WebPushSender {
        let (private, public) = make_keys();
        let signer = VapidSigner::new(&private, &public, "mailto:ops@example.com").unwrap();
        WebPushSender::new(signer, 60, Duration::from_secs(2)).unwrap()
    }

    /// Base64url `(p256dh, auth)` for a throwaway browser.
    pub(crate) fn make_browser_keys() -> (String, String) {
        let secret = SecretKey::random(&mut OsRng);
        (
            encode_config(secret.public_key().to_encoded_point(false).as_bytes(), URL_SAFE_NO_PAD),
            encode_config([9u8; 16], URL_SAFE_NO_PAD),
        )
    }

    async fn make_subscription(server: &MockServer) -> RecipientWebPushSubscription {
        let (p256dh, auth) = make_browser_keys();
        let keys = crate::models::WebPushKeys {
            endpoint: format!("{}/push/abc", server.uri()),
            p256dh,
            auth,
        };
        RecipientWebPushSubscription::from_keys(&keys, true).unwrap()
    }

    #[tokio::test]
    async fn send_posts_encrypted_body_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/push/abc"))
            .and(header("Content-Encoding", "aesgcm"))
            .and(header("Content-Type", "application/octet-stream"))
            .and(header("TTL", "60"))
            .and(header_exists("Crypto-Key"))
            .and(header_exists("Encryption"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let sender = make_sender();
        sender.send(&make_subscription(&server).await, b"{\"type\":5}").await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let authorization = requests[0].headers["authorization"].to_str().unwrap();
        assert!(authorization.starts_with("vapid t="));
        assert!(authorization.ends_with(&format!(", k={}", sender.public_key())));
        assert!(requests[0].headers["crypto-key"].to_str().unwrap().starts_with("dh="));
        assert_eq!(requests[0].body.len(), 2 + 118 + 10 + 16);
        assert_eq!(sender.header_cache().len().await, 1);
    }

    #[tokio::test]
    async fn gone_endpoint_means_expired_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let err = make_sender()
            .send(&make_subscription(&server).await, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::SubscriptionExpired));
    }

    #[tokio::test]
    async fn oversized_and_server_errors_are_distinguished() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/push/abc"))
            .respond_with(ResponseTemplate::new(413))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/push/abc"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let sender = make_sender();
        let subscription = make_subscription(&server).await;
        assert!(matches!(
            sender.send(&subscription, b"x").await.unwrap_err(),
            PushError::PayloadTooLarge
        ));
        match sender.send(&subscription, b"x").await.unwrap_err() {
            PushError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "down");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_push_service_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let (private, public) = make_keys();
        let signer = VapidSigner::new(&private, &public, "mailto:ops@example.com").unwrap();
        let sender = WebPushSender::new(signer, 60, Duration::from_millis(200)).unwrap();

        let started = std::time::Instant::now();
        let err = sender
            .send(&make_subscription(&server).await, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Transport(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
