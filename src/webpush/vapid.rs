//! VAPID (RFC 8292) authorization for Web Push requests.

use std::collections::HashMap;

use base64::{encode_config, URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use p256::{
    ecdsa::{signature::Signer, Signature, SigningKey},
    elliptic_curve::sec1::ToEncodedPoint,
    PublicKey,
};
use serde::Serialize;
use tokio::sync::Mutex;
use url::Url;

use crate::{error::PushError, webpush::encrypt::decode_b64url};

const TOKEN_VALIDITY_HOURS: i64 = 12;
/// Cached headers are reissued once less than this much validity is left.
const REISSUE_MARGIN_HOURS: i64 = 1;

#[derive(Serialize)]
struct JwtHeader {
    typ: &'static str,
    alg: &'static str,
}

#[derive(Serialize)]
struct Claims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

/// A signed `Authorization` value and the moment it stops being accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VapidHeader {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

pub struct VapidSigner {
    signing_key: SigningKey,
    public_key: String,
    subject: String,
}

impl std::fmt::Debug for VapidSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidSigner")
            .field("public_key", &self.public_key)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl VapidSigner {
    /// Keys are base64url. The public key must belong to the private key.
    pub fn new(private_key: &str, public_key: &str, subject: &str) -> Result<Self, PushError> {
        let scalar = decode_b64url(private_key.trim())
            .map_err(|err| PushError::invalid(format!("VAPID private key: {err}")))?;
        let signing_key = SigningKey::from_slice(&scalar)
            .map_err(|_| PushError::invalid("VAPID private key is not a P-256 scalar"))?;

        let derived = PublicKey::from(signing_key.verifying_key())
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        let configured = decode_b64url(public_key.trim())
            .map_err(|err| PushError::invalid(format!("VAPID public key: {err}")))?;
        if configured != derived {
            return Err(PushError::invalid(
                "VAPID public key does not match the private key",
            ));
        }

        Ok(Self {
            signing_key,
            public_key: encode_config(&derived, URL_SAFE_NO_PAD),
            subject: normalize_subject(subject),
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn header_for(&self, endpoint: &Url) -> Result<VapidHeader, PushError> {
        self.header_at(&audience(endpoint)?, Utc::now())
    }

    pub fn header_at(&self, audience: &str, now: DateTime<Utc>) -> Result<VapidHeader, PushError> {
        let expires_at = now + Duration::hours(TOKEN_VALIDITY_HOURS);
        let header = encode_config(
            serde_json::to_vec(&JwtHeader {
                typ: "JWT",
                alg: "ES256",
            })?,
            URL_SAFE_NO_PAD,
        );
        let claims = encode_config(
            serde_json::to_vec(&Claims {
                aud: audience,
                exp: expires_at.timestamp(),
                sub: &self.subject,
            })?,
            URL_SAFE_NO_PAD,
        );

        let signing_input = format!("{header}.{claims}");
        let signature: Signature = self
            .signing_key
            .try_sign(signing_input.as_bytes())
            .map_err(|_| PushError::Crypto("VAPID signing failed"))?;
        let signature = encode_config(signature.to_bytes(), URL_SAFE_NO_PAD);

        Ok(VapidHeader {
            value: format!("vapid t={signing_input}.{signature}, k={}", self.public_key),
            expires_at,
        })
    }
}

/// `scheme://host[:port]` of a push endpoint.
pub fn audience(endpoint: &Url) -> Result<String, PushError> {
    let origin = endpoint.origin();
    if !origin.is_tuple() {
        return Err(PushError::invalid(format!("endpoint {endpoint} has no origin")));
    }
    Ok(origin.ascii_serialization())
}

fn normalize_subject(subject: &str) -> String {
    let subject = subject.trim();
    if subject.starts_with("mailto:") || subject.starts_with("https:") {
        subject.to_string()
    } else {
        format!("mailto:{subject}")
    }
}

/// Headers memoized per audience.
#[derive(Debug, Default)]
pub struct VapidHeaderCache {
    entries: Mutex<HashMap<String, VapidHeader>>,
}

impl VapidHeaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached header for `audience`, signing a new one when it is
    /// missing or close to expiry.
    pub async fn get_or_create(
        &self,
        signer: &VapidSigner,
        audience: &str,
    ) -> Result<VapidHeader, PushError> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        if let Some(header) = entries.get(audience) {
            if header.expires_at - now > Duration::hours(REISSUE_MARGIN_HOURS) {
                return Ok(header.clone());
            }
        }

        let header = signer.header_at(audience, now)?;
        entries.insert(audience.to_string(), header.clone());
        Ok(header)
    }

    pub async fn update(&self, audience: &str, header: VapidHeader) {
        self.entries.lock().await.insert(audience.to_string(), header);
    }

    pub async fn remove(&self, audience: &str) -> Option<VapidHeader> {
        self.entries.lock().await.remove(audience)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::decode_config;
    use p256::ecdsa::{signature::Verifier, VerifyingKey};
    use rand::rngs::OsRng;

    /// Fresh `(private, public)` base64url key pair.
    pub(crate) fn make_keys() -> (String, String) {
        let key = SigningKey::random(&mut OsRng);
        let public = PublicKey::from(key.verifying_key()).to_encoded_point(false);
        (
            encode_config(key.to_bytes(), URL_SAFE_NO_PAD),
            encode_config(public.as_bytes(), URL_SAFE_NO_PAD),
        )
    }

    fn make_signer() -> VapidSigner {
        let (private, public) = make_keys();
        VapidSigner::new(&private, &public, "admin@example.com").unwrap()
    }

    fn decode_segment(segment: &str) -> serde_json::Value {
        serde_json::from_slice(&decode_config(segment, URL_SAFE_NO_PAD).unwrap()).unwrap()
    }

    #[test]
    fn header_shape_and_claims() {
        let signer = make_signer();
        let endpoint = Url::parse("https://fcm.googleapis.com/fcm/send/abc:def").unwrap();
        let now = Utc::now();
        let header = signer.header_at(&audience(&endpoint).unwrap(), now).unwrap();

        let rest = header.value.strip_prefix("vapid t=").unwrap();
        let (token, key) = rest.split_once(", k=").unwrap();
        assert_eq!(key, signer.public_key());

        let segments: Vec<&str> = token.split('.').collect();
        assert_eq!(segments.len(), 3);
        for segment in &segments {
            assert!(segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }

        assert_eq!(segments[0], encode_config(r#"{"typ":"JWT","alg":"ES256"}"#, URL_SAFE_NO_PAD));
        let claims = decode_segment(segments[1]);
        assert_eq!(claims["aud"], "https://fcm.googleapis.com");
        assert_eq!(claims["sub"], "mailto:admin@example.com");
        let exp = claims["exp"].as_i64().unwrap();
        assert!(exp > now.timestamp());
        assert!(exp <= now.timestamp() + 12 * 3600);
    }

    #[test]
    fn signature_verifies_with_public_key() {
        let signer = make_signer();
        let header = signer.header_at("https://push.example.com", Utc::now()).unwrap();
        let token = header.value.strip_prefix("vapid t=").unwrap().split(", k=").next().unwrap();
        let (signing_input, signature) = token.rsplit_once('.').unwrap();

        let public = decode_config(signer.public_key(), URL_SAFE_NO_PAD).unwrap();
        let verifying = VerifyingKey::from_sec1_bytes(&public).unwrap();
        let signature = Signature::from_slice(&decode_config(signature, URL_SAFE_NO_PAD).unwrap()).unwrap();
        verifying.verify(signing_input.as_bytes(), &signature).unwrap();
    }

    #[test]
    fn audience_keeps_non_default_port() {
        let endpoint = Url::parse("https://push.example.com:8443/a/b?c=d").unwrap();
        assert_eq!(audience(&endpoint).unwrap(), "https://push.example.com:8443");
    }

    #[test]
    fn mismatched_public_key_is_rejected() {
        let (private, _) = make_keys();
        let (_, other_public) = make_keys();
        let err = VapidSigner::new(&private, &other_public, "mailto:a@b.c").unwrap_err();
        assert!(matches!(err, PushError::Invalid(_)));
    }

    #[test]
    fn subject_is_normalized() {
        assert_eq!(normalize_subject("ops@example.com"), "mailto:ops@example.com");
        assert_eq!(normalize_subject("mailto:ops@example.com"), "mailto:ops@example.com");
        assert_eq!(normalize_subject("https://example.com"), "https://example.com");
    }

    #[tokio::test]
    async fn cache_reuses_until_close_to_expiry() {
        let signer = make_signer();
        let cache = VapidHeaderCache::new();

        let first = cache.get_or_create(&signer, "https://push.example.com").await.unwrap();
        let second = cache.get_or_create(&signer, "https://push.example.com").await.unwrap();
        assert_eq!(first, second);

        let stale = signer
            .header_at("https://push.example.com", Utc::now() - Duration::hours(11) - Duration::minutes(30))
            .unwrap();
        cache.update("https://push.example.com", stale.clone()).await;
        let refreshed = cache.get_or_create(&signer, "https://push.example.com").await.unwrap();
        assert_ne!(refreshed, stale);
        assert!(refreshed.expires_at > stale.expires_at);

        cache.get_or_create(&signer, "https://other.example.com").await.unwrap();
        assert_eq!(cache.len().await, 2);
        assert!(cache.remove("https://other.example.com").await.is_some());
        assert_eq!(cache.len().await, 1);
    }
}
