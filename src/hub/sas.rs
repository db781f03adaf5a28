//! Shared Access Signature tokens for the hub REST API.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::form_urlencoded;

use crate::error::PushError;

type HmacSha256 = Hmac<Sha256>;

/// Validity of a freshly issued token.
pub const TOKEN_LIFETIME_SECS: i64 = 60;

#[derive(Clone)]
pub struct SasSigner {
    key_name: String,
    key: Vec<u8>,
}

impl std::fmt::Debug for SasSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SasSigner")
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

impl SasSigner {
    pub fn new(key_name: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key_name: key_name.into(),
            key: key.into(),
        }
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Authorization header value for `target_uri`, valid for one minute from now.
    pub fn token(&self, target_uri: &str) -> Result<String, PushError> {
        self.token_at(target_uri, Utc::now())
    }

    pub fn token_at(&self, target_uri: &str, now: DateTime<Utc>) -> Result<String, PushError> {
        let resource = url_encode(&target_uri.to_lowercase());
        let expiry = (now + Duration::seconds(TOKEN_LIFETIME_SECS)).timestamp();
        let signature = url_encode(&self.sign(&format!("{resource}\n{expiry}"))?);

        Ok(format!(
            "SharedAccessSignature sr={resource}&sig={signature}&se={expiry}&skn={}",
            self.key_name
        ))
    }

    fn sign(&self, string_to_sign: &str) -> Result<String, PushError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|_| PushError::Crypto("invalid SAS key length"))?;
        mac.update(string_to_sign.as_bytes());
        Ok(base64::encode(mac.finalize().into_bytes()))
    }
}

fn url_encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn query_param<'a>(token: &'a str, name: &str) -> &'a str {
        token
            .trim_start_matches("SharedAccessSignature ")
            .split('&')
            .find_map(|pair| pair.strip_prefix(&format!("{name}=")))
            .unwrap()
    }

    #[test]
    fn token_has_expected_shape() {
        let signer = SasSigner::new("DefaultFullSharedAccessSignature", "secret-key");
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let token = signer
            .token_at("https://NS.servicebus.windows.net/Hub/messages/", now)
            .unwrap();

        assert!(token.starts_with("SharedAccessSignature sr=https%3A%2F%2Fns.servicebus.windows.net%2Fhub%2Fmessages%2F&sig="));
        assert_eq!(query_param(&token, "se"), (now.timestamp() + 60).to_string());
        assert_eq!(query_param(&token, "skn"), "DefaultFullSharedAccessSignature");
    }

    #[test]
    fn signature_verifies_against_key() {
        let signer = SasSigner::new("listen", "another-key");
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let token = signer.token_at("https://ns.example/hub/installations/x", now).unwrap();

        let resource = query_param(&token, "sr");
        let expiry = query_param(&token, "se");
        let signature: String = form_urlencoded::parse(format!("s={}", query_param(&token, "sig")).as_bytes())
            .map(|(_, value)| value.into_owned())
            .next()
            .unwrap();

        let mut mac = HmacSha256::new_from_slice(b"another-key").unwrap();
        mac.update(format!("{resource}\n{expiry}").as_bytes());
        mac.verify_slice(&base64::decode(signature).unwrap()).unwrap();
    }
}
