//! `aesgcm` content encoding for Web Push messages.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes128Gcm, Nonce,
};
use base64::{decode_config, encode_config, URL_SAFE, URL_SAFE_NO_PAD};
use hkdf::Hkdf;
use p256::{elliptic_curve::sec1::ToEncodedPoint, PublicKey, SecretKey};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use url::Url;

use crate::{error::PushError, models::WebPushKeys};

pub const PUBLIC_KEY_LEN: usize = 65;
pub const AUTH_SECRET_LEN: usize = 16;
pub const SALT_LEN: usize = 16;
/// Record boundary the padding rounds up to.
const PAD_BLOCK: usize = 128;

const AUTH_INFO: &[u8] = b"Content-Encoding: auth\0";
const KEY_INFO: &[u8] = b"Content-Encoding: aesgcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";
const CURVE_LABEL: &[u8] = b"P-256\0";

/// A browser subscription whose keys have already been checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipientWebPushSubscription {
    endpoint: Url,
    public_key: [u8; PUBLIC_KEY_LEN],
    auth_secret: [u8; AUTH_SECRET_LEN],
}

impl RecipientWebPushSubscription {
    pub fn new(endpoint: &str, public_key: &[u8], auth_secret: &[u8]) -> Result<Self, PushError> {
        Self::parse(endpoint, public_key, auth_secret, false)
    }

    fn parse(
        endpoint: &str,
        public_key: &[u8],
        auth_secret: &[u8],
        allow_http: bool,
    ) -> Result<Self, PushError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| PushError::invalid(format!("web push endpoint: {err}")))?;
        match endpoint.scheme() {
            "https" => {}
            "http" if allow_http => {}
            _ => return Err(PushError::invalid("web push endpoint must be https")),
        }

        let public_key: [u8; PUBLIC_KEY_LEN] = public_key.try_into().map_err(|_| {
            PushError::invalid(format!(
                "recipient public key must be {PUBLIC_KEY_LEN} bytes, got {}",
                public_key.len()
            ))
        })?;
        if public_key[0] != 0x04 {
            return Err(PushError::invalid(
                "recipient public key must be an uncompressed point",
            ));
        }

        let auth_secret: [u8; AUTH_SECRET_LEN] = auth_secret.try_into().map_err(|_| {
            PushError::invalid(format!(
                "auth secret must be {AUTH_SECRET_LEN} bytes, got {}",
                auth_secret.len()
            ))
        })?;

        Ok(Self {
            endpoint,
            public_key,
            auth_secret,
        })
    }

    /// Decodes the base64url keys a browser hands out.
    ///
    /// `allow_http` also accepts plain `http` endpoints, for local push
    /// services.
    pub fn from_keys(keys: &WebPushKeys, allow_http: bool) -> Result<Self, PushError> {
        let public_key = decode_b64url(&keys.p256dh)
            .map_err(|err| PushError::invalid(format!("p256dh: {err}")))?;
        let auth_secret =
            decode_b64url(&keys.auth).map_err(|err| PushError::invalid(format!("auth: {err}")))?;
        Self::parse(&keys.endpoint, &public_key, &auth_secret, allow_http)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public_key
    }
}

/// Encrypted body plus the values that travel in headers.
#[derive(Clone, Debug)]
pub struct EncryptedPayload {
    pub body: Vec<u8>,
    pub sender_public_key: Vec<u8>,
    pub salt: [u8; SALT_LEN],
}

impl EncryptedPayload {
    pub fn crypto_key_header(&self) -> String {
        format!("dh={}", encode_config(&self.sender_public_key, URL_SAFE_NO_PAD))
    }

    pub fn encryption_header(&self) -> String {
        format!("salt={}", encode_config(self.salt, URL_SAFE_NO_PAD))
    }
}

/// Encrypts `content` for one subscriber with a fresh sender key and salt.
pub fn encrypt(
    content: &[u8],
    subscription: &RecipientWebPushSubscription,
) -> Result<EncryptedPayload, PushError> {
    let sender = SecretKey::random(&mut OsRng);
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    encrypt_with(content, subscription, &sender, salt)
}

fn encrypt_with(
    content: &[u8],
    subscription: &RecipientWebPushSubscription,
    sender: &SecretKey,
    salt: [u8; SALT_LEN],
) -> Result<EncryptedPayload, PushError> {
    let recipient = PublicKey::from_sec1_bytes(&subscription.public_key)
        .map_err(|_| PushError::invalid("recipient public key is not a P-256 point"))?;
    let sender_public = sender.public_key().to_encoded_point(false).as_bytes().to_vec();

    let shared = p256::ecdh::diffie_hellman(sender.to_nonzero_scalar(), recipient.as_affine());
    let (key, nonce) = derive_key_and_nonce(
        &subscription.auth_secret,
        shared.raw_secret_bytes().as_slice(),
        &subscription.public_key,
        &sender_public,
        &salt,
    )?;

    let cipher =
        Aes128Gcm::new_from_slice(&key).map_err(|_| PushError::Crypto("invalid content key"))?;
    let body = cipher
        .encrypt(Nonce::from_slice(&nonce), pad(content).as_slice())
        .map_err(|_| PushError::Crypto("content encryption failed"))?;

    Ok(EncryptedPayload {
        body,
        sender_public_key: sender_public,
        salt,
    })
}

/// `u16be(P) ‖ P zero bytes ‖ content`, with `P = 128 - len % 128`.
fn pad(content: &[u8]) -> Vec<u8> {
    let padding = PAD_BLOCK - content.len() % PAD_BLOCK;
    let mut padded = Vec::with_capacity(2 + padding + content.len());
    padded.extend_from_slice(&(padding as u16).to_be_bytes());
    padded.resize(2 + padding, 0);
    padded.extend_from_slice(content);
    padded
}

fn derive_key_and_nonce(
    auth_secret: &[u8],
    shared_secret: &[u8],
    recipient_public: &[u8],
    sender_public: &[u8],
    salt: &[u8],
) -> Result<([u8; 16], [u8; 12]), PushError> {
    let mut prk = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth_secret), shared_secret)
        .expand(AUTH_INFO, &mut prk)
        .map_err(|_| PushError::Crypto("hkdf auth expansion"))?;

    let context = key_context(recipient_public, sender_public);
    let hkdf = Hkdf::<Sha256>::new(Some(salt), &prk);

    let mut key = [0u8; 16];
    hkdf.expand(&[KEY_INFO, &context].concat(), &mut key)
        .map_err(|_| PushError::Crypto("hkdf key expansion"))?;
    let mut nonce = [0u8; 12];
    hkdf.expand(&[NONCE_INFO, &context].concat(), &mut nonce)
        .map_err(|_| PushError::Crypto("hkdf nonce expansion"))?;

    Ok((key, nonce))
}

/// `"P-256\0" ‖ len16(ua) ‖ ua ‖ len16(as) ‖ as`
fn key_context(recipient_public: &[u8], sender_public: &[u8]) -> Vec<u8> {
    let mut context = Vec::with_capacity(CURVE_LABEL.len() + 4 + recipient_public.len() + sender_public.len());
    context.extend_from_slice(CURVE_LABEL);
    context.extend_from_slice(&(recipient_public.len() as u16).to_be_bytes());
    context.extend_from_slice(recipient_public);
    context.extend_from_slice(&(sender_public.len() as u16).to_be_bytes());
    context.extend_from_slice(sender_public);
    context
}

pub(crate) fn decode_b64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    decode_config(value, URL_SAFE_NO_PAD).or_else(|_| decode_config(value, URL_SAFE))
}
