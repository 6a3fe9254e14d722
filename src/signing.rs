//! Request signing for the Basic Application API.
//!
//! Every call carries `UserId`, `CurrentTimestamp`, `Nonce` and an
//! `Authorization: Signature <base64>` header. The signature is an HMAC-SHA512
//! over `userId + timestamp + canonicalUrl + lowercase(method) + nonce + md5(body)`
//! keyed with the caller's API key.

use crate::errors::AppError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use reqwest::{Method, RequestBuilder};
use sha2::Sha512;
use std::fmt;
use url::Url;

type HmacSha512 = Hmac<Sha512>;

/// A user id and API key pair used to sign upstream calls.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub api_key: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_parts(user_id: Option<&str>, api_key: Option<&str>) -> Option<Self> {
        match (user_id, api_key) {
            (Some(user), Some(key)) if !user.is_empty() && !key.is_empty() => {
                Some(Self::new(user, key))
            }
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Which credential pair signs a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Standard,
    Agent,
}

/// Headers produced by [`sign`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub user_id: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}

impl SignatureHeaders {
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("accept", "text/plain")
            .header("Content-Type", "application/json-patch+json")
            .header("UserId", &self.user_id)
            .header("CurrentTimestamp", self.timestamp.to_string())
            .header("Authorization", format!("Signature {}", self.signature))
            .header("Nonce", &self.nonce)
    }
}

/// Canonical form of a URL: lowercase `host[:port]` and path, followed by the
/// re-encoded query pairs sorted by key when a query is present. Pairs with empty
/// values are dropped.
pub fn canonical_url(url: &Url) -> String {
    let mut canonical = url.host_str().unwrap_or_default().to_lowercase();
    if let Some(port) = url.port() {
        canonical.push_str(&format!(":{}", port));
    }
    canonical.push_str(&url.path().to_lowercase());

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.is_empty() {
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        canonical.push('?');
        canonical.push_str(&query);
    }

    canonical
}

/// Lowercase hex MD5 of the body, or the empty string for bodiless calls.
pub fn body_digest(body: Option<&[u8]>) -> String {
    match body {
        Some(bytes) if !bytes.is_empty() => hex::encode(Md5::digest(bytes)),
        _ => String::new(),
    }
}

/// Computes the signature headers with an explicit timestamp and nonce.
pub fn sign_with(
    url: &str,
    method: &Method,
    body: Option<&[u8]>,
    credentials: &Credentials,
    timestamp: i64,
    nonce: &str,
) -> Result<SignatureHeaders, AppError> {
    let parsed = Url::parse(url)
        .map_err(|e| AppError::Configuration(format!("Invalid upstream URL '{}': {}", url, e)))?;

    let message = format!(
        "{}{}{}{}{}{}",
        credentials.user_id,
        timestamp,
        canonical_url(&parsed),
        method.as_str().to_lowercase(),
        nonce,
        body_digest(body)
    );

    let mut mac = HmacSha512::new_from_slice(credentials.api_key.as_bytes())
        .map_err(|e| AppError::Configuration(format!("Invalid signing key: {}", e)))?;
    mac.update(message.as_bytes());
    let signature = STANDARD.encode(mac.finalize().into_bytes());

    Ok(SignatureHeaders {
        user_id: credentials.user_id.clone(),
        timestamp,
        nonce: nonce.to_string(),
        signature,
    })
}

/// Signs a call at the current time with a fresh UUIDv4 nonce.
pub fn sign(
    url: &str,
    method: &Method,
    body: Option<&[u8]>,
    credentials: &Credentials,
) -> Result<SignatureHeaders, AppError> {
    let timestamp = chrono::Utc::now().timestamp();
    let nonce = uuid::Uuid::new_v4().to_string();
    sign_with(url, method, body, credentials, timestamp, &nonce)
}
