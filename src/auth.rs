//! Bithumb API authentication
//!
//! Private endpoints are signed with HMAC-SHA512:
//! 1. Collect the request params plus `nonce` in key order
//! 2. Build `k=v&k=v` from them
//! 3. HMAC-SHA512(endpoint + "\0" + query, base64_decode(api_secret))
//! 4. Base64 encode the HMAC result for the Api-Sign header

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("API credentials not configured")]
    NotConfigured,
    #[error("Invalid API secret: {0}")]
    InvalidSecret(String),
}

/// A signed private request ready to be sent as a form body
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub body: String,
    pub api_key: String,
    pub signature: String,
    pub nonce: u64,
}

pub struct BithumbAuth {
    api_key: String,
    api_secret: Vec<u8>,
    nonce_counter: AtomicU64,
}

impl BithumbAuth {
    /// Create a new authenticator with API credentials
    pub fn new(api_key: String, api_secret: String) -> Result<Self, AuthError> {
        let decoded_secret = BASE64
            .decode(api_secret.trim())
            .map_err(|e| AuthError::InvalidSecret(e.to_string()))?;

        let initial_nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Ok(Self {
            api_key,
            api_secret: decoded_secret,
            nonce_counter: AtomicU64::new(initial_nonce),
        })
    }

    /// Authenticator without credentials; every signing attempt fails
    pub fn new_public_only() -> Self {
        Self {
            api_key: String::new(),
            api_secret: Vec::new(),
            nonce_counter: AtomicU64::new(0),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    fn next_nonce(&self) -> u64 {
        self.nonce_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// `k=v` pairs joined by `&`, keys in ascending order
    pub fn query_string(params: &BTreeMap<String, String>) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn sign(&self, endpoint: &str, query: &str) -> Result<String, AuthError> {
        if !self.is_configured() {
            return Err(AuthError::NotConfigured);
        }

        let mut mac = HmacSha512::new_from_slice(&self.api_secret)
            .map_err(|e| AuthError::InvalidSecret(e.to_string()))?;
        mac.update(endpoint.as_bytes());
        mac.update(b"\0");
        mac.update(query.as_bytes());

        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Adds a fresh nonce to `params` and signs the resulting query.
    pub fn sign_request(
        &self,
        endpoint: &str,
        mut params: BTreeMap<String, String>,
    ) -> Result<SignedRequest, AuthError> {
        if !self.is_configured() {
            return Err(AuthError::NotConfigured);
        }

        let nonce = self.next_nonce();
        params.insert("nonce".to_string(), nonce.to_string());
        let body = Self::query_string(&params);
        let signature = self.sign(endpoint, &body)?;

        Ok(SignedRequest {
            body,
            api_key: self.api_key.clone(),
            signature,
            nonce,
        })
    }

    /// Get API key (for display/logging - redacted)
    pub fn get_api_key_redacted(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() > 8 {
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        } else {
            "****".to_string()
        }
    }
}
