//! Level-2 request signing for the Polymarket CLOB.
//!
//! Every private CLOB call carries five `POLY_*` headers. The signature is an
//! HMAC-SHA256 over `timestamp + METHOD + path + body`, keyed with the
//! URL-safe base64 API secret and encoded the same way.

use base64::{engine::general_purpose::URL_SAFE as BASE64, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::errors::VenueError;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_ADDRESS: &str = "POLY_ADDRESS";
pub const HEADER_SIGNATURE: &str = "POLY_SIGNATURE";
pub const HEADER_TIMESTAMP: &str = "POLY_TIMESTAMP";
pub const HEADER_API_KEY: &str = "POLY_API_KEY";
pub const HEADER_PASSPHRASE: &str = "POLY_PASSPHRASE";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid API secret: {0}")]
    InvalidSecret(String),
    #[error("HMAC computation failed: {0}")]
    HmacError(String),
}

impl From<AuthError> for VenueError {
    fn from(err: AuthError) -> Self {
        VenueError::Authentication(err.to_string())
    }
}

/// API credentials for the CLOB.
#[derive(Clone)]
pub struct ApiCredentials {
    /// Wallet address the key was derived for.
    pub address: String,
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
}

impl ApiCredentials {
    /// Reads `POLYMARKET_ADDRESS`, `POLYMARKET_API_KEY`,
    /// `POLYMARKET_API_SECRET` and `POLYMARKET_API_PASSPHRASE`.
    ///
    /// Returns `None` unless all four are set.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            address: std::env::var("POLYMARKET_ADDRESS").ok()?,
            api_key: std::env::var("POLYMARKET_API_KEY").ok()?,
            api_secret: std::env::var("POLYMARKET_API_SECRET").ok()?,
            passphrase: std::env::var("POLYMARKET_API_PASSPHRASE").ok()?,
        })
    }

    pub fn new(
        address: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: passphrase.into(),
        }
    }

    /// HMAC-SHA256 over `timestamp + METHOD + path + body`.
    pub fn sign(
        &self,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<String, AuthError> {
        let message = format!("{}{}{}{}", timestamp, method.to_uppercase(), path, body);

        let secret_bytes = BASE64
            .decode(&self.api_secret)
            .map_err(|e| AuthError::InvalidSecret(e.to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&secret_bytes)
            .map_err(|e| AuthError::HmacError(e.to_string()))?;
        mac.update(message.as_bytes());

        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    /// Unix seconds, as the CLOB expects.
    pub fn timestamp() -> String {
        Utc::now().timestamp().to_string()
    }

    /// Headers for one signed request.
    pub fn auth_headers(
        &self,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<Vec<(&'static str, String)>, AuthError> {
        let timestamp = Self::timestamp();
        self.headers_at(&timestamp, method, path, body)
    }

    fn headers_at(
        &self,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<Vec<(&'static str, String)>, AuthError> {
        let signature = self.sign(timestamp, method, path, body)?;

        Ok(vec![
            (HEADER_ADDRESS, self.address.clone()),
            (HEADER_SIGNATURE, signature),
            (HEADER_TIMESTAMP, timestamp.to_string()),
            (HEADER_API_KEY, self.api_key.clone()),
            (HEADER_PASSPHRASE, self.passphrase.clone()),
        ])
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("address", &self.address)
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> ApiCredentials {
        ApiCredentials::new(
            "0xabc",
            "test_key",
            BASE64.encode(b"test_secret"),
            "test_pass",
        )
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let debug_str = format!("{:?}", creds());
        assert!(!debug_str.contains("test_key"));
        assert!(!debug_str.contains("dGVzdF9zZWNyZXQ"));
        assert!(!debug_str.contains("test_pass"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("0xabc"));
    }

    #[test]
    fn test_signature_is_deterministic() {
        let creds = creds();
        let a = creds.sign("1700000000", "get", "/data/orders", "").unwrap();
        let b = creds.sign("1700000000", "GET", "/data/orders", "").unwrap();
        assert_eq!(a, b);

        let c = creds.sign("1700000001", "GET", "/data/orders", "").unwrap();
        assert_ne!(a, c);

        // URL-safe alphabet only.
        assert!(!a.contains('+') && !a.contains('/'));
    }

    #[test]
    fn test_headers_carry_all_fields() {
        let headers = creds()
            .headers_at("1700000000", "DELETE", "/order", r#"{"orderID":"1"}"#)
            .unwrap();
        let names: Vec<&str> = headers.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            names,
            vec![
                HEADER_ADDRESS,
                HEADER_SIGNATURE,
                HEADER_TIMESTAMP,
                HEADER_API_KEY,
                HEADER_PASSPHRASE
            ]
        );
        assert_eq!(headers[2].1, "1700000000");
    }

    #[test]
    fn test_invalid_secret_is_an_auth_failure() {
        let creds = ApiCredentials::new("0xabc", "k", "not base64 !!", "p");
        let err: VenueError = creds.sign("1", "GET", "/", "").unwrap_err().into();
        assert!(matches!(err, VenueError::Authentication(_)));
    }
}
