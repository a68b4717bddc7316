//! Password verification and signed session tokens.
//!
//! The single configured credential is an Argon2id PHC string. A successful
//! login yields an HS256 JWT (`sub`, `iat`, `exp`) carried in the `token`
//! cookie; every protected request verifies signature and expiry. Nothing
//! about sessions is stored server-side.

use anyhow::{bail, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "token";

const MIN_SECRET_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,
    #[error("unsupported token algorithm")]
    UnsupportedAlgorithm,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

/// Claims carried by the session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Hash a password into an Argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| anyhow::anyhow!("Failed to encode salt: {}", e))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Check `password` against a PHC string. A malformed hash never verifies.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

/// HS256 signer/verifier for session tokens.
#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            bail!("token secret must be at least {} bytes", MIN_SECRET_LEN);
        }
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| anyhow::anyhow!("Invalid token secret: {}", e))?;
        Ok(Self { mac })
    }

    pub fn issue(&self, sub: &str, now: i64, ttl_secs: i64) -> Result<String> {
        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };
        let claims = Claims {
            sub: sub.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?)
        );

        let mut mac = self.mac.clone();
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }

    pub fn verify(&self, token: &str, now: i64) -> Result<Claims, AuthError> {
        let mut parts = token.split('.');
        let (header_b64, claims_b64, sig_b64) = match (parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(c), Some(s)) if parts.next().is_none() => (h, c, s),
            _ => return Err(AuthError::Malformed),
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(AuthError::UnsupportedAlgorithm);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::Malformed)?;
        let mut mac = self.mac.clone();
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims: Claims = decode_segment(claims_b64)?;
        if claims.exp <= now {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::Malformed)
}

/// Login checks, token issuance and admin membership for the one configured user.
pub struct Authenticator {
    username: String,
    password_hash: String,
    admins: HashSet<String>,
    signer: TokenSigner,
    ttl_secs: i64,
    cookie_secure: bool,
}

impl Authenticator {
    /// Build from config. `TUTOR_SECRET_KEY` overrides `auth.secret_key`.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let secret = std::env::var("TUTOR_SECRET_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| config.secret_key.clone());
        let secret = match secret {
            Some(s) => s,
            None => bail!("No token secret: set TUTOR_SECRET_KEY or auth.secret_key"),
        };

        if config.admin_users.is_empty() {
            tracing::warn!("auth.admin_users is empty; the dashboard is unreachable");
        }

        Ok(Self {
            username: config.username.clone(),
            password_hash: config.password_hash.clone(),
            admins: config.admin_users.iter().cloned().collect(),
            signer: TokenSigner::new(secret.as_bytes())?,
            ttl_secs: config.token_ttl_minutes * 60,
            cookie_secure: config.cookie_secure,
        })
    }

    /// Verify a login attempt.
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        // Always pay for the hash so unknown users cost the same as wrong passwords
        let password_ok = verify_password(password, &self.password_hash);
        password_ok && username == self.username
    }

    pub fn issue_token(&self, username: &str) -> Result<String> {
        self.signer
            .issue(username, chrono::Utc::now().timestamp(), self.ttl_secs)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.signer.verify(token, chrono::Utc::now().timestamp())
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admins.contains(username)
    }

    /// `Set-Cookie` value carrying a fresh session token.
    pub fn session_cookie(&self, token: &str) -> String {
        let mut cookie = format!(
            "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
            SESSION_COOKIE, token, self.ttl_secs
        );
        if self.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// `Set-Cookie` value that removes the session cookie.
    pub fn clear_cookie(&self) -> String {
        format!("{}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
    }
}

/// Value of cookie `name` from the request's `Cookie` headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}
