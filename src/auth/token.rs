//! Compact HMAC-SHA256 bearer tokens.
//!
//! Layout: `base64url(header).base64url(payload).base64url(signature)`, no
//! padding. The header is constant; the payload carries exactly `tenant_id`
//! and `exp` (Unix seconds). Tokens are stateless, so verification recomputes
//! everything from the token string and the signing key.

use super::error::AuthError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Signing algorithm advertised in every token header.
pub const TOKEN_ALGORITHM: &str = "HS256";

/// Token type advertised in every token header.
pub const TOKEN_TYPE: &str = "JWT";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Claims embedded in a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Claims {
    pub tenant_id: String,
    /// Expiry as Unix seconds. The token is valid while `now < exp`.
    pub exp: i64,
}

impl Claims {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }
}

/// Signs and verifies tokens with a process-wide symmetric key.
#[derive(Clone)]
pub struct TokenSigner {
    mac: HmacSha256,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret_key: &[u8]) -> Self {
        let mac = HmacSha256::new_from_slice(secret_key).expect("HMAC can accept any key length");
        Self { mac }
    }

    /// Encode and sign `claims` into the compact three-segment form.
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        let header = serde_json::to_vec(&Header {
            alg: TOKEN_ALGORITHM.into(),
            typ: TOKEN_TYPE.into(),
        })?;
        let payload = serde_json::to_vec(claims)?;

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = self.signature(signing_input.as_bytes());

        Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    /// Verify structure, signature and expiry against the current clock.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.verify_at(token, now_unix())
    }

    /// Verify structure, signature and expiry against an explicit `now`.
    ///
    /// A bad signature is reported as [`AuthError::InvalidToken`] even when
    /// the (untrusted) expiry has also passed.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, AuthError> {
        let claims = self.decode(token)?;
        if claims.is_expired_at(now) {
            return Err(AuthError::ExpiredToken);
        }
        Ok(claims)
    }

    fn decode(&self, token: &str) -> Result<Claims, AuthError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AuthError::InvalidToken);
        };
        if header_b64.is_empty() || payload_b64.is_empty() || signature_b64.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let header: Header = decode_segment(header_b64)?;
        if header.alg != TOKEN_ALGORITHM || header.typ != TOKEN_TYPE {
            return Err(AuthError::InvalidToken);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| AuthError::InvalidToken)?;
        let signing_input_len = header_b64.len() + 1 + payload_b64.len();
        let mut mac = self.mac.clone();
        mac.update(&token.as_bytes()[..signing_input_len]);
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::InvalidToken)?;

        decode_segment(payload_b64)
    }

    fn signature(&self, signing_input: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(signing_input);
        mac.finalize().into_bytes().to_vec()
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::InvalidToken)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::InvalidToken)
}

/// Current Unix epoch in seconds.
pub fn now_unix() -> i64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}
