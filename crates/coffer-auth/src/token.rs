//! Signed session tokens
//!
//! A token is an HS256 JWT carrying the login (`sub`) and the PEM public key
//! (`pk`) the caller registered or logged in with. Tokens are stateless and
//! cannot be revoked before `exp`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use coffer_core::VaultError;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifetime of every issued token.
pub const TOKEN_TTL: Duration = Duration::from_secs(3 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Login of the authenticated user
    pub sub: String,
    /// Caller's RSA public key, PKCS#1 PEM
    pub pk: String,
    /// Issued at (Unix seconds)
    pub iat: u64,
    /// Expiry (Unix seconds)
    pub exp: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token signature")]
    InvalidSignature,

    #[error("unsupported token algorithm")]
    UnsupportedAlgorithm,

    #[error("token expired")]
    Expired,

    #[error("token encoding failed: {0}")]
    Encode(String),
}

impl From<TokenError> for VaultError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encode(m) => VaultError::Internal(m),
            other => VaultError::Unauthenticated(other.to_string()),
        }
    }
}

/// Issues and verifies tokens with one shared secret.
#[derive(Clone)]
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenAuthority {
    pub fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation,
        }
    }

    /// Issue a token valid for [`TOKEN_TTL`].
    pub fn issue(&self, login: &str, public_key: &str) -> Result<String, TokenError> {
        let now = unix_now();
        self.issue_until(login, public_key, now + TOKEN_TTL.as_secs())
    }

    /// Issue a token expiring at `exp` (Unix seconds).
    pub fn issue_until(&self, login: &str, public_key: &str, exp: u64) -> Result<String, TokenError> {
        let claims = Claims {
            sub: login.to_string(),
            pk: public_key.to_string(),
            iat: unix_now(),
            exp,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| TokenError::Encode(e.to_string()))
    }

    /// Verify signature, algorithm, and expiry, returning the claims.
    pub fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        if header_alg(token).is_some_and(|alg| alg != "HS256") {
            return Err(TokenError::UnsupportedAlgorithm);
        }
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidAlgorithm => TokenError::UnsupportedAlgorithm,
                _ => TokenError::InvalidSignature,
            })
    }
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

/// The header's `alg` as written, including names jsonwebtoken cannot
/// represent such as `none`. `None` if the header is not readable JSON.
fn header_alg(token: &str) -> Option<String> {
    let header = token.split('.').next()?;
    let bytes = URL_SAFE_NO_PAD.decode(header).ok()?;
    serde_json::from_slice::<RawHeader>(&bytes).ok().map(|h| h.alg)
}

impl std::fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PK: &str = "-----BEGIN RSA PUBLIC KEY-----\nMIIB\n-----END RSA PUBLIC KEY-----\n";

    fn authority(secret: &str) -> TokenAuthority {
        TokenAuthority::new(&SecretString::from(secret.to_string()))
    }

    #[test]
    fn test_issue_parse_roundtrip() {
        let auth = authority("s3cret");
        let token = auth.issue("alice", PK).unwrap();
        let claims = auth.parse(&token).unwrap();

        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.pk, PK);
        assert_eq!(claims.exp - claims.iat, TOKEN_TTL.as_secs());
    }

    #[test]
    fn test_expired_token() {
        let auth = authority("s3cret");
        let token = auth.issue_until("alice", PK, unix_now() - 10).unwrap();
        assert_eq!(auth.parse(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_wrong_secret() {
        let token = authority("s3cret").issue("alice", PK).unwrap();
        assert_eq!(authority("other").parse(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_other_algorithm_rejected() {
        let claims = Claims {
            sub: "alice".into(),
            pk: PK.into(),
            iat: unix_now(),
            exp: unix_now() + 60,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(b"s3cret"),
        )
        .unwrap();

        assert_eq!(
            authority("s3cret").parse(&token),
            Err(TokenError::UnsupportedAlgorithm)
        );
    }

    #[test]
    fn test_none_algorithm_rejected() {
        let auth = authority("s3cret");
        let token = auth.issue("alice", PK).unwrap();
        let payload = token.split('.').nth(1).unwrap();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);

        let unsigned = format!("{header}.{payload}.");
        assert_eq!(auth.parse(&unsigned), Err(TokenError::UnsupportedAlgorithm));
    }

    #[test]
    fn test_header_alg() {
        let token = authority("s3cret").issue("alice", PK).unwrap();
        assert_eq!(header_alg(&token).as_deref(), Some("HS256"));
        assert_eq!(header_alg("not.a.jwt"), None);
        assert_eq!(header_alg(""), None);
    }

    #[test]
    fn test_garbage_token() {
        let auth = authority("s3cret");
        assert_eq!(auth.parse("not.a.jwt"), Err(TokenError::InvalidSignature));
        assert_eq!(auth.parse(""), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_tampered_payload() {
        let auth = authority("s3cret");
        let token = auth.issue("alice", PK).unwrap();
        let mallory = auth.issue("mallory", PK).unwrap();

        // alice's header and signature around mallory's claims
        let parts: Vec<&str> = token.split('.').collect();
        let forged_payload = mallory.split('.').nth(1).unwrap();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(auth.parse(&forged), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_errors_map_to_unauthenticated() {
        for err in [
            TokenError::Expired,
            TokenError::InvalidSignature,
            TokenError::UnsupportedAlgorithm,
        ] {
            assert!(matches!(VaultError::from(err), VaultError::Unauthenticated(_)));
        }
    }
}
