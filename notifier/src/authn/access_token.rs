//! Access token handling

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Claims carried by a JWT access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    #[serde(default)]
    pub sub: Option<String>,

    /// Issued at timestamp
    #[serde(default)]
    pub iat: Option<i64>,

    /// Expiration timestamp
    pub exp: i64,
}

/// An access token returned by the login endpoint
///
/// Tokens that are not JWTs are kept as opaque strings without expiry.
#[derive(Debug)]
pub struct AccessToken {
    raw: SecretString,
    claims: Option<AccessTokenClaims>,
}

impl AccessToken {
    /// Wrap a raw token, decoding its claims when it is a JWT.
    /// The signature is NOT validated; the backend does that.
    pub fn from_raw(raw: String) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = decode::<AccessTokenClaims>(&raw, &DecodingKey::from_secret(b""), &validation)
            .ok()
            .map(|data| data.claims);

        Self {
            raw: SecretString::from(raw),
            claims,
        }
    }

    /// The raw token, for Authorization headers
    pub fn expose(&self) -> &str {
        self.raw.expose_secret()
    }

    pub fn claims(&self) -> Option<&AccessTokenClaims> {
        self.claims.as_ref()
    }

    /// Check if the token is expired. Opaque tokens never expire locally.
    pub fn is_expired(&self) -> bool {
        match &self.claims {
            Some(claims) => claims.exp < Utc::now().timestamp(),
            None => false,
        }
    }

    /// Get expiration time, if known
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.claims
            .as_ref()
            .and_then(|claims| DateTime::from_timestamp(claims.exp, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn jwt(exp: i64) -> String {
        let claims = AccessTokenClaims {
            sub: Some("u1".to_string()),
            iat: Some(0),
            exp,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"server-secret")).unwrap()
    }

    #[test]
    fn test_opaque_token_never_expires() {
        let token = AccessToken::from_raw("opaque-token".to_string());
        assert!(token.claims().is_none());
        assert!(!token.is_expired());
        assert!(token.expires_at().is_none());
        assert_eq!(token.expose(), "opaque-token");
    }

    #[test]
    fn test_jwt_expiry() {
        let expired = AccessToken::from_raw(jwt(Utc::now().timestamp() - 60));
        assert!(expired.is_expired());

        let valid = AccessToken::from_raw(jwt(Utc::now().timestamp() + 3600));
        assert!(!valid.is_expired());
        assert_eq!(valid.claims().and_then(|c| c.sub.as_deref()), Some("u1"));
        assert!(valid.expires_at().is_some());
    }
}
