use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Hard ceiling on how long a device token is honored after issuance,
/// regardless of how generous its `exp` claim is. Bounds the replay window.
pub const DEFAULT_MAX_LIFETIME_SECS: i64 = 300;

/// Tolerance for device clocks running slightly ahead of the server's.
pub const DEFAULT_LEEWAY_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed: {0}")]
    Malformed(&'static str),

    #[error("token signature is invalid")]
    BadSignature,

    #[error("token is missing required iat/exp claims")]
    MissingClaims,

    /// Issued-at lies in the future beyond clock-skew tolerance.
    #[error("token is not yet valid")]
    NotYetValid,

    #[error("token has expired")]
    Expired,

    /// `exp` may still be ahead, but the token is older than the server
    /// allows any token to live.
    #[error("token lifetime exceeds the allowed maximum")]
    LifetimeExceeded,
}

impl TokenError {
    /// Stable machine-readable reason, surfaced so a device knows whether to
    /// mint a fresh token.
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Malformed(_) => "token_malformed",
            TokenError::BadSignature => "bad_signature",
            TokenError::MissingClaims => "missing_claims",
            TokenError::NotYetValid => "token_not_yet_valid",
            TokenError::Expired => "token_expired",
            TokenError::LifetimeExceeded => "token_lifetime_exceeded",
        }
    }
}

/// Wire shape of a signed token: timing claims plus a flattened payload.
#[derive(Debug, Serialize, Deserialize)]
struct ClaimsEnvelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
    #[serde(flatten)]
    payload: T,
}

/// A token that passed signature and timing checks.
#[derive(Debug, Clone)]
pub struct VerifiedClaims<T> {
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub payload: T,
}

/// HS256 verifier. Pure: callers supply `now`, so timing behavior is fully
/// testable.
pub struct TokenVerifier {
    secret: String,
    max_lifetime_secs: i64,
    leeway_secs: i64,
}

impl TokenVerifier {
    pub fn new(secret: String, max_lifetime_secs: i64, leeway_secs: i64) -> Self {
        Self {
            secret,
            max_lifetime_secs,
            leeway_secs,
        }
    }

    /// Signature first, then timing: not-yet-valid, expired, and over-lifetime
    /// are reported as distinct reasons.
    pub fn verify<T: DeserializeOwned>(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<VerifiedClaims<T>, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Timing is checked manually below against the caller's clock.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = decode::<ClaimsEnvelope<T>>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::BadSignature,
            jsonwebtoken::errors::ErrorKind::Json(_) => {
                TokenError::Malformed("claims do not match the expected shape")
            }
            _ => TokenError::Malformed("not a valid JWT"),
        })?;

        let (Some(iat), Some(exp)) = (data.claims.iat, data.claims.exp) else {
            return Err(TokenError::MissingClaims);
        };

        let now_secs = now.timestamp();
        if now_secs < iat - self.leeway_secs {
            return Err(TokenError::NotYetValid);
        }
        if now_secs >= exp {
            return Err(TokenError::Expired);
        }
        if now_secs >= iat + self.max_lifetime_secs {
            return Err(TokenError::LifetimeExceeded);
        }

        Ok(VerifiedClaims {
            issued_at: DateTime::from_timestamp(iat, 0).unwrap_or_default(),
            expires_at: DateTime::from_timestamp(exp, 0).unwrap_or_default(),
            payload: data.claims.payload,
        })
    }

    /// Mints a token; used by device provisioning tools and tests.
    pub fn issue<T: Serialize>(
        &self,
        payload: &T,
        issued_at: DateTime<Utc>,
        ttl_secs: i64,
    ) -> anyhow::Result<String> {
        let iat = issued_at.timestamp();
        let claims = ClaimsEnvelope {
            iat: Some(iat),
            exp: Some(iat + ttl_secs),
            payload,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )?;
        Ok(token)
    }
}

/// Token extracted from a request body, with the optional explicit identity
/// key that rides alongside it in the JSON form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyToken {
    pub token: String,
    pub identity_key: Option<String>,
}

#[derive(Deserialize)]
struct TokenEnvelope {
    token: Option<String>,
    #[serde(rename = "identityKey")]
    identity_key: Option<String>,
}

/// Pulls the device token out of a request body. Two accepted shapes: the
/// raw compact JWT as the whole body, or `{"token": "...", "identityKey"?}`.
pub fn extract_body_token(body: &[u8]) -> Option<BodyToken> {
    let text = std::str::from_utf8(body).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    if text.starts_with('{') {
        let envelope: TokenEnvelope = serde_json::from_str(text).ok()?;
        let token = envelope.token.filter(|t| !t.is_empty())?;
        return Some(BodyToken {
            token,
            identity_key: envelope.identity_key,
        });
    }
    Some(BodyToken {
        token: text.to_string(),
        identity_key: None,
    })
}

#[derive(Deserialize)]
struct IdentityPeek {
    #[serde(rename = "identityKey")]
    identity_key: Option<String>,
}

/// Reads the identity key out of a token WITHOUT verifying the signature.
///
/// Only safe for rate-governor bucketing: a forged key costs the forger its
/// own rate budget, and the real verification still happens in the handler.
pub fn peek_identity_key(token: &str) -> Option<String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();
    decode::<IdentityPeek>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()?
        .claims
        .identity_key
}
