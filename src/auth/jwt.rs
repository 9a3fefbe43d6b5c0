//! Token Service: signs and verifies HS256 bearer tokens.

use axum::extract::FromRef;
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use super::claims::{Claims, TokenKind};
use crate::{config::JwtConfig, state::AppState};

/// The only algorithm this service signs with or accepts.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Ten years. Longer lifetimes are a misconfiguration.
const MAX_TTL_MINUTES: i64 = 60 * 24 * 365 * 10;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token has expired")]
    Expired,
    #[error("token claims are malformed")]
    MalformedClaims,
    #[error("failed to sign token: {0}")]
    Signing(String),
    #[error("invalid token configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl FromRef<AppState> for TokenService {
    fn from_ref(state: &AppState) -> Self {
        state.auth.tokens().clone()
    }
}

impl TokenService {
    pub fn new(cfg: &JwtConfig) -> Result<Self, TokenError> {
        if cfg.secret.is_empty() {
            return Err(TokenError::Signing("signing secret is empty".into()));
        }
        let access_ttl = ttl("access", cfg.access_ttl_minutes)?;
        let refresh_ttl = ttl("refresh", cfg.refresh_ttl_minutes)?;

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_issuer(std::slice::from_ref(&cfg.issuer));
        validation.set_audience(std::slice::from_ref(&cfg.audience));
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Ok(Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            validation,
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl,
            refresh_ttl,
        })
    }

    /// Mints an access/refresh pair for `user_id`.
    pub fn issue(&self, user_id: Uuid) -> Result<TokenPair, TokenError> {
        let now = OffsetDateTime::now_utc();
        Ok(TokenPair {
            access_token: self.sign_at(user_id, TokenKind::Access, now)?,
            refresh_token: self.sign_at(user_id, TokenKind::Refresh, now)?,
        })
    }

    pub(crate) fn sign_at(
        &self,
        user_id: Uuid,
        kind: TokenKind,
        issued_at: OffsetDateTime,
    ) -> Result<String, TokenError> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: user_id,
            iat: issued_at.unix_timestamp(),
            exp: (issued_at + ttl).unix_timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4(),
            kind,
        };
        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        debug!(user_id = %user_id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    /// Checks algorithm, signature, issuer, audience and expiry, in that order.
    /// A token is expired from the second its `exp` is reached.
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(|e| {
            debug!(error = %e, "unreadable token header");
            TokenError::Invalid
        })?;
        if header.alg != ALGORITHM {
            warn!(alg = ?header.alg, "rejected token with unexpected signing algorithm");
            return Err(TokenError::Invalid);
        }

        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(map_jwt_error)?;
        // jsonwebtoken only rejects `exp < now`.
        if data.claims.exp <= OffsetDateTime::now_utc().unix_timestamp() {
            return Err(TokenError::Expired);
        }
        debug!(user_id = %data.claims.sub, kind = ?data.claims.kind, "jwt verified");
        Ok(data.claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<Uuid, TokenError> {
        self.verify_kind(token, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Uuid, TokenError> {
        self.verify_kind(token, TokenKind::Refresh)
    }

    fn verify_kind(&self, token: &str, expected: TokenKind) -> Result<Uuid, TokenError> {
        let claims = self.verify(token)?;
        if claims.kind != expected {
            warn!(user_id = %claims.sub, kind = ?claims.kind, expected = ?expected, "wrong token kind");
            return Err(TokenError::Invalid);
        }
        Ok(claims.sub)
    }
}

fn ttl(name: &str, minutes: i64) -> Result<Duration, TokenError> {
    if minutes <= 0 || minutes > MAX_TTL_MINUTES {
        return Err(TokenError::Config(format!(
            "{name} ttl must be between 1 and {MAX_TTL_MINUTES} minutes, got {minutes}"
        )));
    }
    Ok(Duration::minutes(minutes))
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> TokenError {
    match e.kind() {
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::Json(_) | ErrorKind::MissingRequiredClaim(_) => TokenError::MalformedClaims,
        _ => {
            debug!(error = %e, "jwt rejected");
            TokenError::Invalid
        }
    }
}
