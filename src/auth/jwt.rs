//! Token Issuer. Access and refresh tokens are signed with DISTINCT secrets
//! and expiry windows, so a token minted for one role can never verify under
//! the other. Rotating either secret invalidates all outstanding tokens of
//! that kind.

use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::state::AppState;
use crate::users::repo::User;

/// Claims of a short-lived access token. Carries the identity fields
/// clients read out of the session, not just the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub username: String,
    pub email: String,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

/// Claims of a refresh token: the user id plus a random token id. The jti
/// keeps two mints within the same second from producing identical tokens,
/// which single-use rotation depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub jti: Uuid,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

/// Signing/verification material, loaded once from config.
#[derive(Clone)]
pub struct JwtKeys {
    pub access_encoding: EncodingKey,
    pub access_decoding: DecodingKey,
    pub refresh_encoding: EncodingKey,
    pub refresh_decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::from_config(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(cfg.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(cfg.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs(cfg.access_ttl_minutes.max(0) as u64 * 60),
            refresh_ttl: Duration::from_secs(cfg.refresh_ttl_minutes.max(0) as u64 * 60),
        }
    }

    fn window(&self, ttl: Duration) -> (usize, usize) {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        (now.unix_timestamp() as usize, exp.unix_timestamp() as usize)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation
    }

    pub fn sign_access(&self, user: &User) -> anyhow::Result<String> {
        let (iat, exp) = self.window(self.access_ttl);
        let claims = AccessClaims {
            sub: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.access_encoding)?;
        debug!(user_id = %user.id, "access token signed");
        Ok(token)
    }

    pub fn sign_refresh(&self, user_id: Uuid) -> anyhow::Result<String> {
        let (iat, exp) = self.window(self.refresh_ttl);
        let claims = RefreshClaims {
            sub: user_id,
            jti: Uuid::new_v4(),
            iat,
            exp,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.refresh_encoding)?;
        debug!(user_id = %user_id, "refresh token signed");
        Ok(token)
    }

    pub fn verify_access(&self, token: &str) -> anyhow::Result<AccessClaims> {
        let data = decode::<AccessClaims>(token, &self.access_decoding, &self.validation())?;
        debug!(user_id = %data.claims.sub, "access token verified");
        Ok(data.claims)
    }

    pub fn verify_refresh(&self, token: &str) -> anyhow::Result<RefreshClaims> {
        let data = decode::<RefreshClaims>(token, &self.refresh_decoding, &self.validation())?;
        debug!(user_id = %data.claims.sub, "refresh token verified");
        Ok(data.claims)
    }
}
